use crate::history::{ProbeOutcome, ProbeRecord};
use crate::target::{LocalState, Target};
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant, SystemTime};

/// Local probes have no IP target; the history ring records this
/// placeholder.
const NO_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Take the next sequence number for a local probe and record it as
/// outstanding.
pub fn prepare_local_probe(
    state: &mut LocalState,
    now: Instant,
    wall: SystemTime,
) -> crate::types::Sequence {
    let seq = state.snxt;
    state.ring.record(ProbeRecord::new(seq, NO_ADDR, wall, now));
    state.snxt = seq.next();
    seq
}

/// Mark outstanding local probes past their deadline as lost.
pub fn mark_local_timeouts(state: &mut LocalState, now: Instant, timeout: Duration) {
    for back in 1..=crate::constants::MAX_OUTSTANDING_PROBES as u16 {
        let seq = crate::types::Sequence(state.snxt.0.wrapping_sub(back));
        if let Some(record) = state.ring.get_mut(seq) {
            if record.outcome == ProbeOutcome::Unacked && now >= record.sent_at + timeout {
                record.outcome = ProbeOutcome::Lost;
            }
        }
    }
}

/// Process a peer's acknowledgment of a local probe.
///
/// Returns `true` when the acknowledgment was accepted: the sequence number
/// lies inside the window, the slot still holds it, and it has not already
/// been acknowledged.
pub fn record_local_ack(target: &mut Target, seq: crate::types::Sequence, now: Instant) -> bool {
    let Some(state) = target.local_state_mut() else {
        return false;
    };
    if !state.ring.in_window(state.snxt, seq) {
        return false;
    }
    let accepted = match state.ring.get_mut(seq) {
        Some(record) if record.outcome != ProbeOutcome::Acked => {
            record.outcome = ProbeOutcome::Acked;
            record.acked_at = Some(now);
            true
        }
        _ => false,
    };
    if accepted {
        target.acks_in_row += 1;
    }
    accepted
}

/// Is the peer behind this local target reachable?
///
/// Reachability requires a full run of consecutive local probe successes so
/// a single lucky frame cannot vouch for a flapping path.
#[must_use]
pub fn peer_reachable(target: &Target, repair_count: usize) -> bool {
    target.acks_in_row >= repair_count
}

/// Consecutive local probe losses to this peer.
#[must_use]
pub fn consecutive_local_losses(target: &Target) -> usize {
    target
        .local_state()
        .map_or(0, |state| state.ring.consecutive_lost(state.snxt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PhyintId, Sequence};

    #[test]
    fn test_prepare_advances_sequence() {
        let mut target = Target::local(PhyintId(1));
        let state = target.local_state_mut().unwrap();
        let now = Instant::now();
        let wall = SystemTime::UNIX_EPOCH;
        assert_eq!(Sequence(0), prepare_local_probe(state, now, wall));
        assert_eq!(Sequence(1), prepare_local_probe(state, now, wall));
        assert_eq!(Sequence(2), state.snxt);
    }

    #[test]
    fn test_ack_run_builds_reachability() {
        let mut target = Target::local(PhyintId(1));
        let now = Instant::now();
        let wall = SystemTime::UNIX_EPOCH;
        for _ in 0..3 {
            let seq = prepare_local_probe(target.local_state_mut().unwrap(), now, wall);
            assert!(record_local_ack(&mut target, seq, now));
        }
        assert!(peer_reachable(&target, 3));
        assert!(!peer_reachable(&target, 4));
    }

    #[test]
    fn test_duplicate_ack_rejected() {
        let mut target = Target::local(PhyintId(1));
        let now = Instant::now();
        let seq = prepare_local_probe(
            target.local_state_mut().unwrap(),
            now,
            SystemTime::UNIX_EPOCH,
        );
        assert!(record_local_ack(&mut target, seq, now));
        assert!(!record_local_ack(&mut target, seq, now));
        assert_eq!(1, target.acks_in_row);
    }

    #[test]
    fn test_out_of_window_ack_rejected() {
        let mut target = Target::local(PhyintId(1));
        let now = Instant::now();
        prepare_local_probe(
            target.local_state_mut().unwrap(),
            now,
            SystemTime::UNIX_EPOCH,
        );
        assert!(!record_local_ack(&mut target, Sequence(100), now));
    }

    #[test]
    fn test_timeouts_accumulate_losses() {
        let mut target = Target::local(PhyintId(1));
        let now = Instant::now();
        let wall = SystemTime::UNIX_EPOCH;
        let timeout = Duration::from_millis(1000);
        for step in 0..4_u32 {
            let at = now + timeout * step;
            let state = target.local_state_mut().unwrap();
            mark_local_timeouts(state, at, timeout);
            prepare_local_probe(state, at, wall);
        }
        let state = target.local_state_mut().unwrap();
        mark_local_timeouts(state, now + timeout * 5, timeout);
        assert!(consecutive_local_losses(&target) >= 3);
    }
}
