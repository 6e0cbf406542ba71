use crate::types::Sequence;
use std::net::IpAddr;
use std::time::{Instant, SystemTime};

/// The fate of a probe recorded in a history ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Sent, no acknowledgment yet.
    Unacked,
    /// Acknowledged by the target.
    Acked,
    /// Timed out without an acknowledgment.
    Lost,
}

/// One probe in a history ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRecord {
    /// The sequence number the probe was sent with.
    pub seq: Sequence,
    /// The target the probe was sent to.
    pub target: IpAddr,
    /// Wall clock time the probe was sent, as carried in the payload.
    pub sent_wall: SystemTime,
    /// Monotonic time the probe was sent.
    pub sent_at: Instant,
    /// Monotonic time the acknowledgment was processed.
    pub acked_at: Option<Instant>,
    /// The probe's fate.
    pub outcome: ProbeOutcome,
}

impl ProbeRecord {
    #[must_use]
    pub const fn new(seq: Sequence, target: IpAddr, sent_wall: SystemTime, sent_at: Instant) -> Self {
        Self {
            seq,
            target,
            sent_wall,
            sent_at,
            acked_at: None,
            outcome: ProbeOutcome::Unacked,
        }
    }
}

/// A fixed-size history of the most recently sent probes.
///
/// Slots are keyed by sequence number modulo the ring size and overwritten in
/// place as the sequence advances; no allocation occurs per probe.  A reply
/// is only ever matched against the slot whose recorded sequence number is
/// identical, so stale slots can never satisfy a lookup.
#[derive(Debug, Clone)]
pub struct ProbeRing {
    slots: Vec<Option<ProbeRecord>>,
}

impl ProbeRing {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            slots: vec![None; size],
        }
    }

    /// The number of slots in the ring.
    #[must_use]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Is `seq` inside the acceptance window `[snxt - size, snxt)`?
    #[must_use]
    pub fn in_window(&self, snxt: Sequence, seq: Sequence) -> bool {
        let back = snxt.distance_back(seq);
        back >= 1 && back as usize <= self.size()
    }

    /// Record a probe, overwriting whatever previously occupied its slot.
    pub fn record(&mut self, record: ProbeRecord) {
        let index = self.index_of(record.seq);
        self.slots[index] = Some(record);
    }

    /// The record for `seq`, if its slot still holds that sequence number.
    #[must_use]
    pub fn get(&self, seq: Sequence) -> Option<&ProbeRecord> {
        self.slots[self.index_of(seq)]
            .as_ref()
            .filter(|record| record.seq == seq)
    }

    /// The mutable record for `seq`, if its slot still holds that sequence
    /// number.
    pub fn get_mut(&mut self, seq: Sequence) -> Option<&mut ProbeRecord> {
        let index = self.index_of(seq);
        self.slots[index]
            .as_mut()
            .filter(|record| record.seq == seq)
    }

    /// The record `back` places behind `snxt` (`back = 1` is the most
    /// recently sent probe).
    #[must_use]
    pub fn at_back(&self, snxt: Sequence, back: u16) -> Option<&ProbeRecord> {
        self.get(Sequence(snxt.0.wrapping_sub(back)))
    }

    /// The number of consecutive lost probes ending at the most recently
    /// resolved probe.
    ///
    /// Probes still awaiting acknowledgment are skipped; an acknowledged
    /// probe ends the run.
    #[must_use]
    pub fn consecutive_lost(&self, snxt: Sequence) -> usize {
        let mut lost = 0;
        for back in 1..=self.size() as u16 {
            match self.at_back(snxt, back).map(|record| record.outcome) {
                Some(ProbeOutcome::Unacked) => {}
                Some(ProbeOutcome::Lost) => lost += 1,
                Some(ProbeOutcome::Acked) | None => break,
            }
        }
        lost
    }

    /// The send time of the oldest probe in the current run of consecutive
    /// losses.
    #[must_use]
    pub fn first_lost_sent_at(&self, snxt: Sequence) -> Option<Instant> {
        let mut first = None;
        for back in 1..=self.size() as u16 {
            match self.at_back(snxt, back) {
                Some(record) if record.outcome == ProbeOutcome::Unacked => {}
                Some(record) if record.outcome == ProbeOutcome::Lost => {
                    first = Some(record.sent_at);
                }
                _ => break,
            }
        }
        first
    }

    /// Discard all recorded probes.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    fn index_of(&self, seq: Sequence) -> usize {
        seq.0 as usize % self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use test_case::test_case;

    fn target() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))
    }

    fn record(seq: u16, sent_at: Instant) -> ProbeRecord {
        ProbeRecord::new(Sequence(seq), target(), SystemTime::UNIX_EPOCH, sent_at)
    }

    #[test_case(100, 100, false; "at snxt")]
    #[test_case(100, 99, true; "most recent")]
    #[test_case(100, 36, true; "oldest in window")]
    #[test_case(100, 35, false; "behind window")]
    #[test_case(100, 101, false; "ahead of snxt")]
    #[test_case(10, u16::MAX - 10, true; "wraps into window")]
    #[test_case(10, u16::MAX - 60, false; "wraps past window")]
    fn test_window(snxt: u16, seq: u16, expected: bool) {
        let ring = ProbeRing::new(64);
        assert_eq!(expected, ring.in_window(Sequence(snxt), Sequence(seq)));
    }

    #[test]
    fn test_slot_reuse_requires_matching_sequence() {
        let now = Instant::now();
        let mut ring = ProbeRing::new(64);
        ring.record(record(5, now));
        assert!(ring.get(Sequence(5)).is_some());
        // Sequence 69 lands in the same slot; the old record is gone.
        ring.record(record(69, now));
        assert!(ring.get(Sequence(5)).is_none());
        assert!(ring.get(Sequence(69)).is_some());
    }

    #[test]
    fn test_consecutive_lost_skips_outstanding() {
        let now = Instant::now();
        let mut ring = ProbeRing::new(64);
        for seq in 0..5_u16 {
            let mut rec = record(seq, now + Duration::from_secs(u64::from(seq)));
            rec.outcome = ProbeOutcome::Lost;
            ring.record(rec);
        }
        // The two most recent probes are still outstanding.
        ring.record(record(5, now + Duration::from_secs(5)));
        ring.record(record(6, now + Duration::from_secs(6)));
        assert_eq!(5, ring.consecutive_lost(Sequence(7)));
        assert_eq!(Some(now), ring.first_lost_sent_at(Sequence(7)));
    }

    #[test]
    fn test_ack_ends_loss_run() {
        let now = Instant::now();
        let mut ring = ProbeRing::new(64);
        let mut acked = record(0, now);
        acked.outcome = ProbeOutcome::Acked;
        ring.record(acked);
        let mut lost_one = record(1, now);
        lost_one.outcome = ProbeOutcome::Lost;
        ring.record(lost_one);
        let mut lost_two = record(2, now);
        lost_two.outcome = ProbeOutcome::Lost;
        ring.record(lost_two);
        assert_eq!(2, ring.consecutive_lost(Sequence(3)));
        assert_eq!(Some(now), ring.first_lost_sent_at(Sequence(3)));
    }

    #[test]
    fn test_clear() {
        let mut ring = ProbeRing::new(16);
        ring.record(record(1, Instant::now()));
        ring.clear();
        assert!(ring.get(Sequence(1)).is_none());
        assert_eq!(0, ring.consecutive_lost(Sequence(2)));
    }
}
