use crate::constants::{EXCEPTION_FACTOR, LOCAL_RING_SIZE, MAX_PROBE_TARGETS, MIN_PROBE_TARGETS};
use crate::history::ProbeRing;
use crate::rtt::TargetRtt;
use crate::types::{PhyintId, Sequence};
use std::net::IpAddr;
use std::time::Duration;

/// The status of a probe target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    /// In the probe rotation.
    Active,
    /// Known but not currently probed.
    Unused,
    /// Provably slower than its peers; kept but out of the rotation.
    Slow,
    /// Unresponsive; kept only until the next discovery scan.
    Dead,
}

/// The payload of a probe target.
///
/// The two shapes are selected at construction time and never reinterpreted;
/// accessors return `None` rather than reading the wrong arm.
#[derive(Debug, Clone)]
pub enum TargetKind {
    /// An external host or router probed over ICMP.
    Icmp { addr: IpAddr },
    /// A peer interface probed at the link layer for transitive liveness.
    Local(LocalState),
}

/// Probe bookkeeping for a transitive (local) target.
#[derive(Debug, Clone)]
pub struct LocalState {
    /// The peer interface this target probes.
    pub peer: PhyintId,
    /// History of recently sent local probes.
    pub ring: ProbeRing,
    /// The next local sequence number to send.
    pub snxt: Sequence,
}

impl LocalState {
    #[must_use]
    pub fn new(peer: PhyintId) -> Self {
        Self {
            peer,
            ring: ProbeRing::new(LOCAL_RING_SIZE),
            snxt: Sequence(0),
        }
    }
}

/// A probe destination.
#[derive(Debug, Clone)]
pub struct Target {
    pub kind: TargetKind,
    pub status: TargetStatus,
    pub rtt: TargetRtt,
    /// Consecutive acknowledged probes to this target.
    pub acks_in_row: usize,
    /// Consecutive lost probes to this target.
    pub losses_in_row: usize,
}

impl Target {
    /// Create an ICMP target for an external host or router.
    #[must_use]
    pub fn icmp(addr: IpAddr) -> Self {
        Self {
            kind: TargetKind::Icmp { addr },
            status: TargetStatus::Active,
            rtt: TargetRtt::default(),
            acks_in_row: 0,
            losses_in_row: 0,
        }
    }

    /// Create a local target for a peer interface.
    #[must_use]
    pub fn local(peer: PhyintId) -> Self {
        Self {
            kind: TargetKind::Local(LocalState::new(peer)),
            status: TargetStatus::Active,
            rtt: TargetRtt::default(),
            acks_in_row: 0,
            losses_in_row: 0,
        }
    }

    /// The probe address, for ICMP targets.
    #[must_use]
    pub fn addr(&self) -> Option<IpAddr> {
        match &self.kind {
            TargetKind::Icmp { addr } => Some(*addr),
            TargetKind::Local(_) => None,
        }
    }

    /// The local probe state, for local targets.
    #[must_use]
    pub fn local_state(&self) -> Option<&LocalState> {
        match &self.kind {
            TargetKind::Icmp { .. } => None,
            TargetKind::Local(state) => Some(state),
        }
    }

    /// The mutable local probe state, for local targets.
    pub fn local_state_mut(&mut self) -> Option<&mut LocalState> {
        match &mut self.kind {
            TargetKind::Icmp { .. } => None,
            TargetKind::Local(state) => Some(state),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == TargetStatus::Active
    }
}

/// The verdict on a target whose CRTT exceeds the group probe interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlowVerdict {
    /// The target is provably the outlier among its peers.
    Outlier,
    /// Not enough fast peers to pin the blame; the whole path may be slow.
    GlobalSlowdown,
}

/// The ordered, cyclable table of ICMP targets for one probing instance.
///
/// Two cursors walk the table round-robin: one for failure detection probes
/// and one for RTT-only probes.  The RTT cursor is re-synced after every
/// failure detection probe so the two rotations cannot diverge.
#[derive(Debug, Clone, Default)]
pub struct TargetTable {
    targets: Vec<Target>,
    next_fd: usize,
    next_rtt: usize,
}

impl TargetTable {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.targets.iter().filter(|t| t.is_active()).count()
    }

    #[must_use]
    pub fn contains(&self, addr: IpAddr) -> bool {
        self.targets.iter().any(|t| t.addr() == Some(addr))
    }

    /// Add an ICMP target.
    ///
    /// A target beyond the rotation size is kept as an unused spare and
    /// promoted when an active target drops out.  Re-adding a dead target
    /// revives it.  Returns `true` when the table changed.
    pub fn add(&mut self, addr: IpAddr) -> bool {
        if let Some(existing) = self.get_mut(addr) {
            if existing.status == TargetStatus::Dead {
                existing.status = TargetStatus::Active;
                existing.losses_in_row = 0;
                return true;
            }
            return false;
        }
        if self.targets.len() >= MAX_PROBE_TARGETS * 2 {
            return false;
        }
        let mut target = Target::icmp(addr);
        if self.active_count() >= MAX_PROBE_TARGETS {
            target.status = TargetStatus::Unused;
        }
        self.targets.push(target);
        true
    }

    /// Remove the target for `addr`, fixing up both cursors and promoting a
    /// spare into the rotation if one is waiting.
    pub fn remove(&mut self, addr: IpAddr) {
        if let Some(index) = self.targets.iter().position(|t| t.addr() == Some(addr)) {
            self.targets.remove(index);
            if self.next_fd > index {
                self.next_fd -= 1;
            }
            if self.next_rtt > index {
                self.next_rtt -= 1;
            }
            self.promote_spare();
        }
    }

    /// Promote the first unused spare into the rotation.
    pub fn promote_spare(&mut self) {
        if self.active_count() >= MAX_PROBE_TARGETS {
            return;
        }
        if let Some(spare) = self
            .targets
            .iter_mut()
            .find(|t| t.status == TargetStatus::Unused)
        {
            spare.status = TargetStatus::Active;
        }
    }

    pub fn get_mut(&mut self, addr: IpAddr) -> Option<&mut Target> {
        self.targets.iter_mut().find(|t| t.addr() == Some(addr))
    }

    #[must_use]
    pub fn get(&self, addr: IpAddr) -> Option<&Target> {
        self.targets.iter().find(|t| t.addr() == Some(addr))
    }

    /// The next target for a failure detection probe.
    ///
    /// Advances the failure detection cursor and re-syncs the RTT cursor.
    pub fn next_failure_target(&mut self) -> Option<IpAddr> {
        let addr = self.next_active_from(self.next_fd)?;
        self.next_fd = self.position_after(addr);
        self.next_rtt = self.next_fd;
        Some(addr)
    }

    /// The next target for an RTT-only probe.
    pub fn next_rtt_target(&mut self) -> Option<IpAddr> {
        let addr = self.next_active_from(self.next_rtt)?;
        self.next_rtt = self.position_after(addr);
        Some(addr)
    }

    /// Judge whether the target at `addr` is provably slower than its peers.
    ///
    /// The target is an outlier only when enough other active targets exist
    /// and every one of them answers well inside the probe interval; anything
    /// short of that could equally be a global slowdown, in which case the
    /// group detection time is relaxed instead.
    #[must_use]
    pub fn judge_slow(&self, addr: IpAddr, probe_interval: Duration) -> SlowVerdict {
        let threshold = probe_interval / EXCEPTION_FACTOR;
        let others: Vec<&Target> = self
            .targets
            .iter()
            .filter(|t| t.is_active() && t.addr() != Some(addr))
            .collect();
        let enough = others.len() > MIN_PROBE_TARGETS;
        let all_fast = others
            .iter()
            .all(|t| t.rtt.crtt().is_some_and(|crtt| crtt < threshold));
        if enough && all_fast {
            SlowVerdict::Outlier
        } else {
            SlowVerdict::GlobalSlowdown
        }
    }

    /// Do all active targets answer inside the given threshold?
    ///
    /// Used when deciding whether a relaxed detection time can be tightened
    /// again.
    #[must_use]
    pub fn all_below(&self, threshold: Duration) -> bool {
        self.targets
            .iter()
            .filter(|t| t.is_active())
            .all(|t| t.rtt.crtt().is_some_and(|crtt| crtt < threshold))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Target> {
        self.targets.iter_mut()
    }

    pub fn clear(&mut self) {
        self.targets.clear();
        self.next_fd = 0;
        self.next_rtt = 0;
    }

    fn next_active_from(&self, cursor: usize) -> Option<IpAddr> {
        let len = self.targets.len();
        if len == 0 {
            return None;
        }
        (0..len)
            .map(|offset| (cursor + offset) % len)
            .map(|index| &self.targets[index])
            .find(|target| target.is_active())
            .and_then(Target::addr)
    }

    fn position_after(&self, addr: IpAddr) -> usize {
        self.targets
            .iter()
            .position(|t| t.addr() == Some(addr))
            .map_or(0, |index| (index + 1) % self.targets.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, last))
    }

    #[test]
    fn test_round_robin_cursor() {
        let mut table = TargetTable::default();
        assert!(table.add(addr(1)));
        assert!(table.add(addr(2)));
        assert!(table.add(addr(3)));
        assert_eq!(Some(addr(1)), table.next_failure_target());
        assert_eq!(Some(addr(2)), table.next_failure_target());
        assert_eq!(Some(addr(3)), table.next_failure_target());
        assert_eq!(Some(addr(1)), table.next_failure_target());
    }

    #[test]
    fn test_rtt_cursor_resyncs_after_failure_probe() {
        let mut table = TargetTable::default();
        table.add(addr(1));
        table.add(addr(2));
        table.add(addr(3));
        assert_eq!(Some(addr(1)), table.next_rtt_target());
        assert_eq!(Some(addr(2)), table.next_rtt_target());
        // A failure detection probe pulls the RTT rotation back into step.
        assert_eq!(Some(addr(1)), table.next_failure_target());
        assert_eq!(Some(addr(2)), table.next_rtt_target());
    }

    #[test]
    fn test_cursor_skips_slow_targets() {
        let mut table = TargetTable::default();
        table.add(addr(1));
        table.add(addr(2));
        table.get_mut(addr(1)).unwrap().status = TargetStatus::Slow;
        assert_eq!(Some(addr(2)), table.next_failure_target());
        assert_eq!(Some(addr(2)), table.next_failure_target());
    }

    #[test]
    fn test_dedup_and_capacity() {
        let mut table = TargetTable::default();
        assert!(table.add(addr(1)));
        assert!(!table.add(addr(1)));
        for last in 2..=MAX_PROBE_TARGETS as u8 {
            assert!(table.add(addr(last)));
        }
        assert_eq!(MAX_PROBE_TARGETS, table.active_count());
        // Beyond the rotation size new targets wait as spares.
        assert!(table.add(addr(100)));
        assert_eq!(
            TargetStatus::Unused,
            table.get(addr(100)).unwrap().status
        );
        assert_eq!(MAX_PROBE_TARGETS, table.active_count());
    }

    #[test]
    fn test_spare_promoted_when_active_removed() {
        let mut table = TargetTable::default();
        for last in 1..=MAX_PROBE_TARGETS as u8 {
            table.add(addr(last));
        }
        table.add(addr(100));
        table.remove(addr(1));
        assert_eq!(
            TargetStatus::Active,
            table.get(addr(100)).unwrap().status
        );
        assert_eq!(MAX_PROBE_TARGETS, table.active_count());
    }

    #[test]
    fn test_dead_target_revived_by_rediscovery() {
        let mut table = TargetTable::default();
        table.add(addr(1));
        let target = table.get_mut(addr(1)).unwrap();
        target.status = TargetStatus::Dead;
        target.losses_in_row = 12;
        assert!(table.add(addr(1)));
        let target = table.get(addr(1)).unwrap();
        assert_eq!(TargetStatus::Active, target.status);
        assert_eq!(0, target.losses_in_row);
    }

    #[test]
    fn test_remove_fixes_cursors() {
        let mut table = TargetTable::default();
        table.add(addr(1));
        table.add(addr(2));
        table.add(addr(3));
        assert_eq!(Some(addr(1)), table.next_failure_target());
        assert_eq!(Some(addr(2)), table.next_failure_target());
        table.remove(addr(1));
        assert_eq!(Some(addr(3)), table.next_failure_target());
        assert_eq!(Some(addr(2)), table.next_failure_target());
    }

    #[test]
    fn test_judge_slow_outlier() {
        let interval = Duration::from_millis(1000);
        let mut table = TargetTable::default();
        for last in 1..=5 {
            table.add(addr(last));
        }
        for last in 2..=5 {
            let target = table.get_mut(addr(last)).unwrap();
            target.rtt.record_unicast(Duration::from_millis(10), interval);
        }
        assert_eq!(SlowVerdict::Outlier, table.judge_slow(addr(1), interval));
    }

    #[test]
    fn test_judge_slow_too_few_peers() {
        let interval = Duration::from_millis(1000);
        let mut table = TargetTable::default();
        for last in 1..=3 {
            table.add(addr(last));
        }
        for last in 2..=3 {
            let target = table.get_mut(addr(last)).unwrap();
            target.rtt.record_unicast(Duration::from_millis(10), interval);
        }
        assert_eq!(
            SlowVerdict::GlobalSlowdown,
            table.judge_slow(addr(1), interval)
        );
    }

    #[test]
    fn test_judge_slow_peers_not_fast() {
        let interval = Duration::from_millis(1000);
        let mut table = TargetTable::default();
        for last in 1..=5 {
            table.add(addr(last));
        }
        for last in 2..=5 {
            let target = table.get_mut(addr(last)).unwrap();
            target.rtt.record_unicast(Duration::from_millis(700), interval);
        }
        assert_eq!(
            SlowVerdict::GlobalSlowdown,
            table.judge_slow(addr(1), interval)
        );
    }

    #[test]
    fn test_local_target_arms() {
        let mut target = Target::local(PhyintId(3));
        assert_eq!(None, target.addr());
        assert!(target.local_state().is_some());
        assert_eq!(PhyintId(3), target.local_state().unwrap().peer);
        assert!(target.local_state_mut().is_some());
        let icmp = Target::icmp(addr(1));
        assert_eq!(Some(addr(1)), icmp.addr());
        assert!(icmp.local_state().is_none());
    }
}
