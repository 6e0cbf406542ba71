use crate::constants::{LINK_FLAP_MAX, LINK_FLAP_WINDOW, LINK_STABILIZATION, PROBE_RING_SIZE};
use crate::history::ProbeRing;
use crate::scheduler::ProbeSchedule;
use crate::target::{Target, TargetTable};
use crate::types::{Family, GroupId, InterfaceFlags, PhyintId, ProbeId, ProbeStats, Sequence};
use arrayvec::ArrayVec;
use std::net::IpAddr;
use std::time::Instant;

/// The state of a physical interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyintState {
    /// Newly registered, not yet probing.
    Init,
    /// Healthy.
    Running,
    /// Failed.
    Failed,
    /// No probe targets are known.
    NoTargets,
    /// Administratively offline.
    Offline,
}

/// The probing context for one address family on one interface.
#[derive(Debug)]
pub struct PhyintInstance {
    /// The address family this instance probes over.
    pub family: Family,
    /// The test address probes are sent from, if one is configured.
    pub test_addr: Option<IpAddr>,
    /// The ICMP identifier carried by this instance's probes.
    pub probe_id: ProbeId,
    /// The next sequence number to send.
    pub snxt: Sequence,
    /// The highest acknowledged sequence number.
    pub highest_ack: Option<Sequence>,
    /// History of recently sent failure detection probes.
    pub ring: ProbeRing,
    /// The ordered table of probe targets.
    pub targets: TargetTable,
    /// The probe timetable.
    pub schedule: ProbeSchedule,
    /// Cumulative counters.
    pub stats: ProbeStats,
    /// Consecutive acknowledged probes across all targets.
    pub acks_in_row: usize,
    /// The target of the most recently lost probe.
    pub last_lost_target: Option<IpAddr>,
}

impl PhyintInstance {
    #[must_use]
    pub fn new(
        family: Family,
        test_addr: Option<IpAddr>,
        probe_id: ProbeId,
        initial_sequence: Sequence,
        now: Instant,
    ) -> Self {
        Self {
            family,
            test_addr,
            probe_id,
            snxt: initial_sequence,
            highest_ack: None,
            ring: ProbeRing::new(PROBE_RING_SIZE),
            targets: TargetTable::default(),
            schedule: ProbeSchedule::new(now),
            stats: ProbeStats::default(),
            acks_in_row: 0,
            last_lost_target: None,
        }
    }

    /// Can this instance carry out failure detection probing?
    #[must_use]
    pub fn can_probe(&self) -> bool {
        self.test_addr.is_some()
    }

    /// Consecutive lost probes ending at the most recently resolved probe.
    #[must_use]
    pub fn consecutive_losses(&self) -> usize {
        self.ring.consecutive_lost(self.snxt)
    }

    /// Discard all in-flight probe state.
    ///
    /// Used when a link event or a membership change makes the recorded
    /// history meaningless.
    pub fn reset_probe_state(&mut self) {
        self.ring.clear();
        self.acks_in_row = 0;
        self.last_lost_target = None;
    }
}

/// One physical interface.
#[derive(Debug)]
pub struct Phyint {
    pub id: PhyintId,
    pub name: String,
    pub group: GroupId,
    pub state: PhyintState,
    /// The most recent link state reported by the link-event collaborator.
    pub link_up: bool,
    /// The engine's view of the mirrored interface flags.
    pub flags: InterfaceFlags,
    /// When this interface was last selected as the designated prober.
    pub last_prober_at: Option<Instant>,
    /// Recent link-up timestamps, for flap suppression.
    pub link_up_log: ArrayVec<Instant, { crate::constants::LINK_UP_LOG }>,
    /// When the link last came up.
    pub link_up_since: Option<Instant>,
    /// Peer interfaces probed for transitive liveness.
    pub local_targets: Vec<Target>,
    /// The timetable for transitive probing; stopped until local targets
    /// exist.
    pub local_schedule: ProbeSchedule,
    /// The IPv4 probing instance, if a test address is configured.
    pub v4: Option<PhyintInstance>,
    /// The IPv6 probing instance, if a test address is configured.
    pub v6: Option<PhyintInstance>,
    /// When the current run of failures began, while failed.
    pub first_failure_at: Option<Instant>,
    /// When a probe was last acknowledged on any family.
    pub last_success_at: Option<Instant>,
    /// When the designated prober first became unreachable over local probes.
    pub prober_unreachable_since: Option<Instant>,
}

impl Phyint {
    #[must_use]
    pub fn new(id: PhyintId, name: String, group: GroupId, standby: bool, now: Instant) -> Self {
        let flags = if standby {
            InterfaceFlags::STANDBY | InterfaceFlags::INACTIVE
        } else {
            InterfaceFlags::empty()
        };
        let mut local_schedule = ProbeSchedule::new(now);
        local_schedule.stop();
        Self {
            id,
            name,
            group,
            state: PhyintState::Init,
            link_up: true,
            flags,
            last_prober_at: None,
            link_up_log: ArrayVec::new(),
            link_up_since: None,
            local_targets: Vec::new(),
            local_schedule,
            v4: None,
            v6: None,
            first_failure_at: None,
            last_success_at: None,
            prober_unreachable_since: None,
        }
    }

    /// The probing instances that exist on this interface.
    pub fn instances(&self) -> impl Iterator<Item = &PhyintInstance> {
        self.v4.iter().chain(self.v6.iter())
    }

    /// The mutable probing instances that exist on this interface.
    pub fn instances_mut(&mut self) -> impl Iterator<Item = &mut PhyintInstance> {
        self.v4.iter_mut().chain(self.v6.iter_mut())
    }

    #[must_use]
    pub fn instance(&self, family: Family) -> Option<&PhyintInstance> {
        match family {
            Family::Ipv4 => self.v4.as_ref(),
            Family::Ipv6 => self.v6.as_ref(),
        }
    }

    pub fn instance_mut(&mut self, family: Family) -> Option<&mut PhyintInstance> {
        match family {
            Family::Ipv4 => self.v4.as_mut(),
            Family::Ipv6 => self.v6.as_mut(),
        }
    }

    /// Does any instance hold a test address?
    #[must_use]
    pub fn has_test_addr(&self) -> bool {
        self.instances().any(PhyintInstance::can_probe)
    }

    /// Is this interface actively carrying out ICMP probing right now?
    #[must_use]
    pub fn actively_probing(&self) -> bool {
        self.instances()
            .any(|pii| pii.can_probe() && !pii.schedule.is_stopped() && !pii.targets.is_empty())
    }

    /// Record a link-up edge.
    pub fn record_link_up(&mut self, now: Instant) {
        self.link_up = true;
        self.link_up_since = Some(now);
        if self.link_up_log.is_full() {
            self.link_up_log.remove(0);
        }
        self.link_up_log.push(now);
    }

    /// Record a link-down edge.
    pub fn record_link_down(&mut self) {
        self.link_up = false;
        self.link_up_since = None;
    }

    /// Is the link flapping too quickly to trust a link-based repair?
    #[must_use]
    pub fn link_flapping(&self, now: Instant) -> bool {
        let recent = self
            .link_up_log
            .iter()
            .filter(|at| now.saturating_duration_since(**at) <= LINK_FLAP_WINDOW)
            .count();
        recent > LINK_FLAP_MAX
    }

    /// Has the link been up long enough for a link-based repair?
    #[must_use]
    pub fn link_stable(&self, now: Instant) -> bool {
        self.link_up
            && self.link_up_since.is_some_and(|since| {
                now.saturating_duration_since(since) >= LINK_STABILIZATION
            })
            && !self.link_flapping(now)
    }

    /// The send time of the oldest loss in the current failure run, across
    /// all probing-capable instances.
    #[must_use]
    pub fn earliest_failure(&self) -> Option<Instant> {
        self.instances()
            .filter_map(|pii| pii.ring.first_lost_sent_at(pii.snxt))
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn phyint() -> Phyint {
        Phyint::new(
            PhyintId(0),
            String::from("net0"),
            GroupId(0),
            false,
            Instant::now(),
        )
    }

    #[test]
    fn test_standby_starts_inactive() {
        let phyint = Phyint::new(
            PhyintId(0),
            String::from("net0"),
            GroupId(0),
            true,
            Instant::now(),
        );
        assert!(phyint.flags.contains(InterfaceFlags::STANDBY));
        assert!(phyint.flags.contains(InterfaceFlags::INACTIVE));
    }

    #[test]
    fn test_no_instances_cannot_probe() {
        let phyint = phyint();
        assert!(!phyint.has_test_addr());
        assert!(!phyint.actively_probing());
    }

    #[test]
    fn test_link_flap_suppression() {
        let mut phyint = phyint();
        let now = Instant::now();
        for i in 0..4_u64 {
            phyint.record_link_up(now + Duration::from_secs(i));
        }
        let later = now + Duration::from_secs(4);
        assert!(phyint.link_flapping(later));
        assert!(!phyint.link_stable(later));
        // Once the flaps age out of the window the link can settle.
        let much_later = now + Duration::from_secs(120);
        assert!(!phyint.link_flapping(much_later));
    }

    #[test]
    fn test_link_stable_requires_stabilization_window() {
        let mut phyint = phyint();
        let now = Instant::now();
        phyint.record_link_up(now);
        assert!(!phyint.link_stable(now + Duration::from_secs(1)));
        assert!(phyint.link_stable(now + LINK_STABILIZATION));
    }

    #[test]
    fn test_link_up_log_bounded() {
        let mut phyint = phyint();
        let now = Instant::now();
        for i in 0..20_u64 {
            phyint.record_link_up(now + Duration::from_secs(i));
        }
        assert_eq!(crate::constants::LINK_UP_LOG, phyint.link_up_log.len());
    }
}
