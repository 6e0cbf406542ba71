use crate::config::EngineConfig;
use crate::constants::NEXT_FDT_MULTIPLE;
use crate::phyint::PhyintState;
use crate::types::{GroupId, PhyintId};
use std::time::Duration;
use tracing::info;

/// The aggregate state of an interface group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    /// All members are healthy.
    Ok,
    /// Some members have failed or cannot probe.
    Degraded,
    /// No member is usable.
    Failed,
}

/// A named set of interfaces sharing L2 connectivity.
#[derive(Debug)]
pub struct PhyintGroup {
    pub id: GroupId,
    pub name: String,
    pub members: Vec<PhyintId>,
    pub state: GroupState,
    /// The adaptive failure detection cadence, never below the user floor.
    pub probe_interval: Duration,
    /// The adaptive failure detection time, never below the user floor.
    pub failure_detection_time: Duration,
    /// The user-requested probe cadence; the floor for `probe_interval`.
    pub user_probe_interval: Duration,
    /// The user-requested detection time.
    pub user_failure_detection_time: Duration,
    /// Whether a designated prober is currently selected.
    pub has_designated_prober: bool,
    /// Whether any member holds an IP test address.
    pub uses_test_addrs: bool,
    /// Whether probe targets came from the routing table rather than
    /// multicast discovery.
    pub targets_are_routers: bool,
    /// The synthetic group holding interfaces configured with no group.
    pub anonymous: bool,
}

impl PhyintGroup {
    #[must_use]
    pub fn new(id: GroupId, name: String, anonymous: bool, config: &EngineConfig) -> Self {
        let user_interval = config.probe_interval(config.failure_detection_time);
        Self {
            id,
            name,
            members: Vec::new(),
            state: GroupState::Ok,
            probe_interval: user_interval,
            failure_detection_time: config.failure_detection_time,
            user_probe_interval: user_interval,
            user_failure_detection_time: config.failure_detection_time,
            has_designated_prober: false,
            uses_test_addrs: false,
            targets_are_routers: false,
            anonymous,
        }
    }

    /// Recompute the aggregate state as a pure reduction over member states.
    ///
    /// Returns the old and new states when the aggregate changed.
    pub fn reduce_state<I>(&mut self, member_states: I) -> Option<(GroupState, GroupState)>
    where
        I: IntoIterator<Item = PhyintState>,
    {
        let mut usable = 0_usize;
        let mut unusable = 0_usize;
        for state in member_states {
            match state {
                PhyintState::Running | PhyintState::Init => usable += 1,
                PhyintState::Failed | PhyintState::NoTargets | PhyintState::Offline => {
                    unusable += 1;
                }
            }
        }
        let next = if usable == 0 && unusable > 0 {
            GroupState::Failed
        } else if unusable > 0 {
            GroupState::Degraded
        } else {
            GroupState::Ok
        };
        let prev = self.state;
        if prev == next {
            None
        } else {
            self.state = next;
            Some((prev, next))
        }
    }

    /// Relax the detection time so that a target answering in `crtt` fits.
    ///
    /// Called when a slow target is not provably an outlier.  Logged once per
    /// change.
    pub fn relax_detection_time(&mut self, crtt: Duration, config: &EngineConfig) {
        if crtt <= self.probe_interval {
            return;
        }
        self.probe_interval = crtt;
        self.failure_detection_time = crtt * (config.probe_failure_count as u32 + 2);
        info!(
            group = %self.name,
            probe_interval_ms = self.probe_interval.as_millis(),
            failure_detection_time_ms = self.failure_detection_time.as_millis(),
            "slow probe targets; failure detection time relaxed"
        );
    }

    /// Tighten the detection time again after all targets improved.
    ///
    /// Moves one multiple back toward the user-requested floor.  Logged once
    /// per change.
    pub fn tighten_detection_time(&mut self) {
        if self.probe_interval <= self.user_probe_interval {
            return;
        }
        self.probe_interval =
            (self.probe_interval / NEXT_FDT_MULTIPLE).max(self.user_probe_interval);
        self.failure_detection_time =
            (self.failure_detection_time / NEXT_FDT_MULTIPLE).max(self.user_failure_detection_time);
        info!(
            group = %self.name,
            probe_interval_ms = self.probe_interval.as_millis(),
            failure_detection_time_ms = self.failure_detection_time.as_millis(),
            "probe targets improved; failure detection time tightened"
        );
    }

    /// Is the detection time currently relaxed above the user floor?
    #[must_use]
    pub fn is_relaxed(&self) -> bool {
        self.probe_interval > self.user_probe_interval
    }
}
