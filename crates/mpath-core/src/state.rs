use crate::group::GroupState;
use crate::phyint::PhyintState;
use crate::types::{InterfaceFlags, ProbeStats};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// The published health of one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceHealth {
    pub state: PhyintState,
    pub link_up: bool,
    pub flags: InterfaceFlags,
    /// Counters summed over the interface's probing instances.
    pub stats: ProbeStats,
}

/// The published health of one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupHealth {
    pub state: GroupState,
    pub probe_interval: Duration,
    pub failure_detection_time: Duration,
}

/// A snapshot of engine health.
#[derive(Debug, Clone, Default)]
pub struct HealthState {
    pub interfaces: IndexMap<String, InterfaceHealth>,
    pub groups: IndexMap<String, GroupHealth>,
    /// Whole probe periods skipped because the driving loop stalled.
    pub probes_missed: u64,
}

/// A cheaply cloneable handle onto the engine's published health.
///
/// The engine refreshes the snapshot after every member or group transition;
/// management tooling on other threads reads it without touching engine
/// internals.
#[derive(Debug, Clone, Default)]
pub struct Health {
    inner: Arc<RwLock<HealthState>>,
}

impl Health {
    /// A copy of the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> HealthState {
        self.inner.read().clone()
    }

    /// Replace the published snapshot.
    pub(crate) fn publish(&self, state: HealthState) {
        *self.inner.write() = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phyint::PhyintState;

    #[test]
    fn test_snapshot_is_isolated_copy() {
        let health = Health::default();
        let mut state = HealthState::default();
        state.interfaces.insert(
            String::from("net0"),
            InterfaceHealth {
                state: PhyintState::Running,
                link_up: true,
                flags: InterfaceFlags::empty(),
                stats: ProbeStats::default(),
            },
        );
        health.publish(state);
        let mut snapshot = health.snapshot();
        snapshot.interfaces.clear();
        assert_eq!(1, health.snapshot().interfaces.len());
    }

    #[test]
    fn test_handle_is_shared() {
        let health = Health::default();
        let clone = health.clone();
        let mut state = HealthState::default();
        state.probes_missed = 7;
        health.publish(state);
        assert_eq!(7, clone.snapshot().probes_missed);
    }
}
