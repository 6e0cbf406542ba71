use crate::error::Result;
use crate::group::GroupState;
use crate::phyint::PhyintState;
use crate::types::InterfaceFlags;

/// A link state edge reported by the operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Up,
    Down,
}

/// Mirrors interface state into the operating system's interface flags.
///
/// Failures of this collaborator are non-fatal: the engine's in-memory state
/// stays authoritative and the mirroring is retried at the next relevant
/// transition.
#[cfg_attr(test, mockall::automock)]
pub trait FlagControl {
    /// Read the flags currently set on an interface.
    fn get_flags(&mut self, interface: &str) -> Result<InterfaceFlags>;

    /// Set and clear flags on an interface.
    fn set_flags(
        &mut self,
        interface: &str,
        set: InterfaceFlags,
        clear: InterfaceFlags,
    ) -> Result<()>;
}

/// Receives notifications of state transitions for management tooling.
#[cfg_attr(test, mockall::automock)]
pub trait EventSink {
    /// An interface changed state.
    fn phyint_state_changed(&mut self, interface: &str, old: PhyintState, new: PhyintState);

    /// A group changed aggregate state.
    fn group_state_changed(&mut self, group: &str, old: GroupState, new: GroupState);
}

/// A flag-control collaborator that mirrors nothing.
///
/// Useful for tests and for running the engine against a simulated network.
#[derive(Debug, Default)]
pub struct NullFlagControl;

impl FlagControl for NullFlagControl {
    fn get_flags(&mut self, _interface: &str) -> Result<InterfaceFlags> {
        Ok(InterfaceFlags::empty())
    }

    fn set_flags(
        &mut self,
        _interface: &str,
        _set: InterfaceFlags,
        _clear: InterfaceFlags,
    ) -> Result<()> {
        Ok(())
    }
}

/// An event sink that discards every notification.
#[derive(Debug, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn phyint_state_changed(&mut self, _interface: &str, _old: PhyintState, _new: PhyintState) {}

    fn group_state_changed(&mut self, _group: &str, _old: GroupState, _new: GroupState) {}
}
