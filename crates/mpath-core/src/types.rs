use bitflags::bitflags;
use derive_more::{Add, AddAssign, Sub};
use std::fmt::{Display, Formatter};

/// `Sequence` number newtype.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Ord, PartialOrd, Hash, Add, Sub, AddAssign,
)]
pub struct Sequence(pub u16);

impl Sequence {
    /// The next sequence number, wrapping at `u16::MAX`.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// How far behind `self` the given sequence number lies, modulo the
    /// sequence space.
    #[must_use]
    pub const fn distance_back(self, other: Self) -> u16 {
        self.0.wrapping_sub(other.0)
    }
}

impl Display for Sequence {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `ProbeId` newtype holding the ICMP identifier of a probing instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Ord, PartialOrd, Hash)]
pub struct ProbeId(pub u16);

/// Stable handle for a physical interface in the engine registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Ord, PartialOrd, Hash)]
pub struct PhyintId(pub usize);

impl Display for PhyintId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "phyint-{}", self.0)
    }
}

/// Stable handle for an interface group in the engine registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Ord, PartialOrd, Hash)]
pub struct GroupId(pub usize);

impl Display for GroupId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "group-{}", self.0)
    }
}

/// The address family of a probing instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Ord, PartialOrd, Hash)]
pub enum Family {
    Ipv4,
    Ipv6,
}

impl Display for Family {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ipv4 => write!(f, "ipv4"),
            Self::Ipv6 => write!(f, "ipv6"),
        }
    }
}

bitflags! {
    /// Interface flags mirrored to the flag-control collaborator.
    ///
    /// These are a translation of the engine's internal state for the
    /// benefit of the operating system, never the representation itself.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct InterfaceFlags: u32 {
        /// The interface has failed.
        const FAILED = 1;
        /// The interface carries no data traffic.
        const INACTIVE = 2;
        /// The interface is the designated prober for its failed group.
        const PROBER = 4;
        /// The interface is a standby, activated only on failover.
        const STANDBY = 8;
        /// The interface has been administratively offlined.
        const OFFLINE = 16;
    }
}

/// Cumulative probe counters for one probing instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Add, AddAssign)]
pub struct ProbeStats {
    /// Probes sent.
    pub sent: u64,
    /// Probes acknowledged.
    pub acked: u64,
    /// Probes declared lost.
    pub lost: u64,
    /// Replies dropped as spoofed, stale or duplicate.
    pub unknown: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_distance() {
        assert_eq!(1, Sequence(5).distance_back(Sequence(4)));
        assert_eq!(5, Sequence(5).distance_back(Sequence(0)));
        assert_eq!(0, Sequence(5).distance_back(Sequence(5)));
    }

    #[test]
    fn test_sequence_distance_wraps() {
        assert_eq!(1, Sequence(0).distance_back(Sequence(u16::MAX)));
        assert_eq!(11, Sequence(10).distance_back(Sequence(u16::MAX)));
    }

    #[test]
    fn test_sequence_next_wraps() {
        assert_eq!(Sequence(0), Sequence(u16::MAX).next());
        assert_eq!(Sequence(1), Sequence(0).next());
    }

    #[test]
    fn test_flags_mirror_round_trip() {
        let flags = InterfaceFlags::FAILED | InterfaceFlags::STANDBY;
        assert_eq!(flags, InterfaceFlags::from_bits_truncate(flags.bits()));
    }

    #[test]
    fn test_stats_accumulate() {
        let mut stats = ProbeStats::default();
        stats += ProbeStats {
            sent: 2,
            acked: 1,
            lost: 1,
            unknown: 0,
        };
        stats += ProbeStats {
            sent: 1,
            acked: 0,
            lost: 0,
            unknown: 1,
        };
        assert_eq!(3, stats.sent);
        assert_eq!(1, stats.acked);
        assert_eq!(1, stats.lost);
        assert_eq!(1, stats.unknown);
    }
}
