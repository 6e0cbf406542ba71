use crate::config::ProbeKind;
use crate::error::Result;
use crate::types::{Family, PhyintId, ProbeId, Sequence};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::{Duration, SystemTime};

/// A channel for sending and receiving probes.
pub mod channel;

/// A network socket.
pub mod socket;

/// Platform specific network code.
#[cfg(unix)]
pub mod platform;

#[cfg(unix)]
pub use platform::SocketImpl;

/// Identifies one probing instance to the network layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    pub phyint: PhyintId,
    pub family: Family,
}

/// A probe to be sent.
#[derive(Debug, Clone, Copy)]
pub struct ProbeRequest {
    pub key: InstanceKey,
    pub kind: ProbeKind,
    pub dest: IpAddr,
    pub probe_id: ProbeId,
    pub seq: Sequence,
    /// Wall clock send time, carried in the payload and echoed back.
    pub sent: SystemTime,
}

/// A validated probe reply.
///
/// The channel performs structural validation (echo reply type, zero code,
/// minimum length, identifier match, receive timestamp present, IPv6
/// link-local source, no routing header); the engine applies the sequence
/// window, source and duplicate checks.
#[derive(Debug, Clone, Copy)]
pub struct ProbeReply {
    pub key: InstanceKey,
    pub src: IpAddr,
    pub probe_id: ProbeId,
    pub seq: Sequence,
    pub kind: ProbeKind,
    /// Whether the payload carried the probe magic; a reply without it looks
    /// forged and is accounted rather than processed.
    pub magic_ok: bool,
    /// The wall clock send time echoed from the payload.
    pub sent: SystemTime,
    /// The receive timestamp taken from socket ancillary data.
    pub received: SystemTime,
}

/// An incoming event from the network.
#[derive(Debug, Clone, Copy)]
pub enum Incoming {
    /// A reply to an ICMP probe.
    Reply(ProbeReply),
    /// A transitive probe from a peer interface, to be acknowledged.
    LocalProbe {
        src: PhyintId,
        dst: PhyintId,
        seq: Sequence,
    },
    /// A peer's acknowledgment of a transitive probe we sent.
    LocalAck {
        src: PhyintId,
        dst: PhyintId,
        seq: Sequence,
    },
}

/// An abstraction over the network for probing.
#[cfg_attr(test, mockall::automock)]
pub trait Network {
    /// Send an ICMP probe.
    fn send_probe(&mut self, probe: &ProbeRequest) -> Result<()>;

    /// Send a transitive probe to a peer interface.
    fn send_local_probe(&mut self, src: PhyintId, dst: PhyintId, seq: Sequence) -> Result<()>;

    /// Acknowledge a peer's transitive probe.
    fn send_local_ack(&mut self, src: PhyintId, dst: PhyintId, seq: Sequence) -> Result<()>;

    /// Receive the next incoming event, waiting up to `timeout`.
    ///
    /// Returns `None` if the read times out or the packet read is not one of
    /// the types expected.
    fn recv(&mut self, timeout: Duration) -> Result<Option<Incoming>>;
}

/// The all-nodes multicast address for a family, the destination of target
/// discovery probes.
#[must_use]
pub fn all_nodes_addr(family: Family) -> IpAddr {
    match family {
        Family::Ipv4 => IpAddr::V4(Ipv4Addr::new(224, 0, 0, 1)),
        Family::Ipv6 => IpAddr::V6(Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1)),
    }
}
