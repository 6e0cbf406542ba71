use crate::error::IoResult as Result;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

/// Metadata for one received datagram.
#[derive(Debug)]
pub struct RecvMeta {
    /// The number of bytes received.
    pub len: usize,
    /// The source address, if the socket provided one.
    pub addr: Option<SocketAddr>,
    /// The kernel receive timestamp from ancillary data, if available.
    ///
    /// Round-trip measurement depends on this; a reply without it is
    /// rejected so scheduling delay can never masquerade as path latency.
    pub timestamp: Option<SystemTime>,
    /// Whether the packet carried an IPv6 routing header.
    pub routing_header: bool,
}

#[cfg_attr(test, mockall::automock)]
pub trait Socket
where
    Self: Sized,
{
    /// Create a raw socket for sending and receiving IPv4 ICMP.
    fn new_icmp_ipv4() -> Result<Self>;
    /// Create a raw socket for sending and receiving IPv6 ICMP.
    fn new_icmp_ipv6() -> Result<Self>;
    /// Create an IPv4/UDP socket for the transitive probe transport.
    fn new_udp_ipv4() -> Result<Self>;
    fn bind(&mut self, address: SocketAddr) -> Result<()>;
    /// Bind the socket to a named interface so probes leave, and replies
    /// arrive, on the interface under test.
    fn bind_device(&mut self, interface: &str) -> Result<()>;
    fn set_multicast_ttl_v4(&mut self, ttl: u32) -> Result<()>;
    fn set_multicast_hops_v6(&mut self, hops: u32) -> Result<()>;
    /// Request kernel receive timestamps as ancillary data.
    fn set_recv_timestamps(&mut self) -> Result<()>;
    fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> Result<()>;
    /// Returns true if the socket becomes readable before the timeout, false
    /// otherwise.
    fn is_readable(&mut self, timeout: Duration) -> Result<bool>;
    /// Receive a datagram together with its metadata.
    fn recv_meta(&mut self, buf: &mut [u8]) -> Result<RecvMeta>;
}

/// The multicast TTL / hop limit used for discovery probes; targets must be
/// on the local link.
pub const MULTICAST_TTL: u32 = 1;
