//! Probe packet wire format parsing and building.
//!
//! The following packets are supported:
//! - `ICMPv4` echo request / echo reply
//! - `ICMPv6` echo request / echo reply
//! - the probe payload carried inside the echo data
//!
//! # Endianness
//!
//! The internal representation is held in network byte order (big-endian) and
//! all accessor methods take and return data in host byte order, converting as
//! necessary for the given architecture.
//!
//! # Example
//!
//! The following example builds an `ICMPv4` echo request probe:
//!
//! ```rust
//! # fn main() -> anyhow::Result<()> {
//! use mpath_packet::checksum::icmp_ipv4_checksum;
//! use mpath_packet::icmpv4::echo::EchoPacket;
//! use mpath_packet::icmpv4::{IcmpCode, IcmpType};
//! use mpath_packet::probe::{ProbeMessage, ProbeTag};
//!
//! let mut buf = [0; EchoPacket::minimum_packet_size() + ProbeMessage::SIZE];
//! let mut echo = EchoPacket::new(&mut buf)?;
//! echo.set_icmp_type(IcmpType::EchoRequest);
//! echo.set_icmp_code(IcmpCode(0));
//! echo.set_identifier(1234);
//! echo.set_sequence(10);
//! let mut probe = ProbeMessage::new(echo.payload_mut())?;
//! probe.set_magic();
//! probe.set_timestamp_ns(1_000_000_000);
//! probe.set_tag(ProbeTag::Unicast);
//! let checksum = icmp_ipv4_checksum(echo.packet());
//! echo.set_checksum(checksum);
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]

mod buffer;

/// Packet errors.
pub mod error;

/// Functions for calculating network checksums.
pub mod checksum;

/// `ICMPv4` echo packets.
pub mod icmpv4;

/// `ICMPv6` echo packets.
pub mod icmpv6;

/// The probe payload carried in the echo data.
pub mod probe;

/// Format a payload as a hexadecimal string.
#[must_use]
pub fn fmt_payload(bytes: &[u8]) -> String {
    use itertools::Itertools as _;
    format!("{:02x}", bytes.iter().format(" "))
}
