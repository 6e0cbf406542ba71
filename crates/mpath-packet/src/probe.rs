use crate::buffer::Buffer;
use crate::error::{Error, Result};
use std::fmt::{Debug, Formatter};

/// The magic word carried by every probe payload.
///
/// Replies without it are assumed to have been forged by a third party and
/// are accounted for rather than processed.
pub const PROBE_MAGIC: u32 = 0x6d70_6470;

/// The kind of probe carried in the payload tag field.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub enum ProbeTag {
    /// A failure detection probe which consumes sequence space.
    Unicast,
    /// A target discovery probe sent to the all-nodes multicast address.
    Multicast,
    /// A round-trip-time measurement probe, no sequence consumption.
    RttOnly,
    /// An unrecognised tag.
    Other(u32),
}

impl ProbeTag {
    #[must_use]
    pub const fn id(&self) -> u32 {
        match self {
            Self::Unicast => 0x756e_6963,
            Self::Multicast => 0x6d75_6c74,
            Self::RttOnly => 0x7274_7470,
            Self::Other(id) => *id,
        }
    }
}

impl From<u32> for ProbeTag {
    fn from(val: u32) -> Self {
        match val {
            0x756e_6963 => Self::Unicast,
            0x6d75_6c74 => Self::Multicast,
            0x7274_7470 => Self::RttOnly,
            id => Self::Other(id),
        }
    }
}

const MAGIC_OFFSET: usize = 0;
const TIMESTAMP_OFFSET: usize = 4;
const TAG_OFFSET: usize = 12;

/// The probe payload carried in the echo data.
///
/// ```text
/// magic(4)  timestamp(8, ns)  tag(4)
/// ```
///
/// The timestamp is the wall clock time at which the probe was sent, in
/// nanoseconds since the unix epoch.  It is echoed back verbatim and used
/// together with the receive timestamp to compute the round-trip time.
pub struct ProbeMessage<'a> {
    buf: Buffer<'a>,
}

impl<'a> ProbeMessage<'a> {
    /// The fixed size of the probe payload.
    pub const SIZE: usize = 16;

    pub fn new(packet: &'a mut [u8]) -> Result<Self> {
        if packet.len() >= Self::SIZE {
            Ok(Self {
                buf: Buffer::Mutable(packet),
            })
        } else {
            Err(Error::InsufficientPacketBuffer(
                String::from("ProbeMessage"),
                Self::SIZE,
                packet.len(),
            ))
        }
    }

    pub fn new_view(packet: &'a [u8]) -> Result<Self> {
        if packet.len() >= Self::SIZE {
            Ok(Self {
                buf: Buffer::Immutable(packet),
            })
        } else {
            Err(Error::InsufficientPacketBuffer(
                String::from("ProbeMessage"),
                Self::SIZE,
                packet.len(),
            ))
        }
    }

    #[must_use]
    pub fn has_magic(&self) -> bool {
        u32::from_be_bytes(self.buf.get_bytes(MAGIC_OFFSET)) == PROBE_MAGIC
    }

    #[must_use]
    pub fn get_timestamp_ns(&self) -> u64 {
        u64::from_be_bytes(self.buf.get_bytes(TIMESTAMP_OFFSET))
    }

    #[must_use]
    pub fn get_tag(&self) -> ProbeTag {
        ProbeTag::from(u32::from_be_bytes(self.buf.get_bytes(TAG_OFFSET)))
    }

    pub fn set_magic(&mut self) {
        self.buf.set_bytes(MAGIC_OFFSET, PROBE_MAGIC.to_be_bytes());
    }

    pub fn set_timestamp_ns(&mut self, val: u64) {
        self.buf.set_bytes(TIMESTAMP_OFFSET, val.to_be_bytes());
    }

    pub fn set_tag(&mut self, val: ProbeTag) {
        self.buf.set_bytes(TAG_OFFSET, val.id().to_be_bytes());
    }

    #[must_use]
    pub fn packet(&self) -> &[u8] {
        &self.buf.as_slice()[..Self::SIZE]
    }
}

impl Debug for ProbeMessage<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeMessage")
            .field("has_magic", &self.has_magic())
            .field("timestamp_ns", &self.get_timestamp_ns())
            .field("tag", &self.get_tag())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_build() {
        let mut buf = [0_u8; ProbeMessage::SIZE];
        let mut probe = ProbeMessage::new(&mut buf).unwrap();
        probe.set_magic();
        probe.set_timestamp_ns(0x0102_0304_0506_0708);
        probe.set_tag(ProbeTag::Unicast);
        assert_eq!(
            &hex!("6d 70 64 70 01 02 03 04 05 06 07 08 75 6e 69 63"),
            probe.packet()
        );
    }

    #[test]
    fn test_view() {
        let buf = hex!("6d 70 64 70 00 00 00 00 00 00 00 2a 72 74 74 70");
        let probe = ProbeMessage::new_view(&buf).unwrap();
        assert!(probe.has_magic());
        assert_eq!(42, probe.get_timestamp_ns());
        assert_eq!(ProbeTag::RttOnly, probe.get_tag());
    }

    #[test]
    fn test_missing_magic() {
        let buf = [0_u8; ProbeMessage::SIZE];
        let probe = ProbeMessage::new_view(&buf).unwrap();
        assert!(!probe.has_magic());
        assert_eq!(ProbeTag::Other(0), probe.get_tag());
    }

    #[test]
    fn test_tag_round_trip() {
        for tag in [ProbeTag::Unicast, ProbeTag::Multicast, ProbeTag::RttOnly] {
            assert_eq!(tag, ProbeTag::from(tag.id()));
        }
    }

    #[test]
    fn test_insufficient_buffer() {
        let buf = [0_u8; ProbeMessage::SIZE - 1];
        let err = ProbeMessage::new_view(&buf).unwrap_err();
        assert_eq!(
            Error::InsufficientPacketBuffer(String::from("ProbeMessage"), 16, 15),
            err
        );
    }
}
