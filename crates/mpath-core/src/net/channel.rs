use crate::config::ProbeKind;
use crate::error::{Error, Result};
use crate::net::socket::{RecvMeta, Socket, MULTICAST_TTL};
use crate::net::{Incoming, InstanceKey, Network, ProbeReply, ProbeRequest};
use crate::types::{Family, PhyintId, ProbeId, Sequence};
use indexmap::IndexMap;
use mpath_packet::checksum::icmp_ipv4_checksum;
use mpath_packet::probe::{ProbeMessage, ProbeTag};
use mpath_packet::{icmpv4, icmpv6};
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, UNIX_EPOCH};
use tracing::instrument;

/// The maximum size of the IP packet we allow.
pub const MAX_PACKET_SIZE: usize = 1024;

/// The UDP port carrying the transitive probe transport.
pub const LOCAL_PROBE_PORT: u16 = 28016;

/// The magic word opening every transitive probe frame.
const LOCAL_FRAME_MAGIC: u32 = 0x6d70_6c70;

/// magic(4) kind(1) seq(2) src(4) dst(4)
const LOCAL_FRAME_SIZE: usize = 15;

const LOCAL_FRAME_PROBE: u8 = 0;
const LOCAL_FRAME_ACK: u8 = 1;

/// The size of an outgoing probe packet.
const PROBE_PACKET_SIZE: usize =
    icmpv4::echo::EchoPacket::minimum_packet_size() + ProbeMessage::SIZE;

struct InstanceChannel<S> {
    socket: S,
    probe_id: ProbeId,
}

struct LocalEndpoint<S> {
    socket: S,
    addr: SocketAddr,
}

/// A channel for sending and receiving probe packets.
///
/// Holds one raw ICMP socket per probing instance, bound to the instance's
/// test address and interface, plus one UDP socket per interface for the
/// transitive probe transport.
pub struct Channel<S: Socket> {
    instances: IndexMap<InstanceKey, InstanceChannel<S>>,
    local_endpoints: IndexMap<PhyintId, LocalEndpoint<S>>,
}

impl<S: Socket> Channel<S> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            instances: IndexMap::new(),
            local_endpoints: IndexMap::new(),
        }
    }

    /// Open the probe socket for one probing instance.
    ///
    /// This operation requires the `CAP_NET_RAW` capability on Linux.
    #[instrument(skip(self), level = "trace")]
    pub fn add_instance(
        &mut self,
        key: InstanceKey,
        interface: &str,
        test_addr: IpAddr,
        probe_id: ProbeId,
    ) -> Result<()> {
        let mut socket = match key.family {
            Family::Ipv4 => S::new_icmp_ipv4(),
            Family::Ipv6 => S::new_icmp_ipv6(),
        }?;
        socket.bind(SocketAddr::new(test_addr, 0))?;
        socket.bind_device(interface)?;
        match key.family {
            Family::Ipv4 => socket.set_multicast_ttl_v4(MULTICAST_TTL)?,
            Family::Ipv6 => socket.set_multicast_hops_v6(MULTICAST_TTL)?,
        }
        socket.set_recv_timestamps()?;
        self.instances
            .insert(key, InstanceChannel { socket, probe_id });
        Ok(())
    }

    /// Close the probe socket for one probing instance.
    pub fn remove_instance(&mut self, key: InstanceKey) {
        self.instances.shift_remove(&key);
    }

    /// Open the transitive probe endpoint for one interface.
    #[instrument(skip(self), level = "trace")]
    pub fn add_local_endpoint(
        &mut self,
        phyint: PhyintId,
        interface: &str,
        addr: IpAddr,
    ) -> Result<()> {
        let mut socket = S::new_udp_ipv4()?;
        let addr = SocketAddr::new(addr, LOCAL_PROBE_PORT);
        socket.bind(addr)?;
        socket.bind_device(interface)?;
        self.local_endpoints
            .insert(phyint, LocalEndpoint { socket, addr });
        Ok(())
    }

    /// Close the transitive probe endpoint for one interface.
    pub fn remove_local_endpoint(&mut self, phyint: PhyintId) {
        self.local_endpoints.shift_remove(&phyint);
    }

    fn send_local_frame(&mut self, src: PhyintId, dst: PhyintId, seq: Sequence, kind: u8) -> Result<()> {
        let dest = self
            .local_endpoints
            .get(&dst)
            .map(|endpoint| endpoint.addr)
            .ok_or_else(|| Error::UnknownInterface(format!("{dst}")))?;
        let endpoint = self
            .local_endpoints
            .get_mut(&src)
            .ok_or_else(|| Error::UnknownInterface(format!("{src}")))?;
        let mut frame = [0_u8; LOCAL_FRAME_SIZE];
        frame[0..4].copy_from_slice(&LOCAL_FRAME_MAGIC.to_be_bytes());
        frame[4] = kind;
        frame[5..7].copy_from_slice(&seq.0.to_be_bytes());
        frame[7..11].copy_from_slice(&(src.0 as u32).to_be_bytes());
        frame[11..15].copy_from_slice(&(dst.0 as u32).to_be_bytes());
        send_allowing_backpressure(&mut endpoint.socket, &frame, dest)
    }

    fn recv_instance(&mut self, index: usize, timeout: Duration) -> Result<Option<Incoming>> {
        let (key, chan) = self
            .instances
            .get_index_mut(index)
            .map(|(key, chan)| (*key, chan))
            .ok_or_else(|| Error::Other(String::from("instance channel vanished")))?;
        if !chan.socket.is_readable(timeout)? {
            return Ok(None);
        }
        let mut buf = [0_u8; MAX_PACKET_SIZE];
        let meta = chan.socket.recv_meta(&mut buf)?;
        Ok(decode_reply(key, chan.probe_id, &buf, &meta))
    }

    fn recv_local(&mut self, index: usize, timeout: Duration) -> Result<Option<Incoming>> {
        let endpoint = self
            .local_endpoints
            .get_index_mut(index)
            .map(|(_, endpoint)| endpoint)
            .ok_or_else(|| Error::Other(String::from("local endpoint vanished")))?;
        if !endpoint.socket.is_readable(timeout)? {
            return Ok(None);
        }
        let mut buf = [0_u8; MAX_PACKET_SIZE];
        let meta = endpoint.socket.recv_meta(&mut buf)?;
        Ok(decode_local_frame(&buf, &meta))
    }
}

impl<S: Socket> Default for Channel<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Socket> Network for Channel<S> {
    #[instrument(skip(self), level = "trace")]
    fn send_probe(&mut self, probe: &ProbeRequest) -> Result<()> {
        tracing::trace!(?probe);
        let chan = self
            .instances
            .get_mut(&probe.key)
            .ok_or_else(|| Error::UnknownInterface(format!("{}", probe.key.phyint)))?;
        let mut buf = [0_u8; PROBE_PACKET_SIZE];
        encode_probe(probe, &mut buf)?;
        send_allowing_backpressure(&mut chan.socket, &buf, SocketAddr::new(probe.dest, 0))
    }

    #[instrument(skip(self), level = "trace")]
    fn send_local_probe(&mut self, src: PhyintId, dst: PhyintId, seq: Sequence) -> Result<()> {
        self.send_local_frame(src, dst, seq, LOCAL_FRAME_PROBE)
    }

    #[instrument(skip(self), level = "trace")]
    fn send_local_ack(&mut self, src: PhyintId, dst: PhyintId, seq: Sequence) -> Result<()> {
        self.send_local_frame(src, dst, seq, LOCAL_FRAME_ACK)
    }

    #[instrument(skip_all, level = "trace")]
    fn recv(&mut self, timeout: Duration) -> Result<Option<Incoming>> {
        let sockets = self.instances.len() + self.local_endpoints.len();
        if sockets == 0 {
            std::thread::sleep(timeout);
            return Ok(None);
        }
        let share = timeout / sockets as u32;
        for index in 0..self.instances.len() {
            if let Some(incoming) = self.recv_instance(index, share)? {
                tracing::debug!(?incoming);
                return Ok(Some(incoming));
            }
        }
        for index in 0..self.local_endpoints.len() {
            if let Some(incoming) = self.recv_local(index, share)? {
                tracing::debug!(?incoming);
                return Ok(Some(incoming));
            }
        }
        Ok(None)
    }
}

/// Send, treating backpressure as sent.
///
/// A would-block result means the kernel could not take the packet right
/// now; attributing that to the path under test would manufacture false
/// failures.
fn send_allowing_backpressure<S: Socket>(
    socket: &mut S,
    buf: &[u8],
    dest: SocketAddr,
) -> Result<()> {
    match socket.send_to(buf, dest) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::WouldBlock => {
            tracing::trace!(?dest, "probe send would block, treated as sent");
            Ok(())
        }
        Err(err) => Err(Error::ProbeFailed(err)),
    }
}

fn encode_probe(probe: &ProbeRequest, buf: &mut [u8]) -> Result<()> {
    let timestamp_ns = probe
        .sent
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let tag = match probe.kind {
        ProbeKind::Unicast => ProbeTag::Unicast,
        ProbeKind::Multicast => ProbeTag::Multicast,
        ProbeKind::RttOnly => ProbeTag::RttOnly,
    };
    match probe.key.family {
        Family::Ipv4 => {
            let mut echo = icmpv4::echo::EchoPacket::new(buf)?;
            echo.set_icmp_type(icmpv4::IcmpType::EchoRequest);
            echo.set_icmp_code(icmpv4::IcmpCode(0));
            echo.set_identifier(probe.probe_id.0);
            echo.set_sequence(probe.seq.0);
            let mut message = ProbeMessage::new(echo.payload_mut())?;
            message.set_magic();
            message.set_timestamp_ns(timestamp_ns);
            message.set_tag(tag);
            let checksum = icmp_ipv4_checksum(echo.packet());
            echo.set_checksum(checksum);
        }
        Family::Ipv6 => {
            let mut echo = icmpv6::echo::EchoPacket::new(buf)?;
            echo.set_icmp_type(icmpv6::IcmpType::EchoRequest);
            echo.set_icmp_code(icmpv6::IcmpCode(0));
            echo.set_identifier(probe.probe_id.0);
            echo.set_sequence(probe.seq.0);
            let mut message = ProbeMessage::new(echo.payload_mut())?;
            message.set_magic();
            message.set_timestamp_ns(timestamp_ns);
            message.set_tag(tag);
        }
    }
    Ok(())
}

/// Structurally validate and decode a probe reply.
///
/// Anything that fails validation is dropped silently; the engine never
/// learns of packets that could not have been replies to its own probes.
fn decode_reply(
    key: InstanceKey,
    probe_id: ProbeId,
    buf: &[u8],
    meta: &RecvMeta,
) -> Option<Incoming> {
    if meta.routing_header {
        tracing::trace!("dropping reply carrying a routing header");
        return None;
    }
    let Some(received) = meta.timestamp else {
        tracing::trace!("dropping reply without a receive timestamp");
        return None;
    };
    let src = meta.addr?.ip();
    let icmp = match key.family {
        // A raw IPv4 socket delivers the IP header; skip it.
        Family::Ipv4 => {
            if meta.len < 1 {
                return None;
            }
            let header_len = usize::from(buf[0] & 0x0f) * 4;
            if header_len == 0 || meta.len < header_len {
                return None;
            }
            &buf[header_len..meta.len]
        }
        Family::Ipv6 => {
            let IpAddr::V6(v6) = src else {
                return None;
            };
            if (v6.segments()[0] & 0xffc0) != 0xfe80 {
                tracing::trace!(?src, "dropping reply from non-link-local source");
                return None;
            }
            &buf[..meta.len]
        }
    };
    let (reply_type, code, identifier, seq, payload) = match key.family {
        Family::Ipv4 => {
            let echo = icmpv4::echo::EchoPacket::new_view(icmp).ok()?;
            (
                echo.get_icmp_type() == icmpv4::IcmpType::EchoReply,
                echo.get_icmp_code().0,
                echo.get_identifier(),
                echo.get_sequence(),
                icmp.get(icmpv4::echo::EchoPacket::minimum_packet_size()..)?,
            )
        }
        Family::Ipv6 => {
            let echo = icmpv6::echo::EchoPacket::new_view(icmp).ok()?;
            (
                echo.get_icmp_type() == icmpv6::IcmpType::EchoReply,
                echo.get_icmp_code().0,
                echo.get_identifier(),
                echo.get_sequence(),
                icmp.get(icmpv6::echo::EchoPacket::minimum_packet_size()..)?,
            )
        }
    };
    if !reply_type || code != 0 || identifier != probe_id.0 {
        return None;
    }
    let message = ProbeMessage::new_view(payload).ok()?;
    let magic_ok = message.has_magic();
    let kind = match message.get_tag() {
        ProbeTag::Unicast => ProbeKind::Unicast,
        ProbeTag::Multicast => ProbeKind::Multicast,
        ProbeTag::RttOnly => ProbeKind::RttOnly,
        // An unrecognised tag under a valid header reads as forged.
        ProbeTag::Other(_) => {
            return Some(Incoming::Reply(ProbeReply {
                key,
                src,
                probe_id,
                seq: Sequence(seq),
                kind: ProbeKind::Unicast,
                magic_ok: false,
                sent: UNIX_EPOCH,
                received,
            }));
        }
    };
    let sent = UNIX_EPOCH + Duration::from_nanos(message.get_timestamp_ns());
    Some(Incoming::Reply(ProbeReply {
        key,
        src,
        probe_id,
        seq: Sequence(seq),
        kind,
        magic_ok,
        sent,
        received,
    }))
}

fn decode_local_frame(buf: &[u8], meta: &RecvMeta) -> Option<Incoming> {
    if meta.len < LOCAL_FRAME_SIZE {
        return None;
    }
    let frame = &buf[..LOCAL_FRAME_SIZE];
    if u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) != LOCAL_FRAME_MAGIC {
        return None;
    }
    let seq = Sequence(u16::from_be_bytes([frame[5], frame[6]]));
    let src = PhyintId(u32::from_be_bytes([frame[7], frame[8], frame[9], frame[10]]) as usize);
    let dst = PhyintId(u32::from_be_bytes([frame[11], frame[12], frame[13], frame[14]]) as usize);
    match frame[4] {
        LOCAL_FRAME_PROBE => Some(Incoming::LocalProbe { src, dst, seq }),
        LOCAL_FRAME_ACK => Some(Incoming::LocalAck { src, dst, seq }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::socket::MockSocket;
    use hex_literal::hex;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    static MTX: Mutex<()> = Mutex::new(());

    const TEST_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
    const TARGET: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

    fn key() -> InstanceKey {
        InstanceKey {
            phyint: PhyintId(0),
            family: Family::Ipv4,
        }
    }

    fn ready_socket() -> MockSocket {
        let mut socket = MockSocket::new();
        socket.expect_bind().times(1).returning(|_| Ok(()));
        socket.expect_bind_device().times(1).returning(|_| Ok(()));
        socket
            .expect_set_multicast_ttl_v4()
            .times(1)
            .returning(|_| Ok(()));
        socket
            .expect_set_recv_timestamps()
            .times(1)
            .returning(|| Ok(()));
        socket
    }

    #[test]
    fn test_send_unicast_probe_bytes() {
        let _m = MTX.lock();
        let ctx = MockSocket::new_icmp_ipv4_context();
        ctx.expect().returning(|| {
            let mut socket = ready_socket();
            socket
                .expect_send_to()
                .withf(|buf, addr| {
                    buf == hex!(
                        "08 00 a4 40 6d 70 00 01 6d 70 64 70 00 00 00 00 3b 9a ca 00 75 6e 69 63"
                    ) && *addr == SocketAddr::new(TARGET, 0)
                })
                .times(1)
                .returning(|_, _| Ok(()));
            Ok(socket)
        });
        let mut channel: Channel<MockSocket> = Channel::new();
        channel
            .add_instance(key(), "net0", TEST_ADDR, ProbeId(0x6d70))
            .unwrap();
        let probe = ProbeRequest {
            key: key(),
            kind: ProbeKind::Unicast,
            dest: TARGET,
            probe_id: ProbeId(0x6d70),
            seq: Sequence(1),
            sent: UNIX_EPOCH + Duration::from_secs(1),
        };
        channel.send_probe(&probe).unwrap();
    }

    #[test]
    fn test_send_would_block_treated_as_sent() {
        let _m = MTX.lock();
        let ctx = MockSocket::new_icmp_ipv4_context();
        ctx.expect().returning(|| {
            let mut socket = ready_socket();
            socket.expect_send_to().times(1).returning(|_, addr| {
                Err(crate::error::IoError::SendTo(
                    std::io::Error::from(ErrorKind::WouldBlock),
                    addr,
                ))
            });
            Ok(socket)
        });
        let mut channel: Channel<MockSocket> = Channel::new();
        channel
            .add_instance(key(), "net0", TEST_ADDR, ProbeId(1))
            .unwrap();
        let probe = ProbeRequest {
            key: key(),
            kind: ProbeKind::RttOnly,
            dest: TARGET,
            probe_id: ProbeId(1),
            seq: Sequence(0),
            sent: UNIX_EPOCH,
        };
        assert!(channel.send_probe(&probe).is_ok());
    }

    #[test]
    fn test_recv_decodes_reply() {
        let _m = MTX.lock();
        // 20 byte IPv4 header followed by an echo reply carrying the probe
        // payload; checksum irrelevant to decode.
        let packet = hex!(
            "45 00 00 2c 00 00 00 00 40 01 00 00 0a 00 00 01 0a 00 00 02"
            "00 00 00 00 6d 70 00 05 6d 70 64 70 00 00 00 00 3b 9a ca 00 75 6e 69 63"
        );
        let received = UNIX_EPOCH + Duration::from_secs(2);
        let ctx = MockSocket::new_icmp_ipv4_context();
        ctx.expect().returning(move || {
            let mut socket = ready_socket();
            socket.expect_is_readable().returning(|_| Ok(true));
            socket.expect_recv_meta().returning(move |buf| {
                buf[..packet.len()].copy_from_slice(&packet);
                Ok(RecvMeta {
                    len: packet.len(),
                    addr: Some(SocketAddr::new(TARGET, 0)),
                    timestamp: Some(received),
                    routing_header: false,
                })
            });
            Ok(socket)
        });
        let mut channel: Channel<MockSocket> = Channel::new();
        channel
            .add_instance(key(), "net0", TEST_ADDR, ProbeId(0x6d70))
            .unwrap();
        let incoming = channel.recv(Duration::from_millis(10)).unwrap().unwrap();
        let Incoming::Reply(reply) = incoming else {
            panic!("expected a probe reply");
        };
        assert_eq!(key(), reply.key);
        assert_eq!(TARGET, reply.src);
        assert_eq!(Sequence(5), reply.seq);
        assert_eq!(ProbeKind::Unicast, reply.kind);
        assert!(reply.magic_ok);
        assert_eq!(UNIX_EPOCH + Duration::from_secs(1), reply.sent);
        assert_eq!(received, reply.received);
    }

    #[test]
    fn test_recv_drops_wrong_identifier() {
        let _m = MTX.lock();
        let packet = hex!(
            "45 00 00 2c 00 00 00 00 40 01 00 00 0a 00 00 01 0a 00 00 02"
            "00 00 00 00 99 99 00 05 6d 70 64 70 00 00 00 00 3b 9a ca 00 75 6e 69 63"
        );
        let ctx = MockSocket::new_icmp_ipv4_context();
        ctx.expect().returning(move || {
            let mut socket = ready_socket();
            socket.expect_is_readable().returning(|_| Ok(true));
            socket.expect_recv_meta().returning(move |buf| {
                buf[..packet.len()].copy_from_slice(&packet);
                Ok(RecvMeta {
                    len: packet.len(),
                    addr: Some(SocketAddr::new(TARGET, 0)),
                    timestamp: Some(UNIX_EPOCH),
                    routing_header: false,
                })
            });
            Ok(socket)
        });
        let mut channel: Channel<MockSocket> = Channel::new();
        channel
            .add_instance(key(), "net0", TEST_ADDR, ProbeId(0x6d70))
            .unwrap();
        assert!(channel.recv(Duration::from_millis(10)).unwrap().is_none());
    }

    #[test]
    fn test_recv_drops_missing_timestamp() {
        let _m = MTX.lock();
        let packet = hex!(
            "45 00 00 2c 00 00 00 00 40 01 00 00 0a 00 00 01 0a 00 00 02"
            "00 00 00 00 6d 70 00 05 6d 70 64 70 00 00 00 00 3b 9a ca 00 75 6e 69 63"
        );
        let ctx = MockSocket::new_icmp_ipv4_context();
        ctx.expect().returning(move || {
            let mut socket = ready_socket();
            socket.expect_is_readable().returning(|_| Ok(true));
            socket.expect_recv_meta().returning(move |buf| {
                buf[..packet.len()].copy_from_slice(&packet);
                Ok(RecvMeta {
                    len: packet.len(),
                    addr: Some(SocketAddr::new(TARGET, 0)),
                    timestamp: None,
                    routing_header: false,
                })
            });
            Ok(socket)
        });
        let mut channel: Channel<MockSocket> = Channel::new();
        channel
            .add_instance(key(), "net0", TEST_ADDR, ProbeId(0x6d70))
            .unwrap();
        assert!(channel.recv(Duration::from_millis(10)).unwrap().is_none());
    }

    #[test]
    fn test_reply_without_magic_is_flagged() {
        let _m = MTX.lock();
        let packet = hex!(
            "45 00 00 2c 00 00 00 00 40 01 00 00 0a 00 00 01 0a 00 00 02"
            "00 00 00 00 6d 70 00 05 00 00 00 00 00 00 00 00 3b 9a ca 00 75 6e 69 63"
        );
        let ctx = MockSocket::new_icmp_ipv4_context();
        ctx.expect().returning(move || {
            let mut socket = ready_socket();
            socket.expect_is_readable().returning(|_| Ok(true));
            socket.expect_recv_meta().returning(move |buf| {
                buf[..packet.len()].copy_from_slice(&packet);
                Ok(RecvMeta {
                    len: packet.len(),
                    addr: Some(SocketAddr::new(TARGET, 0)),
                    timestamp: Some(UNIX_EPOCH),
                    routing_header: false,
                })
            });
            Ok(socket)
        });
        let mut channel: Channel<MockSocket> = Channel::new();
        channel
            .add_instance(key(), "net0", TEST_ADDR, ProbeId(0x6d70))
            .unwrap();
        let incoming = channel.recv(Duration::from_millis(10)).unwrap().unwrap();
        let Incoming::Reply(reply) = incoming else {
            panic!("expected a probe reply");
        };
        assert!(!reply.magic_ok);
    }

    #[test]
    fn test_local_frame_round_trip() {
        let mut frame = [0_u8; LOCAL_FRAME_SIZE];
        frame[0..4].copy_from_slice(&LOCAL_FRAME_MAGIC.to_be_bytes());
        frame[4] = LOCAL_FRAME_ACK;
        frame[5..7].copy_from_slice(&7_u16.to_be_bytes());
        frame[7..11].copy_from_slice(&1_u32.to_be_bytes());
        frame[11..15].copy_from_slice(&2_u32.to_be_bytes());
        let meta = RecvMeta {
            len: LOCAL_FRAME_SIZE,
            addr: None,
            timestamp: None,
            routing_header: false,
        };
        let incoming = decode_local_frame(&frame, &meta).unwrap();
        let Incoming::LocalAck { src, dst, seq } = incoming else {
            panic!("expected a local ack");
        };
        assert_eq!(PhyintId(1), src);
        assert_eq!(PhyintId(2), dst);
        assert_eq!(Sequence(7), seq);
    }

    #[test]
    fn test_local_frame_bad_magic_dropped() {
        let frame = [0_u8; LOCAL_FRAME_SIZE];
        let meta = RecvMeta {
            len: LOCAL_FRAME_SIZE,
            addr: None,
            timestamp: None,
            routing_header: false,
        };
        assert!(decode_local_frame(&frame, &meta).is_none());
    }
}
