use crate::error::{IoError, IoOperation, IoResult};
use crate::net::socket::{RecvMeta, Socket};
use itertools::Itertools;
use nix::sys::select::FdSet;
use nix::sys::socket::{recvmsg, ControlMessageOwned, MsgFlags, SockaddrLike, SockaddrStorage};
use nix::sys::time::{TimeVal, TimeValLike};
use socket2::{Domain, Protocol, SockAddr, Type};
use std::io;
use std::io::IoSliceMut;
use std::net::{IpAddr, SocketAddr};
use std::os::fd::{AsFd, AsRawFd};
use std::time::{Duration, UNIX_EPOCH};
use tracing::instrument;

/// A network socket.
pub struct SocketImpl {
    inner: socket2::Socket,
}

impl SocketImpl {
    fn new(domain: Domain, ty: Type, protocol: Protocol) -> IoResult<Self> {
        let socket = Self {
            inner: socket2::Socket::new(domain, ty, Some(protocol))
                .map_err(|err| IoError::Other(err, IoOperation::NewSocket))?,
        };
        socket
            .inner
            .set_nonblocking(true)
            .map_err(|err| IoError::Other(err, IoOperation::SetNonBlocking))?;
        Ok(socket)
    }
}

impl Socket for SocketImpl {
    #[instrument(level = "trace")]
    fn new_icmp_ipv4() -> IoResult<Self> {
        Self::new(Domain::IPV4, Type::RAW, Protocol::ICMPV4)
    }

    #[instrument(level = "trace")]
    fn new_icmp_ipv6() -> IoResult<Self> {
        Self::new(Domain::IPV6, Type::RAW, Protocol::ICMPV6)
    }

    #[instrument(level = "trace")]
    fn new_udp_ipv4() -> IoResult<Self> {
        Self::new(Domain::IPV4, Type::DGRAM, Protocol::UDP)
    }

    #[instrument(skip(self), level = "trace")]
    fn bind(&mut self, address: SocketAddr) -> IoResult<()> {
        self.inner
            .bind(&SockAddr::from(address))
            .map_err(|err| IoError::Bind(err, address))
    }

    #[cfg(any(target_os = "linux", target_os = "android", target_os = "fuchsia"))]
    #[instrument(skip(self), level = "trace")]
    fn bind_device(&mut self, interface: &str) -> IoResult<()> {
        self.inner
            .bind_device(Some(interface.as_bytes()))
            .map_err(|err| IoError::Other(err, IoOperation::BindDevice))
    }

    /// Binding to a device is not available here; the bind to the test
    /// address scopes traffic instead.
    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "fuchsia")))]
    #[instrument(skip(self), level = "trace")]
    fn bind_device(&mut self, _interface: &str) -> IoResult<()> {
        Ok(())
    }

    #[instrument(skip(self), level = "trace")]
    fn set_multicast_ttl_v4(&mut self, ttl: u32) -> IoResult<()> {
        self.inner
            .set_multicast_ttl_v4(ttl)
            .map_err(|err| IoError::Other(err, IoOperation::SetMulticastTtl))
    }

    #[instrument(skip(self), level = "trace")]
    fn set_multicast_hops_v6(&mut self, hops: u32) -> IoResult<()> {
        self.inner
            .set_multicast_hops_v6(hops)
            .map_err(|err| IoError::Other(err, IoOperation::SetMulticastTtl))
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    #[instrument(skip(self), level = "trace")]
    fn set_recv_timestamps(&mut self) -> IoResult<()> {
        nix::sys::socket::setsockopt(
            &self.inner,
            nix::sys::socket::sockopt::ReceiveTimestampns,
            &true,
        )
        .map_err(|err| IoError::Other(io::Error::from(err), IoOperation::SetTimestamping))
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    #[instrument(skip(self), level = "trace")]
    fn set_recv_timestamps(&mut self) -> IoResult<()> {
        nix::sys::socket::setsockopt(
            &self.inner,
            nix::sys::socket::sockopt::ReceiveTimestamp,
            &true,
        )
        .map_err(|err| IoError::Other(io::Error::from(err), IoOperation::SetTimestamping))
    }

    #[instrument(skip(self, buf), level = "trace")]
    fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> IoResult<()> {
        tracing::trace!(buf = format!("{:02x?}", buf.iter().format(" ")), ?addr);
        self.inner
            .send_to(buf, &SockAddr::from(addr))
            .map_err(|err| IoError::SendTo(err, addr))?;
        Ok(())
    }

    #[instrument(skip(self), level = "trace")]
    fn is_readable(&mut self, timeout: Duration) -> IoResult<bool> {
        let mut read = FdSet::new();
        read.insert(self.inner.as_fd());
        let readable = nix::sys::select::select(
            None,
            Some(&mut read),
            None,
            None,
            Some(&mut TimeVal::milliseconds(timeout.as_millis() as i64)),
        );
        match readable {
            Ok(readable) => Ok(readable == 1),
            Err(nix::Error::EINTR) => Ok(false),
            Err(err) => Err(IoError::Other(io::Error::from(err), IoOperation::Select)),
        }
    }

    #[instrument(skip_all, level = "trace")]
    fn recv_meta(&mut self, buf: &mut [u8]) -> IoResult<RecvMeta> {
        let mut iov = [IoSliceMut::new(buf)];
        let mut cmsg_buffer = nix::cmsg_space!(nix::sys::time::TimeSpec);
        let msg = recvmsg::<SockaddrStorage>(
            self.inner.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buffer),
            MsgFlags::empty(),
        )
        .map_err(|err| IoError::Other(io::Error::from(err), IoOperation::RecvMsg))?;
        let mut timestamp = None;
        let cmsgs = msg
            .cmsgs()
            .map_err(|err| IoError::Other(io::Error::from(err), IoOperation::RecvMsg))?;
        for cmsg in cmsgs {
            match cmsg {
                #[cfg(any(target_os = "linux", target_os = "android"))]
                ControlMessageOwned::ScmTimestampns(ts) => {
                    timestamp = Some(
                        UNIX_EPOCH
                            + Duration::new(ts.tv_sec() as u64, ts.tv_nsec() as u32),
                    );
                }
                #[cfg(not(any(target_os = "linux", target_os = "android")))]
                ControlMessageOwned::ScmTimestamp(tv) => {
                    timestamp = Some(
                        UNIX_EPOCH
                            + Duration::new(tv.tv_sec() as u64, tv.tv_usec() as u32 * 1000),
                    );
                }
                _ => {}
            }
        }
        let addr = msg.address.as_ref().and_then(sockaddr_to_std);
        Ok(RecvMeta {
            len: msg.bytes,
            addr,
            timestamp,
            // Raw ICMPv6 sockets never deliver routing headers unless
            // IPV6_RECVRTHDR is enabled, which it is not.
            routing_header: false,
        })
    }
}

fn sockaddr_to_std(addr: &SockaddrStorage) -> Option<SocketAddr> {
    match addr.family() {
        Some(nix::sys::socket::AddressFamily::Inet) => addr
            .as_sockaddr_in()
            .map(|sin| SocketAddr::new(IpAddr::V4(sin.ip()), sin.port())),
        Some(nix::sys::socket::AddressFamily::Inet6) => addr
            .as_sockaddr_in6()
            .map(|sin6| SocketAddr::new(IpAddr::V6(sin6.ip()), sin6.port())),
        _ => None,
    }
}
