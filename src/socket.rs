//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that owns
//! only byte I/O: bind, send, and receive with an optional deadline.  All
//! protocol logic lives elsewhere.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, Type};
use tokio::net::UdpSocket;

/// A datagram socket speaking raw bytes.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (resolved after the OS assigns an
    /// ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a listening socket on `0.0.0.0:port` with `SO_REUSEADDR`, so a
    /// restarted server can rebind its port immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind_listener(port: u16) -> io::Result<Self> {
        let raw = socket2::Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        raw.set_reuse_address(true)?;
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        raw.bind(&addr.into())?;
        raw.set_nonblocking(true)?;
        Self::from_std(raw.into())
    }

    /// Bind to an OS-assigned ephemeral port, for the connecting side.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind_ephemeral() -> io::Result<Self> {
        let raw = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        raw.set_nonblocking(true)?;
        Self::from_std(raw)
    }

    fn from_std(raw: std::net::UdpSocket) -> io::Result<Self> {
        let inner = UdpSocket::from_std(raw)?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Send `buf` as a single datagram to `dest`.
    pub async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.inner.send_to(buf, dest).await
    }

    /// Receive the next datagram, waiting indefinitely.
    ///
    /// Returns the byte count and the sender's address.
    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }

    /// Receive the next datagram, waiting at most `wait`.
    ///
    /// Returns `Ok(None)` when the deadline passes without a datagram.
    pub async fn recv_from_timeout(
        &self,
        buf: &mut [u8],
        wait: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        match tokio::time::timeout(wait, self.inner.recv_from(buf)).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }
}
