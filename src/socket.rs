//! Datagram channel abstraction and the UDP implementation.
//!
//! The drivers in [`crate::connection`] only need to send a datagram to an
//! address and receive the next datagram with its source.  [`DatagramChannel`]
//! captures exactly that, so the same driver runs over a real UDP socket
//! ([`Socket`]) or the in-memory network in [`crate::simulator`].
//!
//! No delivery guarantees are implied: datagrams may be lost, duplicated or
//! reordered by any implementation.

use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;

use tokio::net::UdpSocket;

/// Boxed future returned by [`DatagramChannel`] methods.
pub type IoFuture<'a, T> = Pin<Box<dyn Future<Output = io::Result<T>> + Send + 'a>>;

/// Unreliable, message-oriented transport.
///
/// All methods take `&self` so one channel can be shared (behind an `Arc`)
/// between a receive task and the engine loop.
pub trait DatagramChannel: Send + Sync {
    /// Send `buf` as a single datagram to `dest`.
    fn send_to<'a>(&'a self, buf: &'a [u8], dest: SocketAddr) -> IoFuture<'a, ()>;

    /// Wait for the next datagram.
    ///
    /// Returns the number of bytes written into `buf` and the sender's
    /// address.  Datagrams longer than `buf` are truncated.
    fn recv_from<'a>(&'a self, buf: &'a mut [u8]) -> IoFuture<'a, (usize, SocketAddr)>;

    /// Address this channel receives on.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// A UDP socket bound to one local address.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port 0 lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        log::debug!("[socket] bound {local_addr}");
        Ok(Self { local_addr, inner })
    }
}

/// Concrete local IP for traffic to `peer`.
///
/// Returns `bind` unless it is a wildcard; otherwise asks the OS which
/// interface routes toward `peer` by connecting a throwaway UDP socket
/// (no packets are sent).
pub async fn local_ip_toward(bind: IpAddr, peer: SocketAddr) -> io::Result<IpAddr> {
    if !bind.is_unspecified() {
        return Ok(bind);
    }
    let any: IpAddr = match peer {
        SocketAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
        SocketAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
    };
    let route = UdpSocket::bind((any, 0)).await?;
    route.connect(peer).await?;
    Ok(route.local_addr()?.ip())
}

impl DatagramChannel for Socket {
    fn send_to<'a>(&'a self, buf: &'a [u8], dest: SocketAddr) -> IoFuture<'a, ()> {
        Box::pin(async move { self.inner.send_to(buf, dest).await.map(drop) })
    }

    fn recv_from<'a>(&'a self, buf: &'a mut [u8]) -> IoFuture<'a, (usize, SocketAddr)> {
        Box::pin(self.inner.recv_from(buf))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }
}
