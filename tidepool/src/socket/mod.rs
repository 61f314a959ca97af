//! Socket abstraction for real and in-memory transports.
//!
//! Sessions only see [`DatagramSocket`]: something that sends and receives
//! whole messages and knows its own address. Tokio's UDP socket implements it
//! directly; [`MemoryNetwork`] provides a deterministic in-process network for
//! tests, and [`StreamSocket`] adapts a connected byte stream through
//! delimiter framing.

mod memory;
mod stream;

pub use memory::{MemoryNetwork, MemorySocket};
pub use stream::StreamSocket;

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;

/// A socket that moves whole datagrams.
///
/// Single-core design - no Send bounds needed.
#[async_trait(?Send)]
pub trait DatagramSocket {
    /// Send one datagram to `target`, or to the connected peer when `None`.
    async fn send_to(&self, datagram: &[u8], target: Option<SocketAddr>) -> io::Result<usize>;

    /// Receive one datagram into `buf`, returning its length and origin.
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Address this socket is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Provider trait for binding datagram sockets.
///
/// Clone allows sharing one provider between clients and servers.
#[async_trait(?Send)]
pub trait DatagramProvider: Clone {
    /// The socket type for this provider.
    type Socket: DatagramSocket + 'static;

    /// Bind a socket to `addr` (`host:port`; port 0 picks a free port).
    async fn bind(&self, addr: &str) -> io::Result<Self::Socket>;
}

/// Real Tokio UDP implementation.
#[derive(Debug, Clone, Default)]
pub struct TokioDatagramProvider;

#[async_trait(?Send)]
impl DatagramProvider for TokioDatagramProvider {
    type Socket = UdpSocket;

    async fn bind(&self, addr: &str) -> io::Result<Self::Socket> {
        UdpSocket::bind(addr).await
    }
}

#[async_trait(?Send)]
impl DatagramSocket for UdpSocket {
    async fn send_to(&self, datagram: &[u8], target: Option<SocketAddr>) -> io::Result<usize> {
        match target {
            Some(target) => UdpSocket::send_to(self, datagram, target).await,
            None => self.send(datagram).await,
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}
