//! In-process datagram network.
//!
//! Sockets bound on a [`MemoryNetwork`] exchange datagrams through unbounded
//! channels, preserving per-sender order. Unspecified bind addresses map to
//! 127.0.0.1 and port 0 picks the next free ephemeral port, so tests can use
//! the same addresses they would use with real UDP.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::rc::Rc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use super::{DatagramProvider, DatagramSocket};

const FIRST_EPHEMERAL_PORT: u16 = 40_000;

type Inbox = mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>;

#[derive(Debug)]
struct NetworkState {
    sockets: HashMap<SocketAddr, Inbox>,
    next_port: u16,
    delivered: u64,
}

/// Shared in-memory network; clones refer to the same network.
#[derive(Debug, Clone)]
pub struct MemoryNetwork {
    state: Rc<RefCell<NetworkState>>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(NetworkState {
                sockets: HashMap::new(),
                next_port: FIRST_EPHEMERAL_PORT,
                delivered: 0,
            })),
        }
    }

    /// Number of datagrams delivered so far.
    pub fn delivered(&self) -> u64 {
        self.state.borrow().delivered
    }

    /// Whether a socket is bound at `addr`.
    pub fn is_bound(&self, addr: SocketAddr) -> bool {
        self.state.borrow().sockets.contains_key(&addr)
    }

    fn bind_socket(&self, addr: &str) -> io::Result<MemorySocket> {
        let requested: SocketAddr = addr.parse().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid bind address {addr:?}"),
            )
        })?;
        let ip = if requested.ip().is_unspecified() {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            requested.ip()
        };

        let mut state = self.state.borrow_mut();
        let local = if requested.port() == 0 {
            loop {
                let port = state.next_port;
                state.next_port = state.next_port.checked_add(1).unwrap_or(FIRST_EPHEMERAL_PORT);
                let candidate = SocketAddr::new(ip, port);
                if !state.sockets.contains_key(&candidate) {
                    break candidate;
                }
            }
        } else {
            SocketAddr::new(ip, requested.port())
        };

        if state.sockets.contains_key(&local) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{local} already bound"),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.sockets.insert(local, tx);
        tracing::trace!(address = %local, "memory socket bound");

        Ok(MemorySocket {
            local,
            network: self.clone(),
            inbox: Mutex::new(rx),
            peer: Cell::new(None),
        })
    }

    fn deliver(&self, from: SocketAddr, to: SocketAddr, datagram: &[u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        let inbox = state.sockets.get(&to).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("no memory socket bound at {to}"),
            )
        })?;
        inbox
            .send((datagram.to_vec(), from))
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "socket closed"))?;
        state.delivered += 1;
        Ok(datagram.len())
    }

    fn unbind(&self, addr: SocketAddr) {
        self.state.borrow_mut().sockets.remove(&addr);
    }
}

#[async_trait(?Send)]
impl DatagramProvider for MemoryNetwork {
    type Socket = MemorySocket;

    async fn bind(&self, addr: &str) -> io::Result<Self::Socket> {
        self.bind_socket(addr)
    }
}

/// Socket bound on a [`MemoryNetwork`]. Unbinds on drop.
///
/// Sending to an address nobody is bound at fails with `ConnectionRefused`.
#[derive(Debug)]
pub struct MemorySocket {
    local: SocketAddr,
    network: MemoryNetwork,
    inbox: Mutex<mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
    peer: Cell<Option<SocketAddr>>,
}

impl MemorySocket {
    /// Set the default destination for sends without a target.
    pub fn connect(&self, peer: SocketAddr) {
        self.peer.set(Some(peer));
    }
}

#[async_trait(?Send)]
impl DatagramSocket for MemorySocket {
    async fn send_to(&self, datagram: &[u8], target: Option<SocketAddr>) -> io::Result<usize> {
        let to = target
            .or(self.peer.get())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no destination"))?;
        self.network.deliver(self.local, to, datagram)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut inbox = self.inbox.lock().await;
        let (datagram, origin) = inbox
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket unbound"))?;
        // Datagram semantics: excess bytes are discarded.
        let n = datagram.len().min(buf.len());
        buf[..n].copy_from_slice(&datagram[..n]);
        Ok((n, origin))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }
}

impl Drop for MemorySocket {
    fn drop(&mut self) {
        self.network.unbind(self.local);
    }
}
