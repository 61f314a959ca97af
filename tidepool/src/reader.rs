//! Socket to message stream adapter.

use std::io;
use std::rc::Rc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::address::RemoteAddress;
use crate::message::Message;
use crate::socket::DatagramSocket;
use crate::wire::{MAX_DATAGRAM_SIZE, WireError, deserialize_datagram};

/// One item read off the socket.
#[derive(Debug)]
pub enum Received {
    /// A well-formed message.
    Message(Message),
    /// A datagram that failed to parse.
    Malformed {
        /// Sender of the datagram.
        origin: RemoteAddress,
        /// Why it was rejected.
        error: WireError,
    },
}

/// Turns datagrams arriving on a socket into [`Received`] items.
///
/// Datagrams whose origin equals the socket's own address are dropped.
pub struct MessageReader {
    socket: Rc<dyn DatagramSocket>,
    max_size: usize,
    closed: watch::Receiver<bool>,
}

impl MessageReader {
    /// Reader over `socket`; it stops once `closed` turns true.
    pub fn new(
        socket: Rc<dyn DatagramSocket>,
        max_size: usize,
        closed: watch::Receiver<bool>,
    ) -> Self {
        Self {
            socket,
            max_size,
            closed,
        }
    }

    /// Start a receive loop and return its stream.
    ///
    /// Must be called inside a [`tokio::task::LocalSet`]. Dropping the stream
    /// stops the loop; subscribing again starts a fresh one.
    pub fn subscribe(&self) -> MessageStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::task::spawn_local(receive_loop(
            self.socket.clone(),
            self.max_size,
            self.closed.clone(),
            tx,
        ));
        MessageStream { rx, task }
    }
}

/// Stream of items from one [`MessageReader::subscribe`] call.
#[derive(Debug)]
pub struct MessageStream {
    rx: mpsc::UnboundedReceiver<Received>,
    task: JoinHandle<io::Result<()>>,
}

impl MessageStream {
    /// Next item; `None` once the loop has ended.
    pub async fn next(&mut self) -> Option<Received> {
        self.rx.recv().await
    }

    /// Wait for the loop to end and return why it did.
    ///
    /// `Ok` when it was cancelled, `Err` with the socket error that stopped
    /// it. Call at most once, after [`MessageStream::next`] returned `None`.
    pub async fn finish(&mut self) -> io::Result<()> {
        match (&mut self.task).await {
            Ok(outcome) => outcome,
            Err(e) => Err(io::Error::other(e)),
        }
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn receive_loop(
    socket: Rc<dyn DatagramSocket>,
    max_size: usize,
    mut closed: watch::Receiver<bool>,
    tx: mpsc::UnboundedSender<Received>,
) -> io::Result<()> {
    let local = socket.local_addr().ok();
    // One byte of headroom so oversized stream frames are still seen whole.
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE.max(max_size) + 1];

    if *closed.borrow() {
        return Ok(());
    }

    loop {
        let received = tokio::select! {
            changed = closed.changed() => {
                if changed.is_err() || *closed.borrow() {
                    break;
                }
                continue;
            }
            _ = tx.closed() => break,
            received = socket.recv_from(&mut buf) => received,
        };

        let (n, origin) = match received {
            Ok(received) => received,
            Err(e) if is_transient(&e) => {
                tracing::debug!(error = %e, "transient receive error");
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "socket receive failed, stopping reader");
                return Err(e);
            }
        };

        if Some(origin) == local {
            tracing::trace!(origin = %origin, "dropping datagram from own address");
            continue;
        }

        let item = match deserialize_datagram(&buf[..n], max_size) {
            Ok((head, payload)) => {
                tracing::trace!(origin = %origin, url = %head.url, bytes = n, "received message");
                Received::Message(Message::inbound(head, payload, origin))
            }
            Err(error) => {
                tracing::warn!(origin = %origin, error = %error, "malformed datagram");
                Received::Malformed {
                    origin: RemoteAddress::from(origin),
                    error,
                }
            }
        };

        if tx.send(item).is_err() {
            break;
        }
    }
    tracing::debug!("reader stopped");
    Ok(())
}

// ICMP port-unreachable for an earlier send surfaces here on some platforms.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::task::LocalSet;

    use super::*;
    use crate::message::Headers;
    use crate::socket::{DatagramProvider, MemoryNetwork, TokioDatagramProvider};
    use crate::wire::{WireHead, serialize_datagram};

    fn datagram(url: &str) -> Vec<u8> {
        let head = WireHead {
            id: None,
            url: url.to_string(),
            headers: Headers::new(),
        };
        serialize_datagram(&head, b"", 1024).expect("serialize")
    }

    #[tokio::test]
    async fn test_loopback_datagrams_are_dropped() {
        LocalSet::new()
            .run_until(async {
                let socket = TokioDatagramProvider
                    .bind("127.0.0.1:0")
                    .await
                    .expect("bind");
                let peer = TokioDatagramProvider
                    .bind("127.0.0.1:0")
                    .await
                    .expect("bind");
                let own = DatagramSocket::local_addr(&socket).expect("addr");
                let socket: Rc<dyn DatagramSocket> = Rc::new(socket);

                let (_close_tx, close_rx) = watch::channel(false);
                let mut stream = MessageReader::new(socket.clone(), 1024, close_rx).subscribe();

                socket
                    .send_to(&datagram("self"), Some(own))
                    .await
                    .expect("send to self");
                DatagramSocket::send_to(&peer, &datagram("peer"), Some(own))
                    .await
                    .expect("send from peer");

                match stream.next().await {
                    Some(Received::Message(message)) => assert_eq!(message.url(), "peer"),
                    other => panic!("expected peer message, got {other:?}"),
                }
            })
            .await;
    }

    #[tokio::test]
    async fn test_malformed_datagram_is_reported() {
        LocalSet::new()
            .run_until(async {
                let net = MemoryNetwork::new();
                let socket = net.bind("127.0.0.1:0").await.expect("bind");
                let peer = net.bind("127.0.0.1:0").await.expect("bind");
                let own = socket.local_addr().expect("addr");
                let (_close_tx, close_rx) = watch::channel(false);
                let mut stream = MessageReader::new(Rc::new(socket), 1024, close_rx).subscribe();

                let mut corrupted = datagram("x");
                let last = corrupted.len() - 1;
                corrupted[last] ^= 0xFF;
                peer.send_to(&corrupted, Some(own)).await.expect("send");

                match stream.next().await {
                    Some(Received::Malformed { origin, error }) => {
                        assert_eq!(origin, RemoteAddress::from(peer.local_addr().expect("addr")));
                        assert!(matches!(error, WireError::ChecksumMismatch { .. }));
                    }
                    other => panic!("expected malformed item, got {other:?}"),
                }
            })
            .await;
    }

    #[tokio::test]
    async fn test_order_preserved_and_close_ends_stream() {
        LocalSet::new()
            .run_until(async {
                let net = MemoryNetwork::new();
                let socket = net.bind("127.0.0.1:0").await.expect("bind");
                let peer = net.bind("127.0.0.1:0").await.expect("bind");
                let own = socket.local_addr().expect("addr");
                let (close_tx, close_rx) = watch::channel(false);
                let mut stream = MessageReader::new(Rc::new(socket), 1024, close_rx).subscribe();

                for url in ["a", "b", "c"] {
                    peer.send_to(&datagram(url), Some(own)).await.expect("send");
                }
                for expected in ["a", "b", "c"] {
                    match stream.next().await {
                        Some(Received::Message(m)) => assert_eq!(m.url(), expected),
                        other => panic!("unexpected {other:?}"),
                    }
                }

                close_tx.send_replace(true);
                let end = tokio::time::timeout(Duration::from_secs(1), stream.next())
                    .await
                    .expect("stream should end");
                assert!(end.is_none());
                stream.finish().await.expect("cancelled, not failed");
            })
            .await;
    }

    #[tokio::test]
    async fn test_socket_failure_ends_stream_with_error() {
        LocalSet::new()
            .run_until(async {
                let options = crate::config::TransportOptions::default();
                let local = "127.0.0.1:7101".parse().expect("addr");
                let peer = "127.0.0.1:7102".parse().expect("addr");
                let (ours, theirs) = tokio::io::duplex(64);
                let socket = crate::socket::StreamSocket::new(ours, local, peer, &options);
                let (_close_tx, close_rx) = watch::channel(false);
                let mut stream = MessageReader::new(Rc::new(socket), 1024, close_rx).subscribe();

                drop(theirs);
                assert!(stream.next().await.is_none());
                let err = stream.finish().await.expect_err("eof");
                assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
            })
            .await;
    }

    #[tokio::test]
    async fn test_resubscribe_restarts() {
        LocalSet::new()
            .run_until(async {
                let net = MemoryNetwork::new();
                let socket = net.bind("127.0.0.1:0").await.expect("bind");
                let peer = net.bind("127.0.0.1:0").await.expect("bind");
                let own = socket.local_addr().expect("addr");
                let (_close_tx, close_rx) = watch::channel(false);
                let reader = MessageReader::new(Rc::new(socket), 1024, close_rx);

                drop(reader.subscribe());
                tokio::task::yield_now().await;

                let mut stream = reader.subscribe();
                peer.send_to(&datagram("again"), Some(own)).await.expect("send");
                match stream.next().await {
                    Some(Received::Message(m)) => assert_eq!(m.url(), "again"),
                    other => panic!("unexpected {other:?}"),
                }
            })
            .await;
    }
}
