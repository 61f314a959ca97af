//! Message to socket adapter.

use std::rc::Rc;

use crate::error::TransportError;
use crate::message::Message;
use crate::socket::DatagramSocket;
use crate::wire::{WireHead, serialize_datagram};

/// Writes messages to a socket as single datagrams.
pub struct MessageWriter {
    socket: Rc<dyn DatagramSocket>,
    max_size: usize,
}

impl MessageWriter {
    /// Writer over `socket`, rejecting messages larger than `max_size`.
    pub fn new(socket: Rc<dyn DatagramSocket>, max_size: usize) -> Self {
        Self { socket, max_size }
    }

    /// Serialize and send one message, returning the datagram size.
    ///
    /// Stream payloads are read to the end first. The message address is the
    /// destination; without one the socket's connected peer is used.
    ///
    /// # Errors
    ///
    /// - `PacketTooLarge`: the payload or the encoded datagram exceeds `max_size`
    /// - `Io`: reading the payload, resolving the address, or sending failed
    pub async fn write(&self, message: Message) -> Result<usize, TransportError> {
        let parts = message.into_parts();
        let payload = parts.payload.materialize(self.max_size).await?;
        let head = WireHead {
            id: parts.id,
            url: parts.url,
            headers: parts.headers,
        };
        let datagram = serialize_datagram(&head, &payload, self.max_size)?;

        let target = match &parts.address {
            Some(address) => Some(address.resolve().await?),
            None => None,
        };
        let sent = self.socket.send_to(&datagram, target).await?;
        tracing::trace!(
            target_addr = ?target,
            url = %head.url,
            bytes = sent,
            "sent message"
        );
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::address::RemoteAddress;
    use crate::message::Payload;
    use crate::socket::{DatagramProvider, MemoryNetwork};
    use crate::wire::deserialize_datagram;

    async fn pair(
        net: &MemoryNetwork,
    ) -> (Rc<dyn DatagramSocket>, Rc<dyn DatagramSocket>, SocketAddr) {
        let a = net.bind("127.0.0.1:0").await.expect("bind");
        let b = net.bind("127.0.0.1:0").await.expect("bind");
        let b_addr = b.local_addr().expect("addr");
        (Rc::new(a), Rc::new(b), b_addr)
    }

    #[tokio::test]
    async fn test_write_delivers_one_datagram() {
        let net = MemoryNetwork::new();
        let (a, b, b_addr) = pair(&net).await;
        let writer = MessageWriter::new(a, 1024);

        let message = Message::builder("hello")
            .id(5u64)
            .payload("world")
            .address(RemoteAddress::from(b_addr))
            .build();
        let sent = writer.write(message).await.expect("write");

        let mut buf = [0u8; 1024];
        let (n, _) = b.recv_from(&mut buf).await.expect("recv");
        assert_eq!(n, sent);
        let (head, payload) = deserialize_datagram(&buf[..n], 1024).expect("parse");
        assert_eq!(head.url, "hello");
        assert_eq!(payload.as_ref(), b"world");
    }

    #[tokio::test]
    async fn test_stream_payload_is_materialized() {
        let net = MemoryNetwork::new();
        let (a, b, b_addr) = pair(&net).await;
        let writer = MessageWriter::new(a, 1024);

        let message = Message::builder("upload")
            .payload(Payload::stream(&b"chunked body"[..]))
            .address(RemoteAddress::from(b_addr))
            .build();
        writer.write(message).await.expect("write");

        let mut buf = [0u8; 1024];
        let (n, _) = b.recv_from(&mut buf).await.expect("recv");
        let (_, payload) = deserialize_datagram(&buf[..n], 1024).expect("parse");
        assert_eq!(payload.as_ref(), b"chunked body");
    }

    #[tokio::test]
    async fn test_oversized_message_is_rejected_not_truncated() {
        let net = MemoryNetwork::new();
        let (a, _b, b_addr) = pair(&net).await;
        let writer = MessageWriter::new(a, 512);

        let message = Message::builder("big")
            .payload(vec![0u8; 4096])
            .address(RemoteAddress::from(b_addr))
            .build();
        let err = writer.write(message).await.expect_err("too large");
        assert!(err.to_string().contains("great than max size 512"));
        assert_eq!(net.delivered(), 0);
    }

    #[tokio::test]
    async fn test_send_failure_propagates() {
        let net = MemoryNetwork::new();
        let (a, _b, _) = pair(&net).await;
        let writer = MessageWriter::new(a, 1024);

        let message = Message::builder("nowhere")
            .address(RemoteAddress::new("127.0.0.1", 1))
            .build();
        let err = writer.write(message).await.expect_err("refused");
        match err {
            TransportError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionRefused),
            other => panic!("expected Io, got {other:?}"),
        }
    }
}
