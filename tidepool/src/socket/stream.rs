//! Datagram semantics over a connected byte stream.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::DatagramSocket;
use crate::config::TransportOptions;
use crate::framing::{FrameDecoder, encode_frame};

const READ_CHUNK: usize = 8 * 1024;

/// Adapts a connected stream (TCP, pipes, in-memory duplex) to
/// [`DatagramSocket`] using `<length><delimiter><payload>` framing.
///
/// Every frame is reported as coming from the connected peer, and sends
/// ignore their target.
pub struct StreamSocket<S> {
    reader: Mutex<(ReadHalf<S>, FrameDecoder)>,
    writer: Mutex<WriteHalf<S>>,
    delimiter: String,
    local: SocketAddr,
    peer: SocketAddr,
}

impl<S: AsyncRead + AsyncWrite> StreamSocket<S> {
    /// Wrap `stream`, framing with the options' delimiter and size limit.
    pub fn new(
        stream: S,
        local: SocketAddr,
        peer: SocketAddr,
        options: &TransportOptions,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: Mutex::new((
                read_half,
                FrameDecoder::new(&options.delimiter, options.max_size),
            )),
            writer: Mutex::new(write_half),
            delimiter: options.delimiter.clone(),
            local,
            peer,
        }
    }

    /// The connected peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl StreamSocket<TcpStream> {
    /// Connect over TCP.
    pub async fn connect(addr: &str, options: &TransportOptions) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Self::from_tcp(stream, options)
    }

    /// Wrap an established TCP stream.
    pub fn from_tcp(stream: TcpStream, options: &TransportOptions) -> io::Result<Self> {
        let local = stream.local_addr()?;
        let peer = stream.peer_addr()?;
        Ok(Self::new(stream, local, peer, options))
    }
}

#[async_trait(?Send)]
impl<S: AsyncRead + AsyncWrite> DatagramSocket for StreamSocket<S> {
    async fn send_to(&self, datagram: &[u8], _target: Option<SocketAddr>) -> io::Result<usize> {
        let frame = encode_frame(datagram, &self.delimiter);
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(datagram.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut guard = self.reader.lock().await;
        let (read_half, decoder) = &mut *guard;
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let frame = decoder
                .next_frame()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            if let Some(frame) = frame {
                if frame.len() > buf.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("frame of {} bytes exceeds receive buffer", frame.len()),
                    ));
                }
                buf[..frame.len()].copy_from_slice(&frame);
                return Ok((frame.len(), self.peer));
            }

            let n = read_half.read(&mut chunk).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed by peer",
                ));
            }
            decoder.extend(&chunk[..n]);
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs() -> (SocketAddr, SocketAddr) {
        (
            "127.0.0.1:7001".parse().expect("addr"),
            "127.0.0.1:7002".parse().expect("addr"),
        )
    }

    #[tokio::test]
    async fn test_frames_cross_duplex() {
        let (a_addr, b_addr) = addrs();
        let options = TransportOptions::default();
        let (a, b) = tokio::io::duplex(64);
        let a = StreamSocket::new(a, a_addr, b_addr, &options);
        let b = StreamSocket::new(b, b_addr, a_addr, &options);

        a.send_to(b"first", None).await.expect("send");
        a.send_to(b"second#with#delims", None).await.expect("send");

        let mut buf = [0u8; 64];
        let (n, origin) = b.recv_from(&mut buf).await.expect("recv");
        assert_eq!(&buf[..n], b"first");
        assert_eq!(origin, a_addr);
        let (n, _) = b.recv_from(&mut buf).await.expect("recv");
        assert_eq!(&buf[..n], b"second#with#delims");
    }

    #[tokio::test]
    async fn test_empty_delimiter_option_still_frames() {
        let (a_addr, b_addr) = addrs();
        let options = TransportOptions::default().with_delimiter("");
        let (a, b) = tokio::io::duplex(64);
        let a = StreamSocket::new(a, a_addr, b_addr, &options);
        let b = StreamSocket::new(b, b_addr, a_addr, &options);

        a.send_to(b"one", None).await.expect("send");
        a.send_to(b"two", None).await.expect("send");

        let mut buf = [0u8; 16];
        let (n, _) = b.recv_from(&mut buf).await.expect("recv");
        assert_eq!(&buf[..n], b"one");
        let (n, _) = b.recv_from(&mut buf).await.expect("recv");
        assert_eq!(&buf[..n], b"two");
    }

    #[tokio::test]
    async fn test_eof_is_error() {
        let (a_addr, b_addr) = addrs();
        let options = TransportOptions::default();
        let (a, b) = tokio::io::duplex(64);
        let b = StreamSocket::new(b, b_addr, a_addr, &options);
        drop(a);

        let mut buf = [0u8; 8];
        let err = b.recv_from(&mut buf).await.expect_err("eof");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_tcp_connect() {
        let options = TransportOptions::default().with_delimiter("|");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listen");
        let addr = listener.local_addr().expect("addr");

        let client = StreamSocket::connect(&addr.to_string(), &options)
            .await
            .expect("connect");
        let (accepted, _) = listener.accept().await.expect("accept");
        let server = StreamSocket::from_tcp(accepted, &options).expect("wrap");

        client.send_to(b"over tcp", None).await.expect("send");
        let mut buf = [0u8; 32];
        let (n, origin) = server.recv_from(&mut buf).await.expect("recv");
        assert_eq!(&buf[..n], b"over tcp");
        assert_eq!(origin, client.local_addr().expect("addr"));
    }
}
