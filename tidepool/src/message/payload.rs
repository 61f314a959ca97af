//! Message payloads: materialized bytes or a lazy byte stream.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::TransportError;

/// Payload of a [`Message`](super::Message).
pub enum Payload {
    /// Bytes already in memory.
    Bytes(Bytes),
    /// A byte stream that is read to the end before sending.
    Stream(Box<dyn AsyncRead + Unpin>),
}

impl Payload {
    /// Wrap a reader as a streaming payload.
    pub fn stream(reader: impl AsyncRead + Unpin + 'static) -> Self {
        Payload::Stream(Box::new(reader))
    }

    /// Whether this payload still has to be read.
    pub fn is_stream(&self) -> bool {
        matches!(self, Payload::Stream(_))
    }

    /// The bytes, when materialized.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Payload::Bytes(b) => Some(b),
            Payload::Stream(_) => None,
        }
    }

    /// Read the payload into memory.
    ///
    /// Materialized bytes are returned as they are. A stream is read up to
    /// one byte past `max_size`; reaching that byte fails with
    /// [`TransportError::PacketTooLarge`] instead of truncating.
    pub async fn materialize(self, max_size: usize) -> Result<Bytes, TransportError> {
        match self {
            Payload::Bytes(bytes) => Ok(bytes),
            Payload::Stream(reader) => {
                let limit = (max_size as u64).saturating_add(1);
                let mut buf = Vec::new();
                reader.take(limit).read_to_end(&mut buf).await?;
                if buf.len() > max_size {
                    return Err(TransportError::PacketTooLarge {
                        size: buf.len(),
                        max: max_size,
                    });
                }
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Bytes(Bytes::new())
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Payload::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Payload {
    fn from(bytes: &'static [u8]) -> Self {
        Payload::Bytes(Bytes::from_static(bytes))
    }
}

impl From<&'static str> for Payload {
    fn from(text: &'static str) -> Self {
        Payload::Bytes(Bytes::from_static(text.as_bytes()))
    }
}
