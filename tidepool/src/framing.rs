//! Delimiter framing for stream transports.
//!
//! Frame format: `<decimal length><delimiter><payload>`, e.g. `5#hello`.
//! Datagram transports do not frame; every datagram is one message. An empty
//! delimiter means [`DEFAULT_DELIMITER`].

use bytes::{Buf, Bytes, BytesMut};

use crate::wire::WireError;

/// Default frame delimiter.
pub const DEFAULT_DELIMITER: &str = "#";

// u64::MAX has 20 decimal digits.
const MAX_PREFIX_DIGITS: usize = 20;

/// Encode one frame.
///
/// ```
/// assert_eq!(tidepool::encode_frame(b"hello", "#"), b"5#hello");
/// ```
pub fn encode_frame(payload: &[u8], delimiter: &str) -> Vec<u8> {
    let delimiter = frame_delimiter(delimiter);
    let prefix = payload.len().to_string();
    let mut frame = Vec::with_capacity(prefix.len() + delimiter.len() + payload.len());
    frame.extend_from_slice(prefix.as_bytes());
    frame.extend_from_slice(delimiter.as_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Incremental frame decoder over a byte stream.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    delimiter: Vec<u8>,
    max_size: usize,
}

impl FrameDecoder {
    /// Create a decoder. Frames longer than `max_size` are rejected.
    pub fn new(delimiter: &str, max_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            delimiter: frame_delimiter(delimiter).as_bytes().to_vec(),
            max_size,
        }
    }

    /// Append bytes read from the stream.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned as frames.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pop the next complete frame.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(payload))` if a complete frame was buffered
    /// - `Ok(None)` if more data is needed
    /// - `Err` if the prefix is malformed or announces an oversized frame
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, WireError> {
        let Some(split) = find(&self.buffer, &self.delimiter) else {
            if self.buffer.len() > MAX_PREFIX_DIGITS + self.delimiter.len() {
                return Err(WireError::InvalidFrame {
                    message: "no delimiter after length prefix".to_string(),
                });
            }
            return Ok(None);
        };

        let prefix = &self.buffer[..split];
        if prefix.is_empty() || !prefix.iter().all(u8::is_ascii_digit) {
            return Err(WireError::InvalidFrame {
                message: format!("bad length prefix {:?}", String::from_utf8_lossy(prefix)),
            });
        }
        let length: usize = std::str::from_utf8(prefix)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| WireError::InvalidFrame {
                message: "length prefix out of range".to_string(),
            })?;
        if length > self.max_size {
            return Err(WireError::PacketTooLarge {
                size: length,
                max: self.max_size,
            });
        }

        let header_len = split + self.delimiter.len();
        if self.buffer.len() < header_len + length {
            return Ok(None);
        }

        self.buffer.advance(header_len);
        Ok(Some(self.buffer.split_to(length).freeze()))
    }
}

fn frame_delimiter(delimiter: &str) -> &str {
    if delimiter.is_empty() {
        DEFAULT_DELIMITER
    } else {
        delimiter
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
