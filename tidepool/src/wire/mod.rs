//! Datagram wire format.
//!
//! Datagram format: `[length:4][checksum:4][head_len:4][head:H][payload:P]`
//!
//! - **length**: Total datagram size including header (little-endian u32)
//! - **checksum**: CRC32C of (head + payload) for integrity verification
//! - **head_len**: Size of the head in bytes (little-endian u32)
//! - **head**: JSON object `{ "id", "url", "headers" }`
//! - **payload**: Application bytes, opaque at this layer
//!
//! One datagram carries exactly one message; there is no reassembly.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::message::{Headers, MessageId};

/// Header size: 4 (length) + 4 (checksum) + 4 (head_len) = 12 bytes.
pub const HEADER_SIZE: usize = 12;

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Wire format error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Not enough data to parse the datagram.
    #[error("insufficient data: need {needed} bytes, have {have}")]
    InsufficientData {
        /// Minimum bytes required to parse.
        needed: usize,
        /// Actual bytes available.
        have: usize,
    },

    /// Checksum verification failed - data was corrupted.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Expected checksum from header.
        expected: u32,
        /// Computed checksum from data.
        actual: u32,
    },

    /// Datagram or frame exceeds the configured maximum size.
    #[error("Packet length {size} great than max size {max}")]
    PacketTooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Length field has an invalid value.
    #[error("invalid datagram length: {length}")]
    InvalidLength {
        /// The invalid length value from the header.
        length: u32,
    },

    /// The head is not valid JSON of the expected shape.
    #[error("invalid head: {message}")]
    InvalidHead {
        /// Parser details.
        message: String,
    },

    /// A stream frame prefix is malformed.
    #[error("invalid frame: {message}")]
    InvalidFrame {
        /// Details about the prefix.
        message: String,
    },
}

/// JSON head of a datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireHead {
    /// Correlation id; absent for peers that do not echo ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    /// Route key plus optional query.
    pub url: String,
    /// Headers.
    #[serde(default, skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,
}

/// Fixed-size header preceding head and payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    /// Total datagram size including header.
    pub length: u32,
    /// CRC32C checksum of (head + payload).
    pub checksum: u32,
    /// Head size in bytes.
    pub head_len: u32,
}

impl DatagramHeader {
    /// Serialize header into buffer (must be at least HEADER_SIZE bytes).
    pub fn serialize_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        buf[8..12].copy_from_slice(&self.head_len.to_le_bytes());
    }

    /// Deserialize header from buffer.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` if buffer is smaller than HEADER_SIZE.
    pub fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_SIZE {
            return Err(WireError::InsufficientData {
                needed: HEADER_SIZE,
                have: buf.len(),
            });
        }

        Ok(Self {
            length: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            checksum: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            head_len: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }
}

fn compute_checksum(head: &[u8], payload: &[u8]) -> u32 {
    crc32c::crc32c_append(crc32c::crc32c(head), payload)
}

/// Serialize one datagram.
///
/// # Errors
///
/// - `InvalidHead`: the head failed to serialize
/// - `PacketTooLarge`: the encoded datagram exceeds `max_size`
///
/// # Examples
///
/// ```
/// use tidepool::{Headers, WireHead, deserialize_datagram, serialize_datagram};
///
/// let head = WireHead { id: Some(1u64.into()), url: "ping".into(), headers: Headers::new() };
/// let datagram = serialize_datagram(&head, b"hello", 1024).expect("serialize");
/// let (recv_head, payload) = deserialize_datagram(&datagram, 1024).expect("deserialize");
///
/// assert_eq!(head, recv_head);
/// assert_eq!(payload.as_ref(), b"hello");
/// ```
pub fn serialize_datagram(
    head: &WireHead,
    payload: &[u8],
    max_size: usize,
) -> Result<Vec<u8>, WireError> {
    let head_bytes = serde_json::to_vec(head).map_err(|e| WireError::InvalidHead {
        message: e.to_string(),
    })?;

    let total_length = HEADER_SIZE + head_bytes.len() + payload.len();
    if total_length > max_size || total_length > u32::MAX as usize {
        return Err(WireError::PacketTooLarge {
            size: total_length,
            max: max_size,
        });
    }

    let header = DatagramHeader {
        length: total_length as u32,
        checksum: compute_checksum(&head_bytes, payload),
        head_len: head_bytes.len() as u32,
    };

    let mut data = vec![0u8; total_length];
    header.serialize_into(&mut data[..HEADER_SIZE]);
    let payload_start = HEADER_SIZE + head_bytes.len();
    data[HEADER_SIZE..payload_start].copy_from_slice(&head_bytes);
    data[payload_start..].copy_from_slice(payload);

    Ok(data)
}

/// Deserialize one datagram, validating length and checksum.
///
/// # Errors
///
/// - `PacketTooLarge`: the datagram exceeds `max_size`
/// - `InsufficientData`: fewer bytes than the length field announces
/// - `InvalidLength`: the length or head length fields are inconsistent
/// - `ChecksumMismatch`: data was corrupted
/// - `InvalidHead`: the head is not valid JSON
pub fn deserialize_datagram(data: &[u8], max_size: usize) -> Result<(WireHead, Bytes), WireError> {
    if data.len() > max_size {
        return Err(WireError::PacketTooLarge {
            size: data.len(),
            max: max_size,
        });
    }

    let header = DatagramHeader::deserialize(data)?;

    if header.length < HEADER_SIZE as u32 {
        return Err(WireError::InvalidLength {
            length: header.length,
        });
    }

    let expected_len = header.length as usize;
    if data.len() < expected_len {
        return Err(WireError::InsufficientData {
            needed: expected_len,
            have: data.len(),
        });
    }
    if data.len() > expected_len {
        return Err(WireError::InvalidLength {
            length: header.length,
        });
    }

    let head_end = HEADER_SIZE + header.head_len as usize;
    if head_end > expected_len {
        return Err(WireError::InvalidLength {
            length: header.head_len,
        });
    }

    let head_bytes = &data[HEADER_SIZE..head_end];
    let payload = &data[head_end..expected_len];

    let computed = compute_checksum(head_bytes, payload);
    if computed != header.checksum {
        return Err(WireError::ChecksumMismatch {
            expected: header.checksum,
            actual: computed,
        });
    }

    let head: WireHead = serde_json::from_slice(head_bytes).map_err(|e| WireError::InvalidHead {
        message: e.to_string(),
    })?;

    Ok((head, Bytes::copy_from_slice(payload)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(id: Option<u64>, url: &str) -> WireHead {
        WireHead {
            id: id.map(MessageId::Num),
            url: url.to_string(),
            headers: Headers::new(),
        }
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let mut h = head(Some(9), "sensor/message");
        h.headers.set("content-type", "application/json");

        let datagram = serialize_datagram(&h, br#"{"message":"ble"}"#, 1024).expect("serialize");
        let (recv_head, payload) = deserialize_datagram(&datagram, 1024).expect("deserialize");

        assert_eq!(recv_head, h);
        assert_eq!(payload.as_ref(), br#"{"message":"ble"}"#);
    }

    #[test]
    fn test_head_omits_missing_id() {
        let datagram = serialize_datagram(&head(None, "x"), b"", 1024).expect("serialize");
        let head_len = DatagramHeader::deserialize(&datagram)
            .expect("header")
            .head_len as usize;
        let json = std::str::from_utf8(&datagram[HEADER_SIZE..HEADER_SIZE + head_len])
            .expect("utf8");
        assert_eq!(json, r#"{"url":"x"}"#);
    }

    #[test]
    fn test_checksum_validation() {
        let datagram = serialize_datagram(&head(Some(1), "a"), b"test", 1024).expect("serialize");

        let mut corrupted = datagram.clone();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;

        let result = deserialize_datagram(&corrupted, 1024);
        assert!(matches!(result, Err(WireError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_insufficient_data_header() {
        let result = deserialize_datagram(&[0u8; 5], 1024);
        assert!(matches!(
            result,
            Err(WireError::InsufficientData {
                needed: HEADER_SIZE,
                have: 5
            })
        ));
    }

    #[test]
    fn test_truncated_datagram() {
        let datagram =
            serialize_datagram(&head(Some(1), "a"), b"payload", 1024).expect("serialize");
        let result = deserialize_datagram(&datagram[..datagram.len() - 3], 1024);
        assert!(matches!(result, Err(WireError::InsufficientData { .. })));
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let mut datagram = serialize_datagram(&head(Some(1), "a"), b"p", 1024).expect("serialize");
        datagram.extend_from_slice(b"junk");
        let result = deserialize_datagram(&datagram, 1024);
        assert!(matches!(result, Err(WireError::InvalidLength { .. })));
    }

    #[test]
    fn test_head_len_out_of_range() {
        let mut datagram = serialize_datagram(&head(Some(1), "a"), b"p", 1024).expect("serialize");
        datagram[8..12].copy_from_slice(&1000u32.to_le_bytes());
        let result = deserialize_datagram(&datagram, 1024);
        assert!(matches!(result, Err(WireError::InvalidLength { length: 1000 })));
    }

    #[test]
    fn test_serialize_too_large() {
        let payload = vec![0u8; 200];
        let result = serialize_datagram(&head(Some(1), "a"), &payload, 100);
        match result {
            Err(WireError::PacketTooLarge { size, max }) => {
                assert!(size > 200);
                assert_eq!(max, 100);
            }
            other => panic!("expected PacketTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn test_deserialize_too_large() {
        let result = deserialize_datagram(&[0u8; 300], 100);
        assert!(matches!(
            result,
            Err(WireError::PacketTooLarge { size: 300, max: 100 })
        ));
    }

    #[test]
    fn test_invalid_head_json() {
        let head_bytes = b"not json";
        let total = HEADER_SIZE + head_bytes.len();
        let header = DatagramHeader {
            length: total as u32,
            checksum: compute_checksum(head_bytes, b""),
            head_len: head_bytes.len() as u32,
        };
        let mut data = vec![0u8; total];
        header.serialize_into(&mut data[..HEADER_SIZE]);
        data[HEADER_SIZE..].copy_from_slice(head_bytes);

        let result = deserialize_datagram(&data, 1024);
        assert!(matches!(result, Err(WireError::InvalidHead { .. })));
    }
}
