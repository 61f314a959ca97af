//! Error types for transport sessions.
//!
//! [`TransportError`] is the top-level error every session operation returns.
//! Lower layers keep their own enums ([`WireError`], [`AddressParseError`])
//! and convert into it with `From`.

use std::time::Duration;

use crate::address::AddressParseError;
use crate::codings::Role;
use crate::message::MessageId;
use crate::packet::StatusCode;
use crate::wire::WireError;

/// Errors produced by transport sessions, codings stages, readers and writers.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Socket operation failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An outbound message exceeds the configured maximum size.
    #[error("Packet length {size} great than max size {max}")]
    PacketTooLarge {
        /// Observed size in bytes.
        size: usize,
        /// Configured maximum in bytes.
        max: usize,
    },

    /// A datagram could not be parsed.
    #[error("malformed datagram: {0}")]
    Wire(WireError),

    /// The destination address could not be parsed.
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] AddressParseError),

    /// No channel could be derived for an outbound packet.
    #[error("no channel for outbound packet (url: {url:?})")]
    NoChannel {
        /// The request URL, if any.
        url: Option<String>,
    },

    /// Encoding a packet into a message failed.
    #[error("encode failed: {message}")]
    Encode {
        /// Details about the failure.
        message: String,
    },

    /// Decoding a message into a packet failed.
    #[error("decode failed: {message}")]
    Decode {
        /// Details about the failure.
        message: String,
    },

    /// Every stage of a codings pipeline delegated without producing output.
    #[error("no codings stage handled the {what}")]
    Unhandled {
        /// Which pipeline ran dry.
        what: &'static str,
    },

    /// The operation is not available for this session role.
    #[error("operation requires a {expected:?} session")]
    WrongRole {
        /// The role the operation needs.
        expected: Role,
    },

    /// A request with this correlation id is already waiting for a reply.
    #[error("request id {id} already in flight")]
    DuplicateId {
        /// The colliding id.
        id: MessageId,
    },

    /// No reply arrived in time.
    #[error("request timed out after {after:?}")]
    Timeout {
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The session was destroyed.
    #[error("transport session closed")]
    SessionClosed,

    /// The remote side answered with an error status.
    #[error("remote error {status}: {message}")]
    Status {
        /// Response status.
        status: StatusCode,
        /// Response status message.
        message: String,
    },
}

impl TransportError {
    /// Status code used when this error is turned into an error response.
    pub fn status(&self) -> StatusCode {
        match self {
            TransportError::PacketTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            TransportError::Wire(WireError::PacketTooLarge { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            TransportError::Wire(_)
            | TransportError::Decode { .. }
            | TransportError::InvalidAddress(_)
            | TransportError::Unhandled { .. }
            | TransportError::DuplicateId { .. } => StatusCode::BAD_REQUEST,
            TransportError::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            TransportError::SessionClosed => StatusCode::SERVICE_UNAVAILABLE,
            TransportError::Status { status, .. } => *status,
            TransportError::Io(_)
            | TransportError::NoChannel { .. }
            | TransportError::Encode { .. }
            | TransportError::WrongRole { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the error means the session can no longer be used.
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::SessionClosed)
    }
}

impl From<WireError> for TransportError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::PacketTooLarge { size, max } => TransportError::PacketTooLarge { size, max },
            other => TransportError::Wire(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_too_large_message() {
        let err = TransportError::PacketTooLarge {
            size: 3_145_728,
            max: 61_440,
        };
        assert_eq!(
            err.to_string(),
            "Packet length 3145728 great than max size 61440"
        );
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_wire_too_large_converts() {
        let err: TransportError = WireError::PacketTooLarge { size: 10, max: 5 }.into();
        assert!(matches!(
            err,
            TransportError::PacketTooLarge { size: 10, max: 5 }
        ));
    }

    #[test]
    fn test_wire_errors_are_bad_requests() {
        let err: TransportError = WireError::ChecksumMismatch {
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(matches!(err, TransportError::Wire(_)));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            TransportError::Timeout {
                after: Duration::from_millis(5)
            }
            .status(),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(
            TransportError::Status {
                status: StatusCode::NOT_FOUND,
                message: "Not Found".into(),
            }
            .status(),
            StatusCode::NOT_FOUND
        );
        assert!(TransportError::SessionClosed.is_closed());

        let duplicate = TransportError::DuplicateId {
            id: MessageId::Num(7),
        };
        assert_eq!(duplicate.to_string(), "request id 7 already in flight");
        assert_eq!(duplicate.status(), StatusCode::BAD_REQUEST);
    }
}
