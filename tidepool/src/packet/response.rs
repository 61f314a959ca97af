use super::{Body, Pattern, RequestPacket, StatusCode};
use crate::address::RemoteAddress;
use crate::error::TransportError;
use crate::message::{HeaderValue, Headers, MessageId};

/// Response as returned by handlers (outbound) and received by clients (inbound).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponsePacket {
    /// Id of the request this answers.
    pub id: Option<MessageId>,
    /// Route of the request this answers.
    pub pattern: Pattern,
    /// Headers.
    pub headers: Headers,
    /// Status.
    pub status: StatusCode,
    /// Status message; the reason phrase applies when absent.
    pub status_message: Option<String>,
    /// Body.
    pub body: Body,
    /// Destination (outbound) or origin (inbound).
    pub remote: Option<RemoteAddress>,
}

/// Overrides for [`ResponsePacket::clone_with`].
///
/// Headers merge key-wise; every other set field replaces.
#[derive(Debug, Clone, Default)]
pub struct ResponseUpdate {
    /// Replacement id.
    pub id: Option<MessageId>,
    /// Replacement route.
    pub pattern: Option<Pattern>,
    /// Headers merged over the existing ones.
    pub headers: Option<Headers>,
    /// Replacement status.
    pub status: Option<StatusCode>,
    /// Replacement status message.
    pub status_message: Option<String>,
    /// Replacement body.
    pub body: Option<Body>,
    /// Replacement remote.
    pub remote: Option<RemoteAddress>,
}

impl ResponsePacket {
    /// Empty response with `status`.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// 200 response carrying `body`.
    pub fn ok(body: impl Into<Body>) -> Self {
        Self::new(StatusCode::OK).with_body(body)
    }

    /// Error response.
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            status_message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Error response describing `err`.
    pub fn from_error(err: &TransportError) -> Self {
        match err {
            TransportError::Status { status, message } => Self::error(*status, message.clone()),
            other => Self::error(other.status(), other.to_string()),
        }
    }

    /// Empty response correlated with `request`.
    pub fn for_request(request: &RequestPacket) -> Self {
        Self {
            id: request.id.clone(),
            pattern: request.pattern.clone(),
            remote: request.remote.clone(),
            ..Self::default()
        }
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Set one header.
    pub fn with_header(mut self, name: &str, value: impl Into<HeaderValue>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Set the status and message.
    pub fn with_status(mut self, status: StatusCode, message: impl Into<String>) -> Self {
        self.status = status;
        self.status_message = Some(message.into());
        self
    }

    /// Whether the status is 2xx.
    pub fn is_ok(&self) -> bool {
        self.status.is_success()
    }

    /// Status message, or the status reason phrase.
    pub fn message(&self) -> &str {
        self.status_message
            .as_deref()
            .unwrap_or_else(|| self.status.reason())
    }

    /// `Ok(self)` for 2xx responses, `TransportError::Status` otherwise.
    pub fn into_result(self) -> Result<Self, TransportError> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(TransportError::Status {
                status: self.status,
                message: self.message().to_string(),
            })
        }
    }

    /// New packet with `update` applied; `self` is left untouched.
    pub fn clone_with(&self, update: ResponseUpdate) -> Self {
        let mut headers = self.headers.clone();
        if let Some(overlay) = &update.headers {
            headers.merge(overlay);
        }
        Self {
            id: update.id.or_else(|| self.id.clone()),
            pattern: update.pattern.unwrap_or_else(|| self.pattern.clone()),
            headers,
            status: update.status.unwrap_or(self.status),
            status_message: update
                .status_message
                .or_else(|| self.status_message.clone()),
            body: update.body.unwrap_or_else(|| self.body.clone()),
            remote: update.remote.or_else(|| self.remote.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_into_result() {
        let ok = ResponsePacket::ok("ble").into_result().expect("ok");
        assert_eq!(ok.body, Body::text("ble"));

        let err = ResponsePacket::new(StatusCode::NOT_FOUND)
            .into_result()
            .expect_err("404");
        match err {
            TransportError::Status { status, message } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(message, "Not Found");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_from_error_uses_status_mapping() {
        let response = ResponsePacket::from_error(&TransportError::PacketTooLarge {
            size: 70_000,
            max: 61_440,
        });
        assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            response.message(),
            "Packet length 70000 great than max size 61440"
        );
    }

    #[test]
    fn test_for_request_correlates() {
        let request = RequestPacket {
            id: Some(MessageId::Num(4)),
            remote: Some(RemoteAddress::new("127.0.0.1", 1)),
            ..RequestPacket::new(Pattern::cmd("xxx"))
        };
        let response = ResponsePacket::for_request(&request);
        assert_eq!(response.id, request.id);
        assert_eq!(response.pattern, request.pattern);
        assert_eq!(response.remote, request.remote);
        assert!(response.is_ok());
    }

    #[test]
    fn test_clone_with() {
        let base = ResponsePacket::ok(json!({ "v": 1 })).with_header("x", "1");
        let mut headers = Headers::new();
        headers.set("y", "2");
        let updated = base.clone_with(ResponseUpdate {
            status: Some(StatusCode::BAD_REQUEST),
            headers: Some(headers),
            ..ResponseUpdate::default()
        });
        assert_eq!(updated.status, StatusCode::BAD_REQUEST);
        assert_eq!(updated.headers.len(), 2);
        assert_eq!(updated.body, base.body);
        assert_eq!(base.status, StatusCode::OK);
    }
}
