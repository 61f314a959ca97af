//! Wire message model.
//!
//! A [`Message`] is what travels in one datagram: an optional correlation id,
//! a url (the route key plus query), headers and a payload. Outbound messages
//! also carry the destination address; inbound ones carry the origin. Messages
//! are built once through [`MessageBuilder`]; only the session-assigned topic
//! changes afterwards.

mod headers;
mod payload;

pub use headers::{CONTENT_TYPE, HeaderValue, Headers, METHOD, STATUS, STATUS_MESSAGE};
pub use payload::Payload;

use std::net::SocketAddr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::address::RemoteAddress;
use crate::wire::WireHead;

/// Correlation id: a number assigned by sessions, or a string from peers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    /// Numeric id.
    Num(u64),
    /// String id.
    Str(String),
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageId::Num(n) => write!(f, "{n}"),
            MessageId::Str(s) => f.write_str(s),
        }
    }
}

impl From<u64> for MessageId {
    fn from(id: u64) -> Self {
        MessageId::Num(id)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        MessageId::Str(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        MessageId::Str(id)
    }
}

/// One wire message.
#[derive(Debug, Default)]
pub struct Message {
    id: Option<MessageId>,
    url: String,
    headers: Headers,
    payload: Payload,
    address: Option<RemoteAddress>,
    topic: Option<String>,
}

/// Owned fields of a [`Message`], for stages that rebuild it.
#[derive(Debug, Default)]
pub struct MessageParts {
    /// Correlation id.
    pub id: Option<MessageId>,
    /// Route key plus optional query.
    pub url: String,
    /// Headers.
    pub headers: Headers,
    /// Payload.
    pub payload: Payload,
    /// Destination (outbound) or origin (inbound).
    pub address: Option<RemoteAddress>,
    /// Session topic.
    pub topic: Option<String>,
}

impl Message {
    /// Start building a message for `url`.
    pub fn builder(url: impl Into<String>) -> MessageBuilder {
        MessageBuilder {
            parts: MessageParts {
                url: url.into(),
                ..MessageParts::default()
            },
        }
    }

    /// Message read off a socket.
    pub(crate) fn inbound(head: WireHead, payload: Bytes, origin: SocketAddr) -> Self {
        let address = RemoteAddress::from(origin);
        Self {
            id: head.id,
            url: head.url,
            headers: head.headers,
            payload: Payload::Bytes(payload),
            topic: Some(address.topic()),
            address: Some(address),
        }
    }

    /// Rebuild from parts.
    pub fn from_parts(parts: MessageParts) -> Self {
        Self {
            id: parts.id,
            url: parts.url,
            headers: parts.headers,
            payload: parts.payload,
            address: parts.address,
            topic: parts.topic,
        }
    }

    /// Correlation id.
    pub fn id(&self) -> Option<&MessageId> {
        self.id.as_ref()
    }

    /// Route key plus optional query.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Destination (outbound) or origin (inbound).
    pub fn address(&self) -> Option<&RemoteAddress> {
        self.address.as_ref()
    }

    /// Session topic.
    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    /// Assign the topic. This is the only mutation a built message allows.
    pub fn set_topic(&mut self, topic: impl Into<String>) {
        self.topic = Some(topic.into());
    }

    /// Replace the payload, consuming the message.
    pub fn with_payload(self, payload: impl Into<Payload>) -> Self {
        Self {
            payload: payload.into(),
            ..self
        }
    }

    /// Split into owned parts.
    pub fn into_parts(self) -> MessageParts {
        MessageParts {
            id: self.id,
            url: self.url,
            headers: self.headers,
            payload: self.payload,
            address: self.address,
            topic: self.topic,
        }
    }
}

/// Builder for [`Message`].
///
/// ```
/// use tidepool::{Message, RemoteAddress};
///
/// let message = Message::builder("sensor/message")
///     .id(7u64)
///     .header("content-type", "text/plain")
///     .payload("hi")
///     .address(RemoteAddress::new("127.0.0.1", 5000))
///     .build();
/// assert_eq!(message.url(), "sensor/message");
/// assert_eq!(message.headers().get("Content-Type"), Some("text/plain"));
/// ```
#[derive(Debug)]
pub struct MessageBuilder {
    parts: MessageParts,
}

impl MessageBuilder {
    /// Set the correlation id.
    pub fn id(mut self, id: impl Into<MessageId>) -> Self {
        self.parts.id = Some(id.into());
        self
    }

    /// Set one header.
    pub fn header(mut self, name: &str, value: impl Into<HeaderValue>) -> Self {
        self.parts.headers.set(name, value);
        self
    }

    /// Replace all headers.
    pub fn headers(mut self, headers: Headers) -> Self {
        self.parts.headers = headers;
        self
    }

    /// Set the payload.
    pub fn payload(mut self, payload: impl Into<Payload>) -> Self {
        self.parts.payload = payload.into();
        self
    }

    /// Set the destination or origin address.
    pub fn address(mut self, address: RemoteAddress) -> Self {
        self.parts.address = Some(address);
        self
    }

    /// Set the topic.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.parts.topic = Some(topic.into());
        self
    }

    /// Finish building.
    pub fn build(self) -> Message {
        Message::from_parts(self.parts)
    }
}
