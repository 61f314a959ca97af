//! Typed request/response packets.
//!
//! Packets are the application-facing side of a session: handlers receive a
//! [`RequestPacket`] and return a [`ResponsePacket`]; clients do the reverse.
//! The codings pipeline converts between packets and wire messages.

mod request;
mod response;
mod status;

pub use request::{RequestPacket, RequestUpdate};
pub use response::{ResponsePacket, ResponseUpdate};
pub use status::StatusCode;

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Query parameters of a request.
pub type Params = BTreeMap<String, String>;

/// Content type of JSON bodies.
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Content type of text bodies.
pub const TEXT_CONTENT_TYPE: &str = "text/plain";
/// Content type of binary bodies.
pub const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

/// Route of a request: a path, or a structured map such as `{cmd: "sum"}`.
///
/// The route key is what handlers are registered under:
///
/// ```
/// use tidepool::Pattern;
///
/// assert_eq!(Pattern::from("/sensor/message/").key(), "sensor/message");
/// assert_eq!(Pattern::cmd("xxx").key(), r#"{"cmd":"xxx"}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Pattern {
    /// Path-style route.
    Route(String),
    /// Structured route; keys are ordered for a canonical key.
    Structured(BTreeMap<String, String>),
}

impl Pattern {
    /// Structured `{cmd: <cmd>}` pattern.
    pub fn cmd(cmd: impl Into<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert("cmd".to_string(), cmd.into());
        Pattern::Structured(map)
    }

    /// Canonical route key.
    pub fn key(&self) -> String {
        match self {
            Pattern::Route(path) => path.trim_matches('/').to_string(),
            Pattern::Structured(map) => serde_json::to_string(map).unwrap_or_default(),
        }
    }

    /// Parse a route key back into a pattern.
    pub fn from_key(key: &str) -> Self {
        if key.starts_with('{') {
            if let Ok(map) = serde_json::from_str(key) {
                return Pattern::Structured(map);
            }
        }
        Pattern::Route(key.trim_matches('/').to_string())
    }

    /// Whether this is an empty route.
    pub fn is_empty(&self) -> bool {
        match self {
            Pattern::Route(path) => path.trim_matches('/').is_empty(),
            Pattern::Structured(map) => map.is_empty(),
        }
    }
}

impl Default for Pattern {
    fn default() -> Self {
        Pattern::Route(String::new())
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

impl From<&str> for Pattern {
    fn from(route: &str) -> Self {
        Pattern::Route(route.to_string())
    }
}

impl From<String> for Pattern {
    fn from(route: String) -> Self {
        Pattern::Route(route)
    }
}

/// Build a message url: route key plus encoded query.
pub(crate) fn encode_url(pattern: &Pattern, params: &Params) -> String {
    let key = pattern.key();
    if params.is_empty() {
        return key;
    }
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    format!("{key}?{query}")
}

/// Split a message url into pattern and query parameters.
pub(crate) fn decode_url(url: &str) -> (Pattern, Params) {
    let (key, query) = split_query(url);
    let params = query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    (Pattern::from_key(key), params)
}

fn split_query(url: &str) -> (&str, Option<&str>) {
    // A structured key may contain '?' inside its JSON; split after it.
    if url.starts_with('{') {
        return match url.rfind('}') {
            Some(end) => {
                let (key, rest) = url.split_at(end + 1);
                (key, rest.strip_prefix('?'))
            }
            None => (url, None),
        };
    }
    match url.split_once('?') {
        Some((key, query)) => (key, Some(query)),
        None => (url, None),
    }
}

/// Body of a packet.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Body {
    /// No body.
    #[default]
    Empty,
    /// UTF-8 text.
    Text(String),
    /// JSON document.
    Json(serde_json::Value),
    /// Raw bytes.
    Binary(Bytes),
}

impl Body {
    /// JSON body from any serializable value.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, TransportError> {
        serde_json::to_value(value)
            .map(Body::Json)
            .map_err(|e| TransportError::Encode {
                message: e.to_string(),
            })
    }

    /// Text body.
    pub fn text(text: impl Into<String>) -> Self {
        Body::Text(text.into())
    }

    /// Deserialize the body as `T`.
    pub fn to_json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        let decoded = match self {
            Body::Empty => serde_json::from_value(serde_json::Value::Null),
            Body::Json(value) => serde_json::from_value(value.clone()),
            Body::Text(text) => serde_json::from_str(text),
            Body::Binary(bytes) => serde_json::from_slice(bytes),
        };
        decoded.map_err(|e| TransportError::Decode {
            message: e.to_string(),
        })
    }

    /// JSON value, when this is a JSON body.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Body::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Whether there is no body.
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }

    /// Content type header for this body.
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            Body::Empty => None,
            Body::Text(_) => Some(TEXT_CONTENT_TYPE),
            Body::Json(_) => Some(JSON_CONTENT_TYPE),
            Body::Binary(_) => Some(BINARY_CONTENT_TYPE),
        }
    }

    /// Serialize, dropping `ignores` from the top level of JSON objects.
    pub fn encode(&self, ignores: &[String]) -> Result<Bytes, TransportError> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Text(text) => Ok(Bytes::from(text.clone())),
            Body::Binary(bytes) => Ok(bytes.clone()),
            Body::Json(value) => {
                let encoded = match value {
                    serde_json::Value::Object(map) if !ignores.is_empty() => {
                        let mut map = map.clone();
                        for field in ignores {
                            map.remove(field);
                        }
                        serde_json::to_vec(&map)
                    }
                    _ => serde_json::to_vec(value),
                };
                encoded
                    .map(Bytes::from)
                    .map_err(|e| TransportError::Encode {
                        message: e.to_string(),
                    })
            }
        }
    }

    /// Deserialize according to `content_type`.
    pub fn decode(content_type: &str, bytes: Bytes) -> Result<Self, TransportError> {
        if bytes.is_empty() {
            return Ok(Body::Empty);
        }
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if mime == JSON_CONTENT_TYPE || mime.ends_with("+json") {
            serde_json::from_slice(&bytes)
                .map(Body::Json)
                .map_err(|e| TransportError::Decode {
                    message: e.to_string(),
                })
        } else if mime.starts_with("text/") {
            String::from_utf8(bytes.to_vec())
                .map(Body::Text)
                .map_err(|e| TransportError::Decode {
                    message: e.to_string(),
                })
        } else {
            Ok(Body::Binary(bytes))
        }
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        Body::Json(value)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::Text(text.to_string())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Text(text)
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Binary(bytes)
    }
}
