//! Configuration for transport sessions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::address::{AddressFamily, RemoteAddress};
use crate::framing::DEFAULT_DELIMITER;

/// Default maximum message size: 60 KiB.
pub const DEFAULT_MAX_SIZE: usize = 60 * 1024;

/// Default logical method for requests that carry none.
pub const DEFAULT_METHOD: &str = "MESSAGE";

/// Default content type assumed for inbound messages without one.
pub const DEFAULT_ENCODING: &str = "application/json";

/// Options recognized by sessions, codings stages, readers and writers.
///
/// Every field has a default, so a partial JSON document deserializes:
///
/// ```
/// use tidepool::TransportOptions;
///
/// let options = TransportOptions::from_json(r#"{ "port": 4000, "timeout_ms": 250 }"#)
///     .expect("options");
/// assert_eq!(options.port, Some(4000));
/// assert_eq!(options.max_size, tidepool::DEFAULT_MAX_SIZE);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    /// Maximum size in bytes of one encoded message.
    pub max_size: usize,

    /// Framing delimiter for stream transports; empty means the default `#`.
    pub delimiter: String,

    /// Method applied to requests that carry none.
    pub default_method: String,

    /// Top-level body fields stripped before serialization.
    pub serialize_ignores: Vec<String>,

    /// Content type assumed when an inbound message has none.
    pub encoding: String,

    /// Bind host for servers, and static destination host for clients.
    pub host: Option<String>,

    /// Bind port for servers, and static destination port for clients.
    pub port: Option<u16>,

    /// Reply timeout applied when a request carries none.
    /// None waits until the session closes.
    #[serde(rename = "timeout_ms", with = "duration_millis")]
    pub timeout: Option<Duration>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            delimiter: DEFAULT_DELIMITER.to_string(),
            default_method: DEFAULT_METHOD.to_string(),
            serialize_ignores: Vec::new(),
            encoding: DEFAULT_ENCODING.to_string(),
            host: None,
            port: None,
            timeout: None,
        }
    }
}

impl TransportOptions {
    /// Options for loopback services: bind to 127.0.0.1, 5 second replies.
    pub fn local_network() -> Self {
        Self {
            host: Some("127.0.0.1".to_string()),
            timeout: Some(Duration::from_secs(5)),
            ..Self::default()
        }
    }

    /// Parse options from a JSON document, filling defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Set the maximum message size.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the stream framing delimiter.
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Set the fallback request method.
    pub fn with_default_method(mut self, method: impl Into<String>) -> Self {
        self.default_method = method.into();
        self
    }

    /// Set the body fields stripped before serialization.
    pub fn with_serialize_ignores<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.serialize_ignores = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Set the host and port.
    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = Some(host.into());
        self.port = Some(port);
        self
    }

    /// Set the default reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Address a server binds to: `host:port`, defaulting to `0.0.0.0:0`.
    pub fn bind_address(&self) -> String {
        let host = self.host.as_deref().unwrap_or("0.0.0.0");
        let port = self.port.unwrap_or(0);
        RemoteAddress::new(host, port).to_string()
    }

    /// Ephemeral address a client binds to, matching the static channel family.
    pub fn client_bind_address(&self) -> &'static str {
        match self.static_channel() {
            Some(addr) if addr.family == AddressFamily::IPv6 => "[::]:0",
            _ => "0.0.0.0:0",
        }
    }

    /// Destination configured through `host` and `port`, when both are set.
    pub fn static_channel(&self) -> Option<RemoteAddress> {
        match (&self.host, self.port) {
            (Some(host), Some(port)) => Some(RemoteAddress::new(host.clone(), port)),
            _ => None,
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
