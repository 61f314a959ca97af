use std::time::Duration;

use serde::Serialize;

use super::{Body, Params, Pattern, decode_url};
use crate::address::{AddressParseError, RemoteAddress};
use crate::error::TransportError;
use crate::message::{HeaderValue, Headers, MessageId};

/// Request as seen by handlers (inbound) and clients (outbound).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestPacket {
    /// Correlation id; sessions assign one when sending.
    pub id: Option<MessageId>,
    /// Destination URL such as `udp://host:port/route`; used to derive the channel.
    pub url: Option<String>,
    /// Route.
    pub pattern: Pattern,
    /// Logical method; the configured default applies when absent.
    pub method: Option<String>,
    /// Headers.
    pub headers: Headers,
    /// Query parameters.
    pub params: Params,
    /// Body.
    pub body: Body,
    /// Reply timeout overriding the session default.
    pub timeout: Option<Duration>,
    /// Explicit destination (outbound) or origin (inbound).
    pub remote: Option<RemoteAddress>,
}

/// Overrides for [`RequestPacket::clone_with`].
///
/// Headers and params merge key-wise; every other set field replaces.
#[derive(Debug, Clone, Default)]
pub struct RequestUpdate {
    /// Replacement id.
    pub id: Option<MessageId>,
    /// Replacement URL.
    pub url: Option<String>,
    /// Replacement route.
    pub pattern: Option<Pattern>,
    /// Replacement method.
    pub method: Option<String>,
    /// Headers merged over the existing ones.
    pub headers: Option<Headers>,
    /// Params merged over the existing ones.
    pub params: Option<Params>,
    /// Replacement body.
    pub body: Option<Body>,
    /// Replacement timeout.
    pub timeout: Option<Duration>,
    /// Replacement remote.
    pub remote: Option<RemoteAddress>,
}

impl RequestPacket {
    /// Request for `pattern`.
    pub fn new(pattern: impl Into<Pattern>) -> Self {
        Self {
            pattern: pattern.into(),
            ..Self::default()
        }
    }

    /// Request addressed by URL: `udp://host:port/route?key=value`.
    ///
    /// The path becomes the pattern and the query the params.
    ///
    /// ```
    /// use tidepool::{Pattern, RequestPacket};
    ///
    /// let request = RequestPacket::to("udp://127.0.0.1:4000/sensor/message?unit=c").expect("url");
    /// assert_eq!(request.pattern, Pattern::from("sensor/message"));
    /// assert_eq!(request.params.get("unit").map(String::as_str), Some("c"));
    /// ```
    pub fn to(url: &str) -> Result<Self, TransportError> {
        let parsed = url::Url::parse(url).map_err(|e| AddressParseError::InvalidUrl {
            input: url.to_string(),
            message: e.to_string(),
        })?;
        let path = percent_decode(parsed.path());
        let (pattern, _) = decode_url(path.trim_start_matches('/'));
        let params = parsed.query_pairs().into_owned().collect();
        Ok(Self {
            url: Some(url.to_string()),
            pattern,
            params,
            ..Self::default()
        })
    }

    /// Use `id` as the correlation id instead of a session-assigned one.
    pub fn with_id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the destination URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the method.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Set one header.
    pub fn with_header(mut self, name: &str, value: impl Into<HeaderValue>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Set one query parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a JSON body from any serializable value.
    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self, TransportError> {
        self.body = Body::json(value)?;
        Ok(self)
    }

    /// Set the reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the explicit destination.
    pub fn with_remote(mut self, remote: RemoteAddress) -> Self {
        self.remote = Some(remote);
        self
    }

    /// New packet with `update` applied; `self` is left untouched.
    pub fn clone_with(&self, update: RequestUpdate) -> Self {
        let mut headers = self.headers.clone();
        if let Some(overlay) = &update.headers {
            headers.merge(overlay);
        }
        let mut params = self.params.clone();
        if let Some(overlay) = update.params {
            params.extend(overlay);
        }
        Self {
            id: update.id.or_else(|| self.id.clone()),
            url: update.url.or_else(|| self.url.clone()),
            pattern: update.pattern.unwrap_or_else(|| self.pattern.clone()),
            method: update.method.or_else(|| self.method.clone()),
            headers,
            params,
            body: update.body.unwrap_or_else(|| self.body.clone()),
            timeout: update.timeout.or(self.timeout),
            remote: update.remote.or_else(|| self.remote.clone()),
        }
    }
}

// Decodes as a single form value, so form separators are escaped first.
fn percent_decode(path: &str) -> String {
    let escaped = path
        .replace('+', "%2B")
        .replace('&', "%26")
        .replace('=', "%3D");
    url::form_urlencoded::parse(format!("p={escaped}").as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| path.to_string())
}
