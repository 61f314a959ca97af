//! Remote endpoint addressing.
//!
//! A [`RemoteAddress`] names the other side of a connectionless exchange. Its
//! `Display` form (`host:port`, or `[v6]:port`) doubles as the *topic* string
//! sessions use to group traffic per peer.

use std::io;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

/// IP family of a remote address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressFamily {
    /// IPv4, or a hostname resolved as IPv4.
    IPv4,
    /// IPv6.
    IPv6,
}

/// Host, port and family of a remote peer.
///
/// # Examples
///
/// ```
/// use tidepool::{AddressFamily, RemoteAddress};
///
/// let addr = RemoteAddress::parse("udp://[::1]:5000/sensor").expect("parse");
/// assert_eq!(addr.family, AddressFamily::IPv6);
/// assert_eq!(addr.to_string(), "[::1]:5000");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteAddress {
    /// Hostname or IP literal, without brackets.
    pub host: String,
    /// Port number.
    pub port: u16,
    /// Address family.
    pub family: AddressFamily,
}

impl RemoteAddress {
    /// Create an address, inferring the family from the host.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let family = if host.contains(':') {
            AddressFamily::IPv6
        } else {
            AddressFamily::IPv4
        };
        Self { host, port, family }
    }

    /// Parse `host:port`, `[v6]:port`, or a `scheme://host:port/...` URL.
    pub fn parse(s: &str) -> Result<Self, AddressParseError> {
        if s.contains("://") {
            return Self::parse_url(s);
        }

        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| AddressParseError::InvalidHost(s.to_string()))?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| AddressParseError::MissingPort(s.to_string()))?;
            let ip: IpAddr = host
                .parse()
                .map_err(|_| AddressParseError::InvalidHost(s.to_string()))?;
            return Ok(Self::new(ip.to_string(), parse_port(port, s)?));
        }

        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressParseError::MissingPort(s.to_string()))?;
        if host.is_empty() || host.contains(':') || host.chars().any(char::is_whitespace) {
            return Err(AddressParseError::InvalidHost(s.to_string()));
        }
        Ok(Self::new(host, parse_port(port, s)?))
    }

    fn parse_url(s: &str) -> Result<Self, AddressParseError> {
        let url = url::Url::parse(s).map_err(|e| AddressParseError::InvalidUrl {
            input: s.to_string(),
            message: e.to_string(),
        })?;
        let port = url
            .port()
            .ok_or_else(|| AddressParseError::MissingPort(s.to_string()))?;
        let host = match url.host() {
            Some(url::Host::Domain(domain)) => domain.to_string(),
            Some(url::Host::Ipv4(ip)) => ip.to_string(),
            Some(url::Host::Ipv6(ip)) => ip.to_string(),
            None => return Err(AddressParseError::InvalidHost(s.to_string())),
        };
        Ok(Self::new(host, port))
    }

    /// The topic string for this peer (same as `Display`).
    pub fn topic(&self) -> String {
        self.to_string()
    }

    /// Socket address when the host is an IP literal.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.host
            .parse::<IpAddr>()
            .ok()
            .map(|ip| SocketAddr::new(ip, self.port))
    }

    /// Resolve to a socket address, using DNS for hostnames.
    ///
    /// A hostname resolves to its first address of the same family, or to its
    /// first address when the lookup returns none of that family.
    pub async fn resolve(&self) -> io::Result<SocketAddr> {
        if let Some(addr) = self.socket_addr() {
            return Ok(addr);
        }
        let candidates: Vec<SocketAddr> =
            tokio::net::lookup_host((self.host.as_str(), self.port))
                .await?
                .collect();
        let want_v6 = self.family == AddressFamily::IPv6;
        candidates
            .iter()
            .find(|addr| addr.is_ipv6() == want_v6)
            .or_else(|| candidates.first())
            .copied()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no address found for {self}"),
                )
            })
    }
}

fn parse_port(port: &str, input: &str) -> Result<u16, AddressParseError> {
    port.parse()
        .map_err(|_| AddressParseError::InvalidPort(input.to_string()))
}

impl From<SocketAddr> for RemoteAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl std::fmt::Display for RemoteAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.family {
            AddressFamily::IPv6 => write!(f, "[{}]:{}", self.host, self.port),
            AddressFamily::IPv4 => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

/// Error parsing a remote address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    /// The host part is empty or malformed.
    #[error("invalid host in {0:?}")]
    InvalidHost(String),
    /// No port was given.
    #[error("missing port in {0:?}")]
    MissingPort(String),
    /// The port is not a number in range.
    #[error("invalid port in {0:?}")]
    InvalidPort(String),
    /// The input looked like a URL but did not parse as one.
    #[error("invalid URL {input:?}: {message}")]
    InvalidUrl {
        /// The rejected input.
        input: String,
        /// Parser details.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4() {
        let addr = RemoteAddress::parse("127.0.0.1:4500").expect("parse");
        assert_eq!(addr.host, "127.0.0.1");
        assert_eq!(addr.port, 4500);
        assert_eq!(addr.family, AddressFamily::IPv4);
        assert_eq!(addr.topic(), "127.0.0.1:4500");
    }

    #[test]
    fn test_parse_ipv6_brackets() {
        let addr = RemoteAddress::parse("[::1]:4500").expect("parse");
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.family, AddressFamily::IPv6);
        assert_eq!(addr.to_string(), "[::1]:4500");
    }

    #[test]
    fn test_parse_hostname() {
        let addr = RemoteAddress::parse("localhost:3000").expect("parse");
        assert_eq!(addr.host, "localhost");
        assert!(addr.socket_addr().is_none());
    }

    #[test]
    fn test_parse_url() {
        let addr = RemoteAddress::parse("udp://10.0.0.7:9000/sensor/message?x=1").expect("parse");
        assert_eq!(addr, RemoteAddress::new("10.0.0.7", 9000));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            RemoteAddress::parse("127.0.0.1"),
            Err(AddressParseError::MissingPort(_))
        ));
        assert!(matches!(
            RemoteAddress::parse("127.0.0.1:http"),
            Err(AddressParseError::InvalidPort(_))
        ));
        assert!(matches!(
            RemoteAddress::parse(":80"),
            Err(AddressParseError::InvalidHost(_))
        ));
        assert!(matches!(
            RemoteAddress::parse("udp://host/path"),
            Err(AddressParseError::MissingPort(_))
        ));
        assert!(matches!(
            RemoteAddress::parse("[zz]:80"),
            Err(AddressParseError::InvalidHost(_))
        ));
    }

    #[test]
    fn test_from_socket_addr() {
        let sock: SocketAddr = "[::1]:7000".parse().expect("socket addr");
        let addr = RemoteAddress::from(sock);
        assert_eq!(addr.family, AddressFamily::IPv6);
        assert_eq!(addr.socket_addr(), Some(sock));
    }

    #[tokio::test]
    async fn test_resolve_literal() {
        let addr = RemoteAddress::new("127.0.0.1", 9);
        let resolved = addr.resolve().await.expect("resolve");
        assert_eq!(resolved, "127.0.0.1:9".parse::<SocketAddr>().expect("addr"));
    }

    #[tokio::test]
    async fn test_resolve_hostname_keeps_family() {
        let resolved = RemoteAddress::new("localhost", 9)
            .resolve()
            .await
            .expect("resolve");
        assert!(resolved.is_ipv4());
        assert_eq!(resolved.port(), 9);
    }
}
