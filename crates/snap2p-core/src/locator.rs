//! Dialable endpoint addressing (spec §3 "Locator", §6 "Locator string").

use std::fmt;
use std::str::FromStr;

/// Transport named by a [`Locator`]. Only [`Transport::Tcp`] is implemented;
/// `Quic` parses but is reserved (spec §3: "currently only tcp is
/// implemented; other transports reserved").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Plain TCP, the only transport this crate implements.
    Tcp,
    /// Reserved; parses but `Peer::dial`/`listen` reject it.
    Quic,
}

impl Transport {
    fn scheme(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Quic => "quic",
        }
    }
}

/// A dialable endpoint: transport + host + port, plus an optional expected
/// node public key for out-of-band identity pinning (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    /// The transport to dial over.
    pub transport: Transport,
    /// Hostname or IP literal.
    pub host: String,
    /// TCP/UDP port, 1..=65535.
    pub port: u16,
    /// Expected remote Ed25519 node public key, if pinned.
    pub node_public_key: Option<[u8; 32]>,
}

/// A locator string failed to parse (spec §6 grammar:
/// `host:port` / `tcp://host:port` / `quic://host:port`).
#[derive(Debug, Clone, thiserror::Error)]
#[error("malformed locator: {0:?}")]
pub struct LocatorParseError(pub String);

impl Locator {
    /// Construct a bare TCP locator with no pinned node key, the shape
    /// `Peer::listen` returns for a freshly bound socket.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            transport: Transport::Tcp,
            host: host.into(),
            port,
            node_public_key: None,
        }
    }
}

impl FromStr for Locator {
    type Err = LocatorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || LocatorParseError(s.to_string());

        let (transport, rest) = if let Some(rest) = s.strip_prefix("tcp://") {
            (Transport::Tcp, rest)
        } else if let Some(rest) = s.strip_prefix("quic://") {
            (Transport::Quic, rest)
        } else {
            (Transport::Tcp, s)
        };

        let (host, port_str) = rest.rsplit_once(':').ok_or_else(bad)?;
        if host.is_empty() {
            return Err(bad());
        }
        let port: u16 = port_str.parse().map_err(|_| bad())?;
        if port == 0 {
            return Err(bad());
        }

        Ok(Self {
            transport,
            host: host.to_string(),
            port,
            node_public_key: None,
        })
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.transport.scheme(), self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_port_defaults_to_tcp() {
        let loc: Locator = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(loc.transport, Transport::Tcp);
        assert_eq!(loc.host, "127.0.0.1");
        assert_eq!(loc.port, 9000);
    }

    #[test]
    fn tcp_scheme_parses() {
        let loc: Locator = "tcp://example.com:443".parse().unwrap();
        assert_eq!(loc.transport, Transport::Tcp);
        assert_eq!(loc.host, "example.com");
        assert_eq!(loc.port, 443);
    }

    #[test]
    fn quic_scheme_parses_but_is_reserved() {
        let loc: Locator = "quic://example.com:443".parse().unwrap();
        assert_eq!(loc.transport, Transport::Quic);
    }

    #[test]
    fn zero_port_is_rejected() {
        assert!("example.com:0".parse::<Locator>().is_err());
    }

    #[test]
    fn missing_port_is_rejected() {
        assert!("example.com".parse::<Locator>().is_err());
    }

    #[test]
    fn display_roundtrips_through_parse() {
        let loc = Locator::tcp("127.0.0.1", 9000);
        let rendered = loc.to_string();
        let reparsed: Locator = rendered.parse().unwrap();
        assert_eq!(reparsed.host, loc.host);
        assert_eq!(reparsed.port, loc.port);
        assert_eq!(reparsed.transport, loc.transport);
    }
}
