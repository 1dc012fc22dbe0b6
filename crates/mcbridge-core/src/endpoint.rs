//! Remote endpoint identity.
//!
//! An [`Endpoint`] is the `address:port` pair a game server listens on. It is
//! the primary key of the endpoint registry; the friendly name lives next to
//! it in [`EndpointRecord`] and can change without affecting identity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Network location of a remote game server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Parse an `address:port` string.
    ///
    /// Exactly one `:` is accepted, so bare IPv6 literals are rejected.
    pub fn parse(s: &str) -> BridgeResult<Self> {
        let s = s.trim();
        let mut parts = s.split(':');
        let (address, port) = match (parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(p), None) if !a.is_empty() => (a, p),
            _ => {
                return Err(BridgeError::InvalidLocation(format!(
                    "{s} not a valid ip:port string"
                )))
            }
        };
        let port = port
            .parse::<u16>()
            .map_err(|e| BridgeError::InvalidLocation(format!("{s}: bad port: {e}")))?;
        Ok(Self::new(address, port))
    }

    /// WebSocket URL used to dial this endpoint.
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.address, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Persisted `(location, name)` pair for a registered endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRecord {
    #[serde(rename = "loc")]
    pub endpoint: Endpoint,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid() {
        let ep = Endpoint::parse("10.0.0.5:25565").unwrap();
        assert_eq!(ep.address, "10.0.0.5");
        assert_eq!(ep.port, 25565);
        assert_eq!(ep.to_string(), "10.0.0.5:25565");
        assert_eq!(ep.ws_url(), "ws://10.0.0.5:25565");
    }

    #[test]
    fn parse_hostname_with_whitespace() {
        let ep: Endpoint = " mc.example.com:8080 ".parse().unwrap();
        assert_eq!(ep, Endpoint::new("mc.example.com", 8080));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Endpoint::parse("survival").is_err());
        assert!(Endpoint::parse("a:b:c").is_err());
        assert!(Endpoint::parse(":25565").is_err());
        assert!(Endpoint::parse("host:notaport").is_err());
        assert!(Endpoint::parse("host:70000").is_err());
    }

    #[test]
    fn record_wire_shape() {
        let rec = EndpointRecord {
            endpoint: Endpoint::new("127.0.0.1", 9000),
            name: "lobby".into(),
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"loc": {"address": "127.0.0.1", "port": 9000}, "name": "lobby"})
        );
    }
}
