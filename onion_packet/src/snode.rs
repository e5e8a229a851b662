/*! Service node description
*/

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use onion_crypto::{CryptoError, PublicKey};

use crate::errors::ParseNodeError;

/// Address a node reports when it has no public IP yet.
pub const UNROUTABLE_ADDRESS: &str = "0.0.0.0";

/// Scheme prepended to bare IPs of service nodes.
pub const SNODE_SCHEME: &str = "https://";

/// Keys a service node is known by.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeySet {
    /// Hex encoded ed25519 identity key.
    pub ed25519: String,
    /// Hex encoded x25519 key used for onion encryption.
    pub x25519: String,
}

/** Reachable service node.

Two nodes are the same node when address, port and both keys match.

Persisted form is `address-port-ed25519-x25519`:

```
use onion_packet::ServiceNode;

let node: ServiceNode = "https://10.0.0.1-22021-aa-bb".parse().unwrap();
assert_eq!(node.port, 22021);
assert_eq!(node.to_store_string(), "https://10.0.0.1-22021-aa-bb");
```
*/
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceNode {
    /// Address with scheme, e.g. `https://1.2.3.4`.
    pub address: String,
    /// Storage server port.
    pub port: u16,
    /// Node keys.
    pub keys: KeySet,
}

impl ServiceNode {
    /// Create new `ServiceNode`.
    pub fn new<A: Into<String>, E: Into<String>, X: Into<String>>(address: A, port: u16, ed25519: E, x25519: X) -> ServiceNode {
        ServiceNode {
            address: address.into(),
            port,
            keys: KeySet {
                ed25519: ed25519.into(),
                x25519: x25519.into(),
            },
        }
    }

    /// Create a node from a bare IP as reported by seeds and swarms.
    pub fn from_ip(ip: &str, port: u16, ed25519: &str, x25519: &str) -> Result<ServiceNode, ParseNodeError> {
        if ip.is_empty() {
            return Err(ParseNodeError::MissingField("ip"));
        }
        if ip == UNROUTABLE_ADDRESS {
            return Err(ParseNodeError::UnroutableAddress(ip.to_owned()));
        }
        if ed25519.is_empty() {
            return Err(ParseNodeError::MissingField("pubkey_ed25519"));
        }
        // x25519 key must be usable for encryption right away
        PublicKey::from_hex(x25519).map_err(ParseNodeError::InvalidKey)?;
        Ok(ServiceNode::new(format!("{}{}", SNODE_SCHEME, ip), port, ed25519, x25519))
    }

    /// Parse an entry of a swarm listing:
    /// `{ "ip", "port" (string or number), "pubkey_ed25519", "pubkey_x25519" }`.
    pub fn from_swarm_entry(entry: &Value) -> Result<ServiceNode, ParseNodeError> {
        let ip = entry.get("ip")
            .and_then(Value::as_str)
            .ok_or(ParseNodeError::MissingField("ip"))?;
        let port = match entry.get("port") {
            Some(Value::String(port)) => port.parse::<u16>()
                .map_err(|_| ParseNodeError::InvalidPort(port.clone()))?,
            Some(Value::Number(port)) => port.as_u64()
                .and_then(|port| u16::try_from(port).ok())
                .ok_or_else(|| ParseNodeError::InvalidPort(port.to_string()))?,
            _ => return Err(ParseNodeError::MissingField("port")),
        };
        let ed25519 = entry.get("pubkey_ed25519")
            .and_then(Value::as_str)
            .ok_or(ParseNodeError::MissingField("pubkey_ed25519"))?;
        let x25519 = entry.get("pubkey_x25519")
            .and_then(Value::as_str)
            .ok_or(ParseNodeError::MissingField("pubkey_x25519"))?;
        ServiceNode::from_ip(ip, port, ed25519, x25519)
    }

    /// URL of an endpoint on this node.
    pub fn url(&self, endpoint: &str) -> String {
        format!("{}:{}/{}", self.address, self.port, endpoint.trim_start_matches('/'))
    }

    /// Key used to encrypt layers addressed to this node.
    pub fn x25519_public_key(&self) -> Result<PublicKey, CryptoError> {
        PublicKey::from_hex(&self.keys.x25519)
    }

    /// Hex encoded ed25519 key.
    pub fn ed25519(&self) -> &str {
        &self.keys.ed25519
    }

    /// Persisted form `address-port-ed25519-x25519`.
    pub fn to_store_string(&self) -> String {
        format!("{}-{}-{}-{}", self.address, self.port, self.keys.ed25519, self.keys.x25519)
    }
}

impl fmt::Display for ServiceNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

impl FromStr for ServiceNode {
    type Err = ParseNodeError;

    fn from_str(s: &str) -> Result<ServiceNode, ParseNodeError> {
        // keys are hex and port is decimal so only the address may contain `-`
        let mut parts = s.rsplitn(4, '-');
        let (x25519, ed25519, port, address) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(x), Some(ed), Some(port), Some(address)) if !address.is_empty() => (x, ed, port, address),
            _ => return Err(ParseNodeError::InvalidFormat(s.to_owned())),
        };
        let port = port.parse::<u16>()
            .map_err(|_| ParseNodeError::InvalidPort(port.to_owned()))?;
        Ok(ServiceNode::new(address, port, ed25519, x25519))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const X25519: &str = "0101010101010101010101010101010101010101010101010101010101010101";

    #[test]
    fn store_string_round_trip_with_dashed_host() {
        let node = ServiceNode::new("https://snode-1.example.org", 443, "ed", X25519);
        let parsed: ServiceNode = node.to_store_string().parse().unwrap();
        assert_eq!(parsed, node);
    }

    #[test]
    fn parse_invalid_store_string() {
        assert_eq!(
            "https://1.2.3.4-22021-ed".parse::<ServiceNode>(),
            Err(ParseNodeError::InvalidFormat("https://1.2.3.4-22021-ed".to_owned()))
        );
        assert_eq!(
            "https://1.2.3.4-port-ed-x".parse::<ServiceNode>(),
            Err(ParseNodeError::InvalidPort("port".to_owned()))
        );
    }

    #[test]
    fn swarm_entry_with_string_port() {
        let entry = json!({
            "ip": "10.1.1.1",
            "port": "22021",
            "pubkey_ed25519": "ed",
            "pubkey_x25519": X25519,
        });
        let node = ServiceNode::from_swarm_entry(&entry).unwrap();
        assert_eq!(node, ServiceNode::new("https://10.1.1.1", 22021, "ed", X25519));
    }

    #[test]
    fn swarm_entry_with_numeric_port() {
        let entry = json!({
            "ip": "10.1.1.1",
            "port": 22021,
            "pubkey_ed25519": "ed",
            "pubkey_x25519": X25519,
        });
        assert_eq!(ServiceNode::from_swarm_entry(&entry).unwrap().port, 22021);
    }

    #[test]
    fn swarm_entry_unroutable() {
        let entry = json!({
            "ip": "0.0.0.0",
            "port": 1,
            "pubkey_ed25519": "ed",
            "pubkey_x25519": X25519,
        });
        assert_eq!(
            ServiceNode::from_swarm_entry(&entry),
            Err(ParseNodeError::UnroutableAddress("0.0.0.0".to_owned()))
        );
    }

    #[test]
    fn swarm_entry_missing_key() {
        let entry = json!({ "ip": "10.1.1.1", "port": 1, "pubkey_ed25519": "ed" });
        assert_eq!(
            ServiceNode::from_swarm_entry(&entry),
            Err(ParseNodeError::MissingField("pubkey_x25519"))
        );
    }

    #[test]
    fn swarm_entry_bad_key() {
        let entry = json!({ "ip": "10.1.1.1", "port": 1, "pubkey_ed25519": "ed", "pubkey_x25519": "zz" });
        assert!(matches!(ServiceNode::from_swarm_entry(&entry), Err(ParseNodeError::InvalidKey(_))));
    }

    #[test]
    fn url_and_display() {
        let node = ServiceNode::new("https://1.2.3.4", 22021, "ed", X25519);
        assert_eq!(node.url("/onion_req/v2"), "https://1.2.3.4:22021/onion_req/v2");
        assert_eq!(node.to_string(), "https://1.2.3.4:22021");
    }
}
