/*! Final recipients of onion requests and per hop routing instructions
*/

use std::fmt;

use serde::{Deserialize, Serialize};

use onion_crypto::{CryptoError, PublicKey};

use crate::snode::ServiceNode;

/// Version of the onion request protocol spoken with a server destination.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnionVersion {
    /// JSON payload, JSON response with base64 encoded ciphertext.
    V3,
    /// Bencoded payload, raw ciphertext response.
    V4,
}

impl OnionVersion {
    /// Endpoint the exit node forwards the request to.
    pub fn target(self) -> &'static str {
        match self {
            OnionVersion::V3 => "/loki/v3/lsrpc",
            OnionVersion::V4 => "/oxen/v4/lsrpc",
        }
    }
}

impl Default for OnionVersion {
    fn default() -> Self {
        OnionVersion::V3
    }
}

/// Server reachable from the exit node of a path.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ServerDestination {
    /// Host name without scheme.
    pub host: String,
    /// Onion endpoint on the server, see `OnionVersion::target`.
    pub target: String,
    /// Hex encoded x25519 key of the server.
    pub x25519_public_key: String,
    /// `http` or `https`.
    pub scheme: String,
    /// Server port.
    pub port: u16,
}

/// Final recipient of an onion request.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Destination {
    /// Service node handling a storage RPC.
    ToNode(ServiceNode),
    /// HTTP server behind the exit node.
    ToServer(ServerDestination),
}

impl Destination {
    /// Key the innermost layer is encrypted with.
    pub fn x25519_public_key(&self) -> Result<PublicKey, CryptoError> {
        match self {
            Destination::ToNode(node) => node.x25519_public_key(),
            Destination::ToServer(server) => PublicKey::from_hex(&server.x25519_public_key),
        }
    }

    /// The node for `ToNode` destinations.
    pub fn node(&self) -> Option<&ServiceNode> {
        match self {
            Destination::ToNode(node) => Some(node),
            Destination::ToServer(_) => None,
        }
    }

    /// Check if this is a server destination.
    pub fn is_server(&self) -> bool {
        matches!(self, Destination::ToServer(_))
    }

    /// Instruction for the hop that forwards to this destination.
    pub fn hop_instruction(&self, ephemeral_key: &PublicKey) -> HopInstruction {
        match self {
            Destination::ToNode(node) => HopInstruction::Node {
                destination: node.keys.ed25519.clone(),
                ephemeral_key: ephemeral_key.to_hex(),
            },
            Destination::ToServer(server) => HopInstruction::Server {
                host: server.host.clone(),
                target: server.target.clone(),
                method: "POST".to_owned(),
                protocol: server.scheme.clone(),
                port: server.port,
                ephemeral_key: ephemeral_key.to_hex(),
            },
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Destination::ToNode(node) => write!(f, "snode {}", node),
            Destination::ToServer(server) => write!(f, "{}://{}:{}{}", server.scheme, server.host, server.port, server.target),
        }
    }
}

/** Routing instruction a hop finds next to the ciphertext it has to forward.

Serialized as the JSON metadata of an onion layer.
*/
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HopInstruction {
    /// Forward to the service node with this ed25519 key.
    Node {
        /// Hex encoded ed25519 key of the next node.
        destination: String,
        /// Hex encoded ephemeral x25519 key of the next layer.
        ephemeral_key: String,
    },
    /// Forward to an HTTP server.
    Server {
        /// Server host.
        host: String,
        /// Onion endpoint on the server.
        target: String,
        /// HTTP method, always `POST`.
        method: String,
        /// `http` or `https`.
        protocol: String,
        /// Server port.
        port: u16,
        /// Hex encoded ephemeral x25519 key of the next layer.
        ephemeral_key: String,
    },
}

impl HopInstruction {
    /// Ephemeral key the next layer was encrypted with.
    pub fn ephemeral_key(&self) -> &str {
        match self {
            HopInstruction::Node { ephemeral_key, .. } => ephemeral_key,
            HopInstruction::Server { ephemeral_key, .. } => ephemeral_key,
        }
    }
}
