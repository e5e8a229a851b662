/*! Snode and seed RPC bodies
*/

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::ResponseError;
use crate::snode::ServiceNode;

/// Methods a service node answers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// List the swarm of a public key.
    #[serde(rename = "get_snodes_for_pubkey")]
    GetSwarm,
    /// Store a message.
    #[serde(rename = "store")]
    Store,
    /// Retrieve messages.
    #[serde(rename = "retrieve")]
    Retrieve,
    /// Delete messages.
    #[serde(rename = "delete")]
    Delete,
    /// Proxy a request to oxend.
    #[serde(rename = "oxend_request")]
    OxendRequest,
    /// Node info.
    #[serde(rename = "info")]
    Info,
}

impl Method {
    /// Name used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::GetSwarm => "get_snodes_for_pubkey",
            Method::Store => "store",
            Method::Retrieve => "retrieve",
            Method::Delete => "delete",
            Method::OxendRequest => "oxend_request",
            Method::Info => "info",
        }
    }

    /// Parse a wire name.
    pub fn from_name(name: &str) -> Option<Method> {
        [Method::GetSwarm, Method::Store, Method::Retrieve, Method::Delete, Method::OxendRequest, Method::Info]
            .into_iter()
            .find(|method| method.as_str() == name)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RPC body addressed to a service node: `{ "method", "params" }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnodeRequest {
    /// Method to call.
    pub method: Method,
    /// Method parameters.
    pub params: Value,
}

impl SnodeRequest {
    /// Create new `SnodeRequest`.
    pub fn new(method: Method, params: Value) -> SnodeRequest {
        SnodeRequest { method, params }
    }

    /// Request listing the swarm of `public_key`.
    pub fn get_swarm(public_key: &str) -> SnodeRequest {
        SnodeRequest::new(Method::GetSwarm, json!({ "pubKey": public_key }))
    }
}

/// Endpoint seeds answer RPC requests on.
pub const SEED_RPC_ENDPOINT: &str = "json_rpc";

/// Endpoint service nodes answer direct storage RPC requests on.
pub const SNODE_RPC_ENDPOINT: &str = "storage_rpc/v1";

/// Body of the request fetching active service nodes from a seed.
pub fn get_n_service_nodes_request(limit: usize) -> Value {
    json!({
        "method": "get_n_service_nodes",
        "params": {
            "active_only": true,
            "limit": limit,
            "fields": {
                "public_ip": true,
                "storage_port": true,
                "pubkey_x25519": true,
                "pubkey_ed25519": true,
            },
        },
    })
}

/// Service node as listed by a seed. Any field may be missing.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SeedNodeState {
    /// IP without scheme.
    pub public_ip: Option<String>,
    /// Storage server port.
    pub storage_port: Option<u16>,
    /// Hex encoded ed25519 key.
    pub pubkey_ed25519: Option<String>,
    /// Hex encoded x25519 key.
    pub pubkey_x25519: Option<String>,
}

impl SeedNodeState {
    /// Convert to a node. `None` when incomplete or unroutable.
    pub fn into_service_node(self) -> Option<ServiceNode> {
        let ip = self.public_ip?;
        let port = self.storage_port?;
        let ed25519 = self.pubkey_ed25519?;
        let x25519 = self.pubkey_x25519?;
        ServiceNode::from_ip(&ip, port, &ed25519, &x25519).ok()
    }
}

#[derive(Deserialize)]
struct SeedResult {
    service_node_states: Vec<Value>,
}

#[derive(Deserialize)]
struct SeedResponse {
    result: SeedResult,
}

/// Parse the response of a seed to `get_n_service_nodes`. Malformed entries
/// are skipped.
pub fn parse_seed_response(body: &[u8]) -> Result<Vec<ServiceNode>, ResponseError> {
    let response: SeedResponse = serde_json::from_slice(body)
        .map_err(|e| ResponseError::InvalidJson(e.to_string()))?;
    Ok(response.result.service_node_states.into_iter()
        .filter_map(|state| serde_json::from_value::<SeedNodeState>(state).ok())
        .filter_map(SeedNodeState::into_service_node)
        .collect())
}

/// Parse the `snodes` list of a swarm response. Malformed entries are
/// skipped, a missing list gives an empty swarm.
pub fn parse_swarm(body: &Value) -> Vec<ServiceNode> {
    body.get("snodes")
        .and_then(Value::as_array)
        .map(|entries| entries.iter()
            .filter_map(|entry| ServiceNode::from_swarm_entry(entry).ok())
            .collect())
        .unwrap_or_default()
}
