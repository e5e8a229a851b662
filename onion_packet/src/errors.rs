/*! Errors of onion wire formats
*/

use thiserror::Error;

use onion_crypto::CryptoError;

/// Error that can happen when a service node can't be parsed.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ParseNodeError {
    /// A required field is missing or has the wrong type.
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    /// The node reports an address nobody can connect to.
    #[error("Unroutable address: {0}")]
    UnroutableAddress(String),
    /// Port is not a valid `u16`.
    #[error("Invalid port: {0}")]
    InvalidPort(String),
    /// One of the node keys is not 32 bytes of hex.
    #[error("Invalid key: {0}")]
    InvalidKey(CryptoError),
    /// Persisted form doesn't have four `-` separated parts.
    #[error("Invalid persisted node: {0}")]
    InvalidFormat(String),
}

/// Error that can happen when building a path.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum PathError {
    /// The same node appears twice in one path.
    #[error("Node {0} appears more than once in a path")]
    DuplicateNode(String),
    /// Wrong number of nodes.
    #[error("Path needs 3 nodes, got {0}")]
    WrongLength(usize),
}

/// Error that can happen when decoding an onion layer.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum DecodeLayerError {
    /// Layer is shorter than its length prefix says.
    #[error("Layer is truncated")]
    Truncated,
    /// Trailing metadata is not a JSON object.
    #[error("Invalid layer metadata: {0}")]
    InvalidMetadata(String),
    /// Layer couldn't be serialized.
    #[error("Layer serialization error")]
    Serialize,
}

/// Error that can happen when parsing a response from a guard, seed or snode.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ResponseError {
    /// Body is not valid JSON.
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    /// JSON is valid but doesn't have the expected field.
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    /// `result` is not valid base64.
    #[error("Invalid base64: {0}")]
    InvalidBase64(String),
    /// Version 4 response is not a bencoded list of byte strings.
    #[error("Invalid bencoded response")]
    InvalidBencode,
}

/// Error that can happen when building a request to a server.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ServerRequestError {
    /// URL doesn't have a host.
    #[error("URL has no host: {0}")]
    MissingHost(String),
    /// URL doesn't have a known port.
    #[error("URL has no port: {0}")]
    MissingPort(String),
    /// Server key is not 32 bytes of hex.
    #[error("Invalid server key: {0}")]
    InvalidKey(CryptoError),
    /// Request metadata couldn't be serialized.
    #[error("Can't serialize request: {0}")]
    Serialize(String),
}
