/*! Errors of onion requests
*/

use serde_json::{json, Value};
use thiserror::Error;

use onion_crypto::CryptoError;
use onion_packet::{DecodeLayerError, ResponseError, ServerRequestError};

/// Message a guard answers with when the next hop of a path is unknown.
pub const NEXT_NODE_NOT_FOUND_PREFIX: &str = "Next node not found: ";

/// Message a node answers with on internal errors that aren't its fault.
pub const SERVER_ERROR_MESSAGE: &str = "Loki Server error";

/// Error that can happen when sending an onion request.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum OnionRequestError {
    /// Not enough nodes to build paths or pick a node.
    #[error("Couldn't find enough service nodes")]
    InsufficientNodes,
    /// The destination rejected the request timestamp.
    #[error("Clock is out of sync with the service node network")]
    ClockOutOfSync,
    /// The guard answered with an error or couldn't be reached. Status `0`
    /// means no HTTP response at all.
    #[error("HTTP request failed with status code {status_code}")]
    HttpRequestFailed {
        /// HTTP status or `0`.
        status_code: u16,
        /// Response body as JSON, or `{ "result": text }` when it is not JSON.
        body: Option<Value>,
    },
    /// The destination answered with an error.
    #[error("HTTP request failed at destination ({destination}) with status code {status_code}")]
    DestinationRequestFailed {
        /// Status reported by the destination.
        status_code: u16,
        /// Body reported by the destination.
        body: Value,
        /// Description of the destination.
        destination: String,
    },
    /// The response couldn't be decrypted or parsed.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    /// The onion couldn't be built.
    #[error("Can't build onion: {0}")]
    Encryption(String),
}

impl OnionRequestError {
    /// Error for a non-success HTTP response with raw `body`.
    pub fn http_failed(status_code: u16, body: &[u8]) -> OnionRequestError {
        let body = if body.is_empty() {
            None
        } else {
            Some(serde_json::from_slice(body)
                .unwrap_or_else(|_| json!({ "result": String::from_utf8_lossy(body) })))
        };
        OnionRequestError::HttpRequestFailed { status_code, body }
    }

    /// Status code and body of HTTP level failures.
    pub fn status_and_body(&self) -> Option<(u16, Option<&Value>)> {
        match self {
            OnionRequestError::HttpRequestFailed { status_code, body } => Some((*status_code, body.as_ref())),
            OnionRequestError::DestinationRequestFailed { status_code, body, .. } => Some((*status_code, Some(body))),
            _ => None,
        }
    }
}

/// `result` message of an error body.
pub fn result_message(body: Option<&Value>) -> Option<&str> {
    body.and_then(|body| body.get("result")).and_then(Value::as_str)
}

impl From<CryptoError> for OnionRequestError {
    fn from(error: CryptoError) -> Self {
        match error {
            CryptoError::Decrypt | CryptoError::CiphertextTooShort(_) =>
                OnionRequestError::InvalidResponse(error.to_string()),
            _ => OnionRequestError::Encryption(error.to_string()),
        }
    }
}

impl From<DecodeLayerError> for OnionRequestError {
    fn from(error: DecodeLayerError) -> Self {
        OnionRequestError::Encryption(error.to_string())
    }
}

impl From<ResponseError> for OnionRequestError {
    fn from(error: ResponseError) -> Self {
        OnionRequestError::InvalidResponse(error.to_string())
    }
}

impl From<ServerRequestError> for OnionRequestError {
    fn from(error: ServerRequestError) -> Self {
        OnionRequestError::Encryption(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_failed_with_text_body() {
        let error = OnionRequestError::http_failed(502, b"Next node not found: abc");
        assert_eq!(error, OnionRequestError::HttpRequestFailed {
            status_code: 502,
            body: Some(json!({ "result": "Next node not found: abc" })),
        });
        let (status, body) = error.status_and_body().unwrap();
        assert_eq!(status, 502);
        assert_eq!(result_message(body), Some("Next node not found: abc"));
    }

    #[test]
    fn http_failed_with_json_body() {
        let error = OnionRequestError::http_failed(421, b"{\"snodes\":[]}");
        assert_eq!(error.status_and_body().unwrap().1, Some(&json!({ "snodes": [] })));
    }

    #[test]
    fn http_failed_without_body() {
        assert_eq!(
            OnionRequestError::http_failed(0, b""),
            OnionRequestError::HttpRequestFailed { status_code: 0, body: None }
        );
    }

    #[test]
    fn decrypt_error_is_invalid_response() {
        assert!(matches!(OnionRequestError::from(CryptoError::Decrypt), OnionRequestError::InvalidResponse(_)));
        assert!(matches!(OnionRequestError::from(CryptoError::WeakSharedSecret), OnionRequestError::Encryption(_)));
    }
}
