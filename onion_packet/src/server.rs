/*! HTTP requests to servers behind an exit node
*/

use std::collections::BTreeMap;

use serde_json::{json, Value};
use url::Url;

use crate::destination::*;
use crate::errors::ServerRequestError;
use crate::response::bencode_list;

/// HTTP request that should reach a server through an onion path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerRequest {
    /// HTTP method, e.g. `GET`.
    pub method: String,
    /// Full URL of the request.
    pub url: Url,
    /// Request headers.
    pub headers: BTreeMap<String, String>,
    /// Request body.
    pub body: Option<Vec<u8>>,
}

impl ServerRequest {
    /// Create a `GET` request without body.
    pub fn get(url: Url) -> ServerRequest {
        ServerRequest {
            method: "GET".to_owned(),
            url,
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// Create a `POST` request with a JSON body.
    pub fn post_json(url: Url, body: &Value) -> ServerRequest {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_owned(), "application/json".to_owned());
        ServerRequest {
            method: "POST".to_owned(),
            url,
            headers,
            body: Some(body.to_string().into_bytes()),
        }
    }

    /// Part of the URL after `server`. Falls back to path and query when
    /// the URL is not on `server`.
    pub fn endpoint(&self, server: &str) -> String {
        let url = self.url.as_str();
        match url.strip_prefix(server.trim_end_matches('/')) {
            Some(endpoint) => endpoint.to_owned(),
            None => match self.url.query() {
                Some(query) => format!("{}?{}", self.url.path(), query),
                None => self.url.path().to_owned(),
            },
        }
    }

    /// Destination for this request's host.
    pub fn destination(&self, x25519_public_key: &str, version: OnionVersion) -> Result<Destination, ServerRequestError> {
        let host = self.url.host_str()
            .ok_or_else(|| ServerRequestError::MissingHost(self.url.to_string()))?;
        let port = self.url.port_or_known_default()
            .ok_or_else(|| ServerRequestError::MissingPort(self.url.to_string()))?;
        onion_crypto::PublicKey::from_hex(x25519_public_key)
            .map_err(ServerRequestError::InvalidKey)?;
        Ok(Destination::ToServer(ServerDestination {
            host: host.to_owned(),
            target: version.target().to_owned(),
            x25519_public_key: x25519_public_key.to_owned(),
            scheme: self.url.scheme().to_owned(),
            port,
        }))
    }

    /** Plaintext the server decrypts.

    Version 3 is a JSON object with `body`, `endpoint` (without leading
    slash), `method` and `headers`. Version 4 is the bencoded list of the
    request info and the optional body.
    */
    pub fn payload(&self, server: &str, version: OnionVersion) -> Result<Vec<u8>, ServerRequestError> {
        let endpoint = self.endpoint(server);
        match version {
            OnionVersion::V3 => {
                let body = self.body.as_deref()
                    .map(|body| String::from_utf8_lossy(body).into_owned())
                    .unwrap_or_else(|| "null".to_owned());
                let payload = json!({
                    "body": body,
                    "endpoint": endpoint.trim_start_matches('/'),
                    "method": self.method,
                    "headers": self.headers,
                });
                serde_json::to_vec(&payload).map_err(|e| ServerRequestError::Serialize(e.to_string()))
            },
            OnionVersion::V4 => {
                let mut headers = self.headers.clone();
                if self.body.is_some() && !headers.keys().any(|key| key.eq_ignore_ascii_case("content-type")) {
                    headers.insert("Content-Type".to_owned(), "application/json".to_owned());
                }
                let info = json!({
                    "endpoint": endpoint,
                    "method": self.method,
                    "headers": headers,
                });
                let info = serde_json::to_vec(&info).map_err(|e| ServerRequestError::Serialize(e.to_string()))?;
                Ok(match &self.body {
                    Some(body) => bencode_list(&[info.as_slice(), body.as_slice()]),
                    None => bencode_list(&[info.as_slice()]),
                })
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::parse_bencoded_list;

    const SERVER: &str = "https://open.example.org";

    fn key() -> String {
        "ab".repeat(32)
    }

    #[test]
    fn endpoint_after_server() {
        let request = ServerRequest::get(Url::parse("https://open.example.org/room/1?limit=5").unwrap());
        assert_eq!(request.endpoint(SERVER), "/room/1?limit=5");
        assert_eq!(request.endpoint("https://other.example.org"), "/room/1?limit=5");
    }

    #[test]
    fn destination_from_url() {
        let request = ServerRequest::get(Url::parse("http://open.example.org:8080/x").unwrap());
        let destination = request.destination(&key(), OnionVersion::V4).unwrap();
        assert_eq!(destination, Destination::ToServer(ServerDestination {
            host: "open.example.org".to_owned(),
            target: "/oxen/v4/lsrpc".to_owned(),
            x25519_public_key: key(),
            scheme: "http".to_owned(),
            port: 8080,
        }));
    }

    #[test]
    fn destination_default_port() {
        let request = ServerRequest::get(Url::parse("https://open.example.org/x").unwrap());
        match request.destination(&key(), OnionVersion::V3).unwrap() {
            Destination::ToServer(server) => assert_eq!(server.port, 443),
            destination => panic!("unexpected destination {:?}", destination),
        }
    }

    #[test]
    fn destination_bad_key() {
        let request = ServerRequest::get(Url::parse("https://open.example.org/x").unwrap());
        assert!(matches!(request.destination("00", OnionVersion::V3), Err(ServerRequestError::InvalidKey(_))));
    }

    #[test]
    fn v3_payload() {
        let request = ServerRequest::get(Url::parse("https://open.example.org/rooms").unwrap());
        let payload: Value = serde_json::from_slice(&request.payload(SERVER, OnionVersion::V3).unwrap()).unwrap();
        assert_eq!(payload, json!({
            "body": "null",
            "endpoint": "rooms",
            "method": "GET",
            "headers": {},
        }));
    }

    #[test]
    fn v4_payload_adds_content_type() {
        let request = ServerRequest {
            method: "POST".to_owned(),
            url: Url::parse("https://open.example.org/rooms").unwrap(),
            headers: BTreeMap::new(),
            body: Some(b"{}".to_vec()),
        };
        let payload = request.payload(SERVER, OnionVersion::V4).unwrap();
        let items = parse_bencoded_list(&payload).unwrap();
        assert_eq!(items.len(), 2);
        let info: Value = serde_json::from_slice(items[0]).unwrap();
        assert_eq!(info["endpoint"], "/rooms");
        assert_eq!(info["headers"]["Content-Type"], "application/json");
        assert_eq!(items[1], b"{}");
    }

    #[test]
    fn v4_payload_without_body() {
        let request = ServerRequest::get(Url::parse("https://open.example.org/rooms").unwrap());
        let payload = request.payload(SERVER, OnionVersion::V4).unwrap();
        assert_eq!(parse_bencoded_list(&payload).unwrap().len(), 1);
    }
}
