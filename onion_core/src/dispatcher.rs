/*! Sending onions and classifying what went wrong

Every failed request is classified before the error reaches the caller:

- `"Next node not found: <ed25519>"` from the guard blames that node of the
  path. Once the node crosses its threshold it is evicted and replaced in its
  path; if no replacement exists the path is blamed instead.
- A 400 from a server destination and `"Loki Server error"` blame nobody.
- Anything else blames the path. Once the path crosses its threshold its
  guard is dropped, its nodes are checked like failing snodes and the path is
  removed.

Requests to snodes additionally handle snode statuses: 400, 500, 502 and 503
count a node failure, 406 is clock skew and 421 means the swarm moved.
*/

use std::sync::Arc;

use serde_json::Value;

use onion_crypto::{SymmetricKey, IV_SIZE};
use onion_packet::*;

use crate::config::OnionConfig;
use crate::errors::*;
use crate::events::{Event, Events};
use crate::failure::{FailureOutcome, FailureTracker};
use crate::network::NetworkInfo;
use crate::onion::Onion;
use crate::paths::PathManager;
use crate::swarm::SwarmCache;
use crate::transport::*;

/// Guard endpoint accepting onion requests.
pub const ONION_REQUEST_ENDPOINT: &str = "onion_req/v2";

/// Share of the maximum upload size above which large requests are logged.
const UPLOAD_WARNING_RATIO: f64 = 0.75;

/// What a failed request is blamed on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Blame {
    /// Not a fault of the path.
    Nobody,
    /// A node of the used path.
    Node(ServiceNode),
    /// The used path as a whole.
    Path,
}

/// Decide what a failed request is blamed on. Only HTTP level failures
/// reported by the guard are blamed on anything.
pub fn classify_failure(error: &OnionRequestError, destination: &Destination, path: Option<&Path>) -> Blame {
    let (status_code, body) = match error {
        OnionRequestError::HttpRequestFailed { status_code, body } => (*status_code, body.as_ref()),
        _ => return Blame::Nobody,
    };
    let message = result_message(body);

    if let Some(ed25519) = message.and_then(|message| message.strip_prefix(NEXT_NODE_NOT_FOUND_PREFIX)) {
        return match path.and_then(|path| path.find_by_ed25519(ed25519)) {
            Some(node) => Blame::Node(node.clone()),
            None => Blame::Path,
        };
    }
    if destination.is_server() && status_code == 400 {
        return Blame::Nobody;
    }
    if message == Some(SERVER_ERROR_MESSAGE) {
        return Blame::Nobody;
    }
    Blame::Path
}

/// Sends onion requests and feeds failures back into paths and counters.
#[derive(Clone)]
pub struct RequestDispatcher {
    paths: PathManager,
    tracker: FailureTracker,
    swarms: SwarmCache,
    transport: Arc<dyn Transport>,
    config: Arc<OnionConfig>,
    events: Events,
    network: NetworkInfo,
}

impl RequestDispatcher {
    /// Create new `RequestDispatcher`.
    pub fn new(
        paths: PathManager,
        tracker: FailureTracker,
        swarms: SwarmCache,
        transport: Arc<dyn Transport>,
        config: Arc<OnionConfig>,
        events: Events,
        network: NetworkInfo,
    ) -> Self {
        RequestDispatcher {
            paths,
            tracker,
            swarms,
            transport,
            config,
            events,
            network,
        }
    }

    /// Send `payload` to `destination` through a path. Makes exactly one
    /// attempt; failures are classified before they are returned.
    pub async fn send(&self, destination: Destination, payload: Vec<u8>, version: OnionVersion) -> Result<OnionResponse, OnionRequestError> {
        let path = self.paths.get_path(destination.node()).await?;
        let guard = path.guard().clone();

        let result = self.send_through(path, &destination, payload, version).await;
        if let Err(ref error) = result {
            self.handle_failure(error, &guard, &destination);
        }
        result
    }

    /// Call `method` on a service node. Snode statuses are handled on top of
    /// the usual classification; `public_key` is the swarm the call is about.
    pub async fn invoke(&self, method: Method, node: &ServiceNode, params: Value, public_key: Option<&str>) -> Result<Value, OnionRequestError> {
        let payload = serde_json::to_vec(&SnodeRequest::new(method, params))
            .map_err(|e| OnionRequestError::Encryption(e.to_string()))?;
        match self.send(Destination::ToNode(node.clone()), payload, OnionVersion::V3).await {
            Ok(response) => Ok(response.json()),
            Err(error) => {
                if let Some((status_code, body)) = error.status_and_body() {
                    if let Some(error) = self.handle_snode_error(status_code, body, node, public_key) {
                        return Err(error);
                    }
                }
                Err(error)
            },
        }
    }

    /// Call `method` on a service node not tied to a swarm.
    pub async fn send_to_node(&self, node: &ServiceNode, method: Method, params: Value) -> Result<Value, OnionRequestError> {
        self.invoke(method, node, params, None).await
    }

    /// Send an HTTP request to `server` behind an exit node.
    pub async fn send_to_server(
        &self,
        request: &ServerRequest,
        server: &str,
        x25519_public_key: &str,
        version: OnionVersion,
    ) -> Result<OnionResponse, OnionRequestError> {
        let destination = request.destination(x25519_public_key, version)?;
        let payload = request.payload(server, version)?;
        self.send(destination, payload, version).await
            .map_err(|e| {
                debug!("Couldn't reach server {}: {}", request.url, e);
                e
            })
    }

    /// What the network told us about time and versions.
    pub fn network(&self) -> &NetworkInfo {
        &self.network
    }

    async fn send_through(
        &self,
        path: Path,
        destination: &Destination,
        payload: Vec<u8>,
        version: OnionVersion,
    ) -> Result<OnionResponse, OnionRequestError> {
        let onion = {
            let destination = destination.clone();
            tokio::task::spawn_blocking(move || Onion::build(&path, &destination, &payload))
                .await
                .map_err(|e| OnionRequestError::Encryption(e.to_string()))??
        };

        if destination.is_server() && onion.len() as f64 > UPLOAD_WARNING_RATIO * self.config.max_upload_size as f64 {
            warn!("Approaching request size limit: ~{} bytes", onion.len());
        }

        let url = onion.guard.url(ONION_REQUEST_ENDPOINT);
        trace!("Sending onion request for {} through {}", destination, onion.guard);
        let request = HttpRequest::post(url, onion.request_body()?)
            .with_timeout(self.config.request_timeout);
        let response = self.execute(request).await?;
        self.handle_response(&response.body, &onion.destination_symmetric_key, destination, version)
    }

    /// Execute `request` with the configured timeout. Anything but a 2xx
    /// response is `HttpRequestFailed`, no response at all has status 0.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, OnionRequestError> {
        let future = self.transport.execute(request);
        let result = match self.config.request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, future)
                .await
                .unwrap_or(Err(TransportError::Timeout)),
            None => future.await,
        };
        let response = result.map_err(|e| {
            debug!("Onion request failed: {}", e);
            OnionRequestError::HttpRequestFailed { status_code: 0, body: None }
        })?;
        if !response.is_success() {
            return Err(OnionRequestError::http_failed(response.status, &response.body));
        }
        Ok(response)
    }

    fn handle_response(
        &self,
        body: &[u8],
        key: &SymmetricKey,
        destination: &Destination,
        version: OnionVersion,
    ) -> Result<OnionResponse, OnionRequestError> {
        let iv_and_ciphertext = parse_guard_response(body, version)?;
        if iv_and_ciphertext.len() <= IV_SIZE {
            return Err(OnionRequestError::InvalidResponse("Response is too short".to_owned()));
        }
        let plaintext = key.decrypt(&iv_and_ciphertext)?;
        let response = match version {
            OnionVersion::V3 => parse_v3_response(&plaintext)?,
            OnionVersion::V4 => parse_v4_response(&plaintext)?,
        };

        if response.is_clock_out_of_sync() {
            warn!("Destination {} reports our clock is out of sync", destination);
            self.events.publish(Event::ClockOutOfSync);
            return Err(OnionRequestError::ClockOutOfSync);
        }
        if version == OnionVersion::V3 {
            self.network.update(&response.info);
        }
        if !response.is_success() {
            return Err(OnionRequestError::DestinationRequestFailed {
                status_code: response.status_code,
                body: response.info,
                destination: destination.to_string(),
            });
        }
        Ok(response)
    }

    fn handle_failure(&self, error: &OnionRequestError, guard: &ServiceNode, destination: &Destination) {
        let path = self.paths.path_containing(guard);
        match classify_failure(error, destination, path.as_ref()) {
            Blame::Nobody => debug!("Request to {} failed without penalty: {}", destination, error),
            Blame::Node(node) => {
                if self.tracker.record_node_failure(&node) == FailureOutcome::ThresholdReached {
                    match self.paths.drop_node(&node) {
                        Ok(Some(old)) => self.tracker.reset_path(&old),
                        Ok(None) => {},
                        Err(e) => {
                            debug!("Can't repair path without {}: {}", node, e);
                            self.handle_path_failure(path.as_ref(), guard, error);
                        },
                    }
                }
            },
            Blame::Path => self.handle_path_failure(path.as_ref(), guard, error),
        }
    }

    fn handle_path_failure(&self, path: Option<&Path>, guard: &ServiceNode, error: &OnionRequestError) {
        let path = match path {
            Some(path) => path,
            None => return,
        };
        if self.tracker.record_path_failure(path) == FailureOutcome::ThresholdReached {
            self.paths.drop_guard(guard);
            if let Some((status_code, body)) = error.status_and_body() {
                for node in path.nodes() {
                    self.handle_snode_error(status_code, body, node, None);
                }
            }
            self.paths.drop_path(path);
        }
    }

    /// Apply snode status handling. Returns the error that should replace
    /// the original one, if any.
    fn handle_snode_error(&self, status_code: u16, body: Option<&Value>, node: &ServiceNode, public_key: Option<&str>) -> Option<OnionRequestError> {
        match status_code {
            400 | 500 | 502 | 503 => {
                if result_message(body) == Some(SERVER_ERROR_MESSAGE) {
                    debug!("Node {} reported a server error", node);
                } else {
                    self.tracker.record_node_failure(node);
                }
                None
            },
            CLOCK_OUT_OF_SYNC_STATUS => {
                warn!("Node {} reports our clock is out of sync", node);
                self.events.publish(Event::ClockOutOfSync);
                Some(OnionRequestError::ClockOutOfSync)
            },
            421 => {
                match public_key {
                    Some(public_key) => {
                        let swarm = body.map(parse_swarm).unwrap_or_default();
                        if swarm.is_empty() {
                            debug!("Node {} no longer serves {}", node, public_key);
                            self.swarms.invalidate_swarm(public_key);
                        } else {
                            self.swarms.replace_swarm(public_key, swarm.into_iter().collect());
                        }
                    },
                    None => debug!("Got 421 from {} without an associated public key", node),
                }
                None
            },
            _ => {
                debug!("Unhandled status {} from {}", status_code, node);
                None
            },
        }
    }
}
