/*! Everything onion routing needs, wired together
*/

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

use onion_packet::*;

use crate::config::OnionConfig;
use crate::directory::NodeDirectory;
use crate::dispatcher::RequestDispatcher;
use crate::errors::OnionRequestError;
use crate::events::{Event, Events};
use crate::failure::FailureTracker;
use crate::network::NetworkInfo;
use crate::paths::PathManager;
use crate::store::DirectoryStore;
use crate::swarm::{SwarmCache, SwarmResolver};
use crate::transport::{HttpTransport, Transport, TransportError};

/// Shared onion routing state. Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct OnionRoutingContext {
    config: Arc<OnionConfig>,
    store: Arc<dyn DirectoryStore>,
    directory: NodeDirectory,
    swarms: SwarmResolver,
    tracker: FailureTracker,
    paths: PathManager,
    dispatcher: RequestDispatcher,
    events: Events,
}

impl OnionRoutingContext {
    /// Create new `OnionRoutingContext` on top of `store` and `transport`.
    pub fn new(config: OnionConfig, store: Arc<dyn DirectoryStore>, transport: Arc<dyn Transport>) -> Self {
        let config = Arc::new(config);
        let events = Events::new();
        let directory = NodeDirectory::new(store.clone(), transport.clone(), config.clone());
        let cache = SwarmCache::new(store.clone(), config.min_swarm_size);
        let tracker = FailureTracker::new(
            directory.clone(),
            cache.clone(),
            config.node_failure_threshold,
            config.path_failure_threshold,
        );
        let paths = PathManager::new(store.clone(), directory.clone(), transport.clone(), config.clone(), events.clone());
        let dispatcher = RequestDispatcher::new(
            paths.clone(),
            tracker.clone(),
            cache.clone(),
            transport,
            config.clone(),
            events.clone(),
            NetworkInfo::new(),
        );
        let swarms = SwarmResolver::new(cache, directory.clone(), dispatcher.clone());

        OnionRoutingContext {
            config,
            store,
            directory,
            swarms,
            tracker,
            paths,
            dispatcher,
            events,
        }
    }

    /// Create new `OnionRoutingContext` talking HTTPS to the network.
    pub fn with_http(config: OnionConfig, store: Arc<dyn DirectoryStore>) -> Result<Self, TransportError> {
        let transport = HttpTransport::new()?;
        Ok(OnionRoutingContext::new(config, store, Arc::new(transport)))
    }

    /// Call `method` on a service node through a path.
    pub async fn send_to_node(&self, node: &ServiceNode, method: Method, params: Value) -> Result<Value, OnionRequestError> {
        self.dispatcher.send_to_node(node, method, params).await
    }

    /// Send an HTTP request to `server` with the configured onion version.
    pub async fn send_to_server(&self, request: &ServerRequest, server: &str, x25519_public_key: &str) -> Result<OnionResponse, OnionRequestError> {
        self.dispatcher.send_to_server(request, server, x25519_public_key, self.config.onion_version).await
    }

    /// Receive path and clock events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Configuration in use.
    pub fn config(&self) -> &OnionConfig {
        &self.config
    }

    /// Persistent state.
    pub fn store(&self) -> &Arc<dyn DirectoryStore> {
        &self.store
    }

    /// Node pool.
    pub fn directory(&self) -> &NodeDirectory {
        &self.directory
    }

    /// Swarm lookups.
    pub fn swarms(&self) -> &SwarmResolver {
        &self.swarms
    }

    /// Failure counters.
    pub fn tracker(&self) -> &FailureTracker {
        &self.tracker
    }

    /// Paths.
    pub fn paths(&self) -> &PathManager {
        &self.paths
    }

    /// Request sending.
    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }

    /// Network time and fork versions.
    pub fn network(&self) -> &NetworkInfo {
        self.dispatcher.network()
    }
}
