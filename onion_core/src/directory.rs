/*! Pool of known service nodes

The pool is a write-through cache over the store. It is refreshed from a
random seed whenever it has fewer than `min_pool_size` nodes; every other
read is answered from the cache.
*/

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;

use onion_crypto::random_element;
use onion_packet::*;

use crate::config::OnionConfig;
use crate::errors::OnionRequestError;
use crate::store::DirectoryStore;
use crate::transport::*;

/// Known universe of service nodes.
#[derive(Clone)]
pub struct NodeDirectory {
    store: Arc<dyn DirectoryStore>,
    transport: Arc<dyn Transport>,
    config: Arc<OnionConfig>,
    /// Serializes refreshes so concurrent callers share one.
    refresh_lock: Arc<Mutex<()>>,
}

impl NodeDirectory {
    /// Create new `NodeDirectory`.
    pub fn new(store: Arc<dyn DirectoryStore>, transport: Arc<dyn Transport>, config: Arc<OnionConfig>) -> Self {
        NodeDirectory {
            store,
            transport,
            config,
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Cached pool.
    pub fn pool(&self) -> HashSet<ServiceNode> {
        self.store.node_pool()
    }

    /// Pool with at least `min_pool_size` nodes, refreshing it when needed.
    pub async fn ensure_pool(&self) -> Result<HashSet<ServiceNode>, OnionRequestError> {
        let pool = self.store.node_pool();
        if pool.len() >= self.config.min_pool_size {
            return Ok(pool);
        }

        let _guard = self.refresh_lock.lock().await;
        // somebody else might have refreshed while we waited
        let pool = self.store.node_pool();
        if pool.len() >= self.config.min_pool_size {
            return Ok(pool);
        }
        self.refresh().await
    }

    /// Random node of the pool.
    pub async fn random_node(&self) -> Result<ServiceNode, OnionRequestError> {
        let pool = self.ensure_pool().await?;
        let pool = pool.into_iter().collect::<Vec<_>>();
        random_element(&pool).cloned().ok_or(OnionRequestError::InsufficientNodes)
    }

    /// Remove a node from the pool.
    pub fn drop_node(&self, node: &ServiceNode) {
        let mut pool = self.store.node_pool();
        if pool.remove(node) {
            debug!("Dropping {} from the node pool", node);
            self.store.set_node_pool(pool);
        }
    }

    async fn refresh(&self) -> Result<HashSet<ServiceNode>, OnionRequestError> {
        let seed = random_element(&self.config.seed_nodes)
            .ok_or(OnionRequestError::InsufficientNodes)?;
        info!("Populating node pool using seed {}", seed);

        let url = format!("{}/{}", seed.trim_end_matches('/'), SEED_RPC_ENDPOINT);
        let body = get_n_service_nodes_request(self.config.pool_refresh_limit).to_string().into_bytes();
        let timeout = self.config.request_timeout;
        let request = self.transport.execute(HttpRequest::post(url, body).with_timeout(timeout));
        let result = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, request)
                .await
                .unwrap_or(Err(TransportError::Timeout)),
            None => request.await,
        };
        let response = result
            .map_err(|e| {
                warn!("Seed {} is unreachable: {}", seed, e);
                OnionRequestError::HttpRequestFailed { status_code: 0, body: None }
            })?;
        if !response.is_success() {
            return Err(OnionRequestError::http_failed(response.status, &response.body));
        }

        let pool = parse_seed_response(&response.body)
            .map_err(|e| {
                warn!("Invalid seed response: {}", e);
                OnionRequestError::InsufficientNodes
            })?
            .into_iter()
            .collect::<HashSet<_>>();
        if pool.is_empty() {
            return Err(OnionRequestError::InsufficientNodes);
        }

        info!("Node pool populated with {} nodes", pool.len());
        self.store.set_node_pool(pool.clone());
        Ok(pool)
    }
}
