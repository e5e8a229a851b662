/*! Swarms: nodes responsible for a public key
*/

use std::collections::HashSet;
use std::sync::Arc;

use onion_crypto::{random_element, shuffled};
use onion_packet::*;

use crate::directory::NodeDirectory;
use crate::dispatcher::RequestDispatcher;
use crate::errors::OnionRequestError;
use crate::store::DirectoryStore;

/// Cached swarms with the operations failure handling needs.
#[derive(Clone)]
pub struct SwarmCache {
    store: Arc<dyn DirectoryStore>,
    min_swarm_size: usize,
}

impl SwarmCache {
    /// Create new `SwarmCache`.
    pub fn new(store: Arc<dyn DirectoryStore>, min_swarm_size: usize) -> Self {
        SwarmCache {
            store,
            min_swarm_size,
        }
    }

    /// Cached swarm if it is big enough to be trusted.
    pub fn fresh(&self, public_key: &str) -> Option<HashSet<ServiceNode>> {
        self.store.swarm(public_key)
            .filter(|swarm| swarm.len() >= self.min_swarm_size)
    }

    /// Replace the swarm of `public_key`.
    pub fn replace_swarm(&self, public_key: &str, swarm: HashSet<ServiceNode>) {
        debug!("Replacing swarm of {} with {} nodes", public_key, swarm.len());
        self.store.set_swarm(public_key, swarm);
    }

    /// Forget the swarm of `public_key` so the next lookup goes to the network.
    pub fn invalidate_swarm(&self, public_key: &str) {
        debug!("Invalidating swarm of {}", public_key);
        self.store.set_swarm(public_key, HashSet::new());
    }

    /// Remove a node from the swarm of `public_key`.
    pub fn drop_from_swarm(&self, node: &ServiceNode, public_key: &str) {
        if let Some(mut swarm) = self.store.swarm(public_key) {
            if swarm.remove(node) {
                self.store.set_swarm(public_key, swarm);
            }
        }
    }

    /// Remove a node from every cached swarm.
    pub fn drop_from_all_swarms(&self, node: &ServiceNode) {
        for public_key in self.store.swarm_keys() {
            self.drop_from_swarm(node, &public_key);
        }
    }
}

/// Resolves swarms through onion requests.
#[derive(Clone)]
pub struct SwarmResolver {
    cache: SwarmCache,
    directory: NodeDirectory,
    dispatcher: RequestDispatcher,
}

impl SwarmResolver {
    /// Create new `SwarmResolver`.
    pub fn new(cache: SwarmCache, directory: NodeDirectory, dispatcher: RequestDispatcher) -> Self {
        SwarmResolver {
            cache,
            directory,
            dispatcher,
        }
    }

    /// Swarm of `public_key`. Cached swarms smaller than the minimum size
    /// are fetched again from a random node.
    pub async fn get_swarm(&self, public_key: &str) -> Result<HashSet<ServiceNode>, OnionRequestError> {
        if let Some(swarm) = self.cache.fresh(public_key) {
            return Ok(swarm);
        }

        let node = self.directory.random_node().await?;
        debug!("Fetching swarm of {} from {}", public_key, node);
        let request = SnodeRequest::get_swarm(public_key);
        let response = self.dispatcher
            .invoke(request.method, &node, request.params, Some(public_key))
            .await?;
        let swarm = parse_swarm(&response).into_iter().collect::<HashSet<_>>();
        self.cache.replace_swarm(public_key, swarm.clone());
        Ok(swarm)
    }

    /// `count` random nodes of the swarm of `public_key`.
    pub async fn get_target_nodes(&self, public_key: &str, count: usize) -> Result<Vec<ServiceNode>, OnionRequestError> {
        let swarm = self.get_swarm(public_key).await?;
        Ok(shuffled(swarm.into_iter().collect()).into_iter().take(count).collect())
    }

    /// One random node of the swarm of `public_key`.
    pub async fn random_swarm_node(&self, public_key: &str) -> Result<ServiceNode, OnionRequestError> {
        let swarm = self.get_swarm(public_key).await?.into_iter().collect::<Vec<_>>();
        random_element(&swarm).cloned().ok_or(OnionRequestError::InsufficientNodes)
    }

    /// Cache operations.
    pub fn cache(&self) -> &SwarmCache {
        &self.cache
    }
}
