/*! Persisted directory state

The core doesn't own storage. Everything it needs to survive restarts goes
through `DirectoryStore`: the node pool, the paths, swarms and the message
hashes the poll layer keeps next to them.
*/

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use onion_packet::{Path, ServiceNode};

/// Durable storage of directory state.
///
/// Writes replace the whole value so readers never see a partial update.
pub trait DirectoryStore: Send + Sync {
    /// Known service nodes.
    fn node_pool(&self) -> HashSet<ServiceNode>;
    /// Replace the known service nodes.
    fn set_node_pool(&self, pool: HashSet<ServiceNode>);
    /// Onion paths in use.
    fn paths(&self) -> Vec<Path>;
    /// Replace onion paths.
    fn set_paths(&self, paths: Vec<Path>);
    /// Forget all onion paths.
    fn clear_paths(&self);
    /// Cached swarm of a public key.
    fn swarm(&self, public_key: &str) -> Option<HashSet<ServiceNode>>;
    /// Replace the cached swarm of a public key.
    fn set_swarm(&self, public_key: &str, swarm: HashSet<ServiceNode>);
    /// Public keys with a cached swarm.
    fn swarm_keys(&self) -> Vec<String>;
    /// Hash of the last message retrieved from `node` for `public_key`.
    fn last_message_hash(&self, node: &ServiceNode, public_key: &str) -> Option<String>;
    /// Remember the last message retrieved from `node` for `public_key`.
    fn set_last_message_hash(&self, node: &ServiceNode, public_key: &str, hash: String);
    /// Hashes of messages already received for `public_key`.
    fn received_message_hashes(&self, public_key: &str) -> HashSet<String>;
    /// Replace hashes of messages already received for `public_key`.
    fn set_received_message_hashes(&self, public_key: &str, hashes: HashSet<String>);
}

/// Plain directory state, also the serialization shape of file stores.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryState {
    /// Known service nodes.
    pub pool: HashSet<ServiceNode>,
    /// Onion paths in use.
    pub paths: Vec<Path>,
    /// Swarms by public key.
    pub swarms: HashMap<String, HashSet<ServiceNode>>,
    /// Last message hash by `(node, public key)`.
    pub last_message_hashes: HashMap<(ServiceNode, String), String>,
    /// Received message hashes by public key.
    pub received_message_hashes: HashMap<String, HashSet<String>>,
}

/// In-memory `DirectoryStore`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<DirectoryState>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Create a store holding `state`.
    pub fn with_state(state: DirectoryState) -> Self {
        MemoryStore {
            state: RwLock::new(state),
        }
    }

    /// Copy of the whole state.
    pub fn snapshot(&self) -> DirectoryState {
        self.state.read().clone()
    }
}

impl DirectoryStore for MemoryStore {
    fn node_pool(&self) -> HashSet<ServiceNode> {
        self.state.read().pool.clone()
    }

    fn set_node_pool(&self, pool: HashSet<ServiceNode>) {
        self.state.write().pool = pool;
    }

    fn paths(&self) -> Vec<Path> {
        self.state.read().paths.clone()
    }

    fn set_paths(&self, paths: Vec<Path>) {
        self.state.write().paths = paths;
    }

    fn clear_paths(&self) {
        self.state.write().paths.clear();
    }

    fn swarm(&self, public_key: &str) -> Option<HashSet<ServiceNode>> {
        self.state.read().swarms.get(public_key).cloned()
    }

    fn set_swarm(&self, public_key: &str, swarm: HashSet<ServiceNode>) {
        self.state.write().swarms.insert(public_key.to_owned(), swarm);
    }

    fn swarm_keys(&self) -> Vec<String> {
        self.state.read().swarms.keys().cloned().collect()
    }

    fn last_message_hash(&self, node: &ServiceNode, public_key: &str) -> Option<String> {
        self.state.read().last_message_hashes.get(&(node.clone(), public_key.to_owned())).cloned()
    }

    fn set_last_message_hash(&self, node: &ServiceNode, public_key: &str, hash: String) {
        self.state.write().last_message_hashes.insert((node.clone(), public_key.to_owned()), hash);
    }

    fn received_message_hashes(&self, public_key: &str) -> HashSet<String> {
        self.state.read().received_message_hashes.get(public_key).cloned().unwrap_or_default()
    }

    fn set_received_message_hashes(&self, public_key: &str, hashes: HashSet<String>) {
        self.state.write().received_message_hashes.insert(public_key.to_owned(), hashes);
    }
}
