/*! Directory state persisted to a JSON file

Nodes are kept in their `address-port-ed25519-x25519` form. Every write
rewrites the whole file through a temporary file and a rename.
*/

use std::collections::{BTreeMap, HashMap, HashSet};
use std::convert::TryInto;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use onion_requests::core::store::{DirectoryState, DirectoryStore, MemoryStore};
use onion_requests::packet::{ParseNodeError, Path, PathError, ServiceNode};

/// Error that can happen when loading or saving the store file.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The file can't be read or written.
    #[error("Can't access store file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid JSON of the expected shape.
    #[error("Invalid store file: {0}")]
    Json(#[from] serde_json::Error),
    /// A node is not in the persisted form.
    #[error("Invalid node in store file: {0}")]
    Node(#[from] ParseNodeError),
    /// A path is not three distinct nodes.
    #[error("Invalid path in store file: {0}")]
    Path(#[from] PathError),
}

/// File layout. Sorted collections keep the file diffable.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct StoreFile {
    #[serde(default)]
    pool: Vec<String>,
    #[serde(default)]
    paths: Vec<Vec<String>>,
    #[serde(default)]
    swarms: BTreeMap<String, Vec<String>>,
    /// Public key to node to hash.
    #[serde(default)]
    last_message_hashes: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    received_message_hashes: BTreeMap<String, Vec<String>>,
}

fn node_strings<'a, I: IntoIterator<Item = &'a ServiceNode>>(nodes: I) -> Vec<String> {
    let mut nodes = nodes.into_iter().map(ServiceNode::to_store_string).collect::<Vec<_>>();
    nodes.sort();
    nodes
}

fn parse_nodes(nodes: &[String]) -> Result<Vec<ServiceNode>, StoreError> {
    nodes.iter()
        .map(|node| node.parse().map_err(StoreError::from))
        .collect()
}

impl StoreFile {
    fn from_state(state: &DirectoryState) -> StoreFile {
        let mut last_message_hashes = BTreeMap::<String, BTreeMap<String, String>>::new();
        for ((node, public_key), hash) in &state.last_message_hashes {
            last_message_hashes.entry(public_key.clone())
                .or_default()
                .insert(node.to_store_string(), hash.clone());
        }

        StoreFile {
            pool: node_strings(&state.pool),
            paths: state.paths.iter()
                .map(|path| path.nodes().iter().map(ServiceNode::to_store_string).collect())
                .collect(),
            swarms: state.swarms.iter()
                .map(|(public_key, swarm)| (public_key.clone(), node_strings(swarm)))
                .collect(),
            last_message_hashes,
            received_message_hashes: state.received_message_hashes.iter()
                .map(|(public_key, hashes)| {
                    let mut hashes = hashes.iter().cloned().collect::<Vec<_>>();
                    hashes.sort();
                    (public_key.clone(), hashes)
                })
                .collect(),
        }
    }

    fn into_state(self) -> Result<DirectoryState, StoreError> {
        let pool = parse_nodes(&self.pool)?.into_iter().collect();

        let paths = self.paths.iter()
            .map(|nodes| {
                let nodes = parse_nodes(nodes)?;
                let nodes = nodes.try_into()
                    .map_err(|nodes: Vec<ServiceNode>| PathError::WrongLength(nodes.len()))?;
                Ok(Path::new(nodes)?)
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let swarms = self.swarms.iter()
            .map(|(public_key, swarm)| Ok((public_key.clone(), parse_nodes(swarm)?.into_iter().collect())))
            .collect::<Result<HashMap<_, _>, StoreError>>()?;

        let mut last_message_hashes = HashMap::new();
        for (public_key, hashes) in self.last_message_hashes {
            for (node, hash) in hashes {
                last_message_hashes.insert((node.parse()?, public_key.clone()), hash);
            }
        }

        let received_message_hashes = self.received_message_hashes.into_iter()
            .map(|(public_key, hashes)| (public_key, hashes.into_iter().collect::<HashSet<_>>()))
            .collect();

        Ok(DirectoryState {
            pool,
            paths,
            swarms,
            last_message_hashes,
            received_message_hashes,
        })
    }
}

/// `DirectoryStore` writing through to a JSON file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    memory: MemoryStore,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Load the store from `path`. A missing file gives an empty store.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<FileStore, StoreError> {
        let path = path.into();
        let state = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<StoreFile>(&bytes)?.into_state()?,
            Err(ref e) if e.kind() == ErrorKind::NotFound => {
                info!("Store file '{}' doesn't exist, starting from scratch", path.display());
                DirectoryState::default()
            },
            Err(e) => return Err(e.into()),
        };
        debug!("Loaded {} nodes and {} paths from '{}'", state.pool.len(), state.paths.len(), path.display());

        Ok(FileStore {
            path,
            memory: MemoryStore::with_state(state),
            write_lock: Mutex::new(()),
        })
    }

    /// Write the current state to the file.
    pub fn save(&self) -> Result<(), StoreError> {
        let _write = self.write_lock.lock();
        let file = StoreFile::from_state(&self.memory.snapshot());
        let json = serde_json::to_vec_pretty(&file)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            warn!("Failed to save store file '{}': {}", self.path.display(), e);
        }
    }
}

impl DirectoryStore for FileStore {
    fn node_pool(&self) -> HashSet<ServiceNode> {
        self.memory.node_pool()
    }

    fn set_node_pool(&self, pool: HashSet<ServiceNode>) {
        self.memory.set_node_pool(pool);
        self.persist();
    }

    fn paths(&self) -> Vec<Path> {
        self.memory.paths()
    }

    fn set_paths(&self, paths: Vec<Path>) {
        self.memory.set_paths(paths);
        self.persist();
    }

    fn clear_paths(&self) {
        self.memory.clear_paths();
        self.persist();
    }

    fn swarm(&self, public_key: &str) -> Option<HashSet<ServiceNode>> {
        self.memory.swarm(public_key)
    }

    fn set_swarm(&self, public_key: &str, swarm: HashSet<ServiceNode>) {
        self.memory.set_swarm(public_key, swarm);
        self.persist();
    }

    fn swarm_keys(&self) -> Vec<String> {
        self.memory.swarm_keys()
    }

    fn last_message_hash(&self, node: &ServiceNode, public_key: &str) -> Option<String> {
        self.memory.last_message_hash(node, public_key)
    }

    fn set_last_message_hash(&self, node: &ServiceNode, public_key: &str, hash: String) {
        self.memory.set_last_message_hash(node, public_key, hash);
        self.persist();
    }

    fn received_message_hashes(&self, public_key: &str) -> HashSet<String> {
        self.memory.received_message_hashes(public_key)
    }

    fn set_received_message_hashes(&self, public_key: &str, hashes: HashSet<String>) {
        self.memory.set_received_message_hashes(public_key, hashes);
        self.persist();
    }
}
