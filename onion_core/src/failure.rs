/*! Failure counters of nodes and paths

Counters only grow on classified failures and are reset to zero as soon as
their threshold fires, so a node that comes back starts clean.
*/

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

use onion_packet::{Path, ServiceNode};

use crate::directory::NodeDirectory;
use crate::swarm::SwarmCache;

/// Outcome of recording a failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureOutcome {
    /// Counted, threshold not reached yet. Holds the new count.
    Counted(u32),
    /// Threshold reached, counter reset.
    ThresholdReached,
}

/// Counter map with a threshold.
#[derive(Debug)]
struct Counters<K> {
    threshold: u32,
    counts: Mutex<HashMap<K, u32>>,
}

impl<K: Eq + Hash + Clone> Counters<K> {
    fn new(threshold: u32) -> Self {
        Counters {
            threshold,
            counts: Mutex::new(HashMap::new()),
        }
    }

    fn increment(&self, key: &K) -> FailureOutcome {
        let mut counts = self.counts.lock();
        let count = counts.get(key).copied().unwrap_or(0) + 1;
        if count >= self.threshold {
            counts.remove(key);
            FailureOutcome::ThresholdReached
        } else {
            counts.insert(key.clone(), count);
            FailureOutcome::Counted(count)
        }
    }

    fn get(&self, key: &K) -> u32 {
        self.counts.lock().get(key).copied().unwrap_or(0)
    }

    fn reset(&self, key: &K) {
        self.counts.lock().remove(key);
    }
}

/// Counts delivery failures and evicts nodes that keep failing.
#[derive(Clone)]
pub struct FailureTracker {
    directory: NodeDirectory,
    swarms: SwarmCache,
    nodes: Arc<Counters<ServiceNode>>,
    paths: Arc<Counters<Path>>,
}

impl FailureTracker {
    /// Create new `FailureTracker`.
    pub fn new(directory: NodeDirectory, swarms: SwarmCache, node_threshold: u32, path_threshold: u32) -> Self {
        FailureTracker {
            directory,
            swarms,
            nodes: Arc::new(Counters::new(node_threshold)),
            paths: Arc::new(Counters::new(path_threshold)),
        }
    }

    /// Count a failure of `node`. At the threshold the node is removed from
    /// the pool and from every swarm.
    pub fn record_node_failure(&self, node: &ServiceNode) -> FailureOutcome {
        let outcome = self.nodes.increment(node);
        match outcome {
            FailureOutcome::Counted(count) => debug!("Node {} failed {} times", node, count),
            FailureOutcome::ThresholdReached => {
                warn!("Evicting node {} after repeated failures", node);
                self.swarms.drop_from_all_swarms(node);
                self.directory.drop_node(node);
            },
        }
        outcome
    }

    /// Count a failure of `path`. Dropping the path at the threshold is up
    /// to the caller.
    pub fn record_path_failure(&self, path: &Path) -> FailureOutcome {
        let outcome = self.paths.increment(path);
        if let FailureOutcome::Counted(count) = outcome {
            debug!("Path with guard {} failed {} times", path.guard(), count);
        }
        outcome
    }

    /// Current failure count of `node`.
    pub fn node_failures(&self, node: &ServiceNode) -> u32 {
        self.nodes.get(node)
    }

    /// Current failure count of `path`.
    pub fn path_failures(&self, path: &Path) -> u32 {
        self.paths.get(path)
    }

    /// Forget failures of `path`.
    pub fn reset_path(&self, path: &Path) {
        self.paths.reset(path);
    }
}
