/*! Tunables of onion routing
*/

use std::time::Duration;

use onion_packet::{OnionVersion, PATH_SIZE};

/// Seeds asked for service nodes when the pool runs low.
pub const DEFAULT_SEED_NODES: [&str; 3] = [
    "https://storage.seed1.loki.network:4433",
    "https://storage.seed3.loki.network:4433",
    "https://public.loki.foundation:4433",
];

/// Maximum size of a file uploaded to a server.
pub const MAX_UPLOAD_SIZE: usize = 10_000_000;

/// Onion routing settings. `Default` gives the values used by the network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnionConfig {
    /// Seed URLs with scheme and port.
    pub seed_nodes: Vec<String>,
    /// Pool is refreshed from a seed when it has fewer nodes.
    pub min_pool_size: usize,
    /// How many nodes to ask a seed for.
    pub pool_refresh_limit: usize,
    /// Number of nodes in a path including the guard.
    pub path_size: usize,
    /// Number of paths to maintain.
    pub target_path_count: usize,
    /// Failures after which a path is dropped.
    pub path_failure_threshold: u32,
    /// Failures after which a node is evicted.
    pub node_failure_threshold: u32,
    /// Cached swarms smaller than this are fetched again.
    pub min_swarm_size: usize,
    /// Timeout of the guard liveness check.
    pub guard_check_timeout: Duration,
    /// Lowest node version accepted as a guard.
    pub min_guard_version: String,
    /// Timeout of the onion request to a guard. `None` disables it.
    pub request_timeout: Option<Duration>,
    /// Protocol version used for server destinations.
    pub onion_version: OnionVersion,
    /// Size of the largest upload a server accepts.
    pub max_upload_size: usize,
}

impl Default for OnionConfig {
    fn default() -> Self {
        OnionConfig {
            seed_nodes: DEFAULT_SEED_NODES.iter().map(|seed| seed.to_string()).collect(),
            min_pool_size: 12,
            pool_refresh_limit: 256,
            path_size: PATH_SIZE,
            target_path_count: 2,
            path_failure_threshold: 3,
            node_failure_threshold: 3,
            min_swarm_size: 3,
            guard_check_timeout: Duration::from_secs(3),
            min_guard_version: "2.0.7".to_owned(),
            request_timeout: Some(Duration::from_secs(20)),
            onion_version: OnionVersion::default(),
            max_upload_size: MAX_UPLOAD_SIZE,
        }
    }
}

impl OnionConfig {
    /// Number of guards needed, one per path.
    pub fn target_guard_count(&self) -> usize {
        self.target_path_count
    }
}
