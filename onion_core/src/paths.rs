/*! Onion paths and their guards

`PathManager` keeps `target_path_count` paths of three distinct nodes. Every
path starts with its own guard, a node that passed a liveness check. Other
path nodes are never contacted directly since that would reveal our IP to them.

The path list is replaced as a whole on every change and written through to
the store, so readers never observe a half updated list. Building is single
flight: concurrent callers wait for the build in progress and reuse its
paths.
*/

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use futures::future;
use itertools::{EitherOrBoth, Itertools};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::Mutex;

use onion_crypto::{random_element, shuffled};
use onion_packet::*;

use crate::config::OnionConfig;
use crate::directory::NodeDirectory;
use crate::errors::OnionRequestError;
use crate::events::{Event, Events};
use crate::store::DirectoryStore;
use crate::transport::*;

/// Endpoint answering the guard liveness check.
pub const GET_STATS_ENDPOINT: &str = "get_stats/v1";

/// Builds, hands out and repairs onion paths.
#[derive(Clone)]
pub struct PathManager {
    store: Arc<dyn DirectoryStore>,
    directory: NodeDirectory,
    transport: Arc<dyn Transport>,
    config: Arc<OnionConfig>,
    events: Events,
    /// Current paths, mirrored to the store.
    paths: Arc<RwLock<Vec<Path>>>,
    /// Guards of current paths plus freshly checked ones.
    guards: Arc<RwLock<HashSet<ServiceNode>>>,
    build_lock: Arc<Mutex<()>>,
}

impl PathManager {
    /// Create new `PathManager` starting with the paths from the store.
    pub fn new(
        store: Arc<dyn DirectoryStore>,
        directory: NodeDirectory,
        transport: Arc<dyn Transport>,
        config: Arc<OnionConfig>,
        events: Events,
    ) -> Self {
        let paths = store.paths();
        PathManager {
            store,
            directory,
            transport,
            config,
            events,
            paths: Arc::new(RwLock::new(paths)),
            guards: Arc::new(RwLock::new(HashSet::new())),
            build_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Current paths.
    pub fn paths(&self) -> Vec<Path> {
        self.paths.read().clone()
    }

    /// Current guards.
    pub fn guards(&self) -> HashSet<ServiceNode> {
        self.guards.read().clone()
    }

    /// Current path containing `node`.
    pub fn path_containing(&self, node: &ServiceNode) -> Option<Path> {
        self.paths.read().iter().find(|path| path.contains(node)).cloned()
    }

    /// Path to send a request through, optionally avoiding paths that
    /// contain `exclude`. Missing paths are built first unless a usable one
    /// already exists, in which case they are built in background.
    pub async fn get_path(&self, exclude: Option<&ServiceNode>) -> Result<Path, OnionRequestError> {
        let paths = self.paths();
        self.sync_guards(&paths);

        if paths.len() >= self.config.target_path_count {
            return pick_path(&paths, exclude);
        }

        if paths.iter().any(|path| usable(path, exclude)) {
            self.spawn_build();
            return pick_path(&paths, exclude);
        }

        let paths = self.build_paths().await?;
        pick_path(&paths, exclude)
    }

    /// Build paths until there are `target_path_count` of them, keeping the
    /// existing ones.
    pub async fn build_paths(&self) -> Result<Vec<Path>, OnionRequestError> {
        let _build = self.build_lock.lock().await;

        let reusable = self.paths();
        let target = self.config.target_path_count;
        if reusable.len() >= target {
            return Ok(reusable);
        }

        info!("Building onion request paths");
        self.events.publish(Event::BuildingPaths);

        let pool = self.directory.ensure_pool().await?;
        let reusable_guards = reusable.iter().map(|path| path.guard().clone()).collect::<Vec<_>>();
        let guards = self.guard_nodes(&reusable, &pool).await?;

        let used = used_nodes(&reusable);
        let mut unused = shuffled(pool.iter()
            .filter(|node| !guards.contains(*node) && !used.contains(*node))
            .cloned()
            .collect::<Vec<_>>());
        let new_guards = guards.into_iter()
            .filter(|guard| !reusable_guards.contains(guard))
            .take(target - reusable.len())
            .collect::<Vec<_>>();
        if unused.len() < new_guards.len() * (PATH_SIZE - 1) {
            return Err(OnionRequestError::InsufficientNodes);
        }

        let mut paths = Vec::with_capacity(target);
        for guard in new_guards {
            let rest = unused.split_off(unused.len() - (PATH_SIZE - 1));
            let path = Path::from_guard(guard, &rest)
                .map_err(|_| OnionRequestError::InsufficientNodes)?;
            debug!("Built new onion request path: {:?}", path.nodes().iter().map(|node| node.to_string()).collect::<Vec<_>>());
            paths.push(path);
        }
        paths.extend(reusable);

        self.replace_paths(paths.clone());
        self.events.publish(Event::PathsBuilt);
        Ok(paths)
    }

    /// Replace `node` in its path with a random unused node, keeping the
    /// other nodes in place. Fails when the pool has no unused node left.
    /// Returns the path that was replaced, `None` when no path uses `node`.
    pub fn drop_node(&self, node: &ServiceNode) -> Result<Option<Path>, OnionRequestError> {
        let pool = self.directory.pool();
        let mut paths = self.paths.write();
        let index = match paths.iter().position(|path| path.contains(node)) {
            Some(index) => index,
            None => return Ok(None),
        };

        let used = used_nodes(&paths);
        let unused = pool.into_iter()
            .filter(|candidate| !used.contains(candidate))
            .collect::<Vec<_>>();
        let replacement = random_element(&unused)
            .cloned()
            .ok_or(OnionRequestError::InsufficientNodes)?;
        debug!("Replacing {} with {} in onion request path", node, replacement);
        let repaired = paths[index].with_replaced(node, replacement)
            .ok_or(OnionRequestError::InsufficientNodes)?;

        let mut new_paths = paths.clone();
        let old = std::mem::replace(&mut new_paths[index], repaired);
        self.store.set_paths(new_paths.clone());
        *paths = new_paths;
        drop(paths);

        self.events.publish(Event::PathsChanged);
        Ok(Some(old))
    }

    /// Remove a whole path. The next `get_path` builds a replacement.
    pub fn drop_path(&self, path: &Path) {
        let mut paths = self.paths.write();
        let index = match paths.iter().position(|p| p == path) {
            Some(index) => index,
            None => return,
        };
        info!("Dropping onion request path with guard {}", path.guard());

        let mut new_paths = paths.clone();
        new_paths.remove(index);
        if new_paths.is_empty() {
            self.store.clear_paths();
        } else {
            self.store.set_paths(new_paths.clone());
        }
        *paths = new_paths;
        drop(paths);

        self.events.publish(Event::PathsChanged);
    }

    /// Stop using `node` as a guard.
    pub fn drop_guard(&self, node: &ServiceNode) {
        self.guards.write().remove(node);
    }

    fn replace_paths(&self, paths: Vec<Path>) {
        let mut current = self.paths.write();
        if paths.is_empty() {
            self.store.clear_paths();
        } else {
            self.store.set_paths(paths.clone());
        }
        *current = paths;
    }

    /// Guards are whatever the current paths start with.
    fn sync_guards(&self, paths: &[Path]) {
        let guards = paths.iter()
            .take(self.config.target_guard_count())
            .map(|path| path.guard().clone())
            .collect();
        *self.guards.write() = guards;
    }

    fn spawn_build(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.build_paths().await {
                warn!("Failed to build onion request paths in background: {}", e);
            }
        });
    }

    /// Guards for `target_guard_count` paths: guards of `reusable` plus
    /// newly checked nodes. Failed checks are replaced by other candidates
    /// until the pool runs out.
    async fn guard_nodes(&self, reusable: &[Path], pool: &HashSet<ServiceNode>) -> Result<HashSet<ServiceNode>, OnionRequestError> {
        let target = self.config.target_guard_count();
        let current = self.guards();
        if current.len() >= target {
            return Ok(current);
        }

        debug!("Populating guard node cache");
        let reusable_guards = reusable.iter().map(|path| path.guard().clone()).collect::<HashSet<_>>();
        let used = used_nodes(reusable);
        let mut candidates = shuffled(pool.iter()
            .filter(|node| !used.contains(*node))
            .cloned()
            .collect::<Vec<_>>());
        let needed = target.saturating_sub(reusable_guards.len());
        if candidates.len() < needed {
            return Err(OnionRequestError::InsufficientNodes);
        }

        let mut accepted = Vec::with_capacity(needed);
        while accepted.len() < needed {
            if candidates.is_empty() {
                return Err(OnionRequestError::InsufficientNodes);
            }
            let round = candidates.split_off(candidates.len().saturating_sub(needed - accepted.len()));
            let results = future::join_all(round.into_iter().map(|candidate| async move {
                let alive = self.check_guard(&candidate).await;
                (candidate, alive)
            })).await;
            accepted.extend(results.into_iter().filter(|(_, alive)| *alive).map(|(candidate, _)| candidate));
        }

        let guards = accepted.into_iter().chain(reusable_guards).collect::<HashSet<_>>();
        *self.guards.write() = guards.clone();
        Ok(guards)
    }

    /// Check that `node` answers and runs a recent enough version.
    async fn check_guard(&self, node: &ServiceNode) -> bool {
        debug!("Testing guard node {}", node);
        let timeout = self.config.guard_check_timeout;
        let request = HttpRequest::get(node.url(GET_STATS_ENDPOINT)).with_timeout(Some(timeout));
        let response = match tokio::time::timeout(timeout, self.transport.execute(request)).await {
            Ok(Ok(response)) if response.is_success() => response,
            Ok(Ok(response)) => {
                debug!("Guard candidate {} answered with status {}", node, response.status);
                return false;
            },
            Ok(Err(e)) => {
                debug!("Guard candidate {} is unreachable: {}", node, e);
                return false;
            },
            Err(_) => {
                debug!("Guard candidate {} timed out", node);
                return false;
            },
        };

        let version = serde_json::from_slice::<Value>(&response.body)
            .ok()
            .and_then(|json| json.get("version").and_then(version_string));
        match version {
            Some(version) if version_at_least(&version, &self.config.min_guard_version) => true,
            Some(version) => {
                debug!("Unsupported node version {} of {}", version, node);
                false
            },
            None => {
                debug!("Missing node version of {}", node);
                false
            },
        }
    }
}

/// Nodes reported as `"2.0.7"` or `[2, 0, 7]`.
fn version_string(version: &Value) -> Option<String> {
    match version {
        Value::String(version) => Some(version.clone()),
        Value::Array(parts) => parts.iter()
            .map(|part| part.as_u64().map(|part| part.to_string()))
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.join(".")),
        _ => None,
    }
}

/// Compare dotted versions numerically, missing components count as zero.
pub fn version_at_least(version: &str, min: &str) -> bool {
    fn parse(version: &str) -> Option<Vec<u64>> {
        version.trim().split('.').map(|part| part.parse().ok()).collect()
    }

    let (version, min) = match (parse(version), parse(min)) {
        (Some(version), Some(min)) => (version, min),
        _ => return false,
    };
    let ordering = version.iter().zip_longest(min.iter())
        .map(|pair| match pair {
            EitherOrBoth::Both(a, b) => a.cmp(b),
            EitherOrBoth::Left(a) => a.cmp(&0),
            EitherOrBoth::Right(b) => 0.cmp(b),
        })
        .find(|ordering| *ordering != Ordering::Equal)
        .unwrap_or(Ordering::Equal);
    ordering != Ordering::Less
}

fn usable(path: &Path, exclude: Option<&ServiceNode>) -> bool {
    exclude.map_or(true, |node| !path.contains(node))
}

fn used_nodes(paths: &[Path]) -> HashSet<ServiceNode> {
    paths.iter().flat_map(|path| path.nodes().iter().cloned()).collect()
}

fn pick_path(paths: &[Path], exclude: Option<&ServiceNode>) -> Result<Path, OnionRequestError> {
    let candidates = paths.iter()
        .filter(|path| usable(path, exclude))
        .collect::<Vec<_>>();
    random_element(&candidates)
        .map(|path| (*path).clone())
        .ok_or(OnionRequestError::InsufficientNodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use serde_json::json;

    use crate::store::MemoryStore;
    use crate::transport::fake::*;

    const X25519: &str = "0404040404040404040404040404040404040404040404040404040404040404";

    fn node(i: usize) -> ServiceNode {
        ServiceNode::new(format!("https://10.0.2.{}", i), 22021, format!("ed{}", i), X25519)
    }

    fn seed_response(count: usize) -> Vec<u8> {
        let states = (0..count).map(|i| json!({
            "public_ip": format!("10.0.2.{}", i),
            "storage_port": 22021,
            "pubkey_ed25519": format!("ed{}", i),
            "pubkey_x25519": X25519,
        })).collect::<Vec<_>>();
        json!({ "result": { "service_node_states": states } }).to_string().into_bytes()
    }

    /// Network of `count` nodes where nodes in `outdated` run an old version.
    fn network(count: usize, outdated: Vec<usize>) -> FnTransport {
        FnTransport::new(move |request| {
            if request.url.ends_with("/json_rpc") {
                return ok(seed_response(count));
            }
            let outdated = outdated.iter().any(|&i| request.url.starts_with(&format!("{}:", node(i).address)));
            let version = if outdated { "2.0.6" } else { "2.0.10" };
            ok(json!({ "version": version }).to_string())
        })
    }

    fn manager_with(store: Arc<MemoryStore>, transport: FnTransport, config: OnionConfig) -> (PathManager, Events) {
        let config = Arc::new(config);
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let directory = NodeDirectory::new(store.clone(), transport.clone(), config.clone());
        let events = Events::new();
        (PathManager::new(store, directory, transport, config, events.clone()), events)
    }

    fn manager(store: Arc<MemoryStore>, transport: FnTransport) -> PathManager {
        manager_with(store, transport, OnionConfig::default()).0
    }

    fn assert_disjoint(paths: &[Path]) {
        let mut seen = HashSet::new();
        for path in paths {
            for node in path.nodes() {
                assert!(seen.insert(node.clone()), "node {} is used twice", node);
            }
        }
    }

    #[test]
    fn version_comparison() {
        assert!(version_at_least("2.0.7", "2.0.7"));
        assert!(version_at_least("2.0.10", "2.0.7"));
        assert!(version_at_least("2.1", "2.0.7"));
        assert!(version_at_least("10.0.0", "2.0.7"));
        assert!(!version_at_least("2.0.6", "2.0.7"));
        assert!(!version_at_least("2", "2.0.7"));
        assert!(!version_at_least("beta", "2.0.7"));
    }

    #[test]
    fn version_as_array() {
        assert_eq!(version_string(&json!([2, 0, 9])), Some("2.0.9".to_owned()));
        assert_eq!(version_string(&json!("2.0.9")), Some("2.0.9".to_owned()));
        assert_eq!(version_string(&json!(2)), None);
    }

    #[tokio::test]
    async fn build_paths_from_scratch() {
        let store = Arc::new(MemoryStore::new());
        let (manager, events) = manager_with(store.clone(), network(20, vec![]), OnionConfig::default());
        let mut rx = events.subscribe();

        let path = manager.get_path(None).await.unwrap();
        let paths = manager.paths();
        assert_eq!(paths.len(), 2);
        assert!(paths.contains(&path));
        assert_disjoint(&paths);
        assert_ne!(paths[0].guard(), paths[1].guard());
        assert_eq!(store.paths(), paths);
        assert_eq!(manager.guards(), paths.iter().map(|path| path.guard().clone()).collect());

        assert_eq!(rx.recv().await.unwrap(), Event::BuildingPaths);
        assert_eq!(rx.recv().await.unwrap(), Event::PathsBuilt);
    }

    #[tokio::test]
    async fn outdated_guards_are_replaced() {
        let store = Arc::new(MemoryStore::new());
        let outdated = (0..14).collect::<Vec<_>>();
        let manager = manager(store, network(20, outdated.clone()));

        manager.build_paths().await.unwrap();
        for guard in manager.guards() {
            assert!(!outdated.iter().any(|&i| node(i) == guard), "outdated guard {}", guard);
        }
    }

    #[tokio::test]
    async fn all_guards_outdated() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(store.clone(), network(20, (0..20).collect()));
        assert_eq!(manager.build_paths().await, Err(OnionRequestError::InsufficientNodes));
        assert!(store.paths().is_empty());
    }

    #[tokio::test]
    async fn unreachable_guards() {
        let store = Arc::new(MemoryStore::new());
        let transport = FnTransport::new(|request| {
            if request.url.ends_with("/json_rpc") {
                ok(seed_response(20))
            } else {
                Err(TransportError::Timeout)
            }
        });
        let config = OnionConfig {
            guard_check_timeout: Duration::from_millis(10),
            ..OnionConfig::default()
        };
        let (manager, _) = manager_with(store, transport, config);
        assert_eq!(manager.get_path(None).await, Err(OnionRequestError::InsufficientNodes));
    }

    #[tokio::test]
    async fn not_enough_nodes_for_paths() {
        let store = Arc::new(MemoryStore::new());
        let config = OnionConfig {
            min_pool_size: 5,
            ..OnionConfig::default()
        };
        let (manager, _) = manager_with(store, network(5, vec![]), config);
        assert_eq!(manager.build_paths().await, Err(OnionRequestError::InsufficientNodes));
    }

    #[tokio::test]
    async fn exclude_node() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(store, network(20, vec![]));
        let paths = manager.build_paths().await.unwrap();
        let excluded = paths[0].nodes()[1].clone();
        for _ in 0..20 {
            let path = manager.get_path(Some(&excluded)).await.unwrap();
            assert_eq!(path, paths[1]);
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_build() {
        let store = Arc::new(MemoryStore::new());
        let transport = network(20, vec![]);
        let manager = manager(store, transport.clone());

        let (a, b, c) = tokio::join!(manager.get_path(None), manager.get_path(None), manager.get_path(None));
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(manager.paths().len(), 2);

        let requests = transport.requests.lock();
        assert_eq!(requests.iter().filter(|request| request.url.ends_with("/json_rpc")).count(), 1);
        assert_eq!(requests.iter().filter(|request| request.url.ends_with(GET_STATS_ENDPOINT)).count(), 2);
    }

    #[tokio::test]
    async fn missing_path_built_in_background() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(store.clone(), network(20, vec![]));
        let paths = manager.build_paths().await.unwrap();
        manager.drop_path(&paths[0]);
        assert_eq!(store.paths(), vec![paths[1].clone()]);

        // one usable path is handed out right away
        assert_eq!(manager.get_path(None).await.unwrap(), paths[1]);

        let paths = manager.build_paths().await.unwrap();
        assert_eq!(paths.len(), 2);
        assert_disjoint(&paths);
    }

    #[tokio::test]
    async fn drop_last_path_clears_store() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(store.clone(), network(20, vec![]));
        for path in manager.build_paths().await.unwrap() {
            manager.drop_path(&path);
        }
        assert!(manager.paths().is_empty());
        assert!(store.paths().is_empty());
    }

    #[tokio::test]
    async fn drop_node_repairs_in_place() {
        let store = Arc::new(MemoryStore::new());
        let (manager, events) = manager_with(store.clone(), network(20, vec![]), OnionConfig::default());
        let paths = manager.build_paths().await.unwrap();
        let mut rx = events.subscribe();
        let middle = paths[0].nodes()[1].clone();

        let old = manager.drop_node(&middle).unwrap();
        assert_eq!(old, Some(paths[0].clone()));

        let repaired = manager.paths();
        assert_eq!(repaired.len(), 2);
        assert_eq!(repaired[1], paths[1]);
        assert_eq!(repaired[0].guard(), paths[0].guard());
        assert_eq!(repaired[0].nodes()[2], paths[0].nodes()[2]);
        assert_ne!(repaired[0].nodes()[1], middle);
        assert_disjoint(&repaired);
        assert_eq!(store.paths(), repaired);
        assert_eq!(rx.recv().await.unwrap(), Event::PathsChanged);
    }

    #[tokio::test]
    async fn drop_node_without_replacement() {
        let store = Arc::new(MemoryStore::new());
        let config = OnionConfig {
            min_pool_size: 6,
            ..OnionConfig::default()
        };
        let (manager, _) = manager_with(store, network(6, vec![]), config);
        let paths = manager.build_paths().await.unwrap();
        assert_eq!(manager.drop_node(&paths[0].nodes()[1]), Err(OnionRequestError::InsufficientNodes));
        assert_eq!(manager.paths(), paths);
    }

    #[tokio::test]
    async fn drop_unknown_node_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(store, network(20, vec![]));
        let paths = manager.build_paths().await.unwrap();
        assert_eq!(manager.drop_node(&node(99)), Ok(None));
        assert_eq!(manager.paths(), paths);
    }
}
