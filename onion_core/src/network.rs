/*! Network clock offset and fork version learned from responses
*/

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde_json::Value;

/// Hard and soft fork version of the service node network.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ForkInfo {
    /// Hard fork.
    pub hard: u64,
    /// Soft fork.
    pub soft: u64,
}

#[derive(Debug, Default)]
struct NetworkInfoInner {
    clock_offset: Option<i64>,
    fork_info: ForkInfo,
}

/// What the network told us about time and versions.
#[derive(Clone, Debug, Default)]
pub struct NetworkInfo {
    inner: Arc<RwLock<NetworkInfoInner>>,
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or_default()
}

impl NetworkInfo {
    /// Create new `NetworkInfo`.
    pub fn new() -> Self {
        NetworkInfo::default()
    }

    /// Milliseconds the network clock is ahead of ours.
    pub fn clock_offset(&self) -> Option<i64> {
        self.inner.read().clock_offset
    }

    /// Current network time in milliseconds since epoch.
    pub fn network_time(&self) -> i64 {
        now_millis() + self.clock_offset().unwrap_or_default()
    }

    /// Latest fork version seen.
    pub fn fork_info(&self) -> ForkInfo {
        self.inner.read().fork_info
    }

    /// Update from a response body carrying `t` (ms timestamp) and/or
    /// `hf` (`[hard, soft]`). Fork version never goes back.
    pub fn update(&self, body: &Value) {
        if let Some(timestamp) = body.get("t").and_then(Value::as_i64) {
            let offset = timestamp - now_millis();
            self.inner.write().clock_offset = Some(offset);
        }
        if let Some(hf) = body.get("hf") {
            let numbers = hf.as_array()
                .map(|hf| hf.iter().filter_map(Value::as_u64).collect::<Vec<_>>())
                .unwrap_or_default();
            match numbers.as_slice() {
                [hard, soft, ..] => self.update_fork_info(ForkInfo { hard: *hard, soft: *soft }),
                _ => error!("Response contains fork information without hard and soft numbers: {}", hf),
            }
        }
    }

    fn update_fork_info(&self, fork_info: ForkInfo) {
        let mut inner = self.inner.write();
        if fork_info > inner.fork_info {
            inner.fork_info = fork_info;
        } else if fork_info < inner.fork_info {
            warn!("Got fork version {:?} older than known {:?}", fork_info, inner.fork_info);
        }
    }
}
