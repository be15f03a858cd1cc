//! In-process coordination store
//!
//! TTL bookkeeping uses tokio's clock, so tests running with paused time see
//! deterministic expiry. Also used for `local` start mode where no etcd
//! cluster is available.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use super::{CoordinationStore, Node, StoreError, StoreResult};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    modified_index: u64,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct MemoryState {
    nodes: BTreeMap<String, Entry>,
    index: u64,
    unavailable: bool,
    writes: BTreeMap<String, usize>,
}

impl MemoryState {
    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.nodes
            .retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable {
            Err(StoreError::Unavailable("memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn write(&mut self, key: &str, value: String, ttl: Option<Duration>) -> Node {
        self.index += 1;
        let entry = Entry {
            value: value.clone(),
            modified_index: self.index,
            expires_at: ttl.map(|t| Instant::now() + t),
        };
        self.nodes.insert(key.to_string(), entry);
        *self.writes.entry(key.to_string()).or_default() += 1;
        Node {
            key: key.to_string(),
            value,
            modified_index: self.index,
        }
    }
}

/// In-memory [`CoordinationStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate a network partition: every call fails with `Unavailable`
    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
    }

    /// Drop a node as a store compaction or manual deletion would
    pub fn evict(&self, key: &str) -> bool {
        self.lock().nodes.remove(key).is_some()
    }

    /// Whether a live (unexpired) node exists at `key`
    pub fn contains_key(&self, key: &str) -> bool {
        let mut state = self.lock();
        state.purge_expired();
        state.nodes.contains_key(key)
    }

    /// Current value of a live node
    pub fn value_of(&self, key: &str) -> Option<String> {
        let mut state = self.lock();
        state.purge_expired();
        state.nodes.get(key).map(|e| e.value.clone())
    }

    /// Remaining TTL of a live node; `None` if missing or persistent
    pub fn ttl_remaining(&self, key: &str) -> Option<Duration> {
        let mut state = self.lock();
        state.purge_expired();
        let now = Instant::now();
        state
            .nodes
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Number of successful writes (set, refresh, create, cas) issued for `key`
    pub fn write_count(&self, key: &str) -> usize {
        self.lock().writes.get(key).copied().unwrap_or(0)
    }

    /// Live keys, in order
    pub fn keys(&self) -> Vec<String> {
        let mut state = self.lock();
        state.purge_expired();
        state.nodes.keys().cloned().collect()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Node>> {
        let mut state = self.lock();
        state.check_available()?;
        state.purge_expired();
        Ok(state.nodes.get(key).map(|e| Node {
            key: key.to_string(),
            value: e.value.clone(),
            modified_index: e.modified_index,
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<Node> {
        let mut state = self.lock();
        state.check_available()?;
        state.purge_expired();
        Ok(state.write(key, value.to_string(), ttl))
    }

    async fn refresh(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let mut state = self.lock();
        state.check_available()?;
        state.purge_expired();
        let Some(entry) = state.nodes.get_mut(key) else {
            return Err(StoreError::NotFound {
                key: key.to_string(),
            });
        };
        entry.expires_at = Some(Instant::now() + ttl);
        *state.writes.entry(key.to_string()).or_default() += 1;
        Ok(())
    }

    async fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<Node> {
        let mut state = self.lock();
        state.check_available()?;
        state.purge_expired();
        if state.nodes.contains_key(key) {
            return Err(StoreError::NodeExists {
                key: key.to_string(),
            });
        }
        Ok(state.write(key, value.to_string(), ttl))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        value: &str,
        prev_index: Option<u64>,
        ttl: Option<Duration>,
    ) -> StoreResult<Node> {
        let mut state = self.lock();
        state.check_available()?;
        state.purge_expired();
        let current = state.nodes.get(key).map(|e| e.modified_index);
        match (prev_index, current) {
            (None, None) => {}
            (None, Some(_)) => {
                return Err(StoreError::NodeExists {
                    key: key.to_string(),
                })
            }
            (Some(_), None) => {
                return Err(StoreError::NotFound {
                    key: key.to_string(),
                })
            }
            (Some(expected), Some(actual)) if expected != actual => {
                return Err(StoreError::CompareFailed {
                    key: key.to_string(),
                    reason: format!("[{expected} != {actual}]"),
                })
            }
            _ => {}
        }
        Ok(state.write(key, value.to_string(), ttl))
    }

    async fn delete(&self, key: &str, recursive: bool) -> StoreResult<()> {
        let mut state = self.lock();
        state.check_available()?;
        state.purge_expired();
        let mut removed = state.nodes.remove(key).is_some();
        if recursive {
            let prefix = format!("{}/", key.trim_end_matches('/'));
            let before = state.nodes.len();
            state.nodes.retain(|k, _| !k.starts_with(&prefix));
            removed |= state.nodes.len() != before;
        }
        if removed {
            Ok(())
        } else {
            Err(StoreError::NotFound {
                key: key.to_string(),
            })
        }
    }

    async fn compare_and_delete(&self, key: &str, prev_index: u64) -> StoreResult<()> {
        let mut state = self.lock();
        state.check_available()?;
        state.purge_expired();
        match state.nodes.get(key).map(|e| e.modified_index) {
            None => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            Some(actual) if actual != prev_index => Err(StoreError::CompareFailed {
                key: key.to_string(),
                reason: format!("[{prev_index} != {actual}]"),
            }),
            Some(_) => {
                state.nodes.remove(key);
                Ok(())
            }
        }
    }
}
