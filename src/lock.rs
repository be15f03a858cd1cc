//! Distributed locks with heartbeat renewal
//!
//! A lock is one TTL node created with a conditional create. While held, a
//! dedicated heartbeat task extends its TTL with a compare-and-swap on the
//! node's last known index, so a node recreated by another holder is never
//! renewed. Releasing the handle stops the heartbeat and deletes the node.
//! A crashed holder's node simply expires.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::metrics;
use crate::paths::PathLayout;
use crate::store::{SharedStore, StoreError};

/// Lock namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockScope {
    /// Shared by the instances of one service location
    Local,
    /// Shared by every service
    Global,
}

impl LockScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Global => "global",
        }
    }
}

impl std::fmt::Display for LockScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proof of ownership of a held lock; not `Clone`, one owner releases it
#[derive(Debug)]
pub struct LockHandle {
    name: String,
    scope: LockScope,
    key: String,
    token: Uuid,
    acquired_at: DateTime<Utc>,
    lost: Arc<AtomicBool>,
}

impl LockHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> LockScope {
        self.scope
    }

    /// Store key backing the lock
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// True once the heartbeat found the node gone or taken over, or could
    /// not renew it for a full TTL
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }
}

/// Outcome of an acquisition attempt
#[derive(Debug)]
pub enum LockAcquire {
    Acquired(LockHandle),
    /// Another holder owns the lock
    Held,
}

impl LockAcquire {
    pub fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired(_))
    }

    pub fn into_handle(self) -> Option<LockHandle> {
        match self {
            Self::Acquired(handle) => Some(handle),
            Self::Held => None,
        }
    }
}

/// Value stored in a lock node
#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    holder: String,
    token: Uuid,
    acquired_at: DateTime<Utc>,
}

struct HeldLock {
    token: Uuid,
    lost: Arc<AtomicBool>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Acquires, renews and releases locks for one service instance
pub struct LockManager {
    store: SharedStore,
    layout: PathLayout,
    location: String,
    holder: String,
    ttl: Duration,
    heartbeat: Duration,
    stopped: AtomicBool,
    held: Mutex<HashMap<String, HeldLock>>,
}

impl LockManager {
    /// `holder` is written into every lock node to identify the owner
    pub fn new(
        store: SharedStore,
        layout: PathLayout,
        location: impl Into<String>,
        holder: impl Into<String>,
        ttl: Duration,
        heartbeat: Duration,
    ) -> Self {
        Self {
            store,
            layout,
            location: location.into(),
            holder: holder.into(),
            ttl,
            heartbeat,
            stopped: AtomicBool::new(false),
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Try to take the lock once.
    ///
    /// A lock held elsewhere (or already by this instance) is `Ok(Held)`.
    /// Store failures are returned as errors and not retried.
    pub async fn acquire(&self, name: &str, scope: LockScope) -> Result<LockAcquire> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::Stopped);
        }

        let key = self.layout.lock(scope, &self.location, name);
        let mut held = self.held.lock().await;

        if let Some(entry) = held.get(&key) {
            if !entry.is_dead() {
                debug!(lock = %key, "Lock already held by this instance");
                metrics::record_lock_acquisition(scope.as_str(), "held");
                return Ok(LockAcquire::Held);
            }
            if let Some(stale) = held.remove(&key) {
                debug!(lock = %key, "Dropping lost lock entry");
                stop_heartbeat(&key, stale).await;
            }
        }

        let record = LockRecord {
            holder: self.holder.clone(),
            token: Uuid::new_v4(),
            acquired_at: Utc::now(),
        };
        let value = serde_json::to_string(&record)?;

        let node = match self.store.create(&key, &value, Some(self.ttl)).await {
            Ok(node) => node,
            Err(StoreError::NodeExists { .. }) => {
                debug!(lock = %key, "Lock held by another owner");
                metrics::record_lock_acquisition(scope.as_str(), "held");
                return Ok(LockAcquire::Held);
            }
            Err(e) => {
                warn!(lock = %key, error = %e, "Lock acquisition failed");
                metrics::record_lock_acquisition(scope.as_str(), "error");
                return Err(e.into());
            }
        };

        let lost = Arc::new(AtomicBool::new(false));
        let (stop_tx, stop_rx) = watch::channel(false);
        let beat = Heartbeat {
            store: Arc::clone(&self.store),
            key: key.clone(),
            value,
            ttl: self.ttl,
            every: self.heartbeat,
            lost: Arc::clone(&lost),
        };
        let task = tokio::spawn(beat.run(node.modified_index, stop_rx));
        held.insert(
            key.clone(),
            HeldLock {
                token: record.token,
                lost: Arc::clone(&lost),
                stop_tx,
                task,
            },
        );

        info!(lock = %key, scope = %scope, "Lock acquired");
        metrics::record_lock_acquisition(scope.as_str(), "acquired");

        Ok(LockAcquire::Acquired(LockHandle {
            name: name.to_string(),
            scope,
            key,
            token: record.token,
            acquired_at: record.acquired_at,
            lost,
        }))
    }

    /// Stop the heartbeat, then delete the node if it is still ours.
    ///
    /// Best effort: a failed delete leaves the node to expire by TTL.
    pub async fn release(&self, handle: LockHandle) {
        let entry = {
            let mut held = self.held.lock().await;
            let ours = held
                .get(&handle.key)
                .is_some_and(|entry| entry.token == handle.token);
            if ours {
                held.remove(&handle.key)
            } else {
                None
            }
        };
        if let Some(entry) = entry {
            stop_heartbeat(&handle.key, entry).await;
        }
        self.delete_if_owned(&handle.key, handle.token).await;
    }

    async fn delete_if_owned(&self, key: &str, token: Uuid) {
        let node = match self.store.get(key).await {
            Ok(Some(node)) => node,
            Ok(None) => {
                debug!(lock = %key, "Lock node already gone");
                return;
            }
            Err(e) => {
                warn!(lock = %key, error = %e, "Failed to read lock for release, leaving it to expire");
                return;
            }
        };

        let ours = serde_json::from_str::<LockRecord>(&node.value)
            .map(|r| r.token == token)
            .unwrap_or(false);
        if !ours {
            warn!(lock = %key, "Lock node owned by someone else, not deleting");
            return;
        }

        match self.store.compare_and_delete(key, node.modified_index).await {
            Ok(()) => info!(lock = %key, "Lock released"),
            Err(e) => warn!(lock = %key, error = %e, "Failed to delete lock, leaving it to expire"),
        }
    }

    /// Number of locks currently held by this instance
    pub async fn held_count(&self) -> usize {
        self.held
            .lock()
            .await
            .values()
            .filter(|entry| !entry.is_dead())
            .count()
    }

    /// Refuse new acquisitions, then release every held lock.
    ///
    /// Handles still owned by callers become inert.
    pub async fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);

        let entries: Vec<(String, HeldLock)> = self.held.lock().await.drain().collect();
        for (key, entry) in entries {
            let token = entry.token;
            stop_heartbeat(&key, entry).await;
            self.delete_if_owned(&key, token).await;
        }
    }
}

impl HeldLock {
    fn is_dead(&self) -> bool {
        self.lost.load(Ordering::SeqCst) || self.task.is_finished()
    }
}

async fn stop_heartbeat(key: &str, entry: HeldLock) {
    entry.stop_tx.send_replace(true);
    if let Err(e) = entry.task.await {
        warn!(lock = %key, error = %e, "Heartbeat task ended abnormally");
    }
}

/// Renewal loop of one held lock
struct Heartbeat {
    store: SharedStore,
    key: String,
    /// Value written at acquisition, rewritten unchanged on every renewal
    value: String,
    ttl: Duration,
    every: Duration,
    lost: Arc<AtomicBool>,
}

impl Heartbeat {
    fn mark_lost(&self) {
        self.lost.store(true, Ordering::SeqCst);
    }

    /// Renew until stopped or lost. `index` is the node's last known
    /// modified index; a renewal only succeeds while it still matches.
    async fn run(self, mut index: u64, mut stop_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick fires immediately
        ticker.tick().await;
        let mut renewed_at = Instant::now();
        let key = &self.key;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop_rx.wait_for(|stopped| *stopped) => {
                    debug!(lock = %key, "Heartbeat stopped");
                    return;
                }
            }

            match self
                .store
                .compare_and_swap(key, &self.value, Some(index), Some(self.ttl))
                .await
            {
                Ok(node) => {
                    metrics::record_lock_heartbeat(true);
                    debug!(lock = %key, index = node.modified_index, "Lock renewed");
                    index = node.modified_index;
                    renewed_at = Instant::now();
                }
                Err(StoreError::NotFound { .. }) => {
                    metrics::record_lock_heartbeat(false);
                    error!(lock = %key, "Lock node vanished, lock lost");
                    self.mark_lost();
                    return;
                }
                Err(e) if e.is_conflict() => {
                    metrics::record_lock_heartbeat(false);
                    error!(lock = %key, error = %e, "Lock node taken over, lock lost");
                    self.mark_lost();
                    return;
                }
                Err(e) => {
                    metrics::record_lock_heartbeat(false);
                    if renewed_at.elapsed() >= self.ttl {
                        error!(lock = %key, error = %e, "Lock not renewed within its ttl, lock lost");
                        self.mark_lost();
                        return;
                    }
                    warn!(lock = %key, error = %e, "Lock renewal failed");
                }
            }
        }
    }
}
