//! Registration lifecycle manager
//!
//! Keeps one TTL node per registered path alive in a coordination store.
//!
//! Each path gets its own maintenance task:
//!
//! ```text
//!            ┌────────────── write ok ───────────────┐
//!            │                                       ▼
//!   ┌────────────┐   set(payload, ttl)        ┌─────────┐
//!   │ NotCreated │ ─────────────────────────▶ │ Created │ ──┐ refresh(ttl) ok
//!   └────────────┘ ◀───────────────────────── └─────────┘ ◀─┘ (value untouched)
//!                      any write error
//! ```
//!
//! Every write happens under a write guard that also covers the stop
//! transition, so no node write can be issued once deregistration begins.
//! Store errors never end a loop; the node simply expires if the store stays
//! unreachable for longer than the TTL.

pub mod payload;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::metrics;
use crate::store::{SharedStore, StoreError};

pub use payload::{ManualData, RegData, ServCtrl, ServInfo, ServMap, DEFAULT_WEIGHT};

// ============================================================================
// Registration Types
// ============================================================================

/// Logical kind of a registration node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationKind {
    /// RPC server endpoints
    Server,
    /// Admin/debug endpoint
    Backdoor,
    /// Metrics endpoint
    Metrics,
    /// Operator override
    ManualControl,
}

impl RegistrationKind {
    /// Leaf directory under `dist2/<location>/<id>`
    pub fn dir(&self) -> &'static str {
        match self {
            Self::Server => "serve",
            Self::Backdoor => "backdoor",
            Self::Metrics => "metrics",
            Self::ManualControl => "manual",
        }
    }
}

/// Whether the node is believed to exist in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistrationState {
    #[default]
    NotCreated,
    Created,
}

/// A registered path and what to write there
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRecord {
    pub path: String,
    pub payload: String,
    pub kind: RegistrationKind,
}

impl RegistrationRecord {
    pub fn new(path: impl Into<String>, payload: impl Into<String>, kind: RegistrationKind) -> Self {
        Self {
            path: path.into(),
            payload: payload.into(),
            kind,
        }
    }
}

/// TTL, maintenance tick and deregistration grace delay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationSettings {
    pub ttl: Duration,
    pub refresh_interval: Duration,
    pub grace_delay: Duration,
}

impl Default for RegistrationSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            refresh_interval: Duration::from_secs(20),
            grace_delay: Duration::from_secs(2),
        }
    }
}

impl RegistrationSettings {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            ttl: config.registration_ttl(),
            refresh_interval: config.refresh_interval(),
            grace_delay: config.grace_delay(),
        }
    }
}

// ============================================================================
// Registrar
// ============================================================================

struct Entry {
    record: RegistrationRecord,
    refresh_only: bool,
    state: RegistrationState,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    /// Label for logs and metrics (`primary`, `region-3`, ...)
    name: String,
    store: SharedStore,
    settings: RegistrationSettings,
    stopped: AtomicBool,
    stop_tx: watch::Sender<bool>,
    /// Serializes node writes against the stop transition
    write_guard: Mutex<()>,
    entries: RwLock<HashMap<String, Entry>>,
}

/// Maintains registration nodes in one store
#[derive(Clone)]
pub struct Registrar {
    inner: Arc<Inner>,
}

impl Registrar {
    pub fn new(name: impl Into<String>, store: SharedStore, settings: RegistrationSettings) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                store,
                settings,
                stopped: AtomicBool::new(false),
                stop_tx,
                write_guard: Mutex::new(()),
                entries: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn settings(&self) -> &RegistrationSettings {
        &self.inner.settings
    }

    /// Start maintaining `record.path`; returns immediately.
    ///
    /// Registering a path again replaces the payload the next create writes
    /// and the refresh mode; it does not start a second task. With
    /// `refresh_only` set, a created node only has its TTL extended, so a new
    /// payload reaches the store only after the node is lost and recreated.
    pub async fn register(&self, record: RegistrationRecord, refresh_only: bool) -> Result<()> {
        if self.inner.is_stopped() {
            return Err(Error::Stopped);
        }

        let mut entries = self.inner.entries.write().await;

        if let Some(entry) = entries.get_mut(&record.path) {
            debug!(
                store = %self.inner.name,
                path = %record.path,
                "Registration updated, takes effect on next create"
            );
            entry.record = record;
            entry.refresh_only = refresh_only;
            return Ok(());
        }

        info!(
            store = %self.inner.name,
            path = %record.path,
            kind = ?record.kind,
            refresh_only = refresh_only,
            "Registering path"
        );

        let path = record.path.clone();
        let task = tokio::spawn(Arc::clone(&self.inner).maintain(path.clone()));
        entries.insert(
            path,
            Entry {
                record,
                refresh_only,
                state: RegistrationState::NotCreated,
                task: Some(task),
            },
        );

        Ok(())
    }

    /// Last observed state of a path
    pub async fn state(&self, path: &str) -> Option<RegistrationState> {
        self.inner.entries.read().await.get(path).map(|e| e.state)
    }

    /// Copy of the path -> payload map
    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.inner
            .entries
            .read()
            .await
            .iter()
            .map(|(path, entry)| (path.clone(), entry.record.payload.clone()))
            .collect()
    }

    /// Copy of every registration record
    pub async fn records(&self) -> Vec<RegistrationRecord> {
        self.inner
            .entries
            .read()
            .await
            .values()
            .map(|e| e.record.clone())
            .collect()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    /// Set the stop flag and wake every maintenance task; no write starts afterwards
    pub fn begin_stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.stop_tx.send_replace(true);
    }

    /// Stop, wait the grace delay, then delete every recorded path.
    ///
    /// The grace delay lets a replacement instance finish registering before
    /// this instance's nodes disappear.
    pub async fn drain(&self) {
        self.begin_stop();
        tokio::time::sleep(self.inner.settings.grace_delay).await;

        let tasks: Vec<JoinHandle<()>> = {
            let _guard = self.inner.write_guard.lock().await;
            let mut entries = self.inner.entries.write().await;

            let deletes = entries.keys().map(|path| self.inner.delete_node(path));
            futures::future::join_all(deletes).await;

            entries.values_mut().filter_map(|e| e.task.take()).collect()
        };

        for task in tasks {
            if let Err(e) = task.await {
                warn!(store = %self.inner.name, error = %e, "Registration task ended abnormally");
            }
        }

        info!(store = %self.inner.name, "Registrations cleared");
    }
}

impl Inner {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    async fn maintain(self: Arc<Self>, path: String) {
        let mut stop_rx = self.stop_tx.subscribe();
        let mut state = RegistrationState::NotCreated;

        for round in 0u64.. {
            {
                let started = Instant::now();
                let _guard = self.write_guard.lock().await;

                if self.is_stopped() {
                    info!(store = %self.name, path = %path, "Server stopping, skip registration write");
                    return;
                }

                state = self.update_node(&path, state, round).await;
                debug!(
                    store = %self.name,
                    path = %path,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Registration write guard released"
                );
            }

            if let Some(entry) = self.entries.write().await.get_mut(&path) {
                entry.state = state;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.refresh_interval) => {}
                _ = stop_rx.wait_for(|stopped| *stopped) => {}
            }

            if self.is_stopped() {
                info!(store = %self.name, path = %path, "Server stopping, registration loop exits");
                return;
            }
        }
    }

    async fn update_node(&self, path: &str, state: RegistrationState, round: u64) -> RegistrationState {
        let current = self
            .entries
            .read()
            .await
            .get(path)
            .map(|e| (e.record.payload.clone(), e.refresh_only));
        let Some((payload, refresh_only)) = current else {
            return state;
        };

        let ttl = self.settings.ttl;
        let (op, result) = match state {
            RegistrationState::NotCreated => {
                warn!(store = %self.name, path = %path, round = round, payload = %payload, "Create registration node");
                ("create", self.store.set(path, &payload, Some(ttl)).await.map(|_| ()))
            }
            RegistrationState::Created if refresh_only => ("refresh", self.store.refresh(path, ttl).await),
            RegistrationState::Created => (
                "rewrite",
                self.store.set(path, &payload, Some(ttl)).await.map(|_| ()),
            ),
        };

        metrics::record_registration_write(&self.name, op, result.is_ok());

        match result {
            Ok(()) => RegistrationState::Created,
            Err(e) => {
                warn!(
                    store = %self.name,
                    path = %path,
                    round = round,
                    op = op,
                    error = %e,
                    "Registration write failed, node will be recreated"
                );
                RegistrationState::NotCreated
            }
        }
    }

    async fn delete_node(&self, path: &str) {
        match self.store.delete(path, true).await {
            Ok(()) => info!(store = %self.name, path = %path, "Registration deleted"),
            Err(StoreError::NotFound { .. }) => {
                debug!(store = %self.name, path = %path, "Registration already gone")
            }
            Err(e) => warn!(store = %self.name, path = %path, error = %e, "Failed to delete registration"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
