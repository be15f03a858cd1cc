//! Service runtime facade
//!
//! [`ServiceRuntime`] is built once at process start. Building claims the
//! instance id (blocking, retried, fatal on failure), opens the primary and
//! cross-DC stores, and derives the id generators. Afterwards every
//! registration, lock and id call goes through it.
//!
//! Shutdown runs strictly in this order:
//!
//! ```text
//! stop flag ─▶ release locks ─▶ drain primary ─▶ drain regions ─▶ shutdown hook
//! ```

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

use crate::config::{merge_tiers, ServiceConfig};
use crate::error::{Error, Result};
use crate::idgen::{claim_service_id, IdGenerator};
use crate::lock::{LockAcquire, LockHandle, LockManager, LockScope};
use crate::paths::PathLayout;
use crate::registry::{
    ManualData, RegData, RegistrationKind, RegistrationRecord, RegistrationSettings, Registrar,
    ServCtrl, ServMap,
};
use crate::replica::CrossDcReplicator;
use crate::store::{EtcdV2Store, SharedStore};
use crate::utils::{outbound_ip, split_location};

/// Callback run once, after every registration is deleted
pub type ShutdownHook = Box<dyn FnOnce() + Send>;

const PRE_ENV_GROUP: &str = "pre";
const FALLBACK_IP: &str = "127.0.0.1";

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`ServiceRuntime`]
pub struct ServiceRuntimeBuilder {
    config: ServiceConfig,
    store: Option<SharedStore>,
    region_stores: Vec<(i32, SharedStore)>,
    on_shutdown: Option<ShutdownHook>,
}

impl ServiceRuntimeBuilder {
    /// Use this store instead of connecting to `config.etcd.endpoints`
    pub fn store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Use these stores for cross-DC replication instead of `config.regions`
    pub fn region_store(mut self, region_id: i32, store: SharedStore) -> Self {
        self.region_stores.push((region_id, store));
        self
    }

    pub fn on_shutdown(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_shutdown = Some(Box::new(hook));
        self
    }

    /// Validate config, open stores, claim the instance id.
    ///
    /// Every error returned here is meant to abort process startup.
    pub async fn build(self) -> Result<ServiceRuntime> {
        let config = self.config;
        config.validate()?;

        let layout = PathLayout::new(&config.etcd.base_path);
        let settings = RegistrationSettings::from_config(&config);

        let store = match self.store {
            Some(store) => store,
            None => {
                let etcd = EtcdV2Store::connect(&config.etcd.endpoints, config.request_timeout())
                    .await
                    .map_err(|e| Error::startup(format!("primary store: {e}")))?;
                Arc::new(etcd) as SharedStore
            }
        };

        let serv_ip = match &config.serv_ip {
            Some(ip) => ip.clone(),
            None => match outbound_ip() {
                Ok(ip) => ip.to_string(),
                Err(e) => {
                    warn!(error = %e, fallback = FALLBACK_IP, "Could not detect service ip");
                    FALLBACK_IP.to_string()
                }
            },
        };

        // the ip is stable across restarts, so an unset key keeps its id
        let session_key = config
            .session_key
            .clone()
            .unwrap_or_else(|| serv_ip.clone());

        let serv_id = claim_service_id(
            store.as_ref(),
            &layout.skey(&config.location),
            &session_key,
            config.id.claim_retries,
        )
        .await?;
        let ids = IdGenerator::from_claim(serv_id, config.id.sid_offset)?;

        let replicator = if !self.region_stores.is_empty() {
            CrossDcReplicator::new(self.region_stores, settings.clone())
        } else {
            CrossDcReplicator::connect(&config.regions, settings.clone(), config.request_timeout())
                .await
                .map_err(|e| Error::startup(format!("cross-DC store: {e}")))?
        };

        let (serv_group, serv_name) = match split_location(&config.location) {
            Some((group, name)) => (group.to_string(), name.to_string()),
            None => {
                warn!(location = %config.location, "Location is not in group/service form");
                (String::new(), String::new())
            }
        };

        let registrar = Registrar::new("primary", Arc::clone(&store), settings);
        let locks = LockManager::new(
            Arc::clone(&store),
            layout.clone(),
            config.location.clone(),
            format!("{}{}@{}", config.location, serv_id, serv_ip),
            config.lock_ttl(),
            config.lock_heartbeat_interval(),
        );

        let on_shutdown: ShutdownHook = match self.on_shutdown {
            Some(hook) => hook,
            None => Box::new(|| info!("App shutdown")),
        };

        info!(
            location = %config.location,
            serv_id = serv_id,
            worker_id = ids.worker_id(),
            serv_ip = %serv_ip,
            regions = ?replicator.region_ids(),
            "Service runtime started"
        );

        Ok(ServiceRuntime {
            config,
            layout,
            store,
            registrar,
            replicator,
            locks,
            ids: Arc::new(ids),
            serv_id,
            serv_ip,
            serv_group,
            serv_name,
            session_key,
            on_shutdown: Mutex::new(Some(on_shutdown)),
            stopped: AtomicBool::new(false),
        })
    }
}

// ============================================================================
// Runtime
// ============================================================================

/// Registration, locks and ids for one running service instance
pub struct ServiceRuntime {
    config: ServiceConfig,
    layout: PathLayout,
    store: SharedStore,
    registrar: Registrar,
    replicator: CrossDcReplicator,
    locks: LockManager,
    ids: Arc<IdGenerator>,
    serv_id: u32,
    serv_ip: String,
    serv_group: String,
    serv_name: String,
    session_key: String,
    on_shutdown: Mutex<Option<ShutdownHook>>,
    stopped: AtomicBool,
}

impl ServiceRuntime {
    pub fn builder(config: ServiceConfig) -> ServiceRuntimeBuilder {
        ServiceRuntimeBuilder {
            config,
            store: None,
            region_stores: Vec::new(),
            on_shutdown: None,
        }
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    /// v2 `serve` registration followed by the legacy v1 one
    pub async fn register_service(&self, servs: &ServMap) -> Result<()> {
        self.register_service_v2(servs, RegistrationKind::Server, false)
            .await?;
        self.register_service_v1(servs, false).await
    }

    /// Register under `dist2/<location>/<id>/<kind>`.
    ///
    /// With `cross_dc` the registration goes to every configured region and
    /// not to the primary store.
    pub async fn register_service_v2(
        &self,
        servs: &ServMap,
        kind: RegistrationKind,
        cross_dc: bool,
    ) -> Result<()> {
        let payload = serde_json::to_string(&RegData::new(servs.clone(), self.env_group()))?;
        let path = self.layout.dist_v2(&self.config.location, self.serv_id, kind);
        let record = RegistrationRecord::new(path, payload, kind);

        if cross_dc {
            self.replicator.register(&record, true).await
        } else {
            self.registrar.register(record, true).await
        }
    }

    /// Legacy registration: the bare handler map under `dist/<location>/<id>`
    pub async fn register_service_v1(&self, servs: &ServMap, cross_dc: bool) -> Result<()> {
        let payload = serde_json::to_string(servs)?;
        let path = self.layout.dist_v1(&self.config.location, self.serv_id);
        let record = RegistrationRecord::new(path, payload, RegistrationKind::Server);

        if cross_dc {
            self.replicator.register(&record, true).await
        } else {
            self.registrar.register(record, true).await
        }
    }

    pub async fn register_backdoor(&self, servs: &ServMap) -> Result<()> {
        self.register_service_v2(servs, RegistrationKind::Backdoor, false)
            .await
    }

    pub async fn register_metrics(&self, servs: &ServMap) -> Result<()> {
        self.register_service_v2(servs, RegistrationKind::Metrics, false)
            .await
    }

    /// Add this instance to `group` and set its disable flag in the
    /// operator override node. The node carries no TTL.
    pub async fn set_group_and_disable(&self, group: &str, disable: bool) -> Result<ServCtrl> {
        if self.is_stopped() {
            return Err(Error::Stopped);
        }

        let path = self.layout.dist_v2(
            &self.config.location,
            self.serv_id,
            RegistrationKind::ManualControl,
        );

        let raw = self
            .store
            .get(&path)
            .await?
            .map(|node| node.value)
            .unwrap_or_default();
        let mut manual = ManualData::parse(&raw)?;
        manual.apply_group_and_disable(group, disable);

        self.store
            .set(&path, &serde_json::to_string(&manual)?, None)
            .await?;
        info!(path = %path, group = %group, disable = disable, "Manual control updated");

        Ok(manual.ctrl.unwrap_or_default())
    }

    // ------------------------------------------------------------------------
    // Configuration collaborators
    // ------------------------------------------------------------------------

    /// `etc/global` overlaid with `etc/<location>`, deserialized into `T`
    pub async fn service_config<T: DeserializeOwned>(&self) -> Result<T> {
        let paths = [
            self.layout.etc_global(),
            self.layout.etc_service(&self.config.location),
        ];

        let mut tiers = Vec::with_capacity(paths.len());
        for path in &paths {
            match self.store.get(path).await? {
                Some(node) => tiers.push(node.value),
                None => warn!(path = %path, "Config tier missing, skipped"),
            }
        }

        let merged = merge_tiers(tiers.iter().map(String::as_str))?;
        Ok(serde_json::from_value(merged)?)
    }

    /// Raw db routing blob, if one is published
    pub async fn db_route(&self) -> Result<Option<serde_json::Value>> {
        match self.store.get(&self.layout.db_route()).await? {
            Some(node) => Ok(Some(serde_json::from_str(&node.value)?)),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------------
    // Locks and ids
    // ------------------------------------------------------------------------

    pub async fn lock(&self, name: &str, scope: LockScope) -> Result<LockAcquire> {
        self.locks.acquire(name, scope).await
    }

    pub async fn unlock(&self, handle: LockHandle) {
        self.locks.release(handle).await
    }

    pub fn next_id(&self) -> i64 {
        self.ids.next_id()
    }

    pub fn next_slow_id(&self, namespace: &str) -> i64 {
        self.ids.next_slow_id(namespace)
    }

    pub fn id_generator(&self) -> Arc<IdGenerator> {
        Arc::clone(&self.ids)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn servid(&self) -> u32 {
        self.serv_id
    }

    /// `group/service`
    pub fn servname(&self) -> &str {
        &self.config.location
    }

    /// Location plus instance id, e.g. `groupA/svcB7`
    pub fn copyname(&self) -> String {
        format!("{}{}", self.config.location, self.serv_id)
    }

    pub fn serv_group(&self) -> &str {
        &self.serv_group
    }

    pub fn serv_name_only(&self) -> &str {
        &self.serv_name
    }

    pub fn serv_ip(&self) -> &str {
        &self.serv_ip
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn env_group(&self) -> &str {
        &self.config.env_group
    }

    pub fn is_pre_env_group(&self) -> bool {
        self.config.env_group == PRE_ENV_GROUP
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Copy of the primary store's path -> payload registrations
    pub async fn reg_infos(&self) -> HashMap<String, String> {
        self.registrar.snapshot().await
    }

    /// Copy of the per-region registrations
    pub async fn cross_dc_reg_infos(&self) -> HashMap<i32, HashMap<String, String>> {
        self.replicator.snapshots().await
    }

    /// Replace the shutdown hook; ignored once `stop` has run it
    pub fn set_on_shutdown(&self, hook: impl FnOnce() + Send + 'static) {
        let mut slot = self.on_shutdown.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            *slot = Some(Box::new(hook));
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Deregister everything, then run the shutdown hook.
    ///
    /// Only the first call does any work; later calls return at once.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(copyname = %self.copyname(), "Server stopping");

        self.registrar.begin_stop();
        self.replicator.begin_stop();

        self.locks.shutdown().await;
        self.registrar.drain().await;
        self.replicator.drain().await;

        let hook = self
            .on_shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(hook) = hook {
            hook();
        }

        info!(copyname = %self.copyname(), "Server stopped");
    }
}
