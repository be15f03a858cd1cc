//! Cross-datacenter registration replication
//!
//! One independent [`Registrar`] per configured remote region. A fanned-out
//! registration runs the same create/refresh lifecycle in every region with
//! no coupling between them or with the primary store.

use futures::future::{join_all, try_join_all};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::RegionConfig;
use crate::error::Result;
use crate::registry::{RegistrationRecord, RegistrationSettings, Registrar};
use crate::store::{EtcdV2Store, SharedStore, StoreResult};

/// One remote region's registration state
#[derive(Clone)]
pub struct RegionReplica {
    pub region_id: i32,
    pub registrar: Registrar,
}

/// Mirrors registrations into every configured region
#[derive(Clone, Default)]
pub struct CrossDcReplicator {
    regions: Vec<RegionReplica>,
}

impl CrossDcReplicator {
    pub fn new(stores: Vec<(i32, SharedStore)>, settings: RegistrationSettings) -> Self {
        let regions = stores
            .into_iter()
            .map(|(region_id, store)| RegionReplica {
                region_id,
                registrar: Registrar::new(format!("region-{region_id}"), store, settings.clone()),
            })
            .collect();
        Self { regions }
    }

    /// Open an etcd client per region; any failure fails the whole set
    pub async fn connect(
        regions: &[RegionConfig],
        settings: RegistrationSettings,
        timeout: Duration,
    ) -> StoreResult<Self> {
        let stores = try_join_all(regions.iter().map(|region| async move {
            let store = EtcdV2Store::connect(&region.endpoints, timeout).await?;
            info!(region = region.region_id, "Cross-DC store connected");
            let store: SharedStore = Arc::new(store);
            Ok::<_, crate::store::StoreError>((region.region_id, store))
        }))
        .await?;

        Ok(Self::new(stores, settings))
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn region_ids(&self) -> Vec<i32> {
        self.regions.iter().map(|r| r.region_id).collect()
    }

    pub fn regions(&self) -> &[RegionReplica] {
        &self.regions
    }

    /// Register the same path and payload in every region
    pub async fn register(&self, record: &RegistrationRecord, refresh_only: bool) -> Result<()> {
        for region in &self.regions {
            region.registrar.register(record.clone(), refresh_only).await?;
        }
        Ok(())
    }

    /// Path -> payload recorded for one region
    pub async fn snapshot(&self, region_id: i32) -> Option<HashMap<String, String>> {
        match self.regions.iter().find(|r| r.region_id == region_id) {
            Some(region) => Some(region.registrar.snapshot().await),
            None => None,
        }
    }

    /// Region id -> recorded paths and payloads
    pub async fn snapshots(&self) -> HashMap<i32, HashMap<String, String>> {
        let mut all = HashMap::new();
        for region in &self.regions {
            all.insert(region.region_id, region.registrar.snapshot().await);
        }
        all
    }

    pub fn begin_stop(&self) {
        for region in &self.regions {
            region.registrar.begin_stop();
        }
    }

    /// Drain every region concurrently, each with its own grace delay
    pub async fn drain(&self) {
        join_all(self.regions.iter().map(|r| r.registrar.drain())).await;
    }
}
