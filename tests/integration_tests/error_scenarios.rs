//! Error scenario tests
//!
//! Tests startup-fatal failures and recovery from store outages.

use servbase::error::{Error, ErrorCategory, ServbaseErrorTrait};
use servbase::idgen::IdError;
use servbase::lock::LockScope;
use servbase::store::{CoordinationStore, MemoryStore, SharedStore, StoreError};
use servbase::ServiceRuntime;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use super::fixtures::{runtime_on, sample_servs, test_config};

// ============================================================================
// Startup Failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_claim_exhaustion_aborts_startup() {
    let store = Arc::new(MemoryStore::new());
    store.set_available(false);

    let result = ServiceRuntime::builder(test_config("10.0.0.1"))
        .store(store.clone() as SharedStore)
        .build()
        .await;

    let err = result.err().expect("startup should fail");
    assert!(matches!(
        err,
        Error::Id(IdError::ClaimExhausted { attempts: 3, .. })
    ));
    assert_eq!(err.category(), ErrorCategory::Startup);
}

#[tokio::test(start_paused = true)]
async fn test_worker_id_overflow_aborts_startup() {
    let store = Arc::new(MemoryStore::new());
    let mut config = test_config("10.0.0.1");
    config.id.sid_offset = 1024;

    let result = ServiceRuntime::builder(config)
        .store(store.clone() as SharedStore)
        .build()
        .await;
    assert!(matches!(
        result,
        Err(Error::Id(IdError::WorkerIdOutOfRange { .. }))
    ));
}

#[tokio::test]
async fn test_unreachable_region_aborts_startup() {
    let store = Arc::new(MemoryStore::new());
    let mut config = test_config("10.0.0.1");
    config.etcd.request_timeout_secs = 1;
    config.regions.push(servbase::config::RegionConfig {
        region_id: 3,
        endpoints: vec!["http://127.0.0.1:1".to_string()],
    });

    let result = ServiceRuntime::builder(config)
        .store(store.clone() as SharedStore)
        .build()
        .await;

    let err = result.err().expect("startup should fail");
    assert!(matches!(err, Error::Startup(_)));
    assert_eq!(err.category(), ErrorCategory::Startup);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_timing_rejected() {
    let store = Arc::new(MemoryStore::new());
    let mut config = test_config("10.0.0.1");
    config.registration.refresh_interval_secs = 30;

    let result = ServiceRuntime::builder(config)
        .store(store.clone() as SharedStore)
        .build()
        .await;
    assert!(matches!(result, Err(Error::Config(_))));
}

// ============================================================================
// Runtime Outages
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_outage_longer_than_ttl_recovers() {
    let store = Arc::new(MemoryStore::new());
    let runtime = runtime_on(&store, "10.0.0.1").await;
    let path = "/roc/dist2/groupA/svcB/0/serve";

    runtime.register_service(&sample_servs()).await.unwrap();
    sleep(Duration::from_secs(1)).await;

    store.set_available(false);
    sleep(Duration::from_secs(90)).await;
    store.set_available(true);
    assert!(!store.contains_key(path));

    sleep(Duration::from_secs(20)).await;
    assert!(store.contains_key(path));
}

#[tokio::test(start_paused = true)]
async fn test_lock_during_outage_is_store_error() {
    let store = Arc::new(MemoryStore::new());
    let runtime = runtime_on(&store, "10.0.0.1").await;

    store.set_available(false);
    let err = runtime.lock("jobX", LockScope::Global).await.unwrap_err();
    assert!(matches!(err, Error::Store(StoreError::Unavailable(_))));
    assert!(err.is_recoverable());

    store.set_available(true);
    assert!(runtime.lock("jobX", LockScope::Global).await.unwrap().is_acquired());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_manual_node() {
    let store = Arc::new(MemoryStore::new());
    let runtime = runtime_on(&store, "10.0.0.1").await;
    store
        .set("/roc/dist2/groupA/svcB/0/manual", "not json", None)
        .await
        .unwrap();

    let err = runtime.set_group_and_disable("blue", true).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Serialization);
}
