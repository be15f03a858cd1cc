//! Registration lifecycle tests
//!
//! Tests the full runtime path:
//! 1. Registration writes and liveness past the TTL
//! 2. Refresh-only maintenance never rewriting the payload
//! 3. Graceful stop: deletion, hook ordering, no writes afterwards

use servbase::registry::{RegistrationKind, ServInfo};
use servbase::store::{CoordinationStore, MemoryStore, SharedStore};
use servbase::ServiceRuntime;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use super::fixtures::{runtime_on, sample_servs, test_config, SAMPLE_V2_PAYLOAD};

const V1_PATH: &str = "/roc/dist/groupA/svcB/0";
const V2_PATH: &str = "/roc/dist2/groupA/svcB/0/serve";
const METRICS_PATH: &str = "/roc/dist2/groupA/svcB/0/metrics";

// ============================================================================
// Registration Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_registration_outlives_ttl() {
    let store = Arc::new(MemoryStore::new());
    let runtime = runtime_on(&store, "10.0.0.1").await;

    runtime.register_service(&sample_servs()).await.unwrap();
    sleep(Duration::from_secs(65)).await;

    assert_eq!(store.value_of(V2_PATH).as_deref(), Some(SAMPLE_V2_PAYLOAD));
    assert!(store.ttl_remaining(V2_PATH).unwrap() > Duration::ZERO);
    assert!(store.contains_key(V1_PATH));

    let infos = runtime.reg_infos().await;
    assert_eq!(infos.get(V2_PATH).map(String::as_str), Some(SAMPLE_V2_PAYLOAD));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_keeps_manual_edit() {
    let store = Arc::new(MemoryStore::new());
    let runtime = runtime_on(&store, "10.0.0.1").await;

    runtime.register_service(&sample_servs()).await.unwrap();
    sleep(Duration::from_secs(1)).await;

    // operator edits the node in place
    store
        .set(V2_PATH, r#"{"servs":{},"envGroup":"edited"}"#, Some(Duration::from_secs(60)))
        .await
        .unwrap();
    sleep(Duration::from_secs(70)).await;

    assert_eq!(
        store.value_of(V2_PATH).as_deref(),
        Some(r#"{"servs":{},"envGroup":"edited"}"#)
    );
}

#[tokio::test(start_paused = true)]
async fn test_reregister_takes_effect_after_node_loss() {
    let store = Arc::new(MemoryStore::new());
    let runtime = runtime_on(&store, "10.0.0.1").await;

    runtime.register_service(&sample_servs()).await.unwrap();
    sleep(Duration::from_secs(1)).await;

    let mut updated = sample_servs();
    updated.insert("h2".to_string(), ServInfo::new("http", "10.0.0.1:8080"));
    runtime
        .register_service_v2(&updated, RegistrationKind::Server, false)
        .await
        .unwrap();

    sleep(Duration::from_secs(30)).await;
    assert_eq!(store.value_of(V2_PATH).as_deref(), Some(SAMPLE_V2_PAYLOAD));

    store.evict(V2_PATH);
    sleep(Duration::from_secs(40)).await;
    assert!(store.value_of(V2_PATH).unwrap().contains("\"h2\""));
}

#[tokio::test(start_paused = true)]
async fn test_backdoor_and_metrics_paths() {
    let store = Arc::new(MemoryStore::new());
    let runtime = runtime_on(&store, "10.0.0.1").await;

    runtime.register_backdoor(&sample_servs()).await.unwrap();
    runtime.register_metrics(&sample_servs()).await.unwrap();
    sleep(Duration::from_secs(1)).await;

    assert!(store.contains_key("/roc/dist2/groupA/svcB/0/backdoor"));
    assert!(store.contains_key(METRICS_PATH));
}

// ============================================================================
// Shutdown Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stop_with_three_paths() {
    let store = Arc::new(MemoryStore::new());
    let hook_calls = Arc::new(AtomicUsize::new(0));
    let deleted_before_hook = Arc::new(AtomicBool::new(false));

    let calls = Arc::clone(&hook_calls);
    let deleted = Arc::clone(&deleted_before_hook);
    let observed = Arc::clone(&store);
    let runtime = ServiceRuntime::builder(test_config("10.0.0.1"))
        .store(store.clone() as SharedStore)
        .on_shutdown(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            let gone = [V1_PATH, V2_PATH, METRICS_PATH]
                .iter()
                .all(|p| !observed.contains_key(p));
            deleted.store(gone, Ordering::SeqCst);
        })
        .build()
        .await
        .unwrap();

    runtime.register_service(&sample_servs()).await.unwrap();
    runtime.register_metrics(&sample_servs()).await.unwrap();
    sleep(Duration::from_secs(30)).await;
    assert_eq!(runtime.reg_infos().await.len(), 3);

    let started = Instant::now();
    runtime.stop().await;
    assert!(started.elapsed() <= Duration::from_millis(2100));

    for path in [V1_PATH, V2_PATH, METRICS_PATH] {
        assert!(!store.contains_key(path), "{path} should be deleted");
    }
    assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    assert!(deleted_before_hook.load(Ordering::SeqCst));

    // no write after stop returns
    let counts: Vec<usize> = [V1_PATH, V2_PATH, METRICS_PATH]
        .iter()
        .map(|p| store.write_count(p))
        .collect();
    sleep(Duration::from_secs(120)).await;
    let after: Vec<usize> = [V1_PATH, V2_PATH, METRICS_PATH]
        .iter()
        .map(|p| store.write_count(p))
        .collect();
    assert_eq!(counts, after);

    runtime.stop().await;
    assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_replacement_hook() {
    let store = Arc::new(MemoryStore::new());
    let runtime = runtime_on(&store, "10.0.0.1").await;

    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    runtime.set_on_shutdown(move || flag.store(true, Ordering::SeqCst));

    runtime.stop().await;
    assert!(ran.load(Ordering::SeqCst));
    assert!(runtime.is_stopped());
}
