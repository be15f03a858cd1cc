//! Instance id claim and id generation tests

use servbase::store::{MemoryStore, SharedStore};
use servbase::ServiceRuntime;
use std::collections::HashSet;
use std::sync::Arc;

use super::fixtures::{runtime_on, test_config};

#[tokio::test(start_paused = true)]
async fn test_concurrent_startups_get_unique_ids() {
    let store = Arc::new(MemoryStore::new());

    let builds = (0..6).map(|i| {
        let mut config = test_config(&format!("10.0.0.{i}"));
        config.id.claim_retries = 10;
        ServiceRuntime::builder(config)
            .store(store.clone() as SharedStore)
            .build()
    });
    let runtimes = futures::future::join_all(builds).await;

    let ids: Vec<u32> = runtimes.iter().map(|r| r.as_ref().unwrap().servid()).collect();
    let unique: HashSet<u32> = ids.iter().copied().collect();
    assert_eq!(unique.len(), ids.len());
}

#[tokio::test(start_paused = true)]
async fn test_restart_with_same_session_key_keeps_id() {
    let store = Arc::new(MemoryStore::new());

    let first = runtime_on(&store, "10.0.0.1").await;
    let _second = runtime_on(&store, "10.0.0.2").await;
    first.stop().await;

    let restarted = runtime_on(&store, "10.0.0.1").await;
    assert_eq!(restarted.servid(), first.servid());
    assert_eq!(restarted.copyname(), "groupA/svcB0");
}

#[tokio::test(start_paused = true)]
async fn test_ids_differ_between_instances() {
    let store = Arc::new(MemoryStore::new());
    let a = runtime_on(&store, "10.0.0.1").await;
    let b = runtime_on(&store, "10.0.0.2").await;

    let ids_a: HashSet<i64> = (0..1_000).map(|_| a.next_id()).collect();
    let ids_b: HashSet<i64> = (0..1_000).map(|_| b.next_id()).collect();
    assert_eq!(ids_a.len(), 1_000);
    assert!(ids_a.is_disjoint(&ids_b));

    let slow_a = a.next_slow_id("orders");
    let slow_b = b.next_slow_id("orders");
    assert_ne!(slow_a, slow_b);
    assert!(slow_a < (1i64 << 53));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_restarts_without_session_key_reuse_id() {
    let store = Arc::new(MemoryStore::new());
    let mut config = test_config("unused");
    config.session_key = None;

    let mut ids = HashSet::new();
    for _ in 0..1_100 {
        let runtime = ServiceRuntime::builder(config.clone())
            .store(store.clone() as SharedStore)
            .build()
            .await
            .expect("restart should reuse the claimed id");
        ids.insert(runtime.servid());
    }
    assert_eq!(ids.len(), 1);
}
