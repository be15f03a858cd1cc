//! Distributed lock tests across runtimes sharing one store

use servbase::lock::{LockAcquire, LockScope};
use servbase::store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use super::fixtures::runtime_on;

#[tokio::test(start_paused = true)]
async fn test_global_lock_single_holder() {
    let store = Arc::new(MemoryStore::new());
    let first = runtime_on(&store, "10.0.0.1").await;
    let second = runtime_on(&store, "10.0.0.2").await;

    let (a, b) = tokio::join!(
        first.lock("jobX", LockScope::Global),
        second.lock("jobX", LockScope::Global)
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!([a.is_acquired(), b.is_acquired()].iter().filter(|x| **x).count(), 1);

    match (a, b) {
        (LockAcquire::Acquired(handle), LockAcquire::Held) => first.unlock(handle).await,
        (LockAcquire::Held, LockAcquire::Acquired(handle)) => second.unlock(handle).await,
        _ => panic!("expected exactly one holder"),
    }

    let third = runtime_on(&store, "10.0.0.3").await;
    assert!(third.lock("jobX", LockScope::Global).await.unwrap().is_acquired());
}

#[tokio::test(start_paused = true)]
async fn test_held_lock_survives_many_ttls() {
    let store = Arc::new(MemoryStore::new());
    let holder = runtime_on(&store, "10.0.0.1").await;
    let other = runtime_on(&store, "10.0.0.2").await;

    let handle = holder
        .lock("jobX", LockScope::Local)
        .await
        .unwrap()
        .into_handle()
        .unwrap();
    sleep(Duration::from_secs(300)).await;

    assert!(!handle.is_lost());
    assert!(!other.lock("jobX", LockScope::Local).await.unwrap().is_acquired());
}

#[tokio::test(start_paused = true)]
async fn test_local_and_global_are_distinct() {
    let store = Arc::new(MemoryStore::new());
    let runtime = runtime_on(&store, "10.0.0.1").await;

    let local = runtime.lock("jobX", LockScope::Local).await.unwrap();
    let global = runtime.lock("jobX", LockScope::Global).await.unwrap();
    assert!(local.is_acquired());
    assert!(global.is_acquired());

    assert!(store.contains_key("/roc/lock/local/groupA/svcB/jobX"));
    assert!(store.contains_key("/roc/lock/global/jobX"));
}

#[tokio::test(start_paused = true)]
async fn test_stop_releases_locks() {
    let store = Arc::new(MemoryStore::new());
    let runtime = runtime_on(&store, "10.0.0.1").await;
    let other = runtime_on(&store, "10.0.0.2").await;

    let _handle = runtime.lock("jobX", LockScope::Global).await.unwrap();
    runtime.stop().await;

    assert!(other.lock("jobX", LockScope::Global).await.unwrap().is_acquired());
}
