//! Cross-DC replication tests

use servbase::registry::RegistrationKind;
use servbase::store::{MemoryStore, SharedStore};
use servbase::ServiceRuntime;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use super::fixtures::{sample_servs, test_config, SAMPLE_V2_PAYLOAD};

const V2_PATH: &str = "/roc/dist2/groupA/svcB/0/serve";

#[tokio::test(start_paused = true)]
async fn test_cross_dc_fan_out_only_to_regions() {
    let primary = Arc::new(MemoryStore::new());
    let east = Arc::new(MemoryStore::new());
    let west = Arc::new(MemoryStore::new());

    let runtime = ServiceRuntime::builder(test_config("10.0.0.1"))
        .store(primary.clone() as SharedStore)
        .region_store(3, east.clone() as SharedStore)
        .region_store(5, west.clone() as SharedStore)
        .build()
        .await
        .unwrap();

    runtime
        .register_service_v2(&sample_servs(), RegistrationKind::Server, true)
        .await
        .unwrap();
    sleep(Duration::from_secs(65)).await;

    assert_eq!(east.value_of(V2_PATH).as_deref(), Some(SAMPLE_V2_PAYLOAD));
    assert_eq!(west.value_of(V2_PATH).as_deref(), Some(SAMPLE_V2_PAYLOAD));
    assert!(!primary.contains_key(V2_PATH));

    let infos = runtime.cross_dc_reg_infos().await;
    assert_eq!(infos.len(), 2);
    assert!(infos[&3].contains_key(V2_PATH));
    assert!(runtime.reg_infos().await.is_empty());

    runtime.stop().await;
    assert!(!east.contains_key(V2_PATH));
    assert!(!west.contains_key(V2_PATH));
}

#[tokio::test(start_paused = true)]
async fn test_region_outage_does_not_affect_primary() {
    let primary = Arc::new(MemoryStore::new());
    let east = Arc::new(MemoryStore::new());

    let runtime = ServiceRuntime::builder(test_config("10.0.0.1"))
        .store(primary.clone() as SharedStore)
        .region_store(3, east.clone() as SharedStore)
        .build()
        .await
        .unwrap();

    east.set_available(false);
    runtime.register_service(&sample_servs()).await.unwrap();
    runtime
        .register_service_v2(&sample_servs(), RegistrationKind::Server, true)
        .await
        .unwrap();
    sleep(Duration::from_secs(30)).await;
    assert!(primary.contains_key(V2_PATH));
    assert!(!east.contains_key(V2_PATH));

    east.set_available(true);
    sleep(Duration::from_secs(20)).await;
    assert!(east.contains_key(V2_PATH));
}

#[tokio::test(start_paused = true)]
async fn test_stop_drains_primary_before_regions() {
    let primary = Arc::new(MemoryStore::new());
    let east = Arc::new(MemoryStore::new());
    let west = Arc::new(MemoryStore::new());

    let calls = Arc::new(AtomicUsize::new(0));
    let all_gone = Arc::new(AtomicBool::new(false));
    let (hook_calls, hook_gone) = (Arc::clone(&calls), Arc::clone(&all_gone));
    let (hook_primary, hook_east, hook_west) =
        (Arc::clone(&primary), Arc::clone(&east), Arc::clone(&west));

    let runtime = ServiceRuntime::builder(test_config("10.0.0.1"))
        .store(primary.clone() as SharedStore)
        .region_store(3, east.clone() as SharedStore)
        .region_store(5, west.clone() as SharedStore)
        .on_shutdown(move || {
            hook_calls.fetch_add(1, Ordering::SeqCst);
            let gone = !hook_primary.contains_key(V2_PATH)
                && !hook_east.contains_key(V2_PATH)
                && !hook_west.contains_key(V2_PATH);
            hook_gone.store(gone, Ordering::SeqCst);
        })
        .build()
        .await
        .unwrap();

    runtime.register_service(&sample_servs()).await.unwrap();
    runtime
        .register_service_v2(&sample_servs(), RegistrationKind::Server, true)
        .await
        .unwrap();
    sleep(Duration::from_secs(25)).await;
    assert!(primary.contains_key(V2_PATH));
    assert!(east.contains_key(V2_PATH));
    assert!(west.contains_key(V2_PATH));

    // sample the stores after the primary grace delay, while regions still wait theirs
    let started = Instant::now();
    let during = async {
        sleep(Duration::from_millis(2_100)).await;
        (
            primary.contains_key(V2_PATH),
            east.contains_key(V2_PATH),
            west.contains_key(V2_PATH),
            calls.load(Ordering::SeqCst),
        )
    };
    let ((), (primary_left, east_left, west_left, calls_during)) =
        tokio::join!(runtime.stop(), during);

    assert!(!primary_left);
    assert!(east_left && west_left);
    assert_eq!(calls_during, 0);

    assert!(started.elapsed() >= Duration::from_secs(4));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(all_gone.load(Ordering::SeqCst));

    runtime.stop().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
