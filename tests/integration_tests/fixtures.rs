//! Test fixtures for integration tests
//!
//! Provides configs, handler maps and runtime helpers backed by
//! `MemoryStore`.

use servbase::config::ServiceConfig;
use servbase::registry::{ServInfo, ServMap};
use servbase::store::{MemoryStore, SharedStore};
use servbase::ServiceRuntime;
use std::sync::Arc;

pub const LOCATION: &str = "groupA/svcB";

/// v2 payload written for [`sample_servs`] with env group `pre`
pub const SAMPLE_V2_PAYLOAD: &str =
    r#"{"servs":{"h1":{"type":"thrift","addr":"10.0.0.1:9000"}},"envGroup":"pre"}"#;

/// Config for one instance identified by `session_key`
pub fn test_config(session_key: &str) -> ServiceConfig {
    ServiceConfig::builder(LOCATION)
        .session_key(session_key)
        .env_group("pre")
        .serv_ip("10.0.0.1")
        .build()
        .expect("test config should be valid")
}

/// One thrift handler
pub fn sample_servs() -> ServMap {
    let mut servs = ServMap::new();
    servs.insert("h1".to_string(), ServInfo::new("thrift", "10.0.0.1:9000"));
    servs
}

/// Runtime on `store` with the given session key
pub async fn runtime_on(store: &Arc<MemoryStore>, session_key: &str) -> ServiceRuntime {
    ServiceRuntime::builder(test_config(session_key))
        .store(store.clone() as SharedStore)
        .build()
        .await
        .expect("runtime should start")
}
