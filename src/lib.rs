//! servbase - service coordination on an etcd-like store
//!
//! Lets a fleet of service instances announce themselves, stay discoverable
//! while alive, disappear cleanly on shutdown, take distributed locks, and
//! obtain cluster-unique ids.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`store`] - Coordination store trait, etcd v2 client and in-memory store
//! - [`registry`] - Registration lifecycle (create/refresh/drain)
//! - [`lock`] - Distributed locks kept alive by heartbeats
//! - [`idgen`] - Instance id claim and id generators
//! - [`replica`] - Cross-datacenter registration replication
//! - [`runtime`] - Facade tying the above together and sequencing shutdown
//! - [`config`] - Configuration management and settings
//! - [`paths`] - Store key layout
//! - [`metrics`] - Prometheus counters
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use servbase::config::ServiceConfig;
//! use servbase::registry::{ServInfo, ServMap};
//! use servbase::runtime::ServiceRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServiceConfig::from_env()?;
//!     let runtime = ServiceRuntime::builder(config).build().await?;
//!
//!     let mut servs = ServMap::new();
//!     servs.insert("h1".into(), ServInfo::new("thrift", "10.0.0.1:9000"));
//!     runtime.register_service(&servs).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     runtime.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod idgen;
pub mod lock;
pub mod metrics;
pub mod paths;
pub mod registry;
pub mod replica;
pub mod runtime;
pub mod store;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::ServiceConfig;
    pub use crate::error::{Error, ErrorCategory, Result, ServbaseErrorTrait};
    pub use crate::idgen::IdGenerator;
    pub use crate::lock::{LockAcquire, LockHandle, LockScope};
    pub use crate::registry::{RegistrationKind, ServInfo, ServMap};
    pub use crate::runtime::ServiceRuntime;
    pub use crate::store::{CoordinationStore, EtcdV2Store, MemoryStore, SharedStore};
}

// Direct re-exports for convenience
pub use runtime::{ServiceRuntime, ServiceRuntimeBuilder};
