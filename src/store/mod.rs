//! Coordination store client
//!
//! Thin adapter over an etcd-like, lease-capable key-value store. Every other
//! component talks to the store through [`CoordinationStore`], so the same
//! registration, lock and id-claim logic runs against a real etcd cluster
//! ([`EtcdV2Store`]) or the in-process [`MemoryStore`].
//!
//! # Operations
//!
//! | Operation | etcd v2 equivalent |
//! |---|---|
//! | `get` | `GET /v2/keys/<key>` |
//! | `set` | `PUT value=..&ttl=..` |
//! | `refresh` | `PUT refresh=true&prevExist=true&ttl=..` |
//! | `create` | `PUT prevExist=false` |
//! | `compare_and_swap` | `PUT prevIndex=..` / `prevExist=false` |
//! | `delete` | `DELETE recursive=..` |

pub mod etcd;
pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use etcd::EtcdV2Store;
pub use memory::MemoryStore;

/// Shared handle to a store client
pub type SharedStore = Arc<dyn CoordinationStore>;

/// A node as returned by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Full key of the node
    pub key: String,

    /// Stored value
    pub value: String,

    /// Store revision at which the node was last written
    pub modified_index: u64,
}

/// Errors returned by store clients
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Key does not exist (or has expired)
    #[error("key not found: {key}")]
    NotFound { key: String },

    /// Conditional create lost against an existing node
    #[error("node already exists: {key}")]
    NodeExists { key: String },

    /// Compare-and-swap precondition failed
    #[error("compare failed on {key}: {reason}")]
    CompareFailed { key: String, reason: String },

    /// Store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Request exceeded the client timeout
    #[error("store request timed out")]
    Timeout,

    /// Store answered with an unexpected status
    #[error("store returned status {status}: {message}")]
    Http { status: u16, message: String },

    /// Response body could not be decoded
    #[error("invalid store response: {0}")]
    Decode(String),

    /// Endpoint address could not be parsed
    #[error("invalid store endpoint: {0}")]
    InvalidEndpoint(String),
}

impl StoreError {
    /// Transient errors are retried on the caller's own schedule
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Timeout => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Lost a conditional write race
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::NodeExists { .. } | Self::CompareFailed { .. })
    }

    /// Node is missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Client interface to one logical coordination store endpoint.
///
/// Implementations must be safe for concurrent use by every maintenance,
/// heartbeat and request task in the process.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Read a node; `Ok(None)` when the key does not exist
    async fn get(&self, key: &str) -> StoreResult<Option<Node>>;

    /// Unconditionally write `value`, replacing any previous node
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<Node>;

    /// Extend the TTL of an existing node without touching its value
    async fn refresh(&self, key: &str, ttl: Duration) -> StoreResult<()>;

    /// Create the node only if it does not exist yet
    async fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<Node>;

    /// Write only if the node is still at `prev_index`; `None` requires absence
    async fn compare_and_swap(
        &self,
        key: &str,
        value: &str,
        prev_index: Option<u64>,
        ttl: Option<Duration>,
    ) -> StoreResult<Node>;

    /// Delete a node, or a whole subtree when `recursive` is set
    async fn delete(&self, key: &str, recursive: bool) -> StoreResult<()>;

    /// Delete only if the node is still at `prev_index`
    async fn compare_and_delete(&self, key: &str, prev_index: u64) -> StoreResult<()>;
}
