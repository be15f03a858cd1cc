//! Cluster-unique id assignment
//!
//! - [`claim_service_id`] claims the small instance id at startup
//! - [`Snowflake`] produces continuous time-ordered ids seeded by that id
//! - [`SlowId`] produces lower-rate ids that fit in 53 bits, one generator
//!   per caller-chosen namespace

pub mod claim;
pub mod slowid;
pub mod snowflake;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::store::StoreError;

pub use claim::claim_service_id;
pub use slowid::SlowId;
pub use snowflake::{Snowflake, MAX_WORKER_ID};

/// Errors from instance id claim and generator setup
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    /// Every claim attempt failed; startup must abort
    #[error("failed to claim service id at {path} after {attempts} attempts: {last_error}")]
    ClaimExhausted {
        path: String,
        attempts: u32,
        last_error: String,
    },

    /// Claimed id plus offset does not fit the worker field
    #[error("worker id {worker_id} exceeds maximum {max}")]
    WorkerIdOutOfRange { worker_id: u64, max: u32 },

    /// Counter node holds something other than a session table
    #[error("malformed id counter at {path}: {reason}")]
    MalformedCounter { path: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IdError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_recoverable(),
            _ => false,
        }
    }
}

/// Continuous and per-namespace id generation for one instance
#[derive(Debug)]
pub struct IdGenerator {
    worker_id: u32,
    snowflake: Snowflake,
    slow: Mutex<HashMap<String, Arc<SlowId>>>,
}

impl IdGenerator {
    pub fn new(worker_id: u32) -> Result<Self, IdError> {
        let snowflake = Snowflake::new(worker_id)?;
        Ok(Self {
            worker_id,
            snowflake,
            slow: Mutex::new(HashMap::new()),
        })
    }

    /// Worker id = claimed service id + configured offset
    pub fn from_claim(service_id: u32, offset: u32) -> Result<Self, IdError> {
        let worker_id = u64::from(service_id) + u64::from(offset);
        let worker_id = u32::try_from(worker_id)
            .ok()
            .filter(|w| *w <= MAX_WORKER_ID)
            .ok_or(IdError::WorkerIdOutOfRange {
                worker_id,
                max: MAX_WORKER_ID,
            })?;
        Self::new(worker_id)
    }

    pub fn worker_id(&self) -> u32 {
        self.worker_id
    }

    pub fn next_id(&self) -> i64 {
        self.snowflake.next_id()
    }

    /// Next id from the namespace's generator, created on first use
    pub fn next_slow_id(&self, namespace: &str) -> i64 {
        let generator = {
            let mut slow = self.slow.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                slow.entry(namespace.to_string())
                    .or_insert_with(|| Arc::new(SlowId::new(self.worker_id))),
            )
        };
        generator.next_id()
    }

    /// Namespaces with a live generator
    pub fn namespaces(&self) -> Vec<String> {
        let slow = self.slow.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = slow.keys().cloned().collect();
        names.sort();
        names
    }
}
