//! Startup claim of the instance id
//!
//! The counter node `skey/<location>` holds a JSON table of session key to
//! claimed id. A claim reads the table, returns the existing id for a known
//! session key, or appends `max + 1` and writes the table back with a
//! compare-and-swap on the node's modified index. A racing writer makes the
//! swap fail and the claim starts over, so two claimants can never both
//! succeed with the same id.

use std::collections::BTreeMap;
use tracing::{info, warn};

use super::IdError;
use crate::metrics;
use crate::store::CoordinationStore;
use crate::utils::retry::{with_retry_if, RetryConfig};

type SessionTable = BTreeMap<String, u32>;

/// Claim an id for `session_key`, making at most `attempts` tries.
///
/// Blocks the caller while retrying; every failure mode other than a
/// malformed counter node is retried.
pub async fn claim_service_id(
    store: &dyn CoordinationStore,
    path: &str,
    session_key: &str,
    attempts: u32,
) -> Result<u32, IdError> {
    let config = RetryConfig::new(attempts);

    let result = with_retry_if(
        &config,
        || try_claim(store, path, session_key),
        |e| matches!(e, IdError::Store(_)),
    )
    .await;

    match result {
        Ok(id) => {
            info!(path = %path, session_key = %session_key, service_id = id, "Service id claimed");
            Ok(id)
        }
        Err(retry) => match retry.last {
            IdError::Store(e) => Err(IdError::ClaimExhausted {
                path: path.to_string(),
                attempts: retry.attempts,
                last_error: e.to_string(),
            }),
            other => Err(other),
        },
    }
}

async fn try_claim(
    store: &dyn CoordinationStore,
    path: &str,
    session_key: &str,
) -> Result<u32, IdError> {
    let (mut table, prev_index) = match store.get(path).await {
        Ok(Some(node)) => (parse_table(path, &node.value)?, Some(node.modified_index)),
        Ok(None) => (SessionTable::new(), None),
        Err(e) => {
            metrics::record_id_claim("error");
            return Err(e.into());
        }
    };

    if let Some(id) = table.get(session_key) {
        metrics::record_id_claim("claimed");
        return Ok(*id);
    }

    let id = table.values().max().map_or(0, |max| max + 1);
    table.insert(session_key.to_string(), id);

    let value = serde_json::to_string(&table).map_err(|e| IdError::MalformedCounter {
        path: path.to_string(),
        reason: e.to_string(),
    })?;

    match store.compare_and_swap(path, &value, prev_index, None).await {
        Ok(_) => {
            metrics::record_id_claim("claimed");
            Ok(id)
        }
        Err(e) => {
            let outcome = if e.is_conflict() { "conflict" } else { "error" };
            metrics::record_id_claim(outcome);
            warn!(path = %path, candidate = id, error = %e, "Service id claim lost");
            Err(e.into())
        }
    }
}

fn parse_table(path: &str, raw: &str) -> Result<SessionTable, IdError> {
    if raw.trim().is_empty() {
        return Ok(SessionTable::new());
    }
    serde_json::from_str(raw).map_err(|e| IdError::MalformedCounter {
        path: path.to_string(),
        reason: e.to_string(),
    })
}
