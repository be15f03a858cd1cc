//! Prometheus metrics for servbase
//!
//! This module provides metrics tracking for:
//! - Registration: create/refresh writes per store and their outcome
//! - Locks: acquisitions per scope, heartbeat renewals
//! - Instance ids: claim attempts
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{register_counter_vec, CounterVec, Encoder, TextEncoder};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

struct ServbaseMetrics {
    registration_writes: CounterVec,
    lock_acquisitions: CounterVec,
    lock_heartbeats: CounterVec,
    id_claims: CounterVec,
}

static METRICS: OnceLock<ServbaseMetrics> = OnceLock::new();

static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = ServbaseMetrics {
        registration_writes: register_counter_vec!(
            "servbase_registration_writes_total",
            "Registration node writes by store, operation and outcome",
            &["store", "op", "outcome"]
        )?,
        lock_acquisitions: register_counter_vec!(
            "servbase_lock_acquisitions_total",
            "Lock acquisition attempts by scope and outcome",
            &["scope", "outcome"]
        )?,
        lock_heartbeats: register_counter_vec!(
            "servbase_lock_heartbeats_total",
            "Lock TTL renewals by outcome",
            &["outcome"]
        )?,
        id_claims: register_counter_vec!(
            "servbase_id_claims_total",
            "Instance id claim attempts by outcome",
            &["outcome"]
        )?,
    };

    METRICS
        .set(metrics)
        .map_err(|_| "Servbase metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

fn outcome(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "error"
    }
}

/// Record a registration write (`create`, `refresh` or `rewrite`)
pub fn record_registration_write(store: &str, op: &str, ok: bool) {
    if let Some(m) = METRICS.get() {
        m.registration_writes
            .with_label_values(&[store, op, outcome(ok)])
            .inc();
    }
}

/// Record a lock acquisition attempt; `outcome` is `acquired`, `held` or `error`
pub fn record_lock_acquisition(scope: &str, outcome: &str) {
    if let Some(m) = METRICS.get() {
        m.lock_acquisitions.with_label_values(&[scope, outcome]).inc();
    }
}

/// Record a lock heartbeat renewal
pub fn record_lock_heartbeat(ok: bool) {
    if let Some(m) = METRICS.get() {
        m.lock_heartbeats.with_label_values(&[outcome(ok)]).inc();
    }
}

/// Record an instance id claim attempt; `outcome` is `claimed`, `conflict` or `error`
pub fn record_id_claim(outcome: &str) {
    if let Some(m) = METRICS.get() {
        m.id_claims.with_label_values(&[outcome]).inc();
    }
}
