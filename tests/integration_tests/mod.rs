//! Integration tests module
//!
//! End-to-end tests for the servbase runtime against the in-memory store,
//! including:
//! - Registration, refresh and graceful deregistration
//! - Lock exclusion across runtimes
//! - Concurrent instance id claims
//! - Cross-DC fan-out
//! - Store outage and startup failure scenarios

pub mod cross_dc_test;
pub mod error_scenarios;
pub mod fixtures;
pub mod id_test;
pub mod lock_test;
pub mod registration_test;
