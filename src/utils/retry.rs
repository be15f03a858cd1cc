//! Retry utilities for startup-time store operations
//!
//! Bounded attempts with exponential backoff. Only the synchronous startup
//! path (instance id claim) retries through here; steady-state loops retry on
//! their own tick instead.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first
    pub max_attempts: u32,

    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff (default: 2.0)
    pub backoff_multiplier: f64,

    /// Upper bound of the random delay added to each retry
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter_ms: 100,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom attempt count
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Create a retry configuration with custom delays
    pub fn with_delays(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            backoff_multiplier: 2.0,
            jitter_ms: 0,
        }
    }

    /// Delay before the given attempt (0-based); the first attempt never waits
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = if attempt == 0 {
            0
        } else {
            let exponential =
                self.base_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);
            (exponential as u64).min(self.max_delay_ms)
        };

        Duration::from_millis(delay_ms)
    }

    fn jitter(&self) -> Duration {
        if self.jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter_ms))
    }
}

/// Outcome of an exhausted or aborted retry loop
#[derive(Debug)]
pub struct RetryError<E> {
    /// Attempts actually made
    pub attempts: u32,

    /// Error of the last attempt
    pub last: E,
}

/// Execute an operation with retry logic, retrying only errors accepted by
/// `should_retry`.
///
/// Returns the first success, or the last error once attempts are exhausted
/// or a non-retryable error is seen.
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> Result<T, RetryError<E>>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = config.calculate_delay(attempt) + config.jitter();
            debug!(
                attempt = attempt,
                delay_ms = delay.as_millis(),
                "Retrying operation after delay"
            );
            tokio::time::sleep(delay).await;
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                attempt += 1;
                if !should_retry(&e) {
                    warn!(error = %e, "Non-retryable error encountered");
                    return Err(RetryError { attempts: attempt, last: e });
                }

                warn!(
                    attempt = attempt,
                    max_attempts = max_attempts,
                    error = %e,
                    "Operation failed"
                );

                if attempt >= max_attempts {
                    return Err(RetryError { attempts: attempt, last: e });
                }
            }
        }
    }
}

/// Execute an operation with retry logic, retrying every error
pub async fn with_retry<T, E, F, Fut>(
    config: &RetryConfig,
    operation: F,
) -> Result<T, RetryError<E>>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    with_retry_if(config, operation, |_| true).await
}
