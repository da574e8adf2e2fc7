//! Conflict retry with exponential backoff and jitter.
//!
//! Status writes race with other writers of the same HelmRelease. A write
//! that loses the race fails with a conflict; the caller re-reads the record
//! and tries again. Errors other than conflicts are returned immediately.

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::config::schema::StatusRetryConfig;
use crate::error::Error;

/// Backoff policy for optimistic-concurrency retries.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    /// Multiplier applied to the delay after every failed attempt
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    /// Same policy as an empty `statusRetry` config section.
    fn default() -> Self {
        Self::from(&StatusRetryConfig::default())
    }
}

impl RetryConfig {
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            ..Default::default()
        }
    }
}

impl From<&StatusRetryConfig> for RetryConfig {
    fn from(cfg: &StatusRetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            backoff_multiplier: cfg.backoff_multiplier,
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-conflict error, or
/// `config.max_attempts` conflicts have been seen.
///
/// The closure is handed the zero-based attempt number so that it can tell a
/// first try (which may use a cached object) from a retry (which must re-read).
pub async fn retry_on_conflict<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        match operation(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_conflict() => {
                attempt += 1;
                if attempt >= config.max_attempts.max(1) {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Conflict retries exhausted"
                    );
                    return Err(e);
                }

                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    delay_ms = jittered_delay.as_millis(),
                    "Write conflict, retrying with a fresh copy"
                );

                tokio::time::sleep(jittered_delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
            Err(e) => return Err(e),
        }
    }
}
