//! Caller-side retry logic.
//!
//! # Responsibilities
//! - Re-run a failed operation with exponential backoff + jitter
//! - Stop on success, on a non-retryable error, or when attempts run out
//!
//! # Design Decisions
//! - Breakers and workflows never retry on their own; callers opt in here
//! - The retry predicate is the caller's, e.g. skip `BreakerError::CircuitOpen`
//! - Attempt numbers are 1-based and passed to the operation

use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::resilience::backoff::calculate_backoff;

/// How many times to try, and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        calculate_backoff(retry, self.base_delay, self.max_delay)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// Run `operation` until it succeeds or the policy gives up, sleeping the
/// current thread between attempts.
pub fn retry<T, E, F, P>(policy: &RetryPolicy, is_retryable: P, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Result<T, E>,
    P: Fn(&E) -> bool,
    E: fmt::Display,
{
    let mut attempt = 1;
    loop {
        match operation(attempt) {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts && is_retryable(&e) => {
                let delay = policy.delay_for(attempt);
                tracing::info!(attempt, delay = ?delay, error = %e, "Retrying operation");
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => {
                if attempt > 1 {
                    tracing::warn!(attempts = attempt, error = %e, "Giving up after retries");
                }
                return Err(e);
            }
        }
    }
}

/// Async form of [`retry`], waiting with `tokio::time::sleep`.
pub async fn retry_async<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: fmt::Display,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts && is_retryable(&e) => {
                let delay = policy.delay_for(attempt);
                tracing::info!(attempt, delay = ?delay, error = %e, "Retrying operation");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if attempt > 1 {
                    tracing::warn!(attempts = attempt, error = %e, "Giving up after retries");
                }
                return Err(e);
            }
        }
    }
}
