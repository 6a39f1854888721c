//! Bounded exponential backoff for transient failures.
//!
//! Used by the broker adapter when (re)connecting, by the Redis cache for
//! dropped connections and by the inference client for transport errors.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::constants::retry;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: retry::MAX_ATTEMPTS,
            initial_backoff: retry::INITIAL_BACKOFF,
            max_backoff: retry::MAX_BACKOFF,
            multiplier: retry::BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let delay = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()))
    }
}

/// Final failure of a retried operation.
#[derive(Debug)]
pub struct RetryError<E> {
    /// Attempts made before giving up.
    pub attempts: u32,
    /// Error from the last attempt.
    pub last_error: E,
}

/// Run `operation` until it succeeds, fails permanently, or the policy is exhausted.
///
/// `is_transient` decides whether a failure is worth another attempt; a
/// non-transient failure is returned immediately.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
    is_transient: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(value);
            }
            Err(e) if attempt < max_attempts && is_transient(&e) => {
                let delay = policy.backoff_for(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    operation_name, attempt, max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(RetryError {
                    attempts: attempt,
                    last_error: e,
                });
            }
        }
    }
}
