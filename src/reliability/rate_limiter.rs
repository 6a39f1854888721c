//! Token-bucket rate limiter for inference backend calls.
//!
//! The bucket holds up to `capacity` tokens and refills continuously at
//! `capacity / refill_period` tokens per second. Callers suspend in
//! [`RateLimiter::acquire`] until a token is available or their timeout elapses.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::RateLimitExceeded;

/// Configuration for the token bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterConfig {
    /// Maximum tokens held by the bucket.
    pub capacity: u32,
    /// Time for an empty bucket to refill completely.
    pub refill_period: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: crate::constants::rate_limit::CAPACITY,
            refill_period: crate::constants::rate_limit::REFILL_PERIOD,
        }
    }
}

/// Proof that one token was taken from the bucket.
#[derive(Debug)]
#[must_use = "a permit is spent when acquired; hold it for the guarded call"]
pub struct RatePermit {
    _private: (),
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by all inference calls in one process.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    tokens_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter with a full bucket.
    pub fn new(config: RateLimiterConfig) -> Self {
        let capacity = config.capacity.max(1);
        let period = config.refill_period.max(Duration::from_millis(1));

        Self {
            config: RateLimiterConfig {
                capacity,
                refill_period: period,
            },
            tokens_per_sec: capacity as f64 / period.as_secs_f64(),
            bucket: Mutex::new(Bucket {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// The effective configuration.
    pub fn config(&self) -> RateLimiterConfig {
        self.config
    }

    /// Take a token without waiting.
    pub fn try_acquire(&self) -> Option<RatePermit> {
        self.take_or_wait_time().ok()
    }

    /// Wait up to `timeout` for a token.
    pub async fn acquire(&self, timeout: Duration) -> Result<RatePermit, RateLimitExceeded> {
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            let wait = match self.take_or_wait_time() {
                Ok(permit) => return Ok(permit),
                Err(wait) => wait,
            };

            let now = Instant::now();
            if now >= deadline {
                debug!("Rate limiter exhausted after waiting {:?}", now - started);
                return Err(RateLimitExceeded {
                    waited: now - started,
                });
            }

            // Re-check at the deadline at the latest so the caller is never held past it.
            tokio::time::sleep_until((now + wait).min(deadline)).await;
        }
    }

    /// Tokens currently in the bucket, after refill.
    pub fn available(&self) -> u32 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, Instant::now());
        bucket.tokens.floor() as u32
    }

    /// Take one token, or report how long until one becomes available.
    fn take_or_wait_time(&self) -> Result<RatePermit, Duration> {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, Instant::now());

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(RatePermit { _private: () })
        } else {
            let missing = 1.0 - bucket.tokens;
            let wait = Duration::from_secs_f64(missing / self.tokens_per_sec);
            Err(wait.max(Duration::from_millis(1)))
        }
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        if elapsed.is_zero() {
            return;
        }
        let capacity = self.config.capacity as f64;
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.tokens_per_sec).min(capacity);
        bucket.last_refill = now;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter(capacity: u32, period: Duration) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            capacity,
            refill_period: period,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_acquire_in_window_fails_fast_with_short_timeout() {
        let limiter = limiter(2, Duration::from_secs(1));

        assert!(limiter.acquire(Duration::from_millis(10)).await.is_ok());
        assert!(limiter.acquire(Duration::from_millis(10)).await.is_ok());

        let err = limiter
            .acquire(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.waited >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_acquire_waits_for_refill() {
        let limiter = limiter(2, Duration::from_secs(1));
        let _a = limiter.try_acquire().unwrap();
        let _b = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_none());

        let start = Instant::now();
        let permit = limiter.acquire(Duration::from_secs(2)).await;
        assert!(permit.is_ok());
        // One token refills every half second at 2 tokens per second.
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_never_exceeds_capacity() {
        let limiter = limiter(3, Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(limiter.available(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_never_double_spends() {
        let limiter = Arc::new(limiter(5, Duration::from_secs(60)));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire(Duration::from_millis(50)).await.is_ok()
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 5);
    }
}
