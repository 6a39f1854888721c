//! Production reliability and observability features.
//!
//! This module provides the reliability features shared by both binaries:
//! - Token-bucket rate limiting for backend calls
//! - Bounded exponential backoff for transient failures
//! - Graceful shutdown handling
//! - Metrics collection and export
//! - Logging and distributed tracing

pub mod graceful_shutdown;
pub mod metrics;
pub mod rate_limiter;
pub mod retry;
pub mod tracing;

pub use graceful_shutdown::{GracefulShutdown, ShutdownGuard};
pub use metrics::PipelineMetrics;
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RatePermit};
pub use retry::{retry_with_backoff, RetryError, RetryPolicy};
