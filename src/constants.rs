//! Domain constants for the prediction pipeline.
//!
//! This module contains compile-time constants used throughout the application.
//! These are separated from runtime configuration to provide clear distinction
//! between values that never change and those that can be configured.

/// Message broker wire contract.
pub mod queue {
    /// Header carrying the correlation id on every published message.
    pub const CORRELATION_HEADER: &str = "inference_id";

    /// Default name of the durable request queue.
    pub const DEFAULT_INCOMING_QUEUE: &str = "prediction_queue";

    /// AMQP delivery mode for persistent messages.
    pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

    /// Unacknowledged messages allowed per consumer.
    pub const PREFETCH_COUNT: u16 = 1;

    /// Consumer tag prefix; the process id is appended.
    pub const CONSUMER_TAG_PREFIX: &str = "prediction-worker";
}

/// Inference backend wire contract.
pub mod backend {
    /// Path segment under the backend base URL.
    pub const PREDICTIONS_PATH: &str = "predictions";

    /// Content type of the request body.
    pub const REQUEST_CONTENT_TYPE: &str = "application/octet-stream";

    /// Content type reported when nothing better is known.
    pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

    /// Maximum bytes of an error body kept in a failure reason.
    pub const MAX_ERROR_BODY_LEN: usize = 512;
}

/// Centralized timeout configuration constants.
pub mod timeouts {
    use std::time::Duration;

    /// Default hard timeout for one backend call, retries included.
    pub const BACKEND_CALL_TIMEOUT: Duration = Duration::from_secs(60);

    /// Default time to wait for a rate-limiter token.
    pub const RATE_LIMIT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(1);

    /// TCP connect timeout for the backend HTTP client.
    pub const BACKEND_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Time allowed for in-flight HTTP requests after a shutdown signal.
    pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);
}

/// Retry and backoff defaults for transient failures.
pub mod retry {
    use std::time::Duration;

    /// Attempts before a transient failure becomes fatal.
    pub const MAX_ATTEMPTS: u32 = 5;

    /// Delay before the first retry.
    pub const INITIAL_BACKOFF: Duration = Duration::from_millis(200);

    /// Upper bound for any single delay.
    pub const MAX_BACKOFF: Duration = Duration::from_secs(5);

    /// Growth factor between consecutive delays.
    pub const BACKOFF_MULTIPLIER: f64 = 2.0;
}

/// Rate limiter defaults: `CAPACITY` tokens per `REFILL_PERIOD`.
pub mod rate_limit {
    use std::time::Duration;

    pub const CAPACITY: u32 = 10;
    pub const REFILL_PERIOD: Duration = Duration::from_secs(1);
}

/// HTTP API surface.
pub mod api {
    /// Route prefix for prediction endpoints.
    pub const PREDICTIONS_ROUTE: &str = "/api/v1/predictions";

    /// Body text reported for unsupported outcomes.
    pub const UNSUPPORTED_RESULTS: &str = "Unsupported response type";
}
