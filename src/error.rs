//! Custom error types for the prediction pipeline.
//!
//! This module provides a centralized error handling system using the `thiserror` crate.
//! Each pipeline stage has its own typed error so the worker can switch on backend
//! failures explicitly, and everything converges into [`AppError`] at the HTTP edge.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failures from a single call to the inference backend.
///
/// The worker records every variant as a `Failed` cache entry; none of them
/// are allowed to take the worker process down.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InferenceError {
    /// No rate-limiter permit could be obtained in time.
    #[error("rate limited: no inference permit available within {0:?}")]
    RateLimited(Duration),

    /// The backend did not answer within the hard call timeout.
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),

    /// Transport failures persisted through every retry attempt.
    #[error("inference backend unreachable after {attempts} attempts: {message}")]
    BackendUnreachable { attempts: u32, message: String },

    /// The backend answered with a non-2xx status other than 404.
    #[error("inference backend returned {status}: {message}")]
    BackendError { status: u16, message: String },

    /// The backend does not know the requested model.
    #[error("model '{0}' not found on the inference backend")]
    ModelNotFound(String),

    /// The payload reference could not be resolved or read.
    #[error("payload unavailable: {0}")]
    PayloadUnavailable(String),
}

impl InferenceError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "rate_limited",
            Self::Timeout(_) => "timeout",
            Self::BackendUnreachable { .. } => "backend_unreachable",
            Self::BackendError { .. } => "backend_error",
            Self::ModelNotFound(_) => "model_not_found",
            Self::PayloadUnavailable(_) => "payload_unavailable",
        }
    }
}

/// Raised by the rate limiter when `acquire` runs out of time.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("rate limit exceeded: no token within {waited:?}")]
pub struct RateLimitExceeded {
    pub waited: Duration,
}

/// Result cache failures.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The store could not be reached, even after retrying.
    #[error("result cache unavailable: {0}")]
    Unavailable(String),

    /// A stored value does not decode into a cache entry.
    #[error("corrupt cache entry for '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

/// Message broker failures.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Connecting, declaring or publishing failed after retrying.
    #[error("message broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// The in-process queue has no remaining receiver or sender.
    #[error("queue closed: {0}")]
    Closed(String),
}

/// Error returned by a message handler; the adapter nacks the delivery.
#[derive(Debug, Error)]
#[error("message handler failed: {0}")]
pub struct HandlerError(pub String);

impl From<CacheError> for HandlerError {
    fn from(err: CacheError) -> Self {
        Self(err.to_string())
    }
}

/// Primary error type for the application, covering all possible error cases.
#[derive(Debug, Error)]
pub enum AppError {
    /// The client sent a request the pipeline refuses to enqueue.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Polling for a correlation id that was never issued.
    #[error("No result found for inference id {0}")]
    UnknownCorrelationId(String),

    /// Errors from the result cache.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Errors from the message broker.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Errors from the inference backend.
    #[error(transparent)]
    Inference(#[from] InferenceError),

    /// Errors from invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors from the underlying IO system.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal server errors.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Implementation to convert AppError into an HTTP response for Axum.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::UnknownCorrelationId(_) => StatusCode::NOT_FOUND,
            AppError::Cache(CacheError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Inference(InferenceError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Inference(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "status_code": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results with AppError.
pub type Result<T> = std::result::Result<T, AppError>;
