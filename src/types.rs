//! Strong typing with newtypes for domain concepts.
//!
//! This module provides the values that flow through the pipeline: the request a
//! client submits, the correlation id that joins the synchronous and asynchronous
//! halves, the classified inference outcome and the cache entry a poller reads.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// A request to run one model over one payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionRequest {
    /// Name of the model registered on the inference backend.
    #[serde(alias = "prediction_model_name")]
    pub model_name: String,

    /// Locator of the input payload; forwarded, never inspected.
    #[serde(alias = "image_path")]
    pub payload_reference: String,
}

impl PredictionRequest {
    /// Create a new prediction request.
    pub fn new(model_name: impl Into<String>, payload_reference: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            payload_reference: payload_reference.into(),
        }
    }

    /// Check the request before it is accepted into the pipeline.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.model_name.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "The 'model_name' field is required.".to_string(),
            ));
        }
        Ok(())
    }
}

/// Opaque identifier linking a submitted request to its eventual result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Mint a fresh, globally unique id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message as delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    /// Serialized [`PredictionRequest`].
    pub body: Bytes,

    /// Correlation id taken from the message headers, if the publisher set one.
    pub correlation_id: Option<CorrelationId>,

    /// Whether the broker has delivered this message before.
    pub redelivered: bool,
}

impl QueuedMessage {
    /// Create a first-delivery message.
    pub fn new(body: impl Into<Bytes>, correlation_id: CorrelationId) -> Self {
        Self {
            body: body.into(),
            correlation_id: Some(correlation_id),
            redelivered: false,
        }
    }
}

/// The classified result of one backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceOutcome {
    /// JSON results, in the order the backend returned them.
    Structured {
        model_name: String,
        results: Vec<serde_json::Value>,
    },

    /// An opaque binary payload and its sniffed MIME type.
    Binary {
        model_name: String,
        content_type: String,
        bytes: Bytes,
    },

    /// Text that is neither JSON nor classifiable binary.
    Unsupported { model_name: String },
}

impl InferenceOutcome {
    /// Name of the model that produced this outcome.
    pub fn model_name(&self) -> &str {
        match self {
            Self::Structured { model_name, .. }
            | Self::Binary { model_name, .. }
            | Self::Unsupported { model_name } => model_name,
        }
    }

    /// Short label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Structured { .. } => "structured",
            Self::Binary { .. } => "binary",
            Self::Unsupported { .. } => "unsupported",
        }
    }
}

/// Status snapshot stored under a correlation id.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    /// Accepted, not yet processed.
    Pending,

    /// Processed; the backend produced an outcome.
    Done(InferenceOutcome),

    /// Processed; the backend call failed.
    Failed { reason: String },
}

impl CacheEntry {
    /// Whether the entry has left `Pending`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Value of the `status` field on the wire.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done(_) => "done",
            Self::Failed { .. } => "failed",
        }
    }
}
