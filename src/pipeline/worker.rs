//! Consumer side of the pipeline: one message in, one terminal cache entry out.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{field, info, instrument, warn, Span};

use crate::cache::ResultCache;
use crate::constants::queue::CORRELATION_HEADER;
use crate::error::HandlerError;
use crate::inference::InferenceBackend;
use crate::queue::{MessageHandler, MessagePublisher};
use crate::reliability::metrics::{record_inference_failure, record_malformed, record_stored};
use crate::types::{CacheEntry, CorrelationId, PredictionRequest, QueuedMessage};

/// Processes queued prediction requests.
///
/// Inference failures are recorded as `Failed` entries and the message is
/// acked; only a cache write failure makes the handler fail, so the broker
/// redelivers a message whose result was never stored.
pub struct Worker {
    backend: Arc<dyn InferenceBackend>,
    cache: Arc<dyn ResultCache>,
    notifier: Option<Arc<dyn MessagePublisher>>,
}

impl Worker {
    pub fn new(backend: Arc<dyn InferenceBackend>, cache: Arc<dyn ResultCache>) -> Self {
        Self {
            backend,
            cache,
            notifier: None,
        }
    }

    /// Publish a completion notice for every stored entry.
    pub fn with_notifier(mut self, notifier: Arc<dyn MessagePublisher>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    fn decode(message: &QueuedMessage) -> Option<(CorrelationId, PredictionRequest)> {
        let Some(id) = message.correlation_id.clone() else {
            warn!("Dropping message without '{}' header", CORRELATION_HEADER);
            return None;
        };

        let request: PredictionRequest = match serde_json::from_slice(&message.body) {
            Ok(request) => request,
            Err(e) => {
                warn!(inference_id = %id, "Dropping message with undecodable body: {}", e);
                return None;
            }
        };

        if let Err(e) = request.validate() {
            warn!(inference_id = %id, "Dropping invalid request: {}", e);
            return None;
        }

        Some((id, request))
    }

    async fn notify(&self, id: &CorrelationId, entry: &CacheEntry) {
        let Some(notifier) = &self.notifier else {
            return;
        };

        let notice = serde_json::json!({
            "inference_id": id,
            "status": entry.status(),
        });
        if let Err(e) = notifier.publish(Bytes::from(notice.to_string()), id).await {
            warn!("Failed to publish completion notice: {}", e);
        }
    }
}

#[async_trait]
impl MessageHandler for Worker {
    #[instrument(
        skip_all,
        fields(inference_id = field::Empty, redelivered = message.redelivered)
    )]
    async fn handle(&self, message: QueuedMessage) -> Result<(), HandlerError> {
        let Some((id, request)) = Self::decode(&message) else {
            record_malformed();
            return Ok(());
        };
        Span::current().record("inference_id", id.as_str());

        if message.redelivered {
            if let Some(existing) = self.cache.get(&id).await? {
                if existing.is_terminal() {
                    info!("Redelivered message already has a {} result, skipping", existing.status());
                    return Ok(());
                }
            }
        }

        info!("Processing prediction for model {}", request.model_name);
        let entry = match self
            .backend
            .predict(&request.model_name, &request.payload_reference)
            .await
        {
            Ok(outcome) => {
                info!("Prediction done, outcome {}", outcome.kind());
                CacheEntry::Done(outcome)
            }
            Err(e) => {
                warn!("Prediction failed: {}", e);
                record_inference_failure(&e);
                CacheEntry::Failed {
                    reason: e.to_string(),
                }
            }
        };

        self.cache.put(&id, &entry).await?;
        record_stored(&entry);
        self.notify(&id, &entry).await;
        Ok(())
    }
}
