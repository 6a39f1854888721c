//! Ingress side of the pipeline: accepts requests and serves result lookups.

use bytes::Bytes;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::cache::ResultCache;
use crate::error::{AppError, Result};
use crate::queue::MessagePublisher;
use crate::reliability::metrics::{record_rejected, record_submitted};
use crate::types::{CacheEntry, CorrelationId, PredictionRequest};

/// Mints correlation ids, hands requests to the queue and reads results back.
///
/// Holds only shared handles, so one instance serves every HTTP request
/// concurrently.
#[derive(Clone)]
pub struct Dispatcher {
    cache: Arc<dyn ResultCache>,
    publisher: Arc<dyn MessagePublisher>,
}

impl Dispatcher {
    pub fn new(cache: Arc<dyn ResultCache>, publisher: Arc<dyn MessagePublisher>) -> Self {
        Self { cache, publisher }
    }

    /// Accept a request and return the id it can be polled under.
    ///
    /// The `Pending` entry is written before publishing so a worker can never
    /// finish before the id is known to the cache. If publishing fails the
    /// entry is marked failed and the broker error is returned.
    #[instrument(skip(self, request), fields(model = %request.model_name))]
    pub async fn submit(&self, request: PredictionRequest) -> Result<CorrelationId> {
        if let Err(e) = request.validate() {
            record_rejected("invalid_input");
            return Err(e);
        }

        let id = CorrelationId::generate();
        let body = Bytes::from(serde_json::to_vec(&request)?);

        self.cache.put(&id, &CacheEntry::Pending).await?;

        if let Err(e) = self.publisher.publish(body, &id).await {
            error!(inference_id = %id, "Failed to queue prediction request: {}", e);
            record_rejected("queue_unavailable");

            let failed = CacheEntry::Failed {
                reason: format!("request could not be queued: {}", e),
            };
            if let Err(cache_err) = self.cache.put(&id, &failed).await {
                warn!(inference_id = %id, "Could not record queueing failure: {}", cache_err);
            }
            return Err(e.into());
        }

        record_submitted(&request.model_name);
        info!(inference_id = %id, "Prediction request queued");
        Ok(id)
    }

    /// Current entry for `id`; an id that was never issued is an error
    /// distinct from `Pending`.
    #[instrument(skip(self), fields(inference_id = %id))]
    pub async fn fetch(&self, id: &CorrelationId) -> Result<CacheEntry> {
        self.cache
            .get(id)
            .await?
            .ok_or_else(|| AppError::UnknownCorrelationId(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryResultCache;
    use crate::error::QueueError;
    use crate::queue::InMemoryQueue;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct DownBroker {
        seen: Mutex<Vec<CorrelationId>>,
    }

    #[async_trait]
    impl MessagePublisher for DownBroker {
        async fn publish(
            &self,
            _body: Bytes,
            correlation_id: &CorrelationId,
        ) -> std::result::Result<(), QueueError> {
            self.seen.lock().push(correlation_id.clone());
            Err(QueueError::BrokerUnavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_submit_is_immediately_pending() {
        let dispatcher = Dispatcher::new(
            Arc::new(InMemoryResultCache::new()),
            Arc::new(InMemoryQueue::new()),
        );

        let id = dispatcher
            .submit(PredictionRequest::new("resnet", "cat.jpg"))
            .await
            .unwrap();
        assert_eq!(dispatcher.fetch(&id).await.unwrap(), CacheEntry::Pending);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let dispatcher = Dispatcher::new(
            Arc::new(InMemoryResultCache::new()),
            Arc::new(InMemoryQueue::new()),
        );

        let a = dispatcher.submit(PredictionRequest::new("m", "a")).await.unwrap();
        let b = dispatcher.submit(PredictionRequest::new("m", "a")).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_empty_model_is_rejected_without_queueing() {
        let cache = Arc::new(InMemoryResultCache::new());
        let queue = Arc::new(InMemoryQueue::new());
        let dispatcher = Dispatcher::new(cache.clone(), queue.clone());

        let err = dispatcher
            .submit(PredictionRequest::new("  ", "cat.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_pending() {
        let dispatcher = Dispatcher::new(
            Arc::new(InMemoryResultCache::new()),
            Arc::new(InMemoryQueue::new()),
        );

        let err = dispatcher
            .fetch(&CorrelationId::from("never-issued"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnknownCorrelationId(_)));
    }

    #[tokio::test]
    async fn test_publish_failure_marks_entry_failed() {
        let broker = Arc::new(DownBroker {
            seen: Mutex::new(Vec::new()),
        });
        let dispatcher = Dispatcher::new(Arc::new(InMemoryResultCache::new()), broker.clone());

        let err = dispatcher
            .submit(PredictionRequest::new("resnet", "cat.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Queue(QueueError::BrokerUnavailable(_))));

        let id = broker.seen.lock()[0].clone();
        match dispatcher.fetch(&id).await.unwrap() {
            CacheEntry::Failed { reason } => {
                assert!(reason.starts_with("request could not be queued"))
            }
            other => panic!("expected failed entry, got {:?}", other),
        }
    }
}
