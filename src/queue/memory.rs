//! In-process queue with broker-like ack semantics.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::{MessageConsumer, MessageHandler, MessagePublisher, Settlement};
use crate::error::QueueError;
use crate::reliability::ShutdownGuard;
use crate::types::{CorrelationId, QueuedMessage};

/// An unbounded in-memory queue. Nacked messages with `requeue` go back to the
/// tail flagged as redelivered; nacked messages without it are dropped.
pub struct InMemoryQueue {
    sender: mpsc::UnboundedSender<QueuedMessage>,
    receiver: Mutex<mpsc::UnboundedReceiver<QueuedMessage>>,
    requeue_failed: bool,
    acked: AtomicU64,
    nacked: AtomicU64,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
            requeue_failed: true,
            acked: AtomicU64::new(0),
            nacked: AtomicU64::new(0),
        }
    }

    pub fn with_requeue_failed(mut self, requeue_failed: bool) -> Self {
        self.requeue_failed = requeue_failed;
        self
    }

    /// Enqueue an already-built message, e.g. one without a correlation header.
    pub fn push(&self, message: QueuedMessage) -> Result<(), QueueError> {
        self.sender
            .send(message)
            .map_err(|_| QueueError::Closed("in-memory queue receiver dropped".to_string()))
    }

    /// Messages acknowledged so far.
    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }

    /// Messages negatively acknowledged so far.
    pub fn nacked(&self) -> u64 {
        self.nacked.load(Ordering::Relaxed)
    }

    /// Deliver the next queued message, if any, and settle it.
    pub async fn deliver_one(
        &self,
        handler: &dyn MessageHandler,
    ) -> Result<Option<Settlement>, QueueError> {
        let next = self.receiver.lock().await.try_recv();
        match next {
            Ok(message) => self.process(message, handler).await.map(Some),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(QueueError::Closed("in-memory queue sender dropped".to_string()))
            }
        }
    }

    async fn process(
        &self,
        message: QueuedMessage,
        handler: &dyn MessageHandler,
    ) -> Result<Settlement, QueueError> {
        let retry_copy = message.clone();
        let outcome = handler.handle(message).await;
        let settlement = Settlement::for_outcome(&outcome, retry_copy.redelivered, self.requeue_failed);

        match settlement {
            Settlement::Ack => {
                self.acked.fetch_add(1, Ordering::Relaxed);
            }
            Settlement::Nack { requeue } => {
                self.nacked.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = &outcome {
                    warn!("Nacking in-memory delivery (requeue: {}): {}", requeue, e);
                }
                if requeue {
                    self.push(QueuedMessage {
                        redelivered: true,
                        ..retry_copy
                    })?;
                }
            }
        }
        Ok(settlement)
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessagePublisher for InMemoryQueue {
    async fn publish(&self, body: Bytes, correlation_id: &CorrelationId) -> Result<(), QueueError> {
        self.push(QueuedMessage::new(body, correlation_id.clone()))?;
        debug!(inference_id = %correlation_id, "Queued in-memory message");
        Ok(())
    }
}

#[async_trait]
impl MessageConsumer for InMemoryQueue {
    async fn consume(
        &self,
        handler: Arc<dyn MessageHandler>,
        mut shutdown: ShutdownGuard,
    ) -> Result<(), QueueError> {
        loop {
            let next = {
                let mut receiver = self.receiver.lock().await;
                tokio::select! {
                    _ = shutdown.wait_for_shutdown() => None,
                    message = receiver.recv() => message,
                }
            };

            match next {
                Some(message) => {
                    self.process(message, handler.as_ref()).await?;
                }
                None => break,
            }
        }

        info!("In-memory consumer stopped");
        Ok(())
    }
}
