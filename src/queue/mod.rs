//! Durable hand-off between the dispatcher and the worker.
//!
//! Publishing and consuming sit behind traits so the dispatcher and worker can
//! run against RabbitMQ in production and an in-process queue in tests. Both
//! adapters settle deliveries with the same [`Settlement`] policy.

mod amqp;
mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::error::{HandlerError, QueueError};
use crate::reliability::ShutdownGuard;
use crate::types::{CorrelationId, QueuedMessage};

pub use self::amqp::AmqpBroker;
pub use self::memory::InMemoryQueue;

/// Publishes request bodies tagged with their correlation id.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish `body` persistently with `correlation_id` as message metadata.
    async fn publish(&self, body: Bytes, correlation_id: &CorrelationId) -> Result<(), QueueError>;
}

/// Processes one delivered message; `Ok` acks it, `Err` nacks it.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: QueuedMessage) -> Result<(), HandlerError>;
}

/// Feeds deliveries to a handler, one at a time, until shutdown.
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Run the consume loop. Returns `Ok` after a shutdown signal once the
    /// in-flight message has been settled.
    async fn consume(
        &self,
        handler: Arc<dyn MessageHandler>,
        shutdown: ShutdownGuard,
    ) -> Result<(), QueueError>;
}

/// How a delivery is settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Nack { requeue: bool },
}

impl Settlement {
    /// Ack on success. A failed first delivery is requeued once when
    /// `requeue_failed` is set; a failed redelivery never is.
    pub fn for_outcome(
        outcome: &Result<(), HandlerError>,
        redelivered: bool,
        requeue_failed: bool,
    ) -> Self {
        match outcome {
            Ok(()) => Self::Ack,
            Err(_) => Self::Nack {
                requeue: requeue_failed && !redelivered,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settlement_policy() {
        let ok = Ok(());
        let failed = Err(HandlerError("cache down".into()));

        assert_eq!(Settlement::for_outcome(&ok, false, true), Settlement::Ack);
        assert_eq!(Settlement::for_outcome(&ok, true, true), Settlement::Ack);
        assert_eq!(
            Settlement::for_outcome(&failed, false, true),
            Settlement::Nack { requeue: true }
        );
        assert_eq!(
            Settlement::for_outcome(&failed, true, true),
            Settlement::Nack { requeue: false }
        );
        assert_eq!(
            Settlement::for_outcome(&failed, false, false),
            Settlement::Nack { requeue: false }
        );
    }
}
