//! RabbitMQ adapter built on `lapin`.
//!
//! One adapter serves one durable queue. The connection is opened lazily and
//! kept alongside a channel; publishers clone the channel out of the lock, so
//! concurrent publishes only contend while a broken link is being replaced.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{MessageConsumer, MessageHandler, MessagePublisher, Settlement};
use crate::constants::queue::{
    CONSUMER_TAG_PREFIX, CORRELATION_HEADER, PERSISTENT_DELIVERY_MODE, PREFETCH_COUNT,
};
use crate::error::QueueError;
use crate::reliability::{retry_with_backoff, RetryError, RetryPolicy, ShutdownGuard};
use crate::types::{CorrelationId, QueuedMessage};

struct Link {
    // Held so the connection outlives every channel cloned from it.
    _connection: Connection,
    channel: Channel,
}

/// Publisher and consumer for a single durable RabbitMQ queue.
pub struct AmqpBroker {
    url: String,
    queue: String,
    retry: RetryPolicy,
    requeue_failed: bool,
    link: Mutex<Option<Link>>,
}

enum Stop {
    Shutdown,
    Reconnect,
}

impl AmqpBroker {
    /// Create an adapter; no connection is made until first use.
    pub fn new(url: impl Into<String>, queue: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            url: url.into(),
            queue: queue.into(),
            retry,
            requeue_failed: true,
            link: Mutex::new(None),
        }
    }

    /// Whether a failed first delivery is requeued before being dropped.
    pub fn with_requeue_failed(mut self, requeue_failed: bool) -> Self {
        self.requeue_failed = requeue_failed;
        self
    }

    /// Name of the queue this adapter serves.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    async fn open(&self) -> Result<Link, lapin::Error> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!("Connected to broker, queue '{}' declared durable", self.queue);
        Ok(Link {
            _connection: connection,
            channel,
        })
    }

    /// A live channel, reconnecting if the cached one has gone away.
    async fn channel(&self) -> Result<Channel, lapin::Error> {
        let mut link = self.link.lock().await;
        if let Some(existing) = link.as_ref() {
            if existing.channel.status().connected() {
                return Ok(existing.channel.clone());
            }
            warn!("Broker channel for '{}' is closed; reconnecting", self.queue);
        }

        let fresh = self.open().await?;
        let channel = fresh.channel.clone();
        *link = Some(fresh);
        Ok(channel)
    }

    async fn publish_once(
        &self,
        body: &[u8],
        correlation_id: &CorrelationId,
    ) -> Result<(), lapin::Error> {
        let channel = self.channel().await?;
        channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                body,
                publish_properties(correlation_id),
            )
            .await?
            .await?;
        Ok(())
    }

    async fn start_consumer(&self) -> Result<(Link, Consumer), lapin::Error> {
        let link = self.open().await?;
        link.channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await?;

        let tag = format!("{}-{}", CONSUMER_TAG_PREFIX, std::process::id());
        let consumer = link
            .channel
            .basic_consume(
                &self.queue,
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok((link, consumer))
    }

    async fn drain(
        &self,
        consumer: &mut Consumer,
        handler: &dyn MessageHandler,
        shutdown: &mut ShutdownGuard,
    ) -> Stop {
        loop {
            let next = tokio::select! {
                _ = shutdown.wait_for_shutdown() => return Stop::Shutdown,
                next = consumer.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    warn!("Consumer on '{}' failed: {}", self.queue, e);
                    return Stop::Reconnect;
                }
                None => {
                    warn!("Consumer on '{}' was cancelled by the broker", self.queue);
                    return Stop::Reconnect;
                }
            };

            if let Err(e) = self.process(delivery, handler).await {
                error!("Failed to settle delivery on '{}': {}", self.queue, e);
                return Stop::Reconnect;
            }
        }
    }

    async fn process(&self, delivery: Delivery, handler: &dyn MessageHandler) -> Result<(), lapin::Error> {
        let message = to_message(&delivery);
        let redelivered = message.redelivered;
        let outcome = handler.handle(message).await;

        match Settlement::for_outcome(&outcome, redelivered, self.requeue_failed) {
            Settlement::Ack => delivery.acker.ack(BasicAckOptions::default()).await,
            Settlement::Nack { requeue } => {
                if let Err(e) = &outcome {
                    warn!("Nacking delivery (requeue: {}): {}", requeue, e);
                }
                delivery
                    .acker
                    .nack(BasicNackOptions {
                        requeue,
                        ..BasicNackOptions::default()
                    })
                    .await
            }
        }
    }
}

#[async_trait]
impl MessagePublisher for AmqpBroker {
    async fn publish(&self, body: Bytes, correlation_id: &CorrelationId) -> Result<(), QueueError> {
        retry_with_backoff(
            &self.retry,
            "broker publish",
            || self.publish_once(&body, correlation_id),
            |_| true,
        )
        .await
        .map_err(unavailable)?;

        debug!(inference_id = %correlation_id, queue = %self.queue, "Published message");
        Ok(())
    }
}

#[async_trait]
impl MessageConsumer for AmqpBroker {
    async fn consume(
        &self,
        handler: Arc<dyn MessageHandler>,
        mut shutdown: ShutdownGuard,
    ) -> Result<(), QueueError> {
        while !shutdown.is_triggered() {
            let (_link, mut consumer) = retry_with_backoff(
                &self.retry,
                "broker consume",
                || self.start_consumer(),
                |_| true,
            )
            .await
            .map_err(unavailable)?;

            info!("Consuming from '{}' (prefetch {})", self.queue, PREFETCH_COUNT);

            match self.drain(&mut consumer, handler.as_ref(), &mut shutdown).await {
                Stop::Shutdown => break,
                Stop::Reconnect => info!("Reconnecting consumer for '{}'", self.queue),
            }
        }

        info!("Consumer for '{}' stopped", self.queue);
        Ok(())
    }
}

fn unavailable(err: RetryError<lapin::Error>) -> QueueError {
    QueueError::BrokerUnavailable(format!(
        "{} (after {} attempts)",
        err.last_error, err.attempts
    ))
}

/// Persistent delivery with the correlation id header.
fn publish_properties(correlation_id: &CorrelationId) -> BasicProperties {
    let mut headers = FieldTable::default();
    headers.insert(
        CORRELATION_HEADER.into(),
        AMQPValue::LongString(correlation_id.as_str().into()),
    );

    BasicProperties::default()
        .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
        .with_headers(headers)
}

fn correlation_header(properties: &BasicProperties) -> Option<CorrelationId> {
    let headers = properties.headers().as_ref()?;
    let value = headers
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == CORRELATION_HEADER)
        .map(|(_, value)| value)?;

    match value {
        AMQPValue::LongString(s) => std::str::from_utf8(s.as_bytes())
            .ok()
            .map(CorrelationId::from),
        AMQPValue::ShortString(s) => Some(CorrelationId::from(s.as_str())),
        _ => None,
    }
}

fn to_message(delivery: &Delivery) -> QueuedMessage {
    QueuedMessage {
        body: Bytes::copy_from_slice(&delivery.data),
        correlation_id: correlation_header(&delivery.properties),
        redelivered: delivery.redelivered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::ShortString;

    #[test]
    fn test_publish_properties_are_persistent_and_tagged() {
        let id = CorrelationId::from("abc-123");
        let properties = publish_properties(&id);

        assert_eq!(*properties.delivery_mode(), Some(PERSISTENT_DELIVERY_MODE));
        assert_eq!(correlation_header(&properties), Some(id));
    }

    #[test]
    fn test_short_string_header_is_accepted() {
        let mut headers = FieldTable::default();
        headers.insert(
            CORRELATION_HEADER.into(),
            AMQPValue::ShortString(ShortString::from("legacy-id")),
        );
        let properties = BasicProperties::default().with_headers(headers);

        assert_eq!(
            correlation_header(&properties),
            Some(CorrelationId::from("legacy-id"))
        );
    }

    #[test]
    fn test_missing_header_is_none() {
        assert_eq!(correlation_header(&BasicProperties::default()), None);

        let mut headers = FieldTable::default();
        headers.insert("other".into(), AMQPValue::Boolean(true));
        let properties = BasicProperties::default().with_headers(headers);
        assert_eq!(correlation_header(&properties), None);
    }

    #[tokio::test]
    async fn test_unreachable_broker_surfaces_as_unavailable() {
        let broker = AmqpBroker::new(
            "amqp://127.0.0.1:1/%2f",
            "prediction_queue",
            RetryPolicy::no_retry(),
        );
        let result = broker
            .publish(Bytes::from_static(b"{}"), &CorrelationId::generate())
            .await;
        assert!(matches!(result, Err(QueueError::BrokerUnavailable(_))));
    }
}
