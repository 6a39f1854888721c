//! Prediction worker.
//!
//! Consumes queued prediction requests one at a time, calls the inference
//! backend under the process-wide rate limiter, and stores each result in the
//! cache before acknowledging the message.

use anyhow::Context;
use std::sync::Arc;
use tracing::{error, info, warn};

use prediction_pipeline::{
    cache::RedisResultCache,
    config::Config,
    inference::{FsPayloadSource, InferenceClient, InferenceClientConfig},
    pipeline::Worker,
    queue::{AmqpBroker, MessageConsumer, MessageHandler},
    reliability::{
        tracing::{init_tracing, shutdown_tracing, TracingConfig},
        GracefulShutdown, PipelineMetrics, RateLimiter, RateLimiterConfig,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    init_tracing(TracingConfig::from_config("prediction-worker", &config))
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))?;

    if let Err(e) = PipelineMetrics::install_with_listener(config.worker_metrics_addr()?) {
        warn!("Metrics disabled: {}", e);
    }

    let cache = Arc::new(
        RedisResultCache::connect(
            &config.redis_url(),
            config.cache_ttl(),
            config.retry_policy(),
        )
        .await
        .context("failed to connect to the result cache")?,
    );

    let limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
        capacity: config.rate_limit_capacity,
        refill_period: config.rate_limit_period,
    }));
    info!(
        "Rate limit: {} calls per {:?}",
        config.rate_limit_capacity, config.rate_limit_period
    );

    let client = InferenceClient::new(
        InferenceClientConfig::from_config(&config),
        limiter,
        Arc::new(FsPayloadSource::new(config.payload_root.clone())),
    )
    .context("failed to build inference client")?;

    let mut worker = Worker::new(Arc::new(client), cache);
    if let Some(result_queue) = &config.result_queue {
        info!("Publishing completion notices to '{}'", result_queue);
        worker = worker.with_notifier(Arc::new(AmqpBroker::new(
            config.broker_url.clone(),
            result_queue.clone(),
            config.retry_policy(),
        )));
    }
    let handler: Arc<dyn MessageHandler> = Arc::new(worker);

    let broker = AmqpBroker::new(
        config.broker_url.clone(),
        config.incoming_queue.clone(),
        config.retry_policy(),
    )
    .with_requeue_failed(config.requeue_failed_messages);

    let shutdown = GracefulShutdown::new();
    shutdown.listen_for_signals();

    info!("Worker starting on queue '{}'", broker.queue());
    let result = broker.consume(handler, shutdown.guard("queue-consumer")).await;
    if let Err(e) = &result {
        error!("Consumer exited with error: {}", e);
    }

    shutdown_tracing();
    result.context("queue consumer failed")
}
