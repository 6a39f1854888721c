//! Prediction API server.
//!
//! This is the entry point for the request-accepting half of the pipeline. It
//! initializes configuration, logging and metrics, connects the result cache,
//! and serves the HTTP API until SIGINT or SIGTERM.

use anyhow::Context;
use std::future::IntoFuture;
use std::sync::Arc;
use tracing::{info, warn};

use prediction_pipeline::{
    cache::RedisResultCache,
    config::Config,
    constants::timeouts::SHUTDOWN_GRACE_PERIOD,
    pipeline::Dispatcher,
    queue::AmqpBroker,
    reliability::{
        tracing::{init_tracing, shutdown_tracing, TracingConfig},
        GracefulShutdown, PipelineMetrics,
    },
    server::{create_router, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    init_tracing(TracingConfig::from_config("prediction-api", &config))
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))?;

    let metrics = match PipelineMetrics::install() {
        Ok(metrics) => Some(metrics),
        Err(e) => {
            warn!("Metrics disabled: {}", e);
            None
        }
    };

    // Result cache
    let cache = RedisResultCache::connect(
        &config.redis_url(),
        config.cache_ttl(),
        config.retry_policy(),
    )
    .await
    .context("failed to connect to the result cache")?;

    // The broker connects lazily on first publish
    let broker = AmqpBroker::new(
        config.broker_url.clone(),
        config.incoming_queue.clone(),
        config.retry_policy(),
    );

    let dispatcher = Dispatcher::new(Arc::new(cache), Arc::new(broker));
    let state = Arc::new(AppState::new(dispatcher, metrics));
    let app = create_router(state);

    // Graceful shutdown on SIGINT/SIGTERM
    let shutdown = GracefulShutdown::new();
    shutdown.listen_for_signals();
    let mut guard = shutdown.guard("http-server");

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on {}", addr);

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        guard.wait_for_shutdown().await;
    });

    // Bound the drain so a stuck client cannot hold the process open.
    let mut drain_guard = shutdown.guard("http-drain");
    tokio::select! {
        result = server.into_future() => result.context("HTTP server failed")?,
        _ = async {
            drain_guard.wait_for_shutdown().await;
            tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
        } => warn!("In-flight requests did not finish within {:?}", SHUTDOWN_GRACE_PERIOD),
    }

    info!("Server stopped");
    shutdown_tracing();
    Ok(())
}
