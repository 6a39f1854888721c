//! Prometheus metrics collection and export.
//!
//! Provides counters for the request lifecycle (submitted, completed, failed,
//! malformed) and a latency histogram for backend calls. The recording functions
//! are no-ops until a recorder is installed, so library code can call them freely.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{error, info};

use crate::error::{AppError, InferenceError};
use crate::types::CacheEntry;

/// Metrics recorder for the pipeline.
#[derive(Clone)]
pub struct PipelineMetrics {
    /// Prometheus handle for exporting metrics.
    prometheus_handle: PrometheusHandle,
}

impl PipelineMetrics {
    /// Install the global Prometheus recorder and describe all metrics.
    pub fn install() -> Result<Self, AppError> {
        let prometheus_handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| AppError::Internal(format!("Failed to install metrics recorder: {}", e)))?;

        register_metrics();

        info!("Metrics collection initialized");

        Ok(Self { prometheus_handle })
    }

    /// Install the global recorder and serve it for scraping on `addr`.
    ///
    /// Used by processes without an HTTP API of their own, such as the worker.
    /// Must be called from within a Tokio runtime.
    pub fn install_with_listener(addr: SocketAddr) -> Result<Self, AppError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(addr)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build metrics exporter: {}", e)))?;
        let prometheus_handle = recorder.handle();

        metrics::set_global_recorder(recorder)
            .map_err(|e| AppError::Internal(format!("Failed to install metrics recorder: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = exporter.await {
                error!("Metrics listener stopped: {}", e);
            }
        });

        register_metrics();

        info!("Metrics exported on http://{}/metrics", addr);

        Ok(Self { prometheus_handle })
    }

    /// Get the Prometheus metrics as a string.
    pub fn render(&self) -> String {
        self.prometheus_handle.render()
    }
}

/// Register all metrics with their descriptions.
pub fn register_metrics() {
    describe_counter!(
        "predictions_submitted_total",
        "Total number of prediction requests accepted and queued"
    );
    describe_counter!(
        "predictions_rejected_total",
        "Total number of prediction requests rejected before queueing"
    );
    describe_counter!(
        "predictions_completed_total",
        "Total number of predictions stored with a result, by outcome type"
    );
    describe_counter!(
        "predictions_failed_total",
        "Total number of predictions stored as failed, by error kind"
    );
    describe_counter!(
        "queue_messages_malformed_total",
        "Total number of poison messages dropped by the worker"
    );
    describe_histogram!(
        "inference_duration_seconds",
        "Duration of inference backend calls in seconds"
    );
}

/// Record an accepted submission.
pub fn record_submitted(model_name: &str) {
    counter!("predictions_submitted_total", "model" => model_name.to_string()).increment(1);
}

/// Record a submission rejected by validation or enqueue failure.
pub fn record_rejected(reason: &'static str) {
    counter!("predictions_rejected_total", "reason" => reason).increment(1);
}

/// Record the terminal entry the worker stored.
pub fn record_stored(entry: &CacheEntry) {
    match entry {
        CacheEntry::Done(outcome) => {
            counter!("predictions_completed_total", "outcome" => outcome.kind()).increment(1);
        }
        CacheEntry::Failed { .. } | CacheEntry::Pending => {}
    }
}

/// Record a backend failure.
pub fn record_inference_failure(error: &InferenceError) {
    counter!("predictions_failed_total", "kind" => error.kind()).increment(1);
}

/// Record a dropped poison message.
pub fn record_malformed() {
    counter!("queue_messages_malformed_total").increment(1);
}

/// Record how long one backend call took.
pub fn record_inference_duration(model_name: &str, duration: Duration) {
    histogram!("inference_duration_seconds", "model" => model_name.to_string())
        .record(duration.as_secs_f64());
}
