//! Logging and distributed tracing setup.
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter`, a JSON or
//! compact formatting layer, and an optional OpenTelemetry layer exporting to Jaeger.

use opentelemetry::global;
use opentelemetry_jaeger::new_agent_pipeline;
use tracing::{info, warn};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{
    filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry,
};

use crate::config::Config;

/// Configuration for logging and tracing.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Service name reported to Jaeger.
    pub service_name: String,
    /// Jaeger agent endpoint (`host:port`); export is disabled when unset.
    pub jaeger_endpoint: Option<String>,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
    /// Log level filter used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "prediction-pipeline".to_string(),
            jaeger_endpoint: None,
            json: true,
            log_level: "info".to_string(),
        }
    }
}

impl TracingConfig {
    /// Derive tracing settings from the application config.
    pub fn from_config(service_name: impl Into<String>, config: &Config) -> Self {
        Self {
            service_name: service_name.into(),
            jaeger_endpoint: config.jaeger_endpoint.clone(),
            json: config.log_json,
            log_level: config.log_level.clone(),
        }
    }
}

/// Initialize logging, and Jaeger export when an endpoint is configured.
pub fn init_tracing(config: TracingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = if config.json {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .json()
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .compact()
            .boxed()
    };

    let mut export_error = None;
    let otel_layer = match config.jaeger_endpoint.as_deref() {
        Some(endpoint) => match new_agent_pipeline()
            .with_service_name(&config.service_name)
            .with_endpoint(endpoint)
            .install_simple()
        {
            Ok(tracer) => Some(OpenTelemetryLayer::new(tracer)),
            Err(e) => {
                export_error = Some(e.to_string());
                None
            }
        },
        None => None,
    };

    Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    if let Some(e) = export_error {
        warn!("Failed to initialize Jaeger tracing: {}. Continuing without distributed tracing.", e);
    }
    info!("Tracing initialized for service {}", config.service_name);
    Ok(())
}

/// Shutdown tracing and flush any pending spans.
pub fn shutdown_tracing() {
    global::shutdown_tracer_provider();
}
