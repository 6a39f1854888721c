//! Application state for dependency injection.
//!
//! This module provides the application state that is shared
//! between all request handlers.

use crate::pipeline::Dispatcher;
use crate::reliability::PipelineMetrics;

/// Shared application state containing dependencies.
#[derive(Clone)]
pub struct AppState {
    /// Accepts submissions and serves result lookups
    pub dispatcher: Dispatcher,

    /// Prometheus handle; `None` when no recorder was installed
    pub metrics: Option<PipelineMetrics>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Arguments
    /// * `dispatcher` - The ingress half of the pipeline
    /// * `metrics` - Installed metrics recorder, if any
    ///
    /// # Returns
    /// A new application state
    pub fn new(dispatcher: Dispatcher, metrics: Option<PipelineMetrics>) -> Self {
        Self {
            dispatcher,
            metrics,
        }
    }
}
