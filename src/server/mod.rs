//! Web server and API implementation.
//!
//! This module provides the HTTP surface of the prediction service: submit,
//! poll, health and metrics.

mod handlers;
mod state;

pub use handlers::{create_router, get_prediction, health_check, metrics_handler, submit_prediction};
pub use state::AppState;
