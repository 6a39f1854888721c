//! The `prediction_pipeline` core library.
//!
//! This crate provides an asynchronous prediction pipeline: an HTTP API hands
//! requests to a durable queue, a worker calls a rate-limited model-serving
//! backend, and clients poll a result cache by correlation id.

pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod inference;
pub mod pipeline;
pub mod queue;
pub mod reliability;
pub mod server;
pub mod types;
