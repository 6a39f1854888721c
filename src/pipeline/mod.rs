//! The two halves of the prediction pipeline.
//!
//! [`Dispatcher`] runs in the API process and [`Worker`] in the worker
//! process; they share nothing but the queue and the result cache.

pub mod dispatcher;
pub mod worker;

pub use dispatcher::Dispatcher;
pub use worker::Worker;
