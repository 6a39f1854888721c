//! Calls to the model-serving backend and classification of what comes back.

pub mod classifier;
pub mod client;
pub mod payload;

pub use classifier::{classify, classify_with_hint, file_extension};
pub use client::{InferenceBackend, InferenceClient, InferenceClientConfig};
pub use payload::{FsPayloadSource, PayloadSource};
