//! Text encoding of cache entries.
//!
//! Every backend stores the same JSON document per correlation id. Binary
//! outcomes carry their bytes as standard base64 in `content`; decoding reverses
//! this so callers only ever see typed [`CacheEntry`] values.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::types::{CacheEntry, InferenceOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Status {
    Pending,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OutcomeType {
    Structured,
    Binary,
    Unsupported,
}

/// Flat wire record; which optional fields are present depends on `status` and `type`.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    status: Status,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    outcome_type: Option<OutcomeType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    results: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl StoredEntry {
    fn with_status(status: Status) -> Self {
        Self {
            status,
            outcome_type: None,
            model_name: None,
            results: None,
            content_type: None,
            content: None,
            reason: None,
        }
    }
}

/// Encode an entry into its stored JSON text.
pub fn encode_entry(entry: &CacheEntry) -> String {
    let stored = match entry {
        CacheEntry::Pending => StoredEntry::with_status(Status::Pending),
        CacheEntry::Failed { reason } => StoredEntry {
            reason: Some(reason.clone()),
            ..StoredEntry::with_status(Status::Failed)
        },
        CacheEntry::Done(outcome) => {
            let mut stored = StoredEntry::with_status(Status::Done);
            stored.model_name = Some(outcome.model_name().to_string());
            match outcome {
                InferenceOutcome::Structured { results, .. } => {
                    stored.outcome_type = Some(OutcomeType::Structured);
                    stored.results = Some(results.clone());
                }
                InferenceOutcome::Binary {
                    content_type, bytes, ..
                } => {
                    stored.outcome_type = Some(OutcomeType::Binary);
                    stored.content_type = Some(content_type.clone());
                    stored.content = Some(STANDARD.encode(bytes));
                }
                InferenceOutcome::Unsupported { .. } => {
                    stored.outcome_type = Some(OutcomeType::Unsupported);
                }
            }
            stored
        }
    };

    // A struct of strings and JSON values always serializes.
    serde_json::to_string(&stored).unwrap_or_else(|_| r#"{"status":"pending"}"#.to_string())
}

/// Decode stored JSON text back into an entry.
pub fn decode_entry(key: &str, text: &str) -> Result<CacheEntry, CacheError> {
    let corrupt = |reason: String| CacheError::Corrupt {
        key: key.to_string(),
        reason,
    };

    let stored: StoredEntry =
        serde_json::from_str(text).map_err(|e| corrupt(format!("invalid JSON: {}", e)))?;

    match stored.status {
        Status::Pending => Ok(CacheEntry::Pending),
        Status::Failed => Ok(CacheEntry::Failed {
            reason: stored.reason.unwrap_or_default(),
        }),
        Status::Done => {
            let model_name = stored
                .model_name
                .ok_or_else(|| corrupt("missing model_name".to_string()))?;
            let outcome_type = stored
                .outcome_type
                .ok_or_else(|| corrupt("missing type".to_string()))?;

            let outcome = match outcome_type {
                OutcomeType::Structured => InferenceOutcome::Structured {
                    model_name,
                    results: stored.results.unwrap_or_default(),
                },
                OutcomeType::Binary => {
                    let content_type = stored
                        .content_type
                        .ok_or_else(|| corrupt("missing content_type".to_string()))?;
                    let content = stored
                        .content
                        .ok_or_else(|| corrupt("missing content".to_string()))?;
                    let bytes = STANDARD
                        .decode(content.as_bytes())
                        .map_err(|e| corrupt(format!("invalid base64 content: {}", e)))?;
                    InferenceOutcome::Binary {
                        model_name,
                        content_type,
                        bytes: Bytes::from(bytes),
                    }
                }
                OutcomeType::Unsupported => InferenceOutcome::Unsupported { model_name },
            };
            Ok(CacheEntry::Done(outcome))
        }
    }
}
