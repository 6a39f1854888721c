//! In-process result cache for tests and single-process development.

use async_trait::async_trait;
use dashmap::DashMap;

use super::codec::{decode_entry, encode_entry};
use super::ResultCache;
use crate::error::CacheError;
use crate::types::{CacheEntry, CorrelationId};

/// A [`ResultCache`] backed by a concurrent map of encoded entries.
#[derive(Debug, Default)]
pub struct InMemoryResultCache {
    entries: DashMap<String, String>,
}

impl InMemoryResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The raw stored text for `id`, as an external reader would see it.
    pub fn raw(&self, id: &CorrelationId) -> Option<String> {
        self.entries.get(id.as_str()).map(|value| value.clone())
    }
}

#[async_trait]
impl ResultCache for InMemoryResultCache {
    async fn put(&self, id: &CorrelationId, entry: &CacheEntry) -> Result<(), CacheError> {
        self.entries
            .insert(id.as_str().to_string(), encode_entry(entry));
        Ok(())
    }

    async fn get(&self, id: &CorrelationId) -> Result<Option<CacheEntry>, CacheError> {
        let Some(text) = self.raw(id) else {
            return Ok(None);
        };
        decode_entry(id.as_str(), &text).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InferenceOutcome;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_unknown_id_is_none() {
        let cache = InMemoryResultCache::new();
        let entry = cache.get(&CorrelationId::generate()).await.unwrap();
        assert!(entry.is_none());
    }

    #[tokio::test]
    async fn test_terminal_write_is_idempotent() {
        let cache = InMemoryResultCache::new();
        let id = CorrelationId::generate();
        let done = CacheEntry::Done(InferenceOutcome::Structured {
            model_name: "resnet".into(),
            results: vec![serde_json::json!({"label": "cat"})],
        });

        cache.put(&id, &CacheEntry::Pending).await.unwrap();
        cache.put(&id, &done).await.unwrap();
        cache.put(&id, &done).await.unwrap();

        assert_eq!(cache.get(&id).await.unwrap(), Some(done));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_binary_outcome_is_stored_as_text() {
        let cache = InMemoryResultCache::new();
        let id = CorrelationId::generate();
        let entry = CacheEntry::Done(InferenceOutcome::Binary {
            model_name: "upscaler".into(),
            content_type: "image/jpeg".into(),
            bytes: Bytes::from_static(&[0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10]),
        });

        cache.put(&id, &entry).await.unwrap();

        let raw = cache.raw(&id).unwrap();
        assert!(raw.contains(r#""content":"/9j/4AAQ""#));
        assert_eq!(cache.get(&id).await.unwrap(), Some(entry));
    }
}
