//! Result cache keyed by correlation id.
//!
//! The worker writes terminal entries, the dispatcher writes `Pending` and serves
//! polls. Both implementations store the text produced by [`codec::encode_entry`],
//! so binary outcomes survive a text-only store.

pub mod codec;
mod memory;
mod redis;

use async_trait::async_trait;

use crate::error::CacheError;
use crate::types::{CacheEntry, CorrelationId};

pub use self::memory::InMemoryResultCache;
pub use self::redis::RedisResultCache;

/// Key-value store of request status snapshots.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Store `entry` under `id`, overwriting any previous value in one write.
    async fn put(&self, id: &CorrelationId, entry: &CacheEntry) -> Result<(), CacheError>;

    /// Look up the entry for `id`; `None` means the id is unknown.
    async fn get(&self, id: &CorrelationId) -> Result<Option<CacheEntry>, CacheError>;
}
