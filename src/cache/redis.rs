//! Redis-backed result cache.
//!
//! A single multiplexed [`ConnectionManager`] is shared by every task; it
//! reconnects on its own after a dropped connection. Transient failures are
//! retried with the configured backoff before surfacing as `CacheUnavailable`.

use ::redis::aio::ConnectionManager;
use ::redis::{Client, Cmd, RedisError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::codec::{decode_entry, encode_entry};
use super::ResultCache;
use crate::error::CacheError;
use crate::reliability::{retry_with_backoff, RetryError, RetryPolicy};
use crate::types::{CacheEntry, CorrelationId};

/// A [`ResultCache`] stored in Redis, one string value per correlation id.
#[derive(Clone)]
pub struct RedisResultCache {
    conn: ConnectionManager,
    ttl: Option<Duration>,
    retry: RetryPolicy,
}

impl RedisResultCache {
    /// Connect to Redis, retrying transient connection failures.
    pub async fn connect(
        url: &str,
        ttl: Option<Duration>,
        retry: RetryPolicy,
    ) -> Result<Self, CacheError> {
        let client = Client::open(url)
            .map_err(|e| CacheError::Unavailable(format!("invalid redis url: {}", e)))?;

        let conn = retry_with_backoff(
            &retry,
            "redis connect",
            || ConnectionManager::new(client.clone()),
            is_transient,
        )
        .await
        .map_err(unavailable)?;

        info!("Connected to result cache at {}", url);
        Ok(Self { conn, ttl, retry })
    }

    async fn run<T>(&self, operation: &'static str, cmd: Cmd) -> Result<T, CacheError>
    where
        T: ::redis::FromRedisValue + Send,
    {
        retry_with_backoff(
            &self.retry,
            operation,
            || {
                let cmd = cmd.clone();
                let mut conn = self.conn.clone();
                async move { cmd.query_async::<_, T>(&mut conn).await }
            },
            is_transient,
        )
        .await
        .map_err(unavailable)
    }
}

#[async_trait]
impl ResultCache for RedisResultCache {
    #[instrument(skip(self, entry), fields(inference_id = %id, status = entry.status()))]
    async fn put(&self, id: &CorrelationId, entry: &CacheEntry) -> Result<(), CacheError> {
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(id.as_str()).arg(encode_entry(entry));
        if let Some(ttl) = self.ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }

        self.run::<()>("redis SET", cmd).await?;
        debug!("Stored cache entry");
        Ok(())
    }

    #[instrument(skip(self), fields(inference_id = %id))]
    async fn get(&self, id: &CorrelationId) -> Result<Option<CacheEntry>, CacheError> {
        let mut cmd = ::redis::cmd("GET");
        cmd.arg(id.as_str());

        let value: Option<String> = self.run("redis GET", cmd).await?;
        value
            .map(|text| decode_entry(id.as_str(), &text))
            .transpose()
    }
}

/// Connection-level failures are worth retrying; command errors are not.
fn is_transient(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

fn unavailable(err: RetryError<RedisError>) -> CacheError {
    CacheError::Unavailable(format!(
        "{} (after {} attempts)",
        err.last_error, err.attempts
    ))
}
