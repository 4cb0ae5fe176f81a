//! The key-value contract the cache needs from its backing store.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Lifetime of every cache entry, counted from the write.
pub const ENTRY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// The store could not serve a request. Distinct from "no entry", which is
/// `Ok(None)`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Backing store for serialized responses.
///
/// Implementations must be safe to share across connection tasks. They do
/// not add timeouts of their own; a client-level timeout surfaces as a
/// [`StoreError`].
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// `Ok(Some(bytes))` on a hit, `Ok(None)` when the key has no live entry.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Unconditionally writes `value` under `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError>;

    /// Writes `value` only when `key` has no live entry. Returns whether the
    /// write happened.
    ///
    /// The default is a check followed by a write, which can race with a
    /// concurrent writer; backends with an atomic primitive override it.
    async fn set_if_absent(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        if self.get(key).await?.is_some() {
            return Ok(false);
        }
        self.set(key, value, ttl).await?;
        Ok(true)
    }

    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
