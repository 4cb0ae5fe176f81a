//! In-process [`CacheStore`] for running without Redis and for tests.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use moka::Expiry;
use moka::future::Cache;

use super::store::{CacheStore, StoreError};

/// Default bound on the number of entries held by [`MemoryStore::new`].
pub const DEFAULT_MEMORY_CAPACITY: u64 = 100_000;

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Bytes,
    ttl: Duration,
}

/// Expires each entry `ttl` after it was last written.
struct WriteExpiry;

impl Expiry<String, StoredEntry> for WriteExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &StoredEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &StoredEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// Concurrent cache with per-entry expiry and a bounded entry count.
///
/// Expired entries are never returned and are reclaimed by the cache's own
/// housekeeping, whether or not their key is touched again. When the bound
/// is reached, the least valuable entries are evicted first.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Cache<String, StoredEntry>,
}

impl MemoryStore {
    /// Creates a store holding at most [`DEFAULT_MEMORY_CAPACITY`] entries.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }

    /// Creates a store holding at most `max_entries` entries.
    pub fn with_capacity(max_entries: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(WriteExpiry)
            .build();
        Self { entries }
    }

    /// Returns the number of live entries after pending housekeeping
    /// (expiry, eviction) has run.
    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    /// Returns `true` if the store holds no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        Ok(self.entries.get(key).await.map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError> {
        self.entries
            .insert(key.to_owned(), StoredEntry { value, ttl })
            .await;
        Ok(())
    }

    /// Atomic: concurrent callers for one key see exactly one insertion.
    async fn set_if_absent(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let entry = self
            .entries
            .entry(key.to_owned())
            .or_insert_with(async move { StoredEntry { value, ttl } })
            .await;
        Ok(entry.is_fresh())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const SHORT_TTL: Duration = Duration::from_millis(20);

    async fn outlive_short_ttl() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn get_distinguishes_missing_from_present() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", Bytes::from_static(b"v"), Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from_static(b"v")));
    }

    #[tokio::test]
    async fn expired_entries_read_as_missing() {
        let store = MemoryStore::new();
        store.set("k", Bytes::from_static(b"v"), SHORT_TTL).await.unwrap();
        outlive_short_ttl().await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_untouched_entries_are_reclaimed() {
        let store = MemoryStore::new();
        for i in 0..50 {
            store
                .set(&format!("orders-{i}"), Bytes::from_static(b"v"), SHORT_TTL)
                .await
                .unwrap();
        }
        store
            .set("long-lived", Bytes::from_static(b"v"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.len().await, 51);

        // Housekeeping works on a coarse timer wheel; wait out a few ticks.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn capacity_bounds_the_entry_count() {
        let store = MemoryStore::with_capacity(10);
        for i in 0..100 {
            store
                .set(&format!("k{i}"), Bytes::from_static(b"v"), Duration::from_secs(60))
                .await
                .unwrap();
        }
        assert!(store.len().await <= 10);
    }

    #[tokio::test]
    async fn set_if_absent_never_overwrites_live_entry() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        assert!(store.set_if_absent("k", Bytes::from_static(b"first"), ttl).await.unwrap());
        assert!(!store.set_if_absent("k", Bytes::from_static(b"second"), ttl).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from_static(b"first")));
    }

    #[tokio::test]
    async fn set_if_absent_replaces_expired_entry() {
        let store = MemoryStore::new();
        store.set("k", Bytes::from_static(b"old"), SHORT_TTL).await.unwrap();
        outlive_short_ttl().await;
        assert!(
            store
                .set_if_absent("k", Bytes::from_static(b"new"), Duration::from_secs(60))
                .await
                .unwrap()
        );
        assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from_static(b"new")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_leave_one_entry() {
        let store = Arc::new(MemoryStore::new());
        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                let value = Bytes::from(format!("writer-{i}"));
                store.set_if_absent("shared", value, Duration::from_secs(60)).await.unwrap()
            }));
        }

        let mut written = 0;
        for task in tasks {
            if task.await.unwrap() {
                written += 1;
            }
        }
        assert_eq!(written, 1);
        assert_eq!(store.len().await, 1);
        let value = store.get("shared").await.unwrap().unwrap();
        assert!(value.starts_with(b"writer-"));
    }
}
