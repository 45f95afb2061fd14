//! Cache store backed by a key/value service.
//!
//! Key layout under the configured prefix:
//!
//! | Key | Value |
//! |---|---|
//! | `{prefix}{key}:data` | payload bytes |
//! | `{prefix}{key}:meta` | JSON entry record |
//! | `{prefix}__lru` | sorted set of keys scored by access clock |
//! | `{prefix}__clock` | monotonically increasing access clock |
//! | `{prefix}__size` | total payload bytes |
//!
//! The size counter only moves by sizes read back from atomic swaps of
//! the meta key (`SET ... GET` and `GETDEL`), so it tracks the records
//! actually stored even when writers race.

use crate::store::{CacheCounters, EntryRecord, with_timeout};
use crate::{CacheEntry, CacheKey, CacheStats, CacheStore, KvClient, RemoteCacheConfig};
use blobgate_core::FileMetadata;
use blobgate_error::CacheResult;
use bytes::Bytes;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Candidates fetched per eviction round.
const EVICTION_BATCH: isize = 16;

/// [`CacheStore`] over any [`KvClient`], typically Redis.
///
/// Expiry is checked against the stored timestamp in each record rather
/// than relying on server-side TTLs.
#[derive(Debug)]
pub struct RemoteCacheStore {
    client: Arc<dyn KvClient>,
    prefix: String,
    max_age: Duration,
    max_size: u64,
    op_timeout: Duration,
    counters: CacheCounters,
}

impl RemoteCacheStore {
    /// Create a store over `client`.
    pub fn new(client: Arc<dyn KvClient>, config: RemoteCacheConfig) -> Self {
        tracing::debug!(
            prefix = %config.prefix(),
            max_age_secs = config.max_age_secs(),
            max_size_bytes = config.max_size_bytes(),
            "Creating remote cache store"
        );
        Self {
            client,
            max_age: config.max_age(),
            max_size: *config.max_size_bytes(),
            op_timeout: config.op_timeout(),
            prefix: config.prefix().clone(),
            counters: CacheCounters::default(),
        }
    }

    fn data_key(&self, key: &str) -> String {
        format!("{}{}:data", self.prefix, key)
    }

    fn meta_key(&self, key: &str) -> String {
        format!("{}{}:meta", self.prefix, key)
    }

    fn lru_key(&self) -> String {
        format!("{}__lru", self.prefix)
    }

    fn clock_key(&self) -> String {
        format!("{}__clock", self.prefix)
    }

    fn size_key(&self) -> String {
        format!("{}__size", self.prefix)
    }

    async fn call<T, F>(&self, operation: &str, fut: F) -> CacheResult<T>
    where
        F: Future<Output = CacheResult<T>>,
    {
        with_timeout(self.op_timeout, operation, fut).await
    }

    async fn read_record(&self, key: &str) -> CacheResult<Option<EntryRecord>> {
        match self.call("get meta", self.client.get(&self.meta_key(key))).await? {
            Some(raw) => Ok(Some(EntryRecord::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Delete an entry and release the bytes its record accounted for.
    ///
    /// The record is taken with a single get-and-delete, so concurrent
    /// removals of one key release its size once. Returns whether a record
    /// was present.
    async fn drop_entry(&self, key: &str) -> CacheResult<bool> {
        self.call("del", self.client.del(&[self.data_key(key)]))
            .await?;
        let taken = self
            .call("getdel meta", self.client.get_del(&self.meta_key(key)))
            .await?;
        self.call("zrem", self.client.zrem(&self.lru_key(), key))
            .await?;
        let Some(raw) = taken else {
            return Ok(false);
        };
        let size = EntryRecord::decode(&raw).map_or(0, |r| r.size_bytes);
        if size > 0 {
            self.call(
                "incrby",
                self.client.incr_by(&self.size_key(), -(size as i64)),
            )
            .await?;
        }
        Ok(true)
    }

    async fn touch(&self, key: &str) -> CacheResult<()> {
        let clock = self
            .call("incr clock", self.client.incr_by(&self.clock_key(), 1))
            .await?;
        self.call("zadd", self.client.zadd(&self.lru_key(), key, clock))
            .await
    }

    async fn stored_size(&self) -> CacheResult<u64> {
        let raw = self.call("get size", self.client.get(&self.size_key())).await?;
        Ok(raw
            .and_then(|v| String::from_utf8(v).ok())
            .and_then(|v| v.parse::<i64>().ok())
            .map_or(0, |v| v.max(0) as u64))
    }

    async fn try_get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let now = Utc::now();
        let Some(mut record) = self.read_record(key.as_str()).await? else {
            return Ok(None);
        };
        if record.is_expired(self.max_age, now) {
            tracing::debug!("Cache entry expired");
            self.drop_entry(key.as_str()).await?;
            return Ok(None);
        }
        let Some(payload) = self
            .call("get data", self.client.get(&self.data_key(key.as_str())))
            .await?
        else {
            // Record without payload: clean up the orphan
            self.drop_entry(key.as_str()).await?;
            return Ok(None);
        };

        self.touch(key.as_str()).await?;
        record.last_access_at = now;
        Ok(Some(CacheEntry::new(key.clone(), Bytes::from(payload), record, now)))
    }

    /// Evict least recently used entries until `incoming` bytes fit.
    async fn make_room(&self, keep: &str, replaced: u64, incoming: u64) -> CacheResult<usize> {
        let mut evicted = 0;
        loop {
            let current = self.stored_size().await?;
            if current.saturating_sub(replaced) + incoming <= self.max_size {
                return Ok(evicted);
            }
            let candidates = self
                .call(
                    "zrange",
                    self.client.zrange(&self.lru_key(), 0, EVICTION_BATCH - 1),
                )
                .await?;
            let Some(victim) = candidates.into_iter().find(|k| k != keep) else {
                return Ok(evicted);
            };
            self.drop_entry(&victim).await?;
            evicted += 1;
        }
    }

    async fn try_remove(&self, key: &CacheKey) -> CacheResult<bool> {
        self.drop_entry(key.as_str()).await
    }

    async fn try_put(&self, key: &CacheKey, payload: Bytes, metadata: &FileMetadata) -> CacheResult<()> {
        let size = payload.len() as u64;
        let replaced = self
            .read_record(key.as_str())
            .await?
            .map_or(0, |r| r.size_bytes);

        let evicted = self.make_room(key.as_str(), replaced, size).await?;
        if evicted > 0 {
            tracing::info!(evicted, "Evicted least recently used entries");
        }

        let record = EntryRecord::fresh(metadata, size);
        self.call(
            "set data",
            self.client.set(&self.data_key(key.as_str()), payload.to_vec()),
        )
        .await?;
        // The size delta comes from the record this write displaced, not the
        // one read above, so racing writers of one key count it once.
        let displaced = self
            .call(
                "set meta",
                self.client
                    .set_get(&self.meta_key(key.as_str()), record.encode()?),
            )
            .await?
            .and_then(|raw| EntryRecord::decode(&raw).ok())
            .map_or(0, |r| r.size_bytes);
        let delta = size as i64 - displaced as i64;
        if delta != 0 {
            self.call("incrby", self.client.incr_by(&self.size_key(), delta))
                .await?;
        }
        self.touch(key.as_str()).await
    }
}

#[async_trait::async_trait]
impl CacheStore for RemoteCacheStore {
    fn name(&self) -> &str {
        "remote"
    }

    #[tracing::instrument(skip(self), fields(store = "remote"))]
    async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.try_get(key).await {
            Ok(Some(entry)) => {
                self.counters.hit();
                tracing::debug!(size = entry.payload().len(), "Cache hit");
                Some(entry)
            }
            Ok(None) => {
                self.counters.miss();
                tracing::debug!("Cache miss");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Remote cache read failed, treating as miss");
                self.counters.error();
                self.counters.miss();
                None
            }
        }
    }

    #[tracing::instrument(skip(self, payload, metadata), fields(store = "remote", size = payload.len()))]
    async fn put(&self, key: &CacheKey, payload: Bytes, metadata: &FileMetadata) -> bool {
        if payload.len() as u64 > self.max_size {
            tracing::debug!(max_size = self.max_size, "Payload larger than cache, skipping");
            return false;
        }
        match self.try_put(key, payload, metadata).await {
            Ok(()) => {
                tracing::debug!("Cached entry");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Remote cache write failed, skipping");
                self.counters.error();
                false
            }
        }
    }

    #[tracing::instrument(skip(self), fields(store = "remote"))]
    async fn remove(&self, key: &CacheKey) -> bool {
        self.try_remove(key).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Remote cache remove failed");
            self.counters.error();
            false
        })
    }

    #[tracing::instrument(skip(self), fields(store = "remote"))]
    async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let members = match self
            .call("zrange", self.client.zrange(&self.lru_key(), 0, -1))
            .await
        {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list remote cache entries");
                self.counters.error();
                return 0;
            }
        };

        let mut purged = 0;
        for member in members {
            let outcome = match self.read_record(&member).await {
                Ok(Some(record)) if record.is_expired(self.max_age, now) => {
                    self.drop_entry(&member).await
                }
                Ok(Some(_)) => Ok(false),
                // Orphaned LRU member
                Ok(None) => self.drop_entry(&member).await.map(|_| false),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(true) => purged += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(key = %member, error = %e, "Failed to purge remote cache entry");
                    self.counters.error();
                }
            }
        }
        if purged > 0 {
            tracing::info!(purged, "Purged expired cache entries");
        }
        purged
    }

    async fn stats(&self) -> CacheStats {
        let size = match self.stored_size().await {
            Ok(size) => size,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read remote cache size");
                0
            }
        };
        self.counters.snapshot(size)
    }
}
