//! Cache store contract and shared bookkeeping.

use crate::CacheKey;
use blobgate_core::FileMetadata;
use blobgate_error::{CacheError, CacheErrorKind, CacheResult};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// One cached payload with the metadata snapshot it was stored with.
#[derive(Debug, Clone, PartialEq, Getters)]
pub struct CacheEntry {
    /// Key the entry is stored under
    key: CacheKey,
    /// Cached bytes
    payload: Bytes,
    /// Metadata snapshot taken when the entry was stored
    metadata: FileMetadata,
    /// When the entry was written
    stored_at: DateTime<Utc>,
    /// When the entry was last read
    last_access_at: DateTime<Utc>,
    /// Payload length
    size_bytes: u64,
}

impl CacheEntry {
    pub(crate) fn new(
        key: CacheKey,
        payload: Bytes,
        record: EntryRecord,
        last_access_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            payload,
            metadata: record.metadata,
            stored_at: record.stored_at,
            last_access_at,
            size_bytes: record.size_bytes,
        }
    }

    /// Consume the entry, returning payload and metadata.
    pub fn into_parts(self) -> (Bytes, FileMetadata) {
        (self.payload, self.metadata)
    }
}

/// Serialized companion of a payload: the sidecar on disk, the `:meta` value remotely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EntryRecord {
    pub(crate) metadata: FileMetadata,
    pub(crate) stored_at: DateTime<Utc>,
    pub(crate) last_access_at: DateTime<Utc>,
    pub(crate) size_bytes: u64,
}

impl EntryRecord {
    pub(crate) fn fresh(metadata: &FileMetadata, size_bytes: u64) -> Self {
        let now = Utc::now();
        Self {
            metadata: metadata.clone(),
            stored_at: now,
            last_access_at: now,
            size_bytes,
        }
    }

    pub(crate) fn is_expired(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        is_stale(self.stored_at, max_age, now)
    }

    pub(crate) fn encode(&self) -> CacheResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| CacheError::new(CacheErrorKind::Serialization(e.to_string())))
    }

    pub(crate) fn decode(raw: &[u8]) -> CacheResult<Self> {
        serde_json::from_slice(raw)
            .map_err(|e| CacheError::new(CacheErrorKind::Serialization(e.to_string())))
    }
}

pub(crate) fn is_stale(stored_at: DateTime<Utc>, max_age: Duration, now: DateTime<Utc>) -> bool {
    let age = now.signed_duration_since(stored_at);
    age.to_std().is_ok_and(|age| age > max_age)
}

/// Point-in-time cache counters.
///
/// `hit_ratio` is `hits / (hits + misses)` and `error_rate` is
/// `errors / (hits + misses)`; both are zero before any lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters)]
pub struct CacheStats {
    /// Lookups answered from the cache
    hits: u64,
    /// Lookups that found nothing usable
    misses: u64,
    /// Failed cache operations
    errors: u64,
    /// Total payload bytes currently stored
    size_bytes: u64,
    /// Share of lookups that hit
    hit_ratio: f64,
    /// Errors per lookup
    error_rate: f64,
}

/// Hit, miss and error counters shared by every store.
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, size_bytes: u64) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let ratio = |n: u64| {
            if lookups == 0 {
                0.0
            } else {
                n as f64 / lookups as f64
            }
        };
        CacheStats {
            hits,
            misses,
            errors,
            size_bytes,
            hit_ratio: ratio(hits),
            error_rate: ratio(errors),
        }
    }
}

/// Bound a cache I/O call by `limit`.
pub(crate) async fn with_timeout<T, F>(limit: Duration, operation: &str, fut: F) -> CacheResult<T>
where
    F: Future<Output = CacheResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CacheError::new(CacheErrorKind::Timeout(format!(
            "{} exceeded {}ms",
            operation,
            limit.as_millis()
        )))),
    }
}

/// Content-addressed byte store with an age bound and a size bound.
///
/// Lookups and writes never fail from the caller's point of view: I/O and
/// serialization problems are logged, counted as errors and reported as a
/// miss (or as a skipped write). Implementations must be interchangeable.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync + std::fmt::Debug {
    /// Store name for logs, e.g. `"disk"`.
    fn name(&self) -> &str;

    /// Fetch a live entry, refreshing its access time.
    ///
    /// Entries older than the store's maximum age are deleted and reported
    /// as a miss.
    async fn get(&self, key: &CacheKey) -> Option<CacheEntry>;

    /// Store `payload` under `key`, evicting least recently used entries
    /// first when the size bound would be exceeded.
    ///
    /// Returns `false` if the entry was not written.
    async fn put(&self, key: &CacheKey, payload: Bytes, metadata: &FileMetadata) -> bool;

    /// Remove one entry. Returns whether it was present.
    async fn remove(&self, key: &CacheKey) -> bool;

    /// Delete every entry past the maximum age. Returns how many were removed.
    async fn purge_expired(&self) -> usize;

    /// Current counters and stored size.
    async fn stats(&self) -> CacheStats;
}
