//! Cache store backed by a local directory.
//!
//! Each entry is two files named by its key: `{key}` holds the payload and
//! `{key}.meta` holds the JSON record. An in-memory index of sizes and access
//! order is rebuilt from the sidecars when the store is opened.

use crate::store::{CacheCounters, EntryRecord, is_stale, with_timeout};
use crate::{CacheEntry, CacheKey, CacheStats, CacheStore, DiskCacheConfig};
use blobgate_core::FileMetadata;
use blobgate_error::{CacheError, CacheErrorKind, CacheResult};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

const META_SUFFIX: &str = ".meta";

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    size: u64,
    stored_at: DateTime<Utc>,
    access: u64,
}

/// Sizes and access order of every entry on disk.
///
/// Access order is a sequence number rather than a timestamp so that two
/// touches within the same clock tick still order deterministically.
#[derive(Debug, Default)]
struct DiskIndex {
    entries: HashMap<CacheKey, IndexEntry>,
    total: u64,
    clock: u64,
}

impl DiskIndex {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn insert(&mut self, key: CacheKey, size: u64, stored_at: DateTime<Utc>) {
        let access = self.tick();
        if let Some(old) = self.entries.insert(
            key,
            IndexEntry {
                size,
                stored_at,
                access,
            },
        ) {
            self.total = self.total.saturating_sub(old.size);
        }
        self.total += size;
    }

    fn touch(&mut self, key: &CacheKey) {
        let access = self.tick();
        if let Some(entry) = self.entries.get_mut(key) {
            entry.access = access;
        }
    }

    fn remove(&mut self, key: &CacheKey) -> Option<IndexEntry> {
        let removed = self.entries.remove(key)?;
        self.total = self.total.saturating_sub(removed.size);
        Some(removed)
    }

    /// Remove least recently used entries, other than `keep`, until
    /// `incoming` more bytes fit under `limit`.
    fn evict_for(&mut self, keep: &CacheKey, incoming: u64, limit: u64) -> Vec<CacheKey> {
        let replaced = self.entries.get(keep).map_or(0, |e| e.size);
        let mut victims = Vec::new();
        while self.total.saturating_sub(replaced) + incoming > limit {
            let oldest = self
                .entries
                .iter()
                .filter(|(key, _)| *key != keep)
                .min_by_key(|(_, entry)| entry.access)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    self.remove(&key);
                    victims.push(key);
                }
                None => break,
            }
        }
        victims
    }
}

/// [`CacheStore`] keeping entries as files in one directory.
///
/// # Example
///
/// ```rust
/// use blobgate_cache::{CacheKey, CacheStore, DiskCacheConfig, DiskCacheStore};
/// use blobgate_core::FileMetadata;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = DiskCacheStore::open(DiskCacheConfig::default().with_dir("/tmp/blobgate-doc".into())).await?;
///
/// let payload = bytes::Bytes::from_static(b"hello");
/// let metadata = FileMetadata::for_payload("text/plain", "txt", &payload);
/// let key = CacheKey::derive(&payload, "text/plain", "txt");
///
/// store.put(&key, payload.clone(), &metadata).await;
/// let entry = store.get(&key).await.expect("fresh entry");
/// assert_eq!(entry.payload(), &payload);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DiskCacheStore {
    dir: PathBuf,
    max_age: Duration,
    max_size: u64,
    op_timeout: Duration,
    index: Mutex<DiskIndex>,
    counters: CacheCounters,
}

fn io_error(err: std::io::Error, path: &Path) -> CacheError {
    CacheError::new(CacheErrorKind::Io(format!("{}: {}", path.display(), err)))
}

impl DiskCacheStore {
    /// Open (or create) a cache directory and index its existing entries.
    ///
    /// Unreadable sidecars and payloads without a sidecar are skipped and
    /// left for [`CacheStore::purge_expired`] or overwrite.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory cannot be created or read.
    #[tracing::instrument(skip(config), fields(dir = %config.dir().display()))]
    pub async fn open(config: DiskCacheConfig) -> CacheResult<Self> {
        let dir = config.dir().clone();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(e, &dir))?;

        let mut found = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| io_error(e, &dir))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(e, &dir))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".tmp") {
                let _ = tokio::fs::remove_file(entry.path()).await;
                continue;
            }
            let Some(key) = name.strip_suffix(META_SUFFIX).and_then(CacheKey::parse) else {
                continue;
            };
            let record = match tokio::fs::read(entry.path()).await {
                Ok(raw) => match EntryRecord::decode(&raw) {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Skipping unreadable cache sidecar");
                        continue;
                    }
                },
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping unreadable cache sidecar");
                    continue;
                }
            };
            if tokio::fs::try_exists(dir.join(key.as_str()))
                .await
                .unwrap_or(false)
            {
                found.push((key, record));
            }
        }

        // Replay in access order so the rebuilt sequence matches recency
        found.sort_by_key(|(_, record)| record.last_access_at);
        let mut index = DiskIndex::default();
        for (key, record) in found {
            index.insert(key, record.size_bytes, record.stored_at);
        }

        tracing::info!(
            entries = index.entries.len(),
            size_bytes = index.total,
            "Opened disk cache"
        );

        Ok(Self {
            max_age: config.max_age(),
            max_size: *config.max_size_bytes(),
            op_timeout: config.op_timeout(),
            dir,
            index: Mutex::new(index),
            counters: CacheCounters::default(),
        })
    }

    /// Directory holding the cache files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn index(&self) -> MutexGuard<'_, DiskIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn payload_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.as_str())
    }

    fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}{}", key, META_SUFFIX))
    }

    async fn delete_files(&self, key: &CacheKey) {
        for path in [self.payload_path(key), self.meta_path(key)] {
            if let Err(e) = tokio::fs::remove_file(&path).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(path = %path.display(), error = %e, "Failed to delete cache file");
            }
        }
    }

    async fn write_atomic(&self, target: PathBuf, data: &[u8]) -> CacheResult<()> {
        let temp = self
            .dir
            .join(format!(".{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&temp, data)
            .await
            .map_err(|e| io_error(e, &temp))?;
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(io_error(e, &target));
        }
        Ok(())
    }

    async fn read_entry(&self, key: &CacheKey) -> CacheResult<(Vec<u8>, EntryRecord)> {
        let payload_path = self.payload_path(key);
        let meta_path = self.meta_path(key);
        let payload = tokio::fs::read(&payload_path)
            .await
            .map_err(|e| io_error(e, &payload_path))?;
        let raw = tokio::fs::read(&meta_path)
            .await
            .map_err(|e| io_error(e, &meta_path))?;
        Ok((payload, EntryRecord::decode(&raw)?))
    }

    async fn write_entry(&self, key: &CacheKey, payload: &[u8], record: &EntryRecord) -> CacheResult<()> {
        // Payload first: a sidecar always points at a complete payload
        self.write_atomic(self.payload_path(key), payload).await?;
        self.write_atomic(self.meta_path(key), &record.encode()?).await
    }
}

#[async_trait::async_trait]
impl CacheStore for DiskCacheStore {
    fn name(&self) -> &str {
        "disk"
    }

    #[tracing::instrument(skip(self), fields(store = "disk"))]
    async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let now = Utc::now();
        let indexed = self.index().entries.get(key).copied();
        let Some(indexed) = indexed else {
            self.counters.miss();
            tracing::debug!("Cache miss");
            return None;
        };

        if is_stale(indexed.stored_at, self.max_age, now) {
            self.index().remove(key);
            self.delete_files(key).await;
            self.counters.miss();
            tracing::debug!("Cache entry expired");
            return None;
        }

        let (payload, mut record) =
            match with_timeout(self.op_timeout, "read", self.read_entry(key)).await {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!(error = %e, "Cache read failed, treating as miss");
                    self.index().remove(key);
                    self.counters.error();
                    self.counters.miss();
                    return None;
                }
            };

        self.index().touch(key);
        record.last_access_at = now;
        if let Ok(encoded) = record.encode()
            && let Err(e) = with_timeout(
                self.op_timeout,
                "touch",
                self.write_atomic(self.meta_path(key), &encoded),
            )
            .await
        {
            tracing::debug!(error = %e, "Failed to persist access time");
        }

        self.counters.hit();
        tracing::debug!(size = payload.len(), "Cache hit");
        Some(CacheEntry::new(key.clone(), Bytes::from(payload), record, now))
    }

    #[tracing::instrument(skip(self, payload, metadata), fields(store = "disk", size = payload.len()))]
    async fn put(&self, key: &CacheKey, payload: Bytes, metadata: &FileMetadata) -> bool {
        let size = payload.len() as u64;
        if size > self.max_size {
            tracing::debug!(max_size = self.max_size, "Payload larger than cache, skipping");
            return false;
        }

        // Make room before writing
        let victims = self.index().evict_for(key, size, self.max_size);
        for victim in &victims {
            self.delete_files(victim).await;
        }
        if !victims.is_empty() {
            tracing::info!(evicted = victims.len(), "Evicted least recently used entries");
        }

        let record = EntryRecord::fresh(metadata, size);
        match with_timeout(self.op_timeout, "write", self.write_entry(key, &payload, &record)).await {
            Ok(()) => {
                self.index().insert(key.clone(), size, record.stored_at);
                tracing::debug!("Cached entry");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cache write failed, skipping");
                self.counters.error();
                false
            }
        }
    }

    #[tracing::instrument(skip(self), fields(store = "disk"))]
    async fn remove(&self, key: &CacheKey) -> bool {
        let removed = self.index().remove(key).is_some();
        self.delete_files(key).await;
        removed
    }

    #[tracing::instrument(skip(self), fields(store = "disk"))]
    async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<CacheKey> = {
            let mut index = self.index();
            let keys: Vec<CacheKey> = index
                .entries
                .iter()
                .filter(|(_, entry)| is_stale(entry.stored_at, self.max_age, now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &keys {
                index.remove(key);
            }
            keys
        };
        for key in &expired {
            self.delete_files(key).await;
        }
        if !expired.is_empty() {
            tracing::info!(purged = expired.len(), "Purged expired cache entries");
        }
        expired.len()
    }

    async fn stats(&self) -> CacheStats {
        let size = self.index().total;
        self.counters.snapshot(size)
    }
}
