//! Per-backend operation counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a backend's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_getters::Getters)]
pub struct StorageStats {
    /// Successful saves
    uploads: u64,
    /// Successful gets
    downloads: u64,
    /// Deletes that removed an object
    deletes: u64,
    /// Failed operations of any kind
    errors: u64,
    /// Bytes written by successful saves
    bytes_uploaded: u64,
    /// Bytes returned by successful gets
    bytes_downloaded: u64,
    /// When the snapshot was taken
    captured_at: DateTime<Utc>,
}

/// Sink for backend operation counters.
///
/// Counts are best-effort; readers may observe a snapshot that lags
/// concurrent updates.
pub trait StatsCollector: Send + Sync + std::fmt::Debug {
    /// Record a successful save of `bytes` bytes.
    fn record_upload(&self, bytes: u64);
    /// Record a successful get of `bytes` bytes.
    fn record_download(&self, bytes: u64);
    /// Record a delete that removed an object.
    fn record_delete(&self);
    /// Record a failed operation.
    fn record_error(&self);
    /// Read the current counters.
    fn snapshot(&self) -> StorageStats;
}

/// Lock-free [`StatsCollector`] backed by atomics.
///
/// # Examples
///
/// ```
/// use blobgate_storage::{AtomicStatsCollector, StatsCollector};
///
/// let stats = AtomicStatsCollector::default();
/// stats.record_upload(128);
/// stats.record_error();
/// let snap = stats.snapshot();
/// assert_eq!(*snap.uploads(), 1);
/// assert_eq!(*snap.bytes_uploaded(), 128);
/// assert_eq!(*snap.errors(), 1);
/// ```
#[derive(Debug, Default)]
pub struct AtomicStatsCollector {
    uploads: AtomicU64,
    downloads: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
    bytes_uploaded: AtomicU64,
    bytes_downloaded: AtomicU64,
}

impl StatsCollector for AtomicStatsCollector {
    fn record_upload(&self, bytes: u64) {
        self.uploads.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_download(&self, bytes: u64) {
        self.downloads.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StorageStats {
        StorageStats {
            uploads: self.uploads.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            captured_at: Utc::now(),
        }
    }
}
