//! Cache store configuration and construction.

use crate::store::with_timeout;
use crate::{CacheStore, DiskCacheStore, MemoryKv, RedisKv, RemoteCacheStore};
use blobgate_error::CacheResult;
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn default_max_age_secs() -> u64 {
    3600
}

fn default_max_size_bytes() -> u64 {
    1024 * 1024 * 1024
}

fn default_op_timeout_ms() -> u64 {
    5_000
}

fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("blobgate-cache")
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_prefix() -> String {
    "blob_service_cache:".to_string()
}

/// Options for [`DiskCacheStore`].
#[derive(
    Debug,
    Clone,
    PartialEq,
    Serialize,
    Deserialize,
    Getters,
    derive_setters::Setters,
    derive_builder::Builder,
)]
#[setters(prefix = "with_")]
#[builder(default)]
pub struct DiskCacheConfig {
    /// Directory holding payload and sidecar files
    #[serde(default = "default_cache_dir")]
    dir: PathBuf,
    /// Entries older than this are treated as misses (seconds)
    #[serde(default = "default_max_age_secs")]
    max_age_secs: u64,
    /// Upper bound on stored payload bytes
    #[serde(default = "default_max_size_bytes")]
    max_size_bytes: u64,
    /// Deadline for each file operation (milliseconds)
    #[serde(default = "default_op_timeout_ms")]
    op_timeout_ms: u64,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            max_age_secs: default_max_age_secs(),
            max_size_bytes: default_max_size_bytes(),
            op_timeout_ms: default_op_timeout_ms(),
        }
    }
}

impl DiskCacheConfig {
    pub(crate) fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub(crate) fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

/// Options for [`RemoteCacheStore`].
#[derive(
    Debug,
    Clone,
    PartialEq,
    Serialize,
    Deserialize,
    Getters,
    derive_setters::Setters,
    derive_builder::Builder,
)]
#[setters(prefix = "with_")]
#[builder(default)]
pub struct RemoteCacheConfig {
    /// Redis connection URL, or `memory://` for a process-local store
    #[serde(default = "default_redis_url")]
    url: String,
    /// Namespace prepended to every key
    #[serde(default = "default_prefix")]
    prefix: String,
    /// Entries older than this are treated as misses (seconds)
    #[serde(default = "default_max_age_secs")]
    max_age_secs: u64,
    /// Upper bound on stored payload bytes
    #[serde(default = "default_max_size_bytes")]
    max_size_bytes: u64,
    /// Deadline for each remote call (milliseconds)
    #[serde(default = "default_op_timeout_ms")]
    op_timeout_ms: u64,
}

impl Default for RemoteCacheConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            prefix: default_prefix(),
            max_age_secs: default_max_age_secs(),
            max_size_bytes: default_max_size_bytes(),
            op_timeout_ms: default_op_timeout_ms(),
        }
    }
}

impl RemoteCacheConfig {
    pub(crate) fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub(crate) fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

/// Which cache store to open.
///
/// # Example
///
/// ```toml
/// [cache]
/// backend = "remote"
/// url = "redis://cache.internal:6379"
/// max_age_secs = 600
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum CacheBackendConfig {
    /// Files in a local directory
    Disk(DiskCacheConfig),
    /// A key/value service
    Remote(RemoteCacheConfig),
}

impl Default for CacheBackendConfig {
    fn default() -> Self {
        Self::Disk(DiskCacheConfig::default())
    }
}

impl CacheBackendConfig {
    /// Open the configured store.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be prepared or the
    /// remote service cannot be reached.
    pub async fn open(&self) -> CacheResult<Arc<dyn CacheStore>> {
        match self {
            Self::Disk(config) => Ok(Arc::new(DiskCacheStore::open(config.clone()).await?)),
            Self::Remote(config) if config.url().starts_with("memory://") => Ok(Arc::new(
                RemoteCacheStore::new(Arc::new(MemoryKv::default()), config.clone()),
            )),
            Self::Remote(config) => {
                let client =
                    with_timeout(config.op_timeout(), "connect", RedisKv::connect(config.url()))
                        .await?;
                Ok(Arc::new(RemoteCacheStore::new(Arc::new(client), config.clone())))
            }
        }
    }
}
