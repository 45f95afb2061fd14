//! Content-addressed payload caches for Blobgate.
//!
//! A [`CacheStore`] maps a [`CacheKey`] (derived from the payload hash plus
//! its content type, extension and size) to the payload and a metadata
//! snapshot. Two stores share the contract:
//!
//! - [`DiskCacheStore`]: payload and sidecar files in a local directory
//! - [`RemoteCacheStore`]: any [`KvClient`], with [`RedisKv`] for Redis and
//!   [`MemoryKv`] for a process-local map
//!
//! Both bound entry age and total size, evicting least recently used
//! entries before a write that would exceed the size bound. Failures are
//! logged and reported as misses.
//!
//! # Example
//!
//! ```rust
//! use blobgate_cache::{CacheBackendConfig, CacheKey, RemoteCacheConfig};
//! use blobgate_core::FileMetadata;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CacheBackendConfig::Remote(
//!     RemoteCacheConfig::default().with_url("memory://".to_string()),
//! );
//! let cache = config.open().await?;
//!
//! let payload = bytes::Bytes::from_static(b"report");
//! let metadata = FileMetadata::for_payload("text/plain", "txt", &payload);
//! let key = CacheKey::derive(&payload, "text/plain", "txt");
//!
//! cache.put(&key, payload, &metadata).await;
//! assert!(cache.get(&key).await.is_some());
//! assert_eq!(*cache.stats().await.hits(), 1);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod disk;
mod key;
mod kv;
mod remote;
mod store;

pub use config::{
    CacheBackendConfig, DiskCacheConfig, DiskCacheConfigBuilder, RemoteCacheConfig,
    RemoteCacheConfigBuilder,
};
pub use disk::DiskCacheStore;
pub use key::CacheKey;
pub use kv::{KvClient, MemoryKv, RedisKv};
pub use remote::RemoteCacheStore;
pub use store::{CacheEntry, CacheStats, CacheStore};

// Re-export error types from blobgate_error
pub use blobgate_error::{CacheError, CacheErrorKind, CacheResult};
