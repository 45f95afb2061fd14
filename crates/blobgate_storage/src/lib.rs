//! Pluggable blob storage backends for Blobgate.
//!
//! Every destination implements [`StorageBackend`]: save, fetch, delete,
//! existence checks, lazy listing and URL generation over caller-relative
//! paths. Backends are selected by name through [`StorageFactory`] and
//! wrapped in a [`ManagedBackend`] that adds per-call timeouts, bounded
//! retries for idempotent reads and operation counters.
//!
//! # Backends
//!
//! - **local**: a directory on disk with atomic writes and JSON sidecar metadata
//! - **s3**: any S3-compatible object store, with pre-signed URLs
//! - **fileapi**: a remote file-serving HTTP API using a `{code, msg, data}` envelope
//! - **alist**: an AList server with token login and paginated listing
//!
//! # Example
//!
//! ```rust
//! use blobgate_storage::{StorageBackend, StorageConfig, StorageFactory};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let options = json!({ "root": "/tmp/blobgate-lib" }).as_object().cloned().unwrap();
//! let backend = StorageFactory::global().create(&StorageConfig::new("local", options))?;
//!
//! let object = backend
//!     .save(bytes::Bytes::from_static(b"hello"), Some("docs/hello.txt"), None)
//!     .await?;
//! assert_eq!(object.content_type, "text/plain");
//!
//! let (data, _metadata) = backend.get("docs/hello.txt").await?;
//! assert_eq!(&data[..], b"hello");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod alist;
mod backend;
mod config;
mod factory;
mod file_api;
mod http;
mod local;
mod managed;
mod path;
mod s3;
mod stats;

pub use alist::AListBackend;
pub use backend::{ObjectStream, StorageBackend, StorageObject};
pub use config::{AListConfig, FileApiConfig, LocalConfig, S3Config};
pub use factory::{
    BackendConstructor, BackendOptions, BackendRegistration, StorageConfig, StorageFactory,
};
pub use file_api::FileApiBackend;
pub use local::LocalBackend;
pub use managed::{ManagedBackend, ResiliencePolicy, ResiliencePolicyBuilder};
pub use path::{
    RESERVED_DIR, content_type_for, extension_from_metadata, generate_name, guess_content_type,
    normalize_path, normalize_prefix, resolve_save_path,
};
pub use s3::S3Backend;
pub use stats::{AtomicStatsCollector, StatsCollector, StorageStats};

// Re-export error types from blobgate_error
pub use blobgate_error::{StorageError, StorageErrorKind, StorageResult};
