//! Blobgate: a blob storage gateway.
//!
//! This crate ties the Blobgate subsystems into a [`Gateway`] service and a
//! `blobgate` command line tool:
//!
//! - [`blobgate_storage`]: local, S3-compatible, file API and AList backends
//! - [`blobgate_pipeline`]: reversible compression, encryption, cache and
//!   image stages
//! - [`blobgate_cache`]: content-addressed disk and remote caches
//! - [`blobgate_parsers`]: header-level format inspection
//!
//! Configuration is layered TOML plus environment overrides; see
//! [`GatewayConfig::load`].
//!
//! # Example
//!
//! ```rust,no_run
//! use blobgate::{Gateway, GatewayConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::from_toml_str(
//!     r#"
//!     [storage]
//!     backend = "local"
//!     [storage.options]
//!     root = "/var/lib/blobgate"
//!     "#,
//! )?;
//! let gateway = Gateway::from_config(&config).await?;
//! println!("{} uploads so far", gateway.stats().uploads());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod extraction;
mod gateway;

pub use config::{GatewayConfig, UploadOptions, UploadOptionsBuilder};
pub use extraction::{
    ExtractedText, ExtractionConfig, ExtractionConfigBuilder, TextExtractionClient,
};
pub use gateway::{Gateway, StoredFile};

// Re-export the subsystem crates' main types
pub use blobgate_cache::{CacheBackendConfig, CacheKey, CacheStats, CacheStore};
pub use blobgate_core::{CompressionMethod, FileMetadata, LogFormat, init_telemetry};
pub use blobgate_parsers::{Parser, ParserRegistry, ParsersConfig};
pub use blobgate_pipeline::{Middleware, MiddlewareContext, Pipeline, PipelineConfig};
pub use blobgate_storage::{StorageBackend, StorageConfig, StorageFactory, StorageObject};

// Re-export error types from blobgate_error
pub use blobgate_error::{
    BlobgateError, BlobgateErrorKind, BlobgateResult, ConfigError, ConfigErrorKind,
    ExtractionError, ExtractionErrorKind,
};
