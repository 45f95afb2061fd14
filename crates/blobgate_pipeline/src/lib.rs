//! Reversible middleware pipeline for Blobgate payloads.
//!
//! A [`Pipeline`] runs an ordered list of [`Middleware`] stages over a
//! payload and its [`FileMetadata`](blobgate_core::FileMetadata): forward on
//! upload, in reverse on download, so the last stage to transform bytes on
//! the way in is the first to restore them on the way out.
//!
//! # Stages
//!
//! - **image_enhancement**: strips EXIF, XMP and text metadata from images
//! - **compression**: gzip or zlib for text-like payloads
//! - **encryption**: AES-256-GCM with a versioned envelope
//! - **cache**: reuses earlier output for byte-identical inputs
//!
//! A failing stage is logged and skipped unless it declares
//! [`FailurePolicy::Abort`].
//!
//! # Example
//!
//! ```rust
//! use blobgate_pipeline::{MiddlewareContext, Pipeline, PipelineConfig};
//! use blobgate_core::FileMetadata;
//! use bytes::Bytes;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = Pipeline::from_config(&PipelineConfig::default(), &MiddlewareContext::default())?;
//! assert_eq!(pipeline.names(), vec!["compression"]);
//!
//! let csv = Bytes::from("id,name\n".repeat(300));
//! let meta = FileMetadata::for_payload("text/csv", "csv", &csv);
//! let (stored, meta) = pipeline.process_upload(csv.clone(), meta).await?;
//! let (restored, _) = pipeline.process_download(stored, meta).await?;
//! assert_eq!(restored, csv);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod compression;
mod config;
mod encryption;
mod image;
mod middleware;
mod pipeline;
mod registry;

pub use cache::CacheMiddleware;
pub use compression::{CompressionMiddleware, compress, decompress};
pub use config::{
    CacheMiddlewareConfig, CacheMiddlewareConfigBuilder, CompressionConfig,
    CompressionConfigBuilder, EncryptionConfig, EncryptionConfigBuilder, ImageEnhancementConfig,
    ImageEnhancementConfigBuilder, PipelineConfig, PipelineConfigBuilder,
};
pub use encryption::{ENVELOPE_VERSION, EncryptionMiddleware};
pub use image::ImageEnhancementMiddleware;
pub use middleware::{Direction, FailurePolicy, Middleware, Staged};
pub use pipeline::Pipeline;
pub use registry::{MiddlewareConstructor, MiddlewareContext, MiddlewareRegistry};

// Re-export error types from blobgate_error
pub use blobgate_error::{PipelineError, PipelineErrorKind, PipelineResult};
