//! Core data types for the Blobgate storage gateway.
//!
//! This crate provides the request-scoped [`FileMetadata`] record threaded
//! through parsers, the middleware pipeline and storage backends, plus the
//! shared tracing setup.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod metadata;
mod telemetry;

pub use metadata::{CompressionMethod, FileMetadata, ObjectMetadata, content_checksum, meta_keys};
pub use telemetry::{LogFormat, init_telemetry};
