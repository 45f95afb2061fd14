//! Error types for the Blobgate storage gateway.
//!
//! This crate provides the error types shared by every Blobgate crate.
//!
//! # Error Hierarchy
//!
//! All errors follow the `ErrorKind` + wrapper struct pattern:
//! - `*ErrorKind` enum defines specific error conditions
//! - `*Error` struct wraps the kind with source location tracking
//! - All errors use `#[track_caller]` for automatic location capture
//!
//! # Examples
//!
//! ```
//! use blobgate_error::{BlobgateResult, StorageError, StorageErrorKind};
//!
//! fn fetch(path: &str) -> BlobgateResult<Vec<u8>> {
//!     Err(StorageError::new(StorageErrorKind::NotFound(path.to_string())))?
//! }
//!
//! match fetch("reports/q3.pdf") {
//!     Ok(data) => println!("Got {} bytes", data.len()),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod error;
mod extraction;
mod parser;
mod pipeline;
mod storage;

pub use cache::{CacheError, CacheErrorKind, CacheResult};
pub use config::{ConfigError, ConfigErrorKind};
pub use error::{BlobgateError, BlobgateErrorKind, BlobgateResult};
pub use extraction::{ExtractionError, ExtractionErrorKind};
pub use parser::{ParserError, ParserErrorKind, ParserResult};
pub use pipeline::{PipelineError, PipelineErrorKind, PipelineResult};
pub use storage::{StorageError, StorageErrorKind, StorageResult};
