//! Format parsers for Blobgate uploads.
//!
//! A [`ParserRegistry`] maps a content type or extension to the first
//! registered [`Parser`] that claims it. Built-in parsers, in lookup order:
//!
//! - [`ImageParser`]: PNG, JPEG, GIF, WebP, BMP, TIFF, AVIF
//! - [`PdfParser`]
//! - [`AudioParser`]: WAV, FLAC, MP3, AAC, Ogg, M4A
//! - [`VideoParser`]: MP4, MOV, Matroska/WebM, AVI, FLV, MPEG
//! - [`DocumentParser`]: text, CSV, DOCX, XLSX, PPTX
//!
//! Parsers read container headers only; no pixel, sample or frame data is
//! decoded.
//!
//! # Example
//!
//! ```rust
//! use blobgate_core::FileMetadata;
//! use blobgate_parsers::ParserRegistry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ParserRegistry::default();
//! let data = b"id,name\n1,widget\n";
//! let metadata = FileMetadata::for_payload("text/csv", "csv", data);
//!
//! let parser = registry.get_parser("text/csv", "csv").unwrap();
//! let parsed = parser.parse(data, metadata).await?;
//! assert_eq!(parsed.custom["row_count"], 1);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod audio;
mod bmff;
mod config;
mod document;
mod image;
mod parser;
mod pdf;
mod registry;
mod sniff;
mod video;

pub use audio::{AudioInfo, AudioParser, inspect_audio};
pub use config::{
    ImageParserConfig, ImageParserConfigBuilder, ParsersConfig, TextParserConfig,
    TextParserConfigBuilder,
};
pub use document::{DocumentInfo, DocumentParser, inspect_document};
pub use image::{ImageFormat, ImageInfo, ImageParser, StrippedImage, inspect_image, strip_metadata};
pub use parser::Parser;
pub use pdf::{PdfInfo, PdfParser, inspect_pdf};
pub use registry::ParserRegistry;
pub use video::{VideoInfo, VideoParser, inspect_video};

// Re-export error types from blobgate_error
pub use blobgate_error::{ParserError, ParserErrorKind, ParserResult};
