//! Parser contract.

use crate::sniff::{bare_extension, essence};
use blobgate_core::FileMetadata;
use blobgate_error::ParserResult;
use bytes::Bytes;

/// Format-specific inspection and size reduction for uploaded payloads.
///
/// Parsers are shared across concurrent requests and hold no per-request
/// state.
#[async_trait::async_trait]
pub trait Parser: Send + Sync + std::fmt::Debug {
    /// Parser name for logs, e.g. `"image"`.
    fn name(&self) -> &str;

    /// Whether this parser claims the given MIME type or extension.
    ///
    /// Extensions may be passed with or without a leading dot.
    fn can_handle(&self, content_type: &str, extension: &str) -> bool;

    /// Cheap structural check of the payload's header.
    fn validate(&self, data: &[u8], metadata: &FileMetadata) -> bool;

    /// Extract format fields into `metadata.custom`.
    async fn parse(&self, data: &[u8], metadata: FileMetadata) -> ParserResult<FileMetadata>;

    /// Shrink the payload where the format allows it.
    ///
    /// Returns the input bytes unchanged when the result would not be
    /// smaller.
    async fn optimize(
        &self,
        data: Bytes,
        metadata: FileMetadata,
    ) -> ParserResult<(Bytes, FileMetadata)> {
        Ok((data, metadata))
    }
}

/// MIME types and extensions a parser answers for.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FormatSet {
    pub(crate) content_types: &'static [&'static str],
    pub(crate) extensions: &'static [&'static str],
}

impl FormatSet {
    pub(crate) fn matches(&self, content_type: &str, extension: &str) -> bool {
        let content_type = essence(content_type);
        let extension = bare_extension(extension);
        self.content_types.contains(&content_type.as_str())
            || (!extension.is_empty() && self.extensions.contains(&extension.as_str()))
    }
}
