//! Image metadata scrubbing stage.

use crate::{ImageEnhancementConfig, Middleware, Staged};
use blobgate_core::FileMetadata;
use blobgate_error::PipelineResult;
use blobgate_parsers::strip_metadata;
use bytes::Bytes;

const STAGE: &str = "image_enhancement";

/// Strips privacy-sensitive metadata from JPEG and PNG uploads.
///
/// Pixel data is untouched, so downloads need no inverse transform.
#[derive(Debug, Clone, Default)]
pub struct ImageEnhancementMiddleware {
    config: ImageEnhancementConfig,
}

impl ImageEnhancementMiddleware {
    /// Create the stage.
    pub fn new(config: ImageEnhancementConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl Middleware for ImageEnhancementMiddleware {
    fn name(&self) -> &str {
        STAGE
    }

    fn validate(&self) -> bool {
        true
    }

    #[tracing::instrument(skip(self, data, metadata), fields(size = data.len()))]
    async fn process_upload(
        &self,
        data: Bytes,
        mut metadata: FileMetadata,
    ) -> PipelineResult<Staged> {
        if !*self.config.strip_metadata()
            || !metadata.content_type.to_ascii_lowercase().starts_with("image/")
        {
            return Ok((data, metadata));
        }

        let Some(stripped) = strip_metadata(&data) else {
            return Ok((data, metadata));
        };
        tracing::debug!(removed = ?stripped.removed(), "Stripped image metadata");

        metadata.set_custom("enhanced", true);
        metadata.set_custom("enhancements", stripped.removed().clone());
        let data = Bytes::from(stripped.into_data());
        metadata.set_payload_len(data.len());
        Ok((data, metadata))
    }

    async fn process_download(
        &self,
        data: Bytes,
        metadata: FileMetadata,
    ) -> PipelineResult<Staged> {
        Ok((data, metadata))
    }
}
