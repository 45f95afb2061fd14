//! Gzip/zlib compression stage.

use crate::middleware::matches_type;
use crate::{CompressionConfig, Middleware, Staged};
use blobgate_core::{CompressionMethod, FileMetadata};
use blobgate_error::{PipelineError, PipelineResult};
use bytes::Bytes;
use flate2::Compression;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use std::io::{Read, Write};

const STAGE: &str = "compression";

/// Room above the recorded original size for stages that ran before
/// compression on upload, such as encryption framing.
const INFLATE_SLACK: u64 = 64 * 1024;

/// Deflate cannot expand input by more than this factor.
const MAX_DEFLATE_RATIO: u64 = 1032;

/// Compresses text-like payloads on upload and inflates them on download.
///
/// Compressed output is kept only when it is smaller than the input.
#[derive(Debug, Clone)]
pub struct CompressionMiddleware {
    config: CompressionConfig,
}

impl CompressionMiddleware {
    /// Create the stage.
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    fn should_compress(&self, size: usize, content_type: &str) -> bool {
        size as u64 >= *self.config.min_size()
            && matches_type(content_type, self.config.compressible_types())
    }
}

/// Compress `data` with the given framing and level.
pub fn compress(data: &[u8], method: CompressionMethod, level: u32) -> std::io::Result<Vec<u8>> {
    let level = Compression::new(level);
    match method {
        CompressionMethod::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), level);
            encoder.write_all(data)?;
            encoder.finish()
        }
        CompressionMethod::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), level);
            encoder.write_all(data)?;
            encoder.finish()
        }
    }
}

/// Inflate `data` compressed with the given framing, reading at most
/// `limit` bytes of output.
///
/// # Errors
///
/// Returns `InvalidData` if the stream inflates past `limit`, or the
/// decoder's error for corrupt input.
pub fn decompress(data: &[u8], method: CompressionMethod, limit: u64) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let cap = limit.saturating_add(1);
    match method {
        CompressionMethod::Gzip => GzDecoder::new(data).take(cap).read_to_end(&mut out)?,
        CompressionMethod::Zlib => ZlibDecoder::new(data).take(cap).read_to_end(&mut out)?,
    };
    if out.len() as u64 > limit {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("payload inflates past {} bytes", limit),
        ));
    }
    Ok(out)
}

/// Largest inflated size a download may legitimately produce.
fn inflate_limit(stored_len: usize, metadata: &FileMetadata) -> u64 {
    match metadata.original_size {
        Some(original) => original.saturating_add(INFLATE_SLACK),
        None => (stored_len as u64)
            .saturating_mul(MAX_DEFLATE_RATIO)
            .saturating_add(INFLATE_SLACK),
    }
}

#[async_trait::async_trait]
impl Middleware for CompressionMiddleware {
    fn name(&self) -> &str {
        STAGE
    }

    fn validate(&self) -> bool {
        *self.config.level() <= 9
    }

    #[tracing::instrument(skip(self, data, metadata), fields(size = data.len()))]
    async fn process_upload(
        &self,
        data: Bytes,
        mut metadata: FileMetadata,
    ) -> PipelineResult<Staged> {
        if metadata.compressed || !self.should_compress(data.len(), &metadata.content_type) {
            return Ok((data, metadata));
        }

        let method = *self.config.method();
        let compressed = compress(&data, method, *self.config.level())
            .map_err(|e| PipelineError::stage_failed(STAGE, e))?;

        if compressed.len() >= data.len() {
            tracing::debug!(
                compressed = compressed.len(),
                "Compression did not shrink payload, storing as-is"
            );
            return Ok((data, metadata));
        }

        tracing::debug!(
            method = %method,
            from = data.len(),
            to = compressed.len(),
            "Compressed payload"
        );
        if metadata.original_size.is_none() {
            metadata.original_size = Some(data.len() as u64);
        }
        metadata.compressed = true;
        metadata.compression_method = Some(method);
        metadata.set_payload_len(compressed.len());
        Ok((Bytes::from(compressed), metadata))
    }

    #[tracing::instrument(skip(self, data, metadata), fields(size = data.len()))]
    async fn process_download(
        &self,
        data: Bytes,
        mut metadata: FileMetadata,
    ) -> PipelineResult<Staged> {
        if !metadata.compressed {
            return Ok((data, metadata));
        }

        let method = metadata.compression_method.unwrap_or(CompressionMethod::Gzip);
        let limit = inflate_limit(data.len(), &metadata);
        let inflated = decompress(&data, method, limit)
            .map_err(|e| PipelineError::stage_failed(STAGE, e))?;

        metadata.compressed = false;
        metadata.compression_method = None;
        metadata.set_payload_len(inflated.len());
        Ok((Bytes::from(inflated), metadata))
    }
}
