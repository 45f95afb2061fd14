//! Request orchestration: parse, transform, store and the reverse.

use crate::{ExtractedText, GatewayConfig, TextExtractionClient, UploadOptions};
use blobgate_cache::{CacheStats, CacheStore};
use blobgate_core::FileMetadata;
use blobgate_error::{BlobgateResult, ExtractionError, ExtractionErrorKind};
use blobgate_parsers::ParserRegistry;
use blobgate_pipeline::{MiddlewareContext, Pipeline};
use blobgate_storage::{
    ManagedBackend, ObjectStream, StorageBackend, StorageFactory, StorageObject, StorageStats,
    guess_content_type,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Outcome of a successful upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFile {
    /// What the backend stored
    pub object: StorageObject,
    /// Metadata after parsing and the pipeline
    pub metadata: FileMetadata,
}

/// Storage gateway: one backend, one pipeline and the parsers in front of it.
///
/// Uploads are parsed (when a parser claims the type), run through the
/// pipeline and saved with their metadata flattened next to the object.
/// Downloads rebuild that metadata and run the pipeline in reverse.
/// Parser and stage failures degrade; backend failures propagate.
///
/// # Example
///
/// ```rust,no_run
/// use blobgate::{Gateway, GatewayConfig};
/// use blobgate_core::FileMetadata;
/// use bytes::Bytes;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = GatewayConfig::load(None)?;
/// let gateway = Gateway::from_config(&config).await?;
///
/// let stored = gateway
///     .upload(Bytes::from("hello"), Some("notes/hello.txt"), FileMetadata::default())
///     .await?;
/// let (data, _meta) = gateway.download(&stored.object.path).await?;
/// assert_eq!(&data[..], b"hello");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Gateway {
    backend: ManagedBackend,
    pipeline: Pipeline,
    parsers: ParserRegistry,
    cache: Option<Arc<dyn CacheStore>>,
    upload: UploadOptions,
    extraction: Option<TextExtractionClient>,
}

impl Gateway {
    /// Gateway over `backend` with an empty pipeline and the default parsers.
    pub fn new(backend: ManagedBackend) -> Self {
        Self {
            backend,
            pipeline: Pipeline::default(),
            parsers: ParserRegistry::default(),
            cache: None,
            upload: UploadOptions::default(),
            extraction: None,
        }
    }

    /// Replace the pipeline.
    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Replace the parser registry.
    pub fn with_parsers(mut self, parsers: ParserRegistry) -> Self {
        self.parsers = parsers;
        self
    }

    /// Report stats for `cache`. The pipeline's cache stage is configured separately.
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replace the upload options.
    pub fn with_upload_options(mut self, upload: UploadOptions) -> Self {
        self.upload = upload;
        self
    }

    /// Attach a text extraction client.
    pub fn with_extraction(mut self, client: TextExtractionClient) -> Self {
        self.extraction = Some(client);
        self
    }

    /// Assemble a gateway from configuration.
    ///
    /// The cache store is only opened when the pipeline's cache stage is
    /// enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend or a stage is misconfigured, or the
    /// cache store cannot be opened.
    #[instrument(skip(config), fields(backend = %config.storage().backend()))]
    pub async fn from_config(config: &GatewayConfig) -> BlobgateResult<Self> {
        let backend = StorageFactory::global().create(config.storage())?;

        let cache = if *config.pipeline().cache().enabled() {
            Some(config.cache().open().await?)
        } else {
            None
        };

        let context = MiddlewareContext {
            cache: cache.clone(),
        };
        let pipeline = Pipeline::from_config(config.pipeline(), &context)?;

        let extraction = config
            .extraction()
            .clone()
            .map(TextExtractionClient::new)
            .transpose()?;

        info!(
            stages = ?pipeline.names(),
            cache = ?cache.as_ref().map(|c| c.name().to_string()),
            extraction = extraction.is_some(),
            "Gateway ready"
        );

        Ok(Self {
            backend,
            pipeline,
            parsers: ParserRegistry::new(config.parsers()),
            cache,
            upload: config.upload().clone(),
            extraction,
        })
    }

    /// The managed backend.
    pub fn backend(&self) -> &ManagedBackend {
        &self.backend
    }

    /// The pipeline.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Parse, transform and store a payload.
    ///
    /// An empty content type or extension is filled in from `path`. The
    /// ingress checksum is stamped before any parser or stage runs.
    ///
    /// # Errors
    ///
    /// Returns an error if a stage aborts or the backend rejects the save.
    #[instrument(skip(self, data, metadata), fields(size = data.len()))]
    pub async fn upload(
        &self,
        data: Bytes,
        path: Option<&str>,
        mut metadata: FileMetadata,
    ) -> BlobgateResult<StoredFile> {
        if let Some(path) = path {
            if metadata.content_type.is_empty() {
                metadata.content_type = guess_content_type(path);
            }
            if metadata.extension.is_empty() {
                metadata.extension = extension_of(path);
            }
        }
        if metadata.content_type.is_empty() {
            metadata.content_type = "application/octet-stream".to_string();
        }
        metadata.ensure_fingerprint(&data);

        let (data, metadata) = self.inspect(data, metadata).await;
        let (data, metadata) = self.pipeline.process_upload(data, metadata).await?;

        let object = self
            .backend
            .save(data, path, Some(&metadata.to_object_metadata()))
            .await?;
        info!(path = %object.path, stored = object.size_bytes, "Upload stored");
        Ok(StoredFile { object, metadata })
    }

    /// Fetch a payload and undo the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the object is missing, the backend fails, or a
    /// stage aborts.
    #[instrument(skip(self))]
    pub async fn download(&self, path: &str) -> BlobgateResult<(Bytes, FileMetadata)> {
        let (data, stored) = self.backend.get(path).await?;
        let mut metadata = FileMetadata::from_object_metadata(&stored, data.len() as u64);
        if metadata.content_type.is_empty() {
            metadata.content_type = guess_content_type(path);
        }
        let (data, metadata) = self.pipeline.process_download(data, metadata).await?;
        debug!(size = data.len(), "Download restored");
        Ok((data, metadata))
    }

    /// Delete an object; `false` when it was already absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn delete(&self, path: &str) -> BlobgateResult<bool> {
        Ok(self.backend.delete(path).await?)
    }

    /// Whether an object exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn exists(&self, path: &str) -> BlobgateResult<bool> {
        Ok(self.backend.exists(path).await?)
    }

    /// Lazily list objects under `prefix`.
    pub fn list(&self, prefix: Option<&str>, recursive: bool) -> ObjectStream {
        self.backend.list(prefix, recursive)
    }

    /// Direct access URL for an object.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot produce one.
    pub async fn url(&self, path: &str, expires_in: Option<Duration>) -> BlobgateResult<String> {
        Ok(self.backend.get_url(path, expires_in).await?)
    }

    /// Backend counters.
    pub fn stats(&self) -> StorageStats {
        self.backend.stats()
    }

    /// Cache counters, when a cache store is attached.
    pub async fn cache_stats(&self) -> Option<CacheStats> {
        match &self.cache {
            Some(cache) => Some(cache.stats().await),
            None => None,
        }
    }

    /// Download an object and send it to the extraction service.
    ///
    /// # Errors
    ///
    /// Returns `NotConfigured` without an extraction client, otherwise any
    /// download or extraction error.
    #[instrument(skip(self))]
    pub async fn extract_text(&self, path: &str) -> BlobgateResult<ExtractedText> {
        let client = self
            .extraction
            .as_ref()
            .ok_or_else(|| ExtractionError::new(ExtractionErrorKind::NotConfigured))?;
        let (data, metadata) = self.download(path).await?;
        Ok(client.extract(data, &metadata.content_type).await?)
    }

    /// Run the matching parser, then its optimizer when enabled.
    async fn inspect(&self, data: Bytes, metadata: FileMetadata) -> (Bytes, FileMetadata) {
        if !*self.upload.parse() && !*self.upload.optimize() {
            return (data, metadata);
        }
        let Some(parser) = self
            .parsers
            .get_parser(&metadata.content_type, &metadata.extension)
        else {
            debug!(content_type = %metadata.content_type, "No parser for content type");
            return (data, metadata);
        };
        if !parser.validate(&data, &metadata) {
            warn!(parser = parser.name(), "Payload failed parser validation, skipping");
            return (data, metadata);
        }

        let metadata = if *self.upload.parse() {
            match parser.parse(&data, metadata.clone()).await {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(parser = parser.name(), error = %e, "Parser failed, keeping metadata");
                    metadata
                }
            }
        } else {
            metadata
        };

        if !*self.upload.optimize() {
            return (data, metadata);
        }
        match parser.optimize(data.clone(), metadata.clone()).await {
            Ok((optimized, mut optimized_meta)) => {
                optimized_meta.set_payload_len(optimized.len());
                (optimized, optimized_meta)
            }
            Err(e) => {
                warn!(parser = parser.name(), error = %e, "Optimizer failed, keeping payload");
                (data, metadata)
            }
        }
    }
}

fn extension_of(path: &str) -> String {
    std::path::Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default()
}
