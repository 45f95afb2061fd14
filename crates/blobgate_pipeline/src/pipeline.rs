//! Ordered middleware execution.

use crate::{Direction, FailurePolicy, Middleware, MiddlewareContext, PipelineConfig, Staged};
use crate::registry::MiddlewareRegistry;
use blobgate_core::FileMetadata;
use blobgate_error::{
    ConfigError, ConfigErrorKind, PipelineError, PipelineErrorKind, PipelineResult,
};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// An ordered list of middlewares applied forward on upload and in
/// reverse on download.
///
/// Each stage runs under the stage timeout. A stage that fails or times out
/// is skipped, and its input is handed unchanged to the next stage, unless
/// the stage declares [`FailurePolicy::Abort`]. The pipeline is shared
/// across requests; all per-request state travels in the arguments.
///
/// # Example
///
/// ```rust
/// use blobgate_pipeline::{CompressionConfig, CompressionMiddleware, Pipeline};
/// use blobgate_core::FileMetadata;
/// use bytes::Bytes;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut pipeline = Pipeline::default();
/// pipeline.add_middleware(Arc::new(CompressionMiddleware::new(CompressionConfig::default())))?;
///
/// let text = Bytes::from("lorem ipsum ".repeat(200));
/// let meta = FileMetadata::for_payload("text/plain", "txt", &text);
/// let (stored, stored_meta) = pipeline.process_upload(text.clone(), meta).await?;
/// assert!(stored_meta.compressed);
///
/// let (restored, _) = pipeline.process_download(stored, stored_meta).await?;
/// assert_eq!(restored, text);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Pipeline {
    middlewares: Vec<Arc<dyn Middleware>>,
    stage_timeout: Duration,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default().stage_timeout())
    }
}

impl Pipeline {
    /// Create an empty pipeline.
    pub fn new(stage_timeout: Duration) -> Self {
        Self {
            middlewares: Vec::new(),
            stage_timeout,
        }
    }

    /// Build the configured stages through the built-in registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a stage name is unknown, a stage cannot be
    /// constructed or a stage fails validation.
    pub fn from_config(
        config: &PipelineConfig,
        context: &MiddlewareContext,
    ) -> Result<Self, ConfigError> {
        MiddlewareRegistry::with_builtins().build(config, context)
    }

    /// Append a stage after validating it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigErrorKind::InvalidMiddleware`] if `validate` fails.
    pub fn add_middleware(&mut self, middleware: Arc<dyn Middleware>) -> Result<(), ConfigError> {
        if !middleware.validate() {
            return Err(ConfigError::new(ConfigErrorKind::InvalidMiddleware(
                middleware.name().to_string(),
            )));
        }
        tracing::debug!(stage = middleware.name(), "Added middleware");
        self.middlewares.push(middleware);
        Ok(())
    }

    /// Remove every stage with this name. Returns whether any was removed.
    pub fn remove_middleware(&mut self, name: &str) -> bool {
        let before = self.middlewares.len();
        self.middlewares.retain(|m| m.name() != name);
        before != self.middlewares.len()
    }

    /// Stage names in upload order.
    pub fn names(&self) -> Vec<&str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Whether the pipeline has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Per-stage deadline.
    pub fn stage_timeout(&self) -> Duration {
        self.stage_timeout
    }

    /// Run every stage in list order.
    ///
    /// Stamps the ingress `checksum` and `original_size` before the first
    /// stage.
    ///
    /// # Errors
    ///
    /// Only a failing stage with [`FailurePolicy::Abort`] fails the call.
    #[tracing::instrument(skip(self, data, metadata), fields(size = data.len(), stages = self.len()))]
    pub async fn process_upload(
        &self,
        data: Bytes,
        mut metadata: FileMetadata,
    ) -> PipelineResult<Staged> {
        metadata.ensure_fingerprint(&data);
        let mut current = (data, metadata);
        for middleware in &self.middlewares {
            current = self.run_stage(middleware, Direction::Upload, current).await?;
        }
        Ok(current)
    }

    /// Run every stage in reverse order.
    ///
    /// # Errors
    ///
    /// Only a failing stage with [`FailurePolicy::Abort`] fails the call.
    #[tracing::instrument(skip(self, data, metadata), fields(size = data.len(), stages = self.len()))]
    pub async fn process_download(
        &self,
        data: Bytes,
        metadata: FileMetadata,
    ) -> PipelineResult<Staged> {
        let mut current = (data, metadata);
        for middleware in self.middlewares.iter().rev() {
            current = self
                .run_stage(middleware, Direction::Download, current)
                .await?;
        }
        Ok(current)
    }

    async fn run_stage(
        &self,
        middleware: &Arc<dyn Middleware>,
        direction: Direction,
        input: Staged,
    ) -> PipelineResult<Staged> {
        let stage = middleware.name();
        let (data, metadata) = input.clone();
        let work = async {
            match direction {
                Direction::Upload => middleware.process_upload(data, metadata).await,
                Direction::Download => middleware.process_download(data, metadata).await,
            }
        };

        let error = match tokio::time::timeout(self.stage_timeout, work).await {
            Ok(Ok((data, mut metadata))) => {
                // size tracks the bytes handed to the next stage
                metadata.set_payload_len(data.len());
                return Ok((data, metadata));
            }
            Ok(Err(e)) => e,
            Err(_) => PipelineError::new(PipelineErrorKind::StageTimeout(stage.to_string())),
        };

        match middleware.failure_policy() {
            FailurePolicy::Skip => {
                tracing::warn!(
                    stage,
                    %direction,
                    error = %error.kind,
                    "Middleware failed, passing payload through unchanged"
                );
                Ok(input)
            }
            FailurePolicy::Abort => {
                tracing::error!(
                    stage,
                    %direction,
                    error = %error.kind,
                    "Required middleware failed, aborting"
                );
                Err(PipelineError::new(PipelineErrorKind::Aborted {
                    stage: stage.to_string(),
                    reason: error.kind.to_string(),
                }))
            }
        }
    }
}
