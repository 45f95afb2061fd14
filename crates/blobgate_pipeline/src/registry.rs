//! Name-to-constructor table for building pipelines from configuration.

use crate::{
    CacheMiddleware, CompressionMiddleware, EncryptionMiddleware, ImageEnhancementMiddleware,
    Middleware, Pipeline, PipelineConfig,
};
use blobgate_cache::CacheStore;
use blobgate_error::{ConfigError, ConfigErrorKind};
use std::collections::HashMap;
use std::sync::Arc;

/// Shared resources a stage may need at construction time.
#[derive(Debug, Clone, Default)]
pub struct MiddlewareContext {
    /// Store for the cache stage
    pub cache: Option<Arc<dyn CacheStore>>,
}

impl MiddlewareContext {
    /// Context carrying a cache store.
    pub fn with_cache(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache: Some(cache) }
    }
}

/// Builds a stage, or returns `None` when the stage is disabled.
pub type MiddlewareConstructor =
    fn(&PipelineConfig, &MiddlewareContext) -> Result<Option<Arc<dyn Middleware>>, ConfigError>;

/// Maps stage names to constructors.
///
/// Populated once at startup; [`build`](Self::build) walks the configured
/// order and looks each name up here.
#[derive(Clone)]
pub struct MiddlewareRegistry {
    constructors: HashMap<String, MiddlewareConstructor>,
}

impl std::fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.constructors.keys().collect();
        names.sort();
        f.debug_struct("MiddlewareRegistry")
            .field("constructors", &names)
            .finish()
    }
}

impl MiddlewareRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// A registry with the built-in stages.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("image_enhancement", build_image_enhancement);
        registry.register("compression", build_compression);
        registry.register("encryption", build_encryption);
        registry.register("cache", build_cache);
        registry
    }

    /// Register or replace a constructor.
    pub fn register(&mut self, name: impl Into<String>, constructor: MiddlewareConstructor) {
        self.constructors.insert(name.into(), constructor);
    }

    /// Whether a constructor is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Build a pipeline from `config.order`, skipping disabled stages.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigErrorKind::UnknownMiddleware`] for an unregistered
    /// name, or whatever the stage constructor or validation reports.
    pub fn build(
        &self,
        config: &PipelineConfig,
        context: &MiddlewareContext,
    ) -> Result<Pipeline, ConfigError> {
        let mut pipeline = Pipeline::new(config.stage_timeout());
        for name in config.order() {
            let constructor = self.constructors.get(name).ok_or_else(|| {
                ConfigError::new(ConfigErrorKind::UnknownMiddleware(name.clone()))
            })?;
            match constructor(config, context)? {
                Some(middleware) => pipeline.add_middleware(middleware)?,
                None => tracing::debug!(stage = %name, "Middleware disabled"),
            }
        }
        tracing::info!(stages = ?pipeline.names(), "Built middleware pipeline");
        Ok(pipeline)
    }
}

impl Default for MiddlewareRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn build_image_enhancement(
    config: &PipelineConfig,
    _context: &MiddlewareContext,
) -> Result<Option<Arc<dyn Middleware>>, ConfigError> {
    let options = config.image_enhancement();
    Ok(options
        .enabled()
        .then(|| Arc::new(ImageEnhancementMiddleware::new(options.clone())) as Arc<dyn Middleware>))
}

fn build_compression(
    config: &PipelineConfig,
    _context: &MiddlewareContext,
) -> Result<Option<Arc<dyn Middleware>>, ConfigError> {
    let options = config.compression();
    Ok(options
        .enabled()
        .then(|| Arc::new(CompressionMiddleware::new(options.clone())) as Arc<dyn Middleware>))
}

fn build_encryption(
    config: &PipelineConfig,
    _context: &MiddlewareContext,
) -> Result<Option<Arc<dyn Middleware>>, ConfigError> {
    let options = config.encryption();
    if !options.enabled() {
        return Ok(None);
    }
    Ok(Some(Arc::new(EncryptionMiddleware::new(options.clone())?)))
}

fn build_cache(
    config: &PipelineConfig,
    context: &MiddlewareContext,
) -> Result<Option<Arc<dyn Middleware>>, ConfigError> {
    let options = config.cache();
    if !options.enabled() {
        return Ok(None);
    }
    let store = context.cache.clone().ok_or_else(|| {
        ConfigError::new(ConfigErrorKind::MissingFields {
            target: "cache middleware".to_string(),
            fields: vec!["cache store".to_string()],
        })
    })?;
    Ok(Some(Arc::new(CacheMiddleware::new(store, options.clone()))))
}
