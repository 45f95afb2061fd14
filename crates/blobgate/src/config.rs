//! Gateway configuration loading.
//!
//! Sources are layered, later ones winning:
//! 1. Bundled defaults (`blobgate.toml` shipped with the crate)
//! 2. `~/.config/blobgate/blobgate.toml`
//! 3. `./blobgate.toml`, or an explicit file
//! 4. `BLOBGATE__`-prefixed environment variables (`BLOBGATE__PIPELINE__STAGE_TIMEOUT_MS=5000`)

use crate::ExtractionConfig;
use blobgate_cache::CacheBackendConfig;
use blobgate_error::ConfigError;
use blobgate_parsers::ParsersConfig;
use blobgate_pipeline::PipelineConfig;
use blobgate_storage::StorageConfig;
use config::{Config, ConfigBuilder, Environment, File, FileFormat, builder::DefaultState};
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, instrument};

const DEFAULT_CONFIG: &str = include_str!("blobgate.toml");

fn default_true() -> bool {
    true
}

/// What the gateway does with an upload before the pipeline runs.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Serialize,
    Deserialize,
    Getters,
    derive_setters::Setters,
    derive_builder::Builder,
)]
#[setters(prefix = "with_")]
#[builder(default)]
pub struct UploadOptions {
    /// Run the matching parser and merge its fields into the metadata
    #[serde(default = "default_true")]
    parse: bool,
    /// Let the matching parser shrink the payload before the pipeline
    #[serde(default)]
    optimize: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            parse: true,
            optimize: false,
        }
    }
}

/// Everything needed to assemble a [`crate::Gateway`].
///
/// # Example
///
/// ```toml
/// [storage]
/// backend = "s3"
///
/// [storage.options]
/// bucket = "uploads"
/// access_key_id = "AKIA..."
/// secret_access_key = "..."
/// region = "eu-west-1"
///
/// [pipeline.encryption]
/// enabled = true
/// password = "correct horse battery staple"
/// salt = "blobgate"
///
/// [extraction]
/// endpoint = "https://ocr.internal/v1/extract"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters)]
pub struct GatewayConfig {
    /// Backend selection and options
    storage: StorageConfig,
    /// Parser and optimizer switches
    #[serde(default)]
    upload: UploadOptions,
    /// Middleware order and options
    #[serde(default)]
    pipeline: PipelineConfig,
    /// Store used by the cache stage
    #[serde(default)]
    cache: CacheBackendConfig,
    /// Parser options
    #[serde(default)]
    parsers: ParsersConfig,
    /// Text extraction service, if any
    #[serde(default)]
    extraction: Option<ExtractionConfig>,
}

impl GatewayConfig {
    /// Load with precedence: environment > explicit file or `./blobgate.toml`
    /// > home config > bundled defaults.
    ///
    /// An explicit `path` must exist; the other files are optional.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or the merged
    /// configuration does not deserialize.
    #[instrument(skip(path))]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Self::defaults();

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".config/blobgate/blobgate.toml");
            builder = builder.add_source(File::from(home_config).required(false));
        }

        builder = match path {
            Some(path) => {
                debug!(path = %path.display(), "Loading explicit configuration file");
                builder.add_source(File::from(path).required(true))
            }
            None => builder.add_source(File::with_name("blobgate").required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix("BLOBGATE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        Self::finish(builder)
    }

    /// Parse `toml` layered over the bundled defaults, ignoring files and
    /// the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `toml` is malformed or the result does not
    /// deserialize.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::finish(Self::defaults().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    fn defaults() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn finish(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        builder
            .build()
            .map_err(|e| ConfigError::invalid(format!("Failed to build configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| ConfigError::invalid(format!("Failed to parse configuration: {}", e)))
    }

    /// Render as TOML with encryption and service secrets masked.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be represented as TOML.
    pub fn to_redacted_toml(&self) -> Result<String, ConfigError> {
        let mut value = toml::Value::try_from(self)
            .map_err(|e| ConfigError::invalid(format!("Failed to render configuration: {}", e)))?;

        const SECRETS: &[&[&str]] = &[
            &["pipeline", "encryption", "key"],
            &["pipeline", "encryption", "password"],
            &["extraction", "api_key"],
            &["storage", "options", "secret_access_key"],
            &["storage", "options", "password"],
            &["storage", "options", "api_key"],
            &["storage", "options", "file_password"],
        ];
        for path in SECRETS {
            let (last, parents) = match path.split_last() {
                Some(split) => split,
                None => continue,
            };
            let mut table = value.as_table_mut();
            for key in parents {
                table = table.and_then(|t| t.get_mut(*key)).and_then(|v| v.as_table_mut());
            }
            if let Some(secret) = table.and_then(|t| t.get_mut(*last)) {
                *secret = toml::Value::String("<redacted>".to_string());
            }
        }

        toml::to_string_pretty(&value)
            .map_err(|e| ConfigError::invalid(format!("Failed to render configuration: {}", e)))
    }
}
