//! Pipeline and per-stage options.

use blobgate_core::CompressionMethod;
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_stage_timeout_ms() -> u64 {
    30_000
}

fn default_order() -> Vec<String> {
    ["image_enhancement", "compression", "encryption", "cache"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_compression_level() -> u32 {
    6
}

fn default_compression_min_size() -> u64 {
    512
}

fn default_compressible_types() -> Vec<String> {
    [
        "text/",
        "application/json",
        "application/xml",
        "application/javascript",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_excluded_types() -> Vec<String> {
    ["image/", "video/", "audio/"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_kdf_iterations() -> u32 {
    100_000
}

fn default_max_cached_file_size() -> u64 {
    100 * 1024 * 1024
}

/// Options for the compression stage.
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
pub struct CompressionConfig {
    /// Include the stage when building from configuration
    #[serde(default = "default_true")]
    enabled: bool,
    /// Framing to compress with
    #[serde(default = "default_compression_method")]
    method: CompressionMethod,
    /// Compression level, 0 to 9
    #[serde(default = "default_compression_level")]
    level: u32,
    /// Payloads shorter than this are left alone
    #[serde(default = "default_compression_min_size")]
    min_size: u64,
    /// Content type prefixes worth compressing
    #[serde(default = "default_compressible_types")]
    compressible_types: Vec<String>,
}

fn default_compression_method() -> CompressionMethod {
    CompressionMethod::Gzip
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            method: default_compression_method(),
            level: default_compression_level(),
            min_size: default_compression_min_size(),
            compressible_types: default_compressible_types(),
        }
    }
}

/// Options for the encryption stage.
///
/// The key comes from `key` (base64, 32 bytes) when set, otherwise from
/// PBKDF2-HMAC-SHA256 over `password` and `salt`. With neither, a random
/// key is generated and stored data only survives for the process lifetime.
#[derive(
    Clone,
    PartialEq,
    Serialize,
    Deserialize,
    Getters,
    derive_setters::Setters,
    derive_builder::Builder,
)]
#[setters(prefix = "with_", strip_option)]
#[builder(default)]
pub struct EncryptionConfig {
    /// Include the stage when building from configuration
    #[serde(default)]
    enabled: bool,
    /// Base64 encoded 256-bit key
    #[serde(default)]
    key: Option<String>,
    /// Passphrase to derive the key from
    #[serde(default)]
    password: Option<String>,
    /// Salt for key derivation
    #[serde(default)]
    salt: Option<String>,
    /// PBKDF2 rounds
    #[serde(default = "default_kdf_iterations")]
    iterations: u32,
    /// Payloads shorter than this are stored in the clear
    #[serde(default)]
    min_size: u64,
    /// Content type prefixes never encrypted
    #[serde(default = "default_excluded_types")]
    excluded_types: Vec<String>,
    /// Fail uploads instead of storing plaintext when encryption fails
    #[serde(default)]
    required: bool,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            key: None,
            password: None,
            salt: None,
            iterations: default_kdf_iterations(),
            min_size: 0,
            excluded_types: default_excluded_types(),
            required: false,
        }
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("EncryptionConfig")
            .field("enabled", &self.enabled)
            .field("key", &redact(&self.key))
            .field("password", &redact(&self.password))
            .field("salt", &self.salt)
            .field("iterations", &self.iterations)
            .field("min_size", &self.min_size)
            .field("excluded_types", &self.excluded_types)
            .field("required", &self.required)
            .finish()
    }
}

/// Options for the cache stage. The store itself is configured separately.
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
pub struct CacheMiddlewareConfig {
    /// Include the stage when building from configuration
    #[serde(default)]
    enabled: bool,
    /// Payloads larger than this bypass the cache
    #[serde(default = "default_max_cached_file_size")]
    max_file_size: u64,
    /// Content type prefixes to cache; empty caches everything
    #[serde(default)]
    cache_types: Vec<String>,
}

impl Default for CacheMiddlewareConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_file_size: default_max_cached_file_size(),
            cache_types: Vec::new(),
        }
    }
}

/// Options for the image enhancement stage.
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
pub struct ImageEnhancementConfig {
    /// Include the stage when building from configuration
    #[serde(default)]
    enabled: bool,
    /// Remove EXIF, XMP, comments and text chunks
    #[serde(default = "default_true")]
    strip_metadata: bool,
}

impl Default for ImageEnhancementConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strip_metadata: true,
        }
    }
}

/// Pipeline layout: stage order, enabled flags and per-stage options.
///
/// # Example
///
/// ```toml
/// [pipeline]
/// stage_timeout_ms = 10000
/// order = ["compression", "encryption", "cache"]
///
/// [pipeline.compression]
/// method = "zlib"
/// level = 9
///
/// [pipeline.encryption]
/// enabled = true
/// password = "correct horse battery staple"
/// salt = "blobgate"
/// ```
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
pub struct PipelineConfig {
    /// Deadline for a single stage (milliseconds)
    #[serde(default = "default_stage_timeout_ms")]
    stage_timeout_ms: u64,
    /// Stage names in upload order
    #[serde(default = "default_order")]
    order: Vec<String>,
    /// Image enhancement options
    #[serde(default)]
    image_enhancement: ImageEnhancementConfig,
    /// Compression options
    #[serde(default)]
    compression: CompressionConfig,
    /// Encryption options
    #[serde(default)]
    encryption: EncryptionConfig,
    /// Cache stage options
    #[serde(default)]
    cache: CacheMiddlewareConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout_ms: default_stage_timeout_ms(),
            order: default_order(),
            image_enhancement: ImageEnhancementConfig::default(),
            compression: CompressionConfig::default(),
            encryption: EncryptionConfig::default(),
            cache: CacheMiddlewareConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Stage deadline as a duration.
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }
}
