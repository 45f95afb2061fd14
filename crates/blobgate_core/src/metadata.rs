//! File metadata threaded through the upload and download paths.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::str::FromStr;

/// String-to-string metadata a backend persists next to an object.
pub type ObjectMetadata = BTreeMap<String, String>;

/// Keys used when flattening [`FileMetadata`] into [`ObjectMetadata`].
pub mod meta_keys {
    /// MIME type of the stored bytes
    pub const CONTENT_TYPE: &str = "content-type";
    /// File extension without the leading dot
    pub const EXTENSION: &str = "extension";
    /// SHA-256 of the payload as received at ingress
    pub const CHECKSUM: &str = "checksum";
    /// Payload length before any transform
    pub const ORIGINAL_SIZE: &str = "original-size";
    /// `"true"` when the stored bytes are compressed
    pub const COMPRESSED: &str = "compressed";
    /// Compression algorithm name
    pub const COMPRESSION_METHOD: &str = "compression-method";
    /// `"true"` when the stored bytes are encrypted
    pub const ENCRYPTED: &str = "encrypted";
    /// JSON-encoded custom fields
    pub const CUSTOM: &str = "custom";
}

/// Compression algorithm applied to a payload.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CompressionMethod {
    /// RFC 1952 gzip framing
    Gzip,
    /// RFC 1950 zlib framing
    Zlib,
}

/// Compute the hex SHA-256 digest of a payload.
///
/// # Examples
///
/// ```
/// use blobgate_core::content_checksum;
///
/// let sum = content_checksum(b"hello");
/// assert_eq!(sum.len(), 64);
/// assert_eq!(sum, content_checksum(b"hello"));
/// ```
pub fn content_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Mutable record describing the payload at the current pipeline stage.
///
/// `size` always tracks the length of the bytes it travels with. `checksum`
/// and `original_size` describe the payload as it entered the gateway and
/// stay fixed while stages rewrite the bytes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileMetadata {
    /// MIME type, e.g. `text/plain`
    #[serde(default)]
    pub content_type: String,
    /// Lowercase extension without the leading dot, e.g. `png`
    #[serde(default)]
    pub extension: String,
    /// Current payload length in bytes
    #[serde(default)]
    pub size: u64,
    /// Hex SHA-256 of the payload as received
    #[serde(default)]
    pub checksum: String,
    /// Payload length before any transform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_size: Option<u64>,
    /// Whether the payload is compressed
    #[serde(default)]
    pub compressed: bool,
    /// Compression algorithm when `compressed` is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_method: Option<CompressionMethod>,
    /// Whether the payload is encrypted
    #[serde(default)]
    pub encrypted: bool,
    /// Parser and middleware contributed fields
    #[serde(default)]
    pub custom: Map<String, JsonValue>,
}

impl FileMetadata {
    /// Create metadata for a payload that has not been transformed yet.
    ///
    /// # Examples
    ///
    /// ```
    /// use blobgate_core::FileMetadata;
    ///
    /// let meta = FileMetadata::for_payload("text/plain", ".TXT", b"hello");
    /// assert_eq!(meta.extension, "txt");
    /// assert_eq!(meta.size, 5);
    /// assert!(!meta.checksum.is_empty());
    /// ```
    pub fn for_payload(
        content_type: impl Into<String>,
        extension: impl AsRef<str>,
        data: &[u8],
    ) -> Self {
        Self {
            content_type: content_type.into(),
            extension: normalize_extension(extension.as_ref()),
            size: data.len() as u64,
            checksum: content_checksum(data),
            ..Default::default()
        }
    }

    /// Record the length of a freshly transformed payload.
    pub fn set_payload_len(&mut self, len: usize) {
        self.size = len as u64;
    }

    /// Stamp `checksum` and `original_size` from the ingress payload if unset.
    pub fn ensure_fingerprint(&mut self, data: &[u8]) {
        if self.checksum.is_empty() {
            self.checksum = content_checksum(data);
        }
        if self.original_size.is_none() {
            self.original_size = Some(data.len() as u64);
        }
        self.size = data.len() as u64;
    }

    /// Size of the payload before any transform.
    pub fn origin_size(&self) -> u64 {
        self.original_size.unwrap_or(self.size)
    }

    /// Insert a custom field, replacing any previous value.
    pub fn set_custom(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) {
        self.custom.insert(key.into(), value.into());
    }

    /// Flatten into the string map a backend stores alongside the object.
    pub fn to_object_metadata(&self) -> ObjectMetadata {
        let mut map = ObjectMetadata::new();
        if !self.content_type.is_empty() {
            map.insert(meta_keys::CONTENT_TYPE.into(), self.content_type.clone());
        }
        if !self.extension.is_empty() {
            map.insert(meta_keys::EXTENSION.into(), self.extension.clone());
        }
        if !self.checksum.is_empty() {
            map.insert(meta_keys::CHECKSUM.into(), self.checksum.clone());
        }
        if let Some(original) = self.original_size {
            map.insert(meta_keys::ORIGINAL_SIZE.into(), original.to_string());
        }
        if self.compressed {
            map.insert(meta_keys::COMPRESSED.into(), "true".into());
            if let Some(method) = self.compression_method {
                map.insert(meta_keys::COMPRESSION_METHOD.into(), method.to_string());
            }
        }
        if self.encrypted {
            map.insert(meta_keys::ENCRYPTED.into(), "true".into());
        }
        if !self.custom.is_empty()
            && let Ok(encoded) = serde_json::to_string(&self.custom)
        {
            map.insert(meta_keys::CUSTOM.into(), encoded);
        }
        map
    }

    /// Rebuild metadata from a stored object's metadata map.
    ///
    /// `size` is the length of the bytes the backend returned. Unparseable
    /// entries are ignored.
    pub fn from_object_metadata(map: &ObjectMetadata, size: u64) -> Self {
        let flag = |key: &str| map.get(key).is_some_and(|v| v == "true");
        let compressed = flag(meta_keys::COMPRESSED);
        Self {
            content_type: map
                .get(meta_keys::CONTENT_TYPE)
                .cloned()
                .unwrap_or_default(),
            extension: map.get(meta_keys::EXTENSION).cloned().unwrap_or_default(),
            size,
            checksum: map.get(meta_keys::CHECKSUM).cloned().unwrap_or_default(),
            original_size: map
                .get(meta_keys::ORIGINAL_SIZE)
                .and_then(|v| v.parse().ok()),
            compressed,
            compression_method: if compressed {
                map.get(meta_keys::COMPRESSION_METHOD)
                    .and_then(|v| CompressionMethod::from_str(v).ok())
            } else {
                None
            },
            encrypted: flag(meta_keys::ENCRYPTED),
            custom: map
                .get(meta_keys::CUSTOM)
                .and_then(|v| serde_json::from_str(v).ok())
                .unwrap_or_default(),
        }
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}
