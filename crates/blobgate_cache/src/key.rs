//! Deterministic cache keys.

use blobgate_core::{FileMetadata, content_checksum};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Fields hashed into the second half of a key.
///
/// Declared in sorted order so the JSON encoding is canonical.
#[derive(Serialize)]
struct KeyFields<'a> {
    content_type: &'a str,
    extension: &'a str,
    size: u64,
}

/// Cache key: `sha256(payload)_sha256({content_type, extension, size})`.
///
/// Identical payloads with identical descriptive fields always produce the
/// same key.
///
/// # Examples
///
/// ```
/// use blobgate_cache::CacheKey;
///
/// let a = CacheKey::derive(b"hello", "text/plain", "txt");
/// let b = CacheKey::derive(b"hello", "text/plain", "txt");
/// let c = CacheKey::derive(b"hello", "text/markdown", "md");
/// assert_eq!(a, b);
/// assert_ne!(a, c);
/// assert_eq!(a.as_str().len(), 64 + 1 + 64);
/// ```
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, derive_more::Display,
)]
#[display("{}", _0)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive a key by hashing `payload`.
    pub fn derive(payload: &[u8], content_type: &str, extension: &str) -> Self {
        Self::from_fingerprint(
            &content_checksum(payload),
            content_type,
            extension,
            payload.len() as u64,
        )
    }

    /// Build a key from an already computed payload checksum.
    pub fn from_fingerprint(checksum: &str, content_type: &str, extension: &str, size: u64) -> Self {
        let fields = KeyFields {
            content_type,
            extension,
            size,
        };
        // Serializing a struct of borrowed strings and an integer cannot fail
        let encoded = serde_json::to_vec(&fields).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&encoded);
        Self(format!("{}_{:x}", checksum, hasher.finalize()))
    }

    /// Key for the payload described by `metadata` as it entered the gateway.
    ///
    /// Uses the ingress checksum and size, so stages that rewrite bytes
    /// before the cache do not change the key.
    pub fn for_ingress(metadata: &FileMetadata) -> Option<Self> {
        if metadata.checksum.is_empty() {
            return None;
        }
        Some(Self::from_fingerprint(
            &metadata.checksum,
            &metadata.content_type,
            &metadata.extension,
            metadata.origin_size(),
        ))
    }

    /// Parse a stored key, rejecting anything that is not two hex digests.
    pub fn parse(raw: &str) -> Option<Self> {
        let (left, right) = raw.split_once('_')?;
        let is_digest = |s: &str| s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit());
        (is_digest(left) && is_digest(right)).then(|| Self(raw.to_string()))
    }

    /// The key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
