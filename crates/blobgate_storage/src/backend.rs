//! Storage backend trait definition.

use blobgate_core::ObjectMetadata;
use blobgate_error::StorageResult;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lazy sequence of listed objects.
///
/// Every call to [`StorageBackend::list`] starts a fresh listing.
pub type ObjectStream = BoxStream<'static, StorageResult<StorageObject>>;

/// Record describing one stored object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageObject {
    /// Path relative to the backend root
    pub path: String,
    /// Stored length in bytes
    pub size_bytes: u64,
    /// MIME type of the stored bytes
    pub content_type: String,
    /// Creation (or last modification) time reported by the backend
    pub created_at: DateTime<Utc>,
    /// Direct URL, when the backend can produce one cheaply
    pub url: Option<String>,
    /// Metadata persisted alongside the object
    pub metadata: ObjectMetadata,
}

/// Uniform contract over blob storage destinations.
///
/// Paths are caller-relative and never resolve outside the backend's root.
/// Implementations report failures as [`blobgate_error::StorageErrorKind`]
/// values and leave retries to [`crate::ManagedBackend`].
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    /// Registered backend name, e.g. `"local"`.
    fn name(&self) -> &str;

    /// Store a payload.
    ///
    /// # Arguments
    ///
    /// * `data` - Bytes to store
    /// * `path` - Target path; generated from the time and a random suffix when `None`
    /// * `metadata` - Metadata to persist next to the object
    ///
    /// # Errors
    ///
    /// `Validation` when the path escapes the root.
    async fn save(
        &self,
        data: Bytes,
        path: Option<&str>,
        metadata: Option<&ObjectMetadata>,
    ) -> StorageResult<StorageObject>;

    /// Fetch a payload and its stored metadata.
    ///
    /// # Errors
    ///
    /// `NotFound` when the object is absent.
    async fn get(&self, path: &str) -> StorageResult<(Bytes, ObjectMetadata)>;

    /// Delete an object, returning `false` when it was already absent.
    async fn delete(&self, path: &str) -> StorageResult<bool>;

    /// Check whether an object exists.
    async fn exists(&self, path: &str) -> StorageResult<bool>;

    /// List objects under `prefix`, descending into sub-directories when `recursive`.
    fn list(&self, prefix: Option<&str>, recursive: bool) -> ObjectStream;

    /// URL for direct access.
    ///
    /// Object stores return a pre-signed URL valid for `expires_in`; other
    /// backends build one from their configured public domain.
    async fn get_url(&self, path: &str, expires_in: Option<Duration>) -> StorageResult<String>;
}
