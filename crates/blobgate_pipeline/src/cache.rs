//! Cache stage backed by a [`CacheStore`].

use crate::middleware::matches_type;
use crate::{CacheMiddlewareConfig, Middleware, Staged};
use blobgate_cache::{CacheKey, CacheStore};
use blobgate_core::FileMetadata;
use blobgate_error::PipelineResult;
use bytes::Bytes;
use std::sync::Arc;

const STAGE: &str = "cache";

/// Reuses earlier pipeline output for byte-identical inputs.
///
/// On upload the key comes from the ingress fingerprint (`checksum`,
/// `original_size`, content type and extension), so stages placed before
/// the cache cannot make it miss by rewriting bytes nondeterministically.
/// On download the key is derived from the stored bytes themselves.
///
/// A hit returns the cached payload and metadata snapshot; a miss stores
/// the current payload and passes it on. Store failures count as misses.
#[derive(Debug, Clone)]
pub struct CacheMiddleware {
    store: Arc<dyn CacheStore>,
    config: CacheMiddlewareConfig,
}

impl CacheMiddleware {
    /// Create the stage over a shared store.
    pub fn new(store: Arc<dyn CacheStore>, config: CacheMiddlewareConfig) -> Self {
        Self { store, config }
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    fn is_cacheable(&self, size: usize, content_type: &str) -> bool {
        if size as u64 > *self.config.max_file_size() {
            return false;
        }
        self.config.cache_types().is_empty()
            || matches_type(content_type, self.config.cache_types())
    }

    async fn lookup_or_store(
        &self,
        key: CacheKey,
        data: Bytes,
        metadata: FileMetadata,
    ) -> Staged {
        if let Some(entry) = self.store.get(&key).await {
            tracing::debug!(store = self.store.name(), key = %key, "Cache hit");
            let (payload, mut cached) = entry.into_parts();
            cached.set_payload_len(payload.len());
            return (payload, cached);
        }

        tracing::debug!(store = self.store.name(), key = %key, "Cache miss");
        self.store.put(&key, data.clone(), &metadata).await;
        (data, metadata)
    }
}

#[async_trait::async_trait]
impl Middleware for CacheMiddleware {
    fn name(&self) -> &str {
        STAGE
    }

    fn validate(&self) -> bool {
        *self.config.max_file_size() > 0
    }

    #[tracing::instrument(skip(self, data, metadata), fields(size = data.len()))]
    async fn process_upload(&self, data: Bytes, metadata: FileMetadata) -> PipelineResult<Staged> {
        if !self.is_cacheable(data.len(), &metadata.content_type) {
            return Ok((data, metadata));
        }
        let key = CacheKey::for_ingress(&metadata).unwrap_or_else(|| {
            CacheKey::derive(&data, &metadata.content_type, &metadata.extension)
        });
        Ok(self.lookup_or_store(key, data, metadata).await)
    }

    #[tracing::instrument(skip(self, data, metadata), fields(size = data.len()))]
    async fn process_download(
        &self,
        data: Bytes,
        metadata: FileMetadata,
    ) -> PipelineResult<Staged> {
        if !self.is_cacheable(data.len(), &metadata.content_type) {
            return Ok((data, metadata));
        }
        let key = CacheKey::derive(&data, &metadata.content_type, &metadata.extension);
        Ok(self.lookup_or_store(key, data, metadata).await)
    }
}
