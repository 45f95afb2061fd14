//! S3-compatible object store backend.

use crate::path::{
    content_type_for, guess_content_type, join_key, normalize_path, normalize_prefix,
    resolve_save_path, strip_key_prefix,
};
use crate::{ObjectStream, S3Config, StorageBackend, StorageObject};
use blobgate_core::{ObjectMetadata, meta_keys};
use blobgate_error::{StorageError, StorageErrorKind, StorageResult};
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::signer::Signer;
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectMeta, ObjectStore, PutOptions, PutPayload,
};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

/// Object store backend for S3 and S3-compatible services.
///
/// Works against any [`ObjectStore`]; pre-signed URLs are only available
/// when constructed from an [`S3Config`].
#[derive(Debug, Clone)]
pub struct S3Backend {
    store: Arc<dyn ObjectStore>,
    signer: Option<Arc<AmazonS3>>,
    prefix: Option<String>,
    public_domain: Option<String>,
    url_expiry: Duration,
}

impl S3Backend {
    /// Build a backend from S3 credentials.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the client cannot be built from the options.
    #[tracing::instrument(skip(config), fields(bucket = %config.bucket(), region = %config.region()))]
    pub fn new(config: &S3Config) -> StorageResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(config.bucket())
            .with_region(config.region())
            .with_access_key_id(config.access_key_id())
            .with_secret_access_key(config.secret_access_key())
            .with_allow_http(*config.allow_http());

        // For supporting localstack/minio
        if let Some(endpoint) = config.endpoint() {
            builder = builder.with_endpoint(endpoint);
        }

        let client = Arc::new(builder.build().map_err(|e| {
            StorageError::new(StorageErrorKind::Config(format!(
                "failed to build S3 client: {}",
                e
            )))
        })?);

        tracing::info!("Created S3 storage backend");
        Ok(Self {
            store: client.clone(),
            signer: Some(client),
            prefix: config.prefix().clone(),
            public_domain: config.public_domain().clone(),
            url_expiry: Duration::from_secs(*config.url_expiry_secs()),
        })
    }

    /// Wrap an existing object store, e.g. an in-memory store in tests.
    pub fn with_store(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            signer: None,
            prefix: None,
            public_domain: None,
            url_expiry: Duration::from_secs(3600),
        }
    }

    /// Place every object under `prefix`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Build URLs from `domain` when no signer is available.
    pub fn with_public_domain(mut self, domain: impl Into<String>) -> Self {
        self.public_domain = Some(domain.into());
        self
    }

    fn location(&self, rel: &str) -> ObjectPath {
        ObjectPath::from(join_key(self.prefix.as_deref(), rel))
    }
}

fn map_store_error(err: object_store::Error, path: &str) -> StorageError {
    use object_store::Error;

    let kind = match &err {
        Error::NotFound { .. } => StorageErrorKind::NotFound(path.to_string()),
        Error::InvalidPath { .. } => StorageErrorKind::Validation(format!("{}: {}", path, err)),
        Error::PermissionDenied { .. } | Error::Unauthenticated { .. } => {
            StorageErrorKind::Permission(format!("{}: {}", path, err))
        }
        Error::NotImplemented | Error::NotSupported { .. } => {
            StorageErrorKind::Config(format!("{}: {}", path, err))
        }
        Error::Generic { .. } => StorageErrorKind::Connection(format!("{}: {}", path, err)),
        _ => StorageErrorKind::Unknown(format!("{}: {}", path, err)),
    };
    StorageError::new(kind)
}

fn to_attributes(metadata: &ObjectMetadata, content_type: &str) -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert(
        Attribute::ContentType,
        AttributeValue::from(content_type.to_string()),
    );
    for (key, value) in metadata {
        if key == meta_keys::CONTENT_TYPE {
            continue;
        }
        attributes.insert(
            Attribute::Metadata(Cow::Owned(key.clone())),
            AttributeValue::from(value.clone()),
        );
    }
    attributes
}

fn from_attributes(attributes: &Attributes, rel: &str) -> ObjectMetadata {
    let mut metadata = ObjectMetadata::new();
    for (attribute, value) in attributes {
        let value: &str = value.as_ref();
        match attribute {
            Attribute::ContentType => {
                metadata.insert(meta_keys::CONTENT_TYPE.to_string(), value.to_string());
            }
            Attribute::Metadata(key) => {
                metadata.insert(key.to_string(), value.to_string());
            }
            _ => {}
        }
    }
    metadata
        .entry(meta_keys::CONTENT_TYPE.to_string())
        .or_insert_with(|| guess_content_type(rel));
    metadata
}

fn to_object(meta: &ObjectMeta, prefix: Option<&str>, public_domain: Option<&str>) -> StorageObject {
    let rel = strip_key_prefix(prefix, meta.location.as_ref()).to_string();
    StorageObject {
        size_bytes: meta.size as u64,
        content_type: guess_content_type(&rel),
        created_at: meta.last_modified,
        url: public_domain.map(|d| format!("{}/{}", d.trim_end_matches('/'), meta.location)),
        metadata: ObjectMetadata::new(),
        path: rel,
    }
}

#[async_trait::async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        "s3"
    }

    #[tracing::instrument(skip(self, data, metadata), fields(size = data.len()))]
    async fn save(
        &self,
        data: Bytes,
        path: Option<&str>,
        metadata: Option<&ObjectMetadata>,
    ) -> StorageResult<StorageObject> {
        let rel = resolve_save_path(path, metadata)?;
        let location = self.location(&rel);
        let content_type = content_type_for(&rel, metadata);
        let stored = metadata.cloned().unwrap_or_default();
        let size = data.len() as u64;

        let options = PutOptions {
            attributes: to_attributes(&stored, &content_type),
            ..Default::default()
        };
        self.store
            .put_opts(&location, PutPayload::from(data), options)
            .await
            .map_err(|e| map_store_error(e, &rel))?;

        tracing::info!(path = %rel, size, "Stored object");

        Ok(StorageObject {
            size_bytes: size,
            content_type,
            created_at: Utc::now(),
            url: self
                .public_domain
                .as_ref()
                .map(|d| format!("{}/{}", d.trim_end_matches('/'), location)),
            metadata: stored,
            path: rel,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, path: &str) -> StorageResult<(Bytes, ObjectMetadata)> {
        let rel = normalize_path(path)?;
        let result = self
            .store
            .get(&self.location(&rel))
            .await
            .map_err(|e| map_store_error(e, &rel))?;
        let metadata = from_attributes(&result.attributes, &rel);
        let data = result.bytes().await.map_err(|e| map_store_error(e, &rel))?;

        tracing::debug!(path = %rel, size = data.len(), "Retrieved object");
        Ok((data, metadata))
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, path: &str) -> StorageResult<bool> {
        let rel = normalize_path(path)?;
        let location = self.location(&rel);

        // S3 deletes of missing keys succeed, so check first
        match self.store.head(&location).await {
            Ok(_) => {}
            Err(object_store::Error::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(map_store_error(e, &rel)),
        }
        self.store
            .delete(&location)
            .await
            .map_err(|e| map_store_error(e, &rel))?;

        tracing::info!(path = %rel, "Deleted object");
        Ok(true)
    }

    #[tracing::instrument(skip(self))]
    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let rel = normalize_path(path)?;
        match self.store.head(&self.location(&rel)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(map_store_error(e, &rel)),
        }
    }

    fn list(&self, prefix: Option<&str>, recursive: bool) -> ObjectStream {
        let store = self.store.clone();
        let key_prefix = self.prefix.clone();
        let public_domain = self.public_domain.clone();
        let prefix = normalize_prefix(prefix);

        Box::pin(async_stream::try_stream! {
            let prefix = prefix?;
            let search = match (&key_prefix, &prefix) {
                (None, None) => None,
                (_, Some(p)) => Some(ObjectPath::from(join_key(key_prefix.as_deref(), p))),
                (Some(k), None) => Some(ObjectPath::from(k.trim_matches('/'))),
            };
            let context = prefix.clone().unwrap_or_default();

            if recursive {
                let mut listing = store.list(search.as_ref());
                while let Some(meta) = listing.next().await {
                    let meta = meta.map_err(|e| map_store_error(e, &context))?;
                    yield to_object(&meta, key_prefix.as_deref(), public_domain.as_deref());
                }
            } else {
                // The delimiter keeps the service from walking sub-directories
                let listing = store
                    .list_with_delimiter(search.as_ref())
                    .await
                    .map_err(|e| map_store_error(e, &context))?;
                for meta in &listing.objects {
                    yield to_object(meta, key_prefix.as_deref(), public_domain.as_deref());
                }
            }
        })
    }

    #[tracing::instrument(skip(self))]
    async fn get_url(&self, path: &str, expires_in: Option<Duration>) -> StorageResult<String> {
        let rel = normalize_path(path)?;
        let location = self.location(&rel);

        if let Some(signer) = &self.signer {
            let url = signer
                .signed_url(http::Method::GET, &location, expires_in.unwrap_or(self.url_expiry))
                .await
                .map_err(|e| map_store_error(e, &rel))?;
            return Ok(url.to_string());
        }

        match &self.public_domain {
            Some(domain) => Ok(format!("{}/{}", domain.trim_end_matches('/'), location)),
            None => Err(StorageError::new(StorageErrorKind::Config(
                "no signer or public domain configured for URLs".to_string(),
            ))),
        }
    }
}
