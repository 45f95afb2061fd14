//! Remote file-serving API backend.
//!
//! The service wraps every response in an envelope:
//!
//! ```json
//! { "code": 0, "msg": "ok", "sn": "req-123", "data": { ... } }
//! ```
//!
//! A non-zero `code` is a failure.

use crate::http::{build_url, check_status, envelope_error, map_reqwest_error, parse_base_url};
use crate::path::{
    content_type_for, guess_content_type, normalize_path, normalize_prefix, resolve_save_path,
};
use crate::{FileApiConfig, ObjectStream, StorageBackend, StorageObject};
use blobgate_core::{ObjectMetadata, meta_keys};
use blobgate_error::{StorageError, StorageErrorKind, StorageResult};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Response envelope used by every endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    sn: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    /// Unwrap the payload, mapping failure codes into storage errors.
    pub(crate) fn into_data(self, path: &str) -> StorageResult<T> {
        if self.code != 0 {
            tracing::debug!(code = self.code, sn = ?self.sn, msg = %self.msg, "File API reported failure");
            return Err(envelope_error(self.code, &self.msg, path));
        }
        self.data.ok_or_else(|| {
            StorageError::new(StorageErrorKind::Unknown(format!(
                "{}: response carried no data",
                path
            )))
        })
    }
}

/// File record returned by `/upload`, `/info` and `/list`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FileInfo {
    #[serde(alias = "path")]
    filename: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    checksum: Option<String>,
    #[serde(default)]
    metadata: ObjectMetadata,
}

impl FileInfo {
    fn into_object(self) -> StorageObject {
        let mut metadata = self.metadata;
        if let Some(checksum) = self.checksum {
            metadata
                .entry(meta_keys::CHECKSUM.to_string())
                .or_insert(checksum);
        }
        StorageObject {
            size_bytes: self.size,
            content_type: self
                .content_type
                .unwrap_or_else(|| guess_content_type(&self.filename)),
            created_at: self.created_at.unwrap_or_else(Utc::now),
            url: self.url,
            metadata,
            path: self.filename,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileListing {
    #[serde(default)]
    files: Vec<FileInfo>,
    #[serde(default)]
    has_more: bool,
}

/// Backend for a remote file-serving HTTP API.
#[derive(Debug, Clone)]
pub struct FileApiBackend {
    client: reqwest::Client,
    base_url: url::Url,
    api_key: Option<String>,
    page_size: u32,
}

impl FileApiBackend {
    /// Create a File API backend.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the URL is invalid or the HTTP client cannot be built.
    #[tracing::instrument(skip(config), fields(api_url = %config.api_url()))]
    pub fn new(config: &FileApiConfig) -> StorageResult<Self> {
        let base_url = parse_base_url(config.api_url())?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(*config.timeout_secs()))
            .build()
            .map_err(|e| {
                StorageError::new(StorageErrorKind::Config(format!(
                    "failed to build HTTP client: {}",
                    e
                )))
            })?;

        tracing::info!("Created File API storage backend");
        Ok(Self {
            client,
            base_url,
            api_key: config.api_key().clone(),
            page_size: (*config.page_size()).max(1),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        path: &str,
    ) -> StorageResult<T> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, path))?;
        let response = check_status(response, path).await?;
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| map_reqwest_error(e, path))?;
        envelope.into_data(path)
    }

    async fn info(&self, rel: &str) -> StorageResult<FileInfo> {
        let url = build_url(&self.base_url, "info", rel);
        self.call(self.client.get(url), rel).await
    }
}

#[async_trait::async_trait]
impl StorageBackend for FileApiBackend {
    fn name(&self) -> &str {
        "fileapi"
    }

    #[tracing::instrument(skip(self, data, metadata), fields(size = data.len()))]
    async fn save(
        &self,
        data: Bytes,
        path: Option<&str>,
        metadata: Option<&ObjectMetadata>,
    ) -> StorageResult<StorageObject> {
        let rel = resolve_save_path(path, metadata)?;
        let content_type = content_type_for(&rel, metadata);
        let stored = metadata.cloned().unwrap_or_default();
        let size = data.len() as u64;

        let file_part = reqwest::multipart::Part::bytes(data.to_vec())
            .file_name(rel.clone())
            .mime_str(&content_type)
            .map_err(|e| {
                StorageError::new(StorageErrorKind::Validation(format!(
                    "invalid content type {:?}: {}",
                    content_type, e
                )))
            })?;
        let encoded_meta = serde_json::to_string(&stored).map_err(|e| {
            StorageError::new(StorageErrorKind::Unknown(format!("encode metadata: {}", e)))
        })?;
        let form = reqwest::multipart::Form::new()
            .part("file", file_part)
            .text("path", rel.clone())
            .text("metadata", encoded_meta);

        let url = build_url(&self.base_url, "upload", "");
        let info: FileInfo = self.call(self.client.post(url).multipart(form), &rel).await?;

        tracing::info!(path = %rel, size, "Stored object");
        let mut object = info.into_object();
        object.size_bytes = size;
        object.content_type = content_type;
        object.metadata = stored;
        Ok(object)
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, path: &str) -> StorageResult<(Bytes, ObjectMetadata)> {
        let rel = normalize_path(path)?;
        let info = self.info(&rel).await?;
        let download_url = info.url.clone().ok_or_else(|| {
            StorageError::new(StorageErrorKind::Unknown(format!(
                "{}: no download URL returned",
                rel
            )))
        })?;

        let response = self
            .authorize(self.client.get(&download_url))
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, &rel))?;
        let data = check_status(response, &rel)
            .await?
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(e, &rel))?;

        let object = info.into_object();
        let mut metadata = object.metadata;
        metadata
            .entry(meta_keys::CONTENT_TYPE.to_string())
            .or_insert(object.content_type);

        tracing::debug!(path = %rel, size = data.len(), "Retrieved object");
        Ok((data, metadata))
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, path: &str) -> StorageResult<bool> {
        let rel = normalize_path(path)?;
        let url = build_url(&self.base_url, "delete", &rel);
        match self
            .call::<serde_json::Value>(self.client.delete(url), &rel)
            .await
        {
            Ok(_) => {
                tracing::info!(path = %rel, "Deleted object");
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let rel = normalize_path(path)?;
        match self.info(&rel).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn list(&self, prefix: Option<&str>, recursive: bool) -> ObjectStream {
        let backend = self.clone();
        let prefix = normalize_prefix(prefix);

        Box::pin(async_stream::try_stream! {
            let prefix = prefix?.unwrap_or_default();
            let mut page: u32 = 1;
            loop {
                let url = build_url(&backend.base_url, "list", "");
                let request = backend.client.get(url).query(&[
                    ("prefix", prefix.clone()),
                    ("recursive", recursive.to_string()),
                    ("page", page.to_string()),
                    ("page_size", backend.page_size.to_string()),
                ]);
                let listing: FileListing = backend.call(request, &prefix).await?;
                let fetched = listing.files.len();

                for info in listing.files {
                    yield info.into_object();
                }

                if !listing.has_more || fetched == 0 {
                    break;
                }
                page += 1;
            }
        })
    }

    #[tracing::instrument(skip(self))]
    async fn get_url(&self, path: &str, _expires_in: Option<Duration>) -> StorageResult<String> {
        let rel = normalize_path(path)?;
        self.info(&rel).await?.url.ok_or_else(|| {
            StorageError::new(StorageErrorKind::Unknown(format!(
                "{}: no URL returned",
                rel
            )))
        })
    }
}
