//! AList storage backend.
//!
//! Talks to the AList v3 HTTP API. Every response is wrapped in
//! `{ "code": 200, "message": "success", "data": ... }`; the HTTP status is
//! always 200, so failures are detected from `code`. Object metadata is
//! stored as JSON sidecars under `{root_dir}/.blobgate/meta/`.

use crate::http::{check_status, map_reqwest_error, parse_base_url};
use crate::path::{
    RESERVED_DIR, content_type_for, guess_content_type, normalize_path, normalize_prefix,
    resolve_save_path,
};
use crate::{AListConfig, ObjectStream, StorageBackend, StorageObject};
use blobgate_core::{ObjectMetadata, meta_keys};
use blobgate_error::{StorageError, StorageErrorKind, StorageResult};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const SUCCESS_CODE: i64 = 200;

#[derive(Debug, Deserialize)]
struct AListResponse<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Debug, Clone, Deserialize)]
struct FsObject {
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    is_dir: bool,
    #[serde(default)]
    modified: Option<DateTime<Utc>>,
    #[serde(default)]
    raw_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FsListing {
    #[serde(default)]
    content: Option<Vec<FsObject>>,
    #[serde(default)]
    total: u64,
}

/// Map an AList response code onto the storage taxonomy.
///
/// AList reports missing objects as code 500 with a "not found" message.
fn alist_error(code: i64, message: &str, path: &str) -> StorageError {
    let context = format!("{}: {}", path, message);
    if message.to_ascii_lowercase().contains("not found") {
        return StorageError::new(StorageErrorKind::NotFound(path.to_string()));
    }
    let kind = match u16::try_from(code) {
        Ok(status) => StorageErrorKind::from_status(status, context),
        Err(_) => StorageErrorKind::Unknown(format!("code {}: {}", code, context)),
    };
    StorageError::new(kind)
}

/// Storage backend for an AList server.
#[derive(Debug, Clone)]
pub struct AListBackend {
    client: reqwest::Client,
    base_url: url::Url,
    username: String,
    password: String,
    root_dir: String,
    file_password: String,
    page_size: u32,
    token: Arc<RwLock<Option<String>>>,
}

impl AListBackend {
    /// Create an AList backend. Login happens lazily on the first request.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the URL is invalid or the HTTP client cannot be built.
    #[tracing::instrument(skip(config), fields(base_url = %config.base_url(), root_dir = %config.root_dir()))]
    pub fn new(config: &AListConfig) -> StorageResult<Self> {
        let base_url = parse_base_url(config.base_url())?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(*config.timeout_secs()))
            .danger_accept_invalid_certs(!*config.verify_ssl())
            .build()
            .map_err(|e| {
                StorageError::new(StorageErrorKind::Config(format!(
                    "failed to build HTTP client: {}",
                    e
                )))
            })?;

        let root_dir = format!("/{}", config.root_dir().trim_matches('/'));
        tracing::info!("Created AList storage backend");
        Ok(Self {
            client,
            base_url,
            username: config.username().clone(),
            password: config.password().clone(),
            root_dir,
            file_password: config.file_password().clone().unwrap_or_default(),
            page_size: (*config.page_size()).max(1),
            token: Arc::new(RwLock::new(None)),
        })
    }

    fn endpoint(&self, route: &str) -> StorageResult<url::Url> {
        self.base_url.join(route).map_err(|e| {
            StorageError::new(StorageErrorKind::Config(format!(
                "invalid endpoint {}: {}",
                route, e
            )))
        })
    }

    /// Absolute AList path for a root-relative path.
    fn full_path(&self, rel: &str) -> String {
        let root = self.root_dir.trim_end_matches('/');
        match rel.trim_matches('/') {
            "" if root.is_empty() => "/".to_string(),
            "" => root.to_string(),
            rel => format!("{}/{}", root, rel),
        }
    }

    fn meta_rel(rel: &str) -> String {
        format!("{}/meta/{}.json", RESERVED_DIR, rel)
    }

    #[tracing::instrument(skip(self))]
    async fn login(&self) -> StorageResult<String> {
        let response = self
            .client
            .post(self.endpoint("/api/auth/login")?)
            .json(&json!({ "username": self.username, "password": self.password }))
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, "login"))?;
        let body: AListResponse<LoginData> = check_status(response, "login")
            .await?
            .json()
            .await
            .map_err(|e| map_reqwest_error(e, "login"))?;

        if body.code != SUCCESS_CODE {
            return Err(StorageError::new(StorageErrorKind::Permission(format!(
                "AList login failed: {}",
                body.message
            ))));
        }
        let token = body
            .data
            .map(|d| d.token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                StorageError::new(StorageErrorKind::Permission(
                    "no token in AList login response".to_string(),
                ))
            })?;

        *self.token.write().await = Some(token.clone());
        tracing::debug!("Logged in to AList");
        Ok(token)
    }

    async fn token(&self) -> StorageResult<String> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.login().await
    }

    /// POST a JSON body, logging in again once if the token has expired.
    async fn call<T: DeserializeOwned>(
        &self,
        route: &str,
        body: JsonValue,
        path: &str,
    ) -> StorageResult<Option<T>> {
        let url = self.endpoint(route)?;
        let mut relogged = false;
        loop {
            let token = self.token().await?;
            let response = self
                .client
                .post(url.clone())
                .header(reqwest::header::AUTHORIZATION, token)
                .json(&body)
                .send()
                .await
                .map_err(|e| map_reqwest_error(e, path))?;
            let reply: AListResponse<T> = check_status(response, path)
                .await?
                .json()
                .await
                .map_err(|e| map_reqwest_error(e, path))?;

            match reply.code {
                SUCCESS_CODE => return Ok(reply.data),
                401 if !relogged => {
                    tracing::debug!("AList token rejected, logging in again");
                    *self.token.write().await = None;
                    relogged = true;
                }
                code => return Err(alist_error(code, &reply.message, path)),
            }
        }
    }

    async fn stat(&self, rel: &str) -> StorageResult<FsObject> {
        let body = json!({ "path": self.full_path(rel), "password": self.file_password });
        self.call::<FsObject>("/api/fs/get", body, rel)
            .await?
            .ok_or_else(|| StorageError::new(StorageErrorKind::NotFound(rel.to_string())))
    }

    async fn upload(&self, rel: &str, data: Bytes) -> StorageResult<()> {
        let full_path = self.full_path(rel);
        let encoded_path: String =
            url::form_urlencoded::byte_serialize(full_path.as_bytes()).collect();
        let mut relogged = false;
        loop {
            let token = self.token().await?;
            let response = self
                .client
                .put(self.endpoint("/api/fs/put")?)
                .header(reqwest::header::AUTHORIZATION, token)
                .header("File-Path", encoded_path.as_str())
                .header("Password", self.file_password.as_str())
                .header(reqwest::header::CONTENT_TYPE, guess_content_type(rel))
                .body(data.clone())
                .send()
                .await
                .map_err(|e| map_reqwest_error(e, rel))?;
            let reply: AListResponse<JsonValue> = check_status(response, rel)
                .await?
                .json()
                .await
                .map_err(|e| map_reqwest_error(e, rel))?;

            match reply.code {
                SUCCESS_CODE => return Ok(()),
                401 if !relogged => {
                    *self.token.write().await = None;
                    relogged = true;
                }
                code => return Err(alist_error(code, &reply.message, rel)),
            }
        }
    }

    async fn download(&self, rel: &str) -> StorageResult<Bytes> {
        let object = self.stat(rel).await?;
        if object.is_dir {
            return Err(StorageError::new(StorageErrorKind::Validation(format!(
                "{} is a directory",
                rel
            ))));
        }
        let raw_url = object.raw_url.filter(|u| !u.is_empty()).ok_or_else(|| {
            StorageError::new(StorageErrorKind::Unknown(format!(
                "{}: no raw_url returned",
                rel
            )))
        })?;
        let response = self
            .client
            .get(&raw_url)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, rel))?;
        check_status(response, rel)
            .await?
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(e, rel))
    }

    async fn remove(&self, rel: &str) -> StorageResult<()> {
        let full_path = self.full_path(rel);
        let (dir, name) = full_path
            .rsplit_once('/')
            .map(|(d, n)| (if d.is_empty() { "/" } else { d }, n))
            .unwrap_or(("/", full_path.as_str()));
        let body = json!({ "dir": dir, "names": [name] });
        self.call::<JsonValue>("/api/fs/remove", body, rel).await?;
        Ok(())
    }

    async fn list_page(&self, rel_dir: &str, page: u32) -> StorageResult<FsListing> {
        let body = json!({
            "path": self.full_path(rel_dir),
            "password": self.file_password,
            "page": page,
            "per_page": self.page_size,
            "refresh": false,
        });
        Ok(self
            .call::<FsListing>("/api/fs/list", body, rel_dir)
            .await?
            .unwrap_or(FsListing {
                content: None,
                total: 0,
            }))
    }

    fn object_for(rel: String, entry: &FsObject) -> StorageObject {
        StorageObject {
            size_bytes: entry.size,
            content_type: guess_content_type(&rel),
            created_at: entry.modified.unwrap_or_else(Utc::now),
            url: entry.raw_url.clone().filter(|u| !u.is_empty()),
            metadata: ObjectMetadata::new(),
            path: rel,
        }
    }
}

#[async_trait::async_trait]
impl StorageBackend for AListBackend {
    fn name(&self) -> &str {
        "alist"
    }

    #[tracing::instrument(skip(self, data, metadata), fields(size = data.len()))]
    async fn save(
        &self,
        data: Bytes,
        path: Option<&str>,
        metadata: Option<&ObjectMetadata>,
    ) -> StorageResult<StorageObject> {
        let rel = resolve_save_path(path, metadata)?;
        let size = data.len() as u64;
        let stored = metadata.cloned().unwrap_or_default();

        self.upload(&rel, data).await?;
        let sidecar = serde_json::to_vec(&stored).map_err(|e| {
            StorageError::new(StorageErrorKind::Unknown(format!("encode metadata: {}", e)))
        })?;
        self.upload(&Self::meta_rel(&rel), Bytes::from(sidecar)).await?;

        tracing::info!(path = %rel, size, "Stored object");
        Ok(StorageObject {
            size_bytes: size,
            content_type: content_type_for(&rel, metadata),
            created_at: Utc::now(),
            url: None,
            metadata: stored,
            path: rel,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, path: &str) -> StorageResult<(Bytes, ObjectMetadata)> {
        let rel = normalize_path(path)?;
        let data = self.download(&rel).await?;

        let mut metadata = match self.download(&Self::meta_rel(&rel)).await {
            Ok(raw) => serde_json::from_slice::<ObjectMetadata>(&raw).unwrap_or_default(),
            Err(e) => {
                tracing::debug!(path = %rel, error = %e, "No metadata sidecar");
                ObjectMetadata::new()
            }
        };
        metadata
            .entry(meta_keys::CONTENT_TYPE.to_string())
            .or_insert_with(|| guess_content_type(&rel));

        tracing::debug!(path = %rel, size = data.len(), "Retrieved object");
        Ok((data, metadata))
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, path: &str) -> StorageResult<bool> {
        let rel = normalize_path(path)?;
        match self.stat(&rel).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        }
        self.remove(&rel).await?;
        if let Err(e) = self.remove(&Self::meta_rel(&rel)).await {
            tracing::debug!(path = %rel, error = %e, "No metadata sidecar to remove");
        }

        tracing::info!(path = %rel, "Deleted object");
        Ok(true)
    }

    #[tracing::instrument(skip(self))]
    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let rel = normalize_path(path)?;
        match self.stat(&rel).await {
            Ok(object) => Ok(!object.is_dir),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn list(&self, prefix: Option<&str>, recursive: bool) -> ObjectStream {
        let backend = self.clone();
        let prefix = normalize_prefix(prefix);

        Box::pin(async_stream::try_stream! {
            let start = prefix?.unwrap_or_default();
            let mut pending = vec![start];

            while let Some(rel_dir) = pending.pop() {
                let mut page: u32 = 1;
                let mut seen: u64 = 0;
                loop {
                    let listing = match backend.list_page(&rel_dir, page).await {
                        Ok(listing) => listing,
                        Err(e) if e.is_not_found() => break,
                        Err(e) => Err(e)?,
                    };
                    let entries = listing.content.unwrap_or_default();
                    let fetched = entries.len() as u64;
                    seen += fetched;

                    for entry in entries {
                        let rel = if rel_dir.is_empty() {
                            entry.name.clone()
                        } else {
                            format!("{}/{}", rel_dir, entry.name)
                        };
                        if entry.is_dir {
                            if recursive && !(rel_dir.is_empty() && entry.name == RESERVED_DIR) {
                                pending.push(rel);
                            }
                            continue;
                        }
                        yield Self::object_for(rel, &entry);
                    }

                    if fetched == 0 || seen >= listing.total {
                        break;
                    }
                    page += 1;
                }
            }
        })
    }

    #[tracing::instrument(skip(self))]
    async fn get_url(&self, path: &str, _expires_in: Option<Duration>) -> StorageResult<String> {
        let rel = normalize_path(path)?;
        self.stat(&rel)
            .await?
            .raw_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                StorageError::new(StorageErrorKind::Unknown(format!(
                    "{}: no raw_url returned",
                    rel
                )))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(root_dir: &str) -> AListBackend {
        let raw = json!({
            "base_url": "http://alist.local:5244",
            "username": "admin",
            "password": "secret",
            "root_dir": root_dir,
        });
        let config: AListConfig = serde_json::from_value(raw).unwrap();
        AListBackend::new(&config).unwrap()
    }

    #[test]
    fn test_full_path_joins_root() {
        assert_eq!(backend("/storage/").full_path("a/b.txt"), "/storage/a/b.txt");
        assert_eq!(backend("/").full_path("a.txt"), "/a.txt");
        assert_eq!(backend("/").full_path(""), "/");
    }

    #[test]
    fn test_not_found_message_maps_to_not_found() {
        assert!(alist_error(500, "failed get storage: object not found", "x").is_not_found());
        assert!(matches!(
            alist_error(403, "permission denied", "x").kind,
            StorageErrorKind::Permission(_)
        ));
    }

    #[test]
    fn test_listing_decodes_null_content() {
        let raw = r#"{"code":200,"message":"success","data":{"content":null,"total":0}}"#;
        let reply: AListResponse<FsListing> = serde_json::from_str(raw).unwrap();
        assert_eq!(reply.code, SUCCESS_CODE);
        assert!(reply.data.unwrap().content.is_none());
    }
}
