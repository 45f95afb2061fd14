//! Local filesystem storage backend.
//!
//! Objects live at `{root}/{path}`. Object metadata is kept in JSON sidecars
//! under `{root}/.blobgate/meta/{path}.json`, a directory callers cannot
//! address. Paths that reach outside the root through a symlink are
//! rejected.

use crate::path::{
    RESERVED_DIR, content_type_for, guess_content_type, normalize_path, normalize_prefix,
    resolve_save_path,
};
use crate::{LocalConfig, ObjectStream, StorageBackend, StorageObject};
use blobgate_core::{ObjectMetadata, meta_keys};
use blobgate_error::{StorageError, StorageErrorKind, StorageResult};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Filesystem storage backend.
///
/// # Example Structure
///
/// ```text
/// /var/blobgate/
/// ├── reports/
/// │   └── q3.pdf
/// ├── 20240101_120000_abcdef12.png
/// └── .blobgate/
///     └── meta/
///         ├── reports/
///         │   └── q3.pdf.json
///         └── 20240101_120000_abcdef12.png.json
/// ```
///
/// Writes go to a temp file in the target directory followed by a rename,
/// so readers never observe a partially written object.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
    public_url: Option<String>,
}

impl LocalBackend {
    /// Create a local backend, creating the root directory if needed.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created or resolved.
    #[tracing::instrument(skip(config), fields(root = %config.root().display()))]
    pub fn new(config: &LocalConfig) -> StorageResult<Self> {
        let root = config.root();
        std::fs::create_dir_all(root).map_err(|e| map_io(e, root))?;
        let root = std::fs::canonicalize(root).map_err(|e| map_io(e, root))?;

        tracing::info!(root = %root.display(), "Created local storage backend");
        Ok(Self {
            root,
            public_url: config.public_url().clone(),
        })
    }

    /// Resolved root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Object path for `rel`, refusing paths whose existing part resolves
    /// through a symlink to somewhere outside the root.
    async fn contained_path(&self, rel: &str) -> StorageResult<PathBuf> {
        let target = self.object_path(rel);
        for ancestor in target.ancestors() {
            match tokio::fs::canonicalize(ancestor).await {
                Ok(real) if real.starts_with(&self.root) => return Ok(target),
                Ok(real) => {
                    tracing::warn!(path = %rel, resolved = %real.display(), "Path escapes storage root");
                    return Err(StorageError::new(StorageErrorKind::Validation(format!(
                        "{} resolves outside the storage root",
                        rel
                    ))));
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(map_io(e, ancestor)),
            }
        }
        Ok(target)
    }

    fn meta_path(&self, rel: &str) -> PathBuf {
        self.root
            .join(RESERVED_DIR)
            .join("meta")
            .join(format!("{}.json", rel))
    }

    fn url_for(&self, rel: &str) -> StorageResult<String> {
        match &self.public_url {
            Some(base) => Ok(format!("{}/{}", base.trim_end_matches('/'), rel)),
            None => url::Url::from_file_path(self.object_path(rel))
                .map(|u| u.to_string())
                .map_err(|_| {
                    StorageError::new(StorageErrorKind::Unknown(format!(
                        "cannot build file URL for {}",
                        rel
                    )))
                }),
        }
    }

    async fn read_sidecar(&self, rel: &str) -> ObjectMetadata {
        let path = self.meta_path(rel);
        let mut metadata = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice::<ObjectMetadata>(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable metadata sidecar");
                ObjectMetadata::new()
            }),
            Err(_) => ObjectMetadata::new(),
        };
        metadata
            .entry(meta_keys::CONTENT_TYPE.to_string())
            .or_insert_with(|| guess_content_type(rel));
        metadata
    }
}

/// Write `data` next to `target` and rename it into place.
async fn write_atomic(target: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| map_io(e, parent))?;
    }

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = target.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    tokio::fs::write(&temp_path, data)
        .await
        .map_err(|e| map_io(e, &temp_path))?;

    if let Err(e) = tokio::fs::rename(&temp_path, target).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(map_io(e, target));
    }
    Ok(())
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}

/// Map an I/O error onto the storage taxonomy.
fn map_io(err: std::io::Error, path: &Path) -> StorageError {
    use std::io::ErrorKind;

    let context = format!("{}: {}", path.display(), err);
    let kind = match err.kind() {
        ErrorKind::NotFound => StorageErrorKind::NotFound(path.display().to_string()),
        ErrorKind::PermissionDenied => StorageErrorKind::Permission(context),
        ErrorKind::StorageFull | ErrorKind::QuotaExceeded | ErrorKind::FileTooLarge => {
            StorageErrorKind::Quota(context)
        }
        ErrorKind::TimedOut => StorageErrorKind::Timeout(context),
        _ => StorageErrorKind::Unknown(context),
    };
    StorageError::new(kind)
}

#[async_trait::async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    #[tracing::instrument(skip(self, data, metadata), fields(size = data.len()))]
    async fn save(
        &self,
        data: Bytes,
        path: Option<&str>,
        metadata: Option<&ObjectMetadata>,
    ) -> StorageResult<StorageObject> {
        let rel = resolve_save_path(path, metadata)?;
        let target = self.contained_path(&rel).await?;

        if tokio::fs::metadata(&target)
            .await
            .is_ok_and(|m| m.is_dir())
        {
            return Err(StorageError::new(StorageErrorKind::Validation(format!(
                "{} is a directory",
                rel
            ))));
        }

        write_atomic(&target, &data).await?;

        let stored = metadata.cloned().unwrap_or_default();
        let sidecar = serde_json::to_vec(&stored).map_err(|e| {
            StorageError::new(StorageErrorKind::Unknown(format!(
                "encode metadata for {}: {}",
                rel, e
            )))
        })?;
        write_atomic(&self.meta_path(&rel), &sidecar).await?;

        tracing::info!(path = %rel, size = data.len(), "Stored object");

        Ok(StorageObject {
            content_type: content_type_for(&rel, metadata),
            size_bytes: data.len() as u64,
            created_at: Utc::now(),
            url: Some(self.url_for(&rel)?),
            metadata: stored,
            path: rel,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, path: &str) -> StorageResult<(Bytes, ObjectMetadata)> {
        let rel = normalize_path(path)?;
        let target = self.contained_path(&rel).await?;

        let data = tokio::fs::read(&target).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::new(StorageErrorKind::NotFound(rel.clone()))
            } else {
                map_io(e, &target)
            }
        })?;
        let metadata = self.read_sidecar(&rel).await;

        tracing::debug!(path = %rel, size = data.len(), "Retrieved object");
        Ok((Bytes::from(data), metadata))
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, path: &str) -> StorageResult<bool> {
        let rel = normalize_path(path)?;
        let target = self.contained_path(&rel).await?;

        match tokio::fs::remove_file(&target).await {
            Ok(()) => {
                let _ = tokio::fs::remove_file(self.meta_path(&rel)).await;
                tracing::info!(path = %rel, "Deleted object");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %rel, "Object already absent");
                Ok(false)
            }
            Err(e) => Err(map_io(e, &target)),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let rel = normalize_path(path)?;
        let target = self.contained_path(&rel).await?;
        match tokio::fs::metadata(&target).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(map_io(e, &target)),
        }
    }

    fn list(&self, prefix: Option<&str>, recursive: bool) -> ObjectStream {
        let backend = self.clone();
        let prefix = normalize_prefix(prefix);

        Box::pin(async_stream::try_stream! {
            let prefix = prefix?;
            let start_rel = prefix.unwrap_or_default();
            let mut pending = vec![(backend.object_path(&start_rel), start_rel)];

            while let Some((dir, rel_dir)) = pending.pop() {
                let mut entries = match tokio::fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) if e.kind() == std::io::ErrorKind::NotADirectory => continue,
                    Err(e) => Err(map_io(e, &dir))?,
                };

                while let Some(entry) = entries.next_entry().await.map_err(|e| map_io(e, &dir))? {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    let rel = if rel_dir.is_empty() {
                        name.clone()
                    } else {
                        format!("{}/{}", rel_dir, name)
                    };
                    let file_type = entry.file_type().await.map_err(|e| map_io(e, &entry.path()))?;

                    if file_type.is_dir() {
                        if recursive && !(rel_dir.is_empty() && name == RESERVED_DIR) {
                            pending.push((entry.path(), rel));
                        }
                        continue;
                    }
                    if !file_type.is_file() || is_temp_name(&name) {
                        continue;
                    }

                    let meta = entry.metadata().await.map_err(|e| map_io(e, &entry.path()))?;
                    let created_at = meta
                        .modified()
                        .map(DateTime::<Utc>::from)
                        .unwrap_or_else(|_| Utc::now());

                    yield StorageObject {
                        size_bytes: meta.len(),
                        content_type: guess_content_type(&rel),
                        created_at,
                        url: backend.url_for(&rel).ok(),
                        metadata: ObjectMetadata::new(),
                        path: rel,
                    };
                }
            }
        })
    }

    #[tracing::instrument(skip(self))]
    async fn get_url(&self, path: &str, _expires_in: Option<Duration>) -> StorageResult<String> {
        let rel = normalize_path(path)?;
        if !self.exists(&rel).await? {
            return Err(StorageError::new(StorageErrorKind::NotFound(rel)));
        }
        self.url_for(&rel)
    }
}
