//! Path validation and object naming shared by every backend.

use blobgate_core::{ObjectMetadata, meta_keys};
use blobgate_error::{StorageError, StorageErrorKind, StorageResult};
use chrono::Utc;
use uuid::Uuid;

/// Directory under a local root reserved for backend bookkeeping.
pub const RESERVED_DIR: &str = ".blobgate";

/// Validate a caller-supplied path and return its normalized form.
///
/// Rejects empty paths, absolute paths, null bytes, backslashes, `..`
/// segments and the reserved bookkeeping directory. `.` and empty segments
/// are dropped.
///
/// # Examples
///
/// ```
/// use blobgate_storage::normalize_path;
///
/// assert_eq!(normalize_path("docs/./q3//report.pdf").unwrap(), "docs/q3/report.pdf");
/// assert!(normalize_path("../../etc/passwd").is_err());
/// assert!(normalize_path("/etc/passwd").is_err());
/// ```
pub fn normalize_path(path: &str) -> StorageResult<String> {
    let reject = |reason: &str| {
        Err(StorageError::new(StorageErrorKind::Validation(format!(
            "{}: {:?}",
            reason, path
        ))))
    };

    if path.trim().is_empty() {
        return reject("empty path");
    }
    if path.contains('\0') {
        return reject("path contains a null byte");
    }
    if path.contains('\\') {
        return reject("path contains a backslash");
    }
    if path.starts_with('/') {
        return reject("absolute paths are not allowed");
    }

    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return reject("path escapes the storage root"),
            s => segments.push(s),
        }
    }

    match segments.first() {
        None => reject("empty path"),
        Some(first) if *first == RESERVED_DIR => reject("path addresses a reserved directory"),
        Some(_) => Ok(segments.join("/")),
    }
}

/// Normalize an optional listing prefix; an empty prefix means the root.
pub fn normalize_prefix(prefix: Option<&str>) -> StorageResult<Option<String>> {
    match prefix.map(|p| p.trim_end_matches('/')) {
        None | Some("") => Ok(None),
        Some(p) => normalize_path(p).map(Some),
    }
}

/// Generate a collision-resistant object name: `YYYYMMDD_HHMMSS_<8 hex>.<ext>`.
///
/// # Examples
///
/// ```
/// use blobgate_storage::generate_name;
///
/// let name = generate_name("png");
/// assert!(name.ends_with(".png"));
/// assert_eq!(name.len(), "20240101_120000_abcdef12.png".len());
/// ```
pub fn generate_name(extension: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    let extension = extension.trim_start_matches('.');
    let stem = format!("{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), &suffix[..8]);
    if extension.is_empty() {
        stem
    } else {
        format!("{}.{}", stem, extension)
    }
}

/// Guess a MIME type from a path's extension.
pub fn guess_content_type(path: &str) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Pick the extension for a generated name from object metadata.
///
/// Prefers the explicit `extension` entry, then the first extension known for
/// the content type.
pub fn extension_from_metadata(metadata: Option<&ObjectMetadata>) -> String {
    let Some(metadata) = metadata else {
        return String::new();
    };
    if let Some(ext) = metadata.get(meta_keys::EXTENSION).filter(|e| !e.is_empty()) {
        return ext.trim_start_matches('.').to_string();
    }
    metadata
        .get(meta_keys::CONTENT_TYPE)
        .and_then(|ct| mime_guess::get_mime_extensions_str(ct))
        .and_then(|exts| exts.first())
        .map(|ext| ext.to_string())
        .unwrap_or_default()
}

/// Resolve the path an object is saved under.
pub fn resolve_save_path(
    path: Option<&str>,
    metadata: Option<&ObjectMetadata>,
) -> StorageResult<String> {
    match path {
        Some(path) => normalize_path(path),
        None => Ok(generate_name(&extension_from_metadata(metadata))),
    }
}

/// Content type recorded in metadata, or guessed from the path.
pub fn content_type_for(path: &str, metadata: Option<&ObjectMetadata>) -> String {
    metadata
        .and_then(|m| m.get(meta_keys::CONTENT_TYPE))
        .filter(|ct| !ct.is_empty())
        .cloned()
        .unwrap_or_else(|| guess_content_type(path))
}

/// Join an optional key prefix and a normalized path.
pub(crate) fn join_key(prefix: Option<&str>, path: &str) -> String {
    match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}/{}", prefix, path),
        None => path.to_string(),
    }
}

/// Strip an optional key prefix from a listed key.
pub(crate) fn strip_key_prefix<'a>(prefix: Option<&str>, key: &'a str) -> &'a str {
    match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) => key
            .strip_prefix(prefix)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(key),
        None => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_traversal_and_reserved() {
        for bad in ["..", "a/../../b", "", "  ", "a\0b", "a\\b", ".blobgate/meta/x.json"] {
            assert!(normalize_path(bad).is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_reserved_name_allowed_below_root() {
        assert_eq!(normalize_path("a/.blobgate").unwrap(), "a/.blobgate");
    }

    #[test]
    fn test_extension_prefers_explicit_entry() {
        let mut meta = ObjectMetadata::new();
        meta.insert(meta_keys::CONTENT_TYPE.into(), "image/png".into());
        meta.insert(meta_keys::EXTENSION.into(), "webp".into());
        assert_eq!(extension_from_metadata(Some(&meta)), "webp");

        meta.remove(meta_keys::EXTENSION);
        assert_eq!(extension_from_metadata(Some(&meta)), "png");
        assert_eq!(extension_from_metadata(None), "");
    }

    #[test]
    fn test_key_prefix_helpers() {
        assert_eq!(join_key(Some("/uploads/"), "a/b.txt"), "uploads/a/b.txt");
        assert_eq!(join_key(None, "a.txt"), "a.txt");
        assert_eq!(strip_key_prefix(Some("uploads"), "uploads/a/b.txt"), "a/b.txt");
    }
}
