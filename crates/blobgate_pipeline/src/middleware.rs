//! Middleware contract.

use blobgate_core::FileMetadata;
use blobgate_error::PipelineResult;
use bytes::Bytes;

/// Bytes and metadata handed from one stage to the next.
pub type Staged = (Bytes, FileMetadata);

/// What the pipeline does when a stage fails or times out.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum FailurePolicy {
    /// Log the failure and hand the stage's input to the next stage
    #[default]
    Skip,
    /// Fail the whole request
    Abort,
}

/// Direction a payload is travelling through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    /// Caller to storage, stages in list order
    Upload,
    /// Storage to caller, stages in reverse order
    Download,
}

/// A reversible transform over a payload and its metadata.
///
/// Whatever `process_upload` does to the bytes, `process_download` must
/// undo when handed the stored result. Implementations keep
/// `metadata.size` equal to the length of the bytes they return.
///
/// # Example
///
/// ```rust
/// use blobgate_pipeline::{Middleware, PipelineResult, Staged};
/// use blobgate_core::FileMetadata;
/// use bytes::Bytes;
///
/// #[derive(Debug)]
/// struct Tagger;
///
/// #[async_trait::async_trait]
/// impl Middleware for Tagger {
///     fn name(&self) -> &str {
///         "tagger"
///     }
///
///     fn validate(&self) -> bool {
///         true
///     }
///
///     async fn process_upload(&self, data: Bytes, mut metadata: FileMetadata) -> PipelineResult<Staged> {
///         metadata.set_custom("tagged", true);
///         Ok((data, metadata))
///     }
///
///     async fn process_download(&self, data: Bytes, mut metadata: FileMetadata) -> PipelineResult<Staged> {
///         metadata.custom.remove("tagged");
///         Ok((data, metadata))
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait Middleware: Send + Sync + std::fmt::Debug {
    /// Stage name used in logs, errors and `remove_middleware`.
    fn name(&self) -> &str;

    /// Check the stage's configuration. Called once when the stage is added.
    fn validate(&self) -> bool;

    /// Whether a failure of this stage may be skipped.
    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Skip
    }

    /// Transform a payload on its way into storage.
    async fn process_upload(&self, data: Bytes, metadata: FileMetadata) -> PipelineResult<Staged>;

    /// Undo `process_upload` on a payload read back from storage.
    async fn process_download(&self, data: Bytes, metadata: FileMetadata)
    -> PipelineResult<Staged>;
}

/// Case-insensitive prefix match of a content type against a type list.
///
/// Entries ending in `/` match a whole family (`text/`), others match a
/// full type or a prefix of one (`application/json` matches
/// `application/json; charset=utf-8`).
pub(crate) fn matches_type(content_type: &str, types: &[String]) -> bool {
    let content_type = content_type.trim().to_ascii_lowercase();
    types
        .iter()
        .any(|t| !t.is_empty() && content_type.starts_with(&t.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_type() {
        let types = vec!["text/".to_string(), "application/json".to_string()];
        assert!(matches_type("text/plain", &types));
        assert!(matches_type("Application/JSON; charset=utf-8", &types));
        assert!(!matches_type("image/png", &types));
        assert!(!matches_type("", &types));
        assert!(!matches_type("text/plain", &[String::new()]));
    }

    #[test]
    fn test_policy_names() {
        assert_eq!(FailurePolicy::Abort.to_string(), "abort");
        assert_eq!("skip".parse::<FailurePolicy>().unwrap(), FailurePolicy::Skip);
        assert_eq!(Direction::Download.to_string(), "download");
    }
}
