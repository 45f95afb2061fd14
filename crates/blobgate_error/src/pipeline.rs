//! Pipeline and middleware error types.

/// Kinds of pipeline errors.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum PipelineErrorKind {
    /// A middleware stage raised while transforming a payload
    #[display("Stage {} failed: {}", stage, reason)]
    StageFailed {
        /// Middleware name
        stage: String,
        /// Failure description
        reason: String,
    },
    /// A middleware stage exceeded the stage timeout
    #[display("Stage {} timed out", _0)]
    StageTimeout(String),
    /// A stage that may not be skipped failed, so the request was aborted
    #[display("Stage {} is required and failed: {}", stage, reason)]
    Aborted {
        /// Middleware name
        stage: String,
        /// Failure description
        reason: String,
    },
}

/// Pipeline error with location tracking.
///
/// # Examples
///
/// ```
/// use blobgate_error::{PipelineError, PipelineErrorKind};
///
/// let err = PipelineError::stage_failed("compression", "corrupt gzip stream");
/// assert!(format!("{}", err).contains("compression"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Pipeline Error: {} at line {} in {}", kind, line, file)]
pub struct PipelineError {
    /// The kind of error that occurred
    pub kind: PipelineErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl PipelineError {
    /// Create a new pipeline error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: PipelineErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Shorthand for a [`PipelineErrorKind::StageFailed`] error.
    #[track_caller]
    pub fn stage_failed(stage: impl Into<String>, reason: impl ToString) -> Self {
        Self::new(PipelineErrorKind::StageFailed {
            stage: stage.into(),
            reason: reason.to_string(),
        })
    }
}

/// Result type for middleware transforms.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
