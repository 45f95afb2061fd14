//! Configuration error types.

/// Kinds of configuration errors.
///
/// Configuration errors are raised while building backends and pipelines
/// and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum ConfigErrorKind {
    /// One or more required fields are absent
    #[display("{} is missing required fields: {}", target, fields.join(", "))]
    MissingFields {
        /// Backend or middleware being configured
        target: String,
        /// Every missing field, in declaration order
        fields: Vec<String>,
    },
    /// No backend registered under this name
    #[display("Unknown storage backend: {}", _0)]
    UnknownBackend(String),
    /// No middleware registered under this name
    #[display("Unknown middleware: {}", _0)]
    UnknownMiddleware(String),
    /// Middleware failed its construction-time validation
    #[display("Middleware failed validation: {}", _0)]
    InvalidMiddleware(String),
    /// Malformed value or unreadable configuration source
    #[display("{}", _0)]
    Invalid(String),
}

/// Configuration error with source location.
///
/// # Examples
///
/// ```
/// use blobgate_error::{ConfigError, ConfigErrorKind};
///
/// let err = ConfigError::new(ConfigErrorKind::MissingFields {
///     target: "s3".to_string(),
///     fields: vec!["bucket".to_string(), "region".to_string()],
/// });
/// assert!(format!("{}", err).contains("bucket, region"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Configuration Error: {} at line {} in {}", kind, line, file)]
pub struct ConfigError {
    /// The kind of error that occurred
    pub kind: ConfigErrorKind,
    /// Line number where the error occurred
    pub line: u32,
    /// File where the error occurred
    pub file: &'static str,
}

impl ConfigError {
    /// Create a new ConfigError at the current location.
    #[track_caller]
    pub fn new(kind: ConfigErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Shorthand for an [`ConfigErrorKind::Invalid`] error.
    #[track_caller]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ConfigErrorKind::Invalid(message.into()))
    }
}
