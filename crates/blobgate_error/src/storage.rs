//! Storage error types.

/// Kinds of storage errors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum StorageErrorKind {
    /// Bad path or input shape
    #[display("Validation failed: {}", _0)]
    Validation(String),
    /// Object absent from the backend
    #[display("Object not found: {}", _0)]
    NotFound(String),
    /// Transport-level failure talking to the backend
    #[display("Connection failed: {}", _0)]
    Connection(String),
    /// Backend call exceeded its deadline
    #[display("Operation timed out: {}", _0)]
    Timeout(String),
    /// Credentials rejected or access denied
    #[display("Permission denied: {}", _0)]
    Permission(String),
    /// Backend refused the write for size or quota reasons
    #[display("Quota exceeded: {}", _0)]
    Quota(String),
    /// Backend is misconfigured
    #[display("Invalid configuration: {}", _0)]
    Config(String),
    /// Anything not covered above
    #[display("Unknown storage error: {}", _0)]
    Unknown(String),
}

impl StorageErrorKind {
    /// Map an HTTP status returned by a remote backend into an error kind.
    ///
    /// # Examples
    ///
    /// ```
    /// use blobgate_error::StorageErrorKind;
    ///
    /// let kind = StorageErrorKind::from_status(404, "missing.txt");
    /// assert_eq!(kind, StorageErrorKind::NotFound("missing.txt".to_string()));
    /// assert!(StorageErrorKind::from_status(503, "busy").is_retryable());
    /// ```
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 => Self::Validation(message),
            401 | 403 => Self::Permission(message),
            404 => Self::NotFound(message),
            408 | 504 => Self::Timeout(message),
            413 => Self::Quota(message),
            429 | 500..=599 => Self::Connection(message),
            _ => Self::Unknown(format!("HTTP {}: {}", status, message)),
        }
    }

    /// Transient kinds that an idempotent operation may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

/// Storage error with location tracking.
///
/// # Examples
///
/// ```
/// use blobgate_error::{StorageError, StorageErrorKind};
///
/// let err = StorageError::new(StorageErrorKind::NotFound("/path/to/file".to_string()));
/// assert!(format!("{}", err).contains("not found"));
/// assert!(err.is_not_found());
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Storage Error: {} at line {} in {}", kind, line, file)]
pub struct StorageError {
    /// The kind of error that occurred
    pub kind: StorageErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl StorageError {
    /// Create a new storage error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: StorageErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Whether the object was absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, StorageErrorKind::NotFound(_))
    }

    /// Whether a retry may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Result type for storage backend operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
