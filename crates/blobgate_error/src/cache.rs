//! Cache store error types.

/// Kinds of cache errors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum CacheErrorKind {
    /// Local filesystem failure
    #[display("Cache I/O failed: {}", _0)]
    Io(String),
    /// Entry sidecar could not be encoded or decoded
    #[display("Cache serialization failed: {}", _0)]
    Serialization(String),
    /// Remote key/value service failure
    #[display("Remote cache failed: {}", _0)]
    Remote(String),
    /// Cache call exceeded its deadline
    #[display("Cache operation timed out: {}", _0)]
    Timeout(String),
}

/// Cache error with location tracking.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Cache Error: {} at line {} in {}", kind, line, file)]
pub struct CacheError {
    /// The kind of error that occurred
    pub kind: CacheErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl CacheError {
    /// Create a new cache error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: CacheErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}

/// Result type for cache store operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
