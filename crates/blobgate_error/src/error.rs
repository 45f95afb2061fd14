//! Top-level error wrapper types.

use crate::{CacheError, ConfigError, ExtractionError, ParserError, PipelineError, StorageError};

/// Every error a Blobgate crate can surface.
///
/// # Examples
///
/// ```
/// use blobgate_error::{BlobgateError, BlobgateErrorKind, StorageError, StorageErrorKind};
///
/// let storage_err = StorageError::new(StorageErrorKind::Timeout("save".to_string()));
/// let err: BlobgateError = storage_err.into();
/// assert!(matches!(err.kind(), BlobgateErrorKind::Storage(_)));
/// ```
#[derive(Debug, derive_more::From, derive_more::Display, derive_more::Error)]
pub enum BlobgateErrorKind {
    /// Storage backend error
    #[from(StorageError)]
    Storage(StorageError),
    /// Configuration error
    #[from(ConfigError)]
    Config(ConfigError),
    /// Cache store error
    #[from(CacheError)]
    Cache(CacheError),
    /// Pipeline error
    #[from(PipelineError)]
    Pipeline(PipelineError),
    /// Parser error
    #[from(ParserError)]
    Parser(ParserError),
    /// Text extraction client error
    #[from(ExtractionError)]
    Extraction(ExtractionError),
}

/// Blobgate error with kind discrimination.
#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("Blobgate Error: {}", _0)]
pub struct BlobgateError(Box<BlobgateErrorKind>);

impl BlobgateError {
    /// Create a new error from a kind.
    pub fn new(kind: BlobgateErrorKind) -> Self {
        Self(Box::new(kind))
    }

    /// Get the error kind.
    pub fn kind(&self) -> &BlobgateErrorKind {
        &self.0
    }
}

// Generic From implementation for any type that converts to BlobgateErrorKind
impl<T> From<T> for BlobgateError
where
    T: Into<BlobgateErrorKind>,
{
    fn from(err: T) -> Self {
        Self::new(err.into())
    }
}

/// Result type for Blobgate operations.
pub type BlobgateResult<T> = std::result::Result<T, BlobgateError>;
