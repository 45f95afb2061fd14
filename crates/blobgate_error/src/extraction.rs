//! Text extraction (OCR/speech) client error types.

/// Kinds of text extraction errors.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum ExtractionErrorKind {
    /// Service answered with a non-success status
    #[display("HTTP {}: {}", status, message)]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body or reason phrase
        message: String,
    },
    /// Request could not be sent or the connection dropped
    #[display("Transport failed: {}", _0)]
    Transport(String),
    /// Request exceeded the client timeout
    #[display("Request timed out: {}", _0)]
    Timeout(String),
    /// Response body was not the expected JSON shape
    #[display("Failed to decode response: {}", _0)]
    Decode(String),
    /// No extraction endpoint is configured
    #[display("Text extraction is not configured")]
    NotConfigured,
}

impl ExtractionErrorKind {
    /// Timeouts and rate limits are retried; everything else fails fast.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::Http { status, .. } => *status == 429,
            _ => false,
        }
    }
}

/// Text extraction error with location tracking.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Extraction Error: {} at line {} in {}", kind, line, file)]
pub struct ExtractionError {
    /// The kind of error that occurred
    pub kind: ExtractionErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl ExtractionError {
    /// Create a new extraction error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: ExtractionErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}
