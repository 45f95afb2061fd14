//! Parser error types.

/// Kinds of parser errors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ParserErrorKind {
    /// The payload is not a format this parser handles
    #[display("Unsupported format: {}", _0)]
    Unsupported(String),
    /// The payload claims a format but its structure is broken
    #[display("Malformed payload: {}", _0)]
    Malformed(String),
}

/// Parser error with location tracking.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Parser Error: {} at line {} in {}", kind, line, file)]
pub struct ParserError {
    /// The kind of error that occurred
    pub kind: ParserErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl ParserError {
    /// Create a new parser error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: ParserErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Shorthand for a [`ParserErrorKind::Malformed`] error.
    #[track_caller]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ParserErrorKind::Malformed(message.into()))
    }
}

/// Result type for parser operations.
pub type ParserResult<T> = std::result::Result<T, ParserError>;
