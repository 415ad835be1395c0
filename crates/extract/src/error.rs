//! Extraction Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// An extraction error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The source archive cannot be parsed. Treat it as not an omnibus.
    #[display("unparseable source archive")]
    ParseError,
    /// The work's anchor does not resolve to a content document in the
    /// source. Isolated to that one work.
    #[display("work anchor not found: {_0}")]
    WorkNotFound(#[error(not(source))] String),
    /// The standalone archive could not be serialized.
    #[display("failed to assemble standalone archive")]
    Assemble,
    /// A stored value could not be interpreted.
    #[display("failed to parse field '{field}', found value: {value}")]
    InvalidValue {
        /// The field that failed to parse.
        field: &'static str,
        /// The offending value.
        value: String,
    },
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // The source bytes are either usable or they are not.
        false
    }
}
