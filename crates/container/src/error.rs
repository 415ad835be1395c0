//! Container Error Types
//!
//! Everything that can go wrong while reading an archive is a parse failure
//! from the caller's point of view: the bytes will not get any better by
//! trying again.

use derive_more::{Display, Error};

/// A container error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for container operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The bytes are not a readable ZIP archive.
    #[display("not a readable ZIP archive")]
    InvalidArchive,
    /// A file the package format requires is absent.
    #[display("missing required entry: {_0}")]
    MissingEntry(#[error(not(source))] String),
    /// An XML document inside the archive could not be parsed.
    #[display("malformed XML in {_0}")]
    MalformedXml(#[error(not(source))] String),
    /// The package document is structurally unusable.
    #[display("invalid package: {_0}")]
    InvalidPackage(#[error(not(source))] String),
    /// Serializing a container to an archive failed.
    #[display("failed to write archive")]
    Write,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Returns `true` if the error means the source could not be parsed.
    pub fn is_parse_error(&self) -> bool {
        !matches!(self, Self::Write)
    }
}
