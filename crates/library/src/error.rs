//! Library Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Errors from the registry, storage and extraction crates
//! are raised into these kinds at the crate boundary, so that callers (and
//! [`api`](crate::api)) can decide what to do from the kind alone.

use derive_more::{Display, Error};
use std::time::Duration;
use vellum_extract::error::ErrorKind as ExtractErrorKind;
use vellum_registry::error::ErrorKind as RegistryErrorKind;
use vellum_storage::error::ErrorKind as StorageErrorKind;

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// ### Caller errors
/// - [`ErrorKind::NotFound`]
/// - [`ErrorKind::Unprocessable`]
/// - [`ErrorKind::AlreadyRunning`]
///
/// ### Source errors
/// - [`ErrorKind::ParseError`]
/// - [`ErrorKind::Extract`]
///
/// ### Dependency errors
/// - [`ErrorKind::CacheStorage`]
/// - [`ErrorKind::Storage`]
/// - [`ErrorKind::Registry`]
/// - [`ErrorKind::Timeout`]
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A book or virtual book id does not resolve, or the parent file is gone.
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The work's anchor cannot be located in the parent archive.
    #[display("work anchor cannot be located: {_0}")]
    Unprocessable(#[error(not(source))] String),
    /// The parent archive cannot be parsed.
    #[display("unparseable source archive")]
    ParseError,
    /// Extraction failed for a reason other than the two above.
    #[display("extraction failed")]
    Extract,
    /// Reading or writing materialized artifacts failed.
    #[display("artifact storage failure")]
    CacheStorage,
    /// Reading the library itself failed.
    #[display("library storage failure")]
    Storage,
    #[display("registry failure")]
    Registry,
    /// A bounded wait ran out.
    #[display("timed out after {_0:?}")]
    Timeout(#[error(not(source))] Duration),
    /// A full-library scan is already in progress.
    #[display("a library scan is already running")]
    AlreadyRunning,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CacheStorage | Self::Storage | Self::Registry | Self::Timeout(_) | Self::AlreadyRunning)
    }
}

/// Raise a registry error, keeping "unknown parent" distinguishable.
pub(crate) fn from_registry(err: vellum_registry::error::Error) -> Error {
    let kind = match &*err {
        RegistryErrorKind::ParentNotFound(id) => ErrorKind::NotFound(id.clone()),
        _ => ErrorKind::Registry,
    };
    err.raise(kind)
}

/// Raise a library storage error, keeping "file is gone" distinguishable.
pub(crate) fn from_storage(err: vellum_storage::error::Error) -> Error {
    let kind = match &*err {
        StorageErrorKind::NotFound(path) => ErrorKind::NotFound(path.display().to_string()),
        _ => ErrorKind::Storage,
    };
    err.raise(kind)
}

/// Raise an extraction error.
pub(crate) fn from_extract(err: vellum_extract::error::Error) -> Error {
    let kind = match &*err {
        ExtractErrorKind::WorkNotFound(anchor) => ErrorKind::Unprocessable(anchor.clone()),
        ExtractErrorKind::ParseError => ErrorKind::ParseError,
        _ => ErrorKind::Extract,
    };
    err.raise(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_registry_parent_not_found_maps_to_not_found() {
        let err = from_registry(exn::Exn::from(RegistryErrorKind::ParentNotFound("b1".into())));
        assert_eq!(*err, ErrorKind::NotFound("b1".into()));
        let err = from_registry(exn::Exn::from(RegistryErrorKind::Database));
        assert_eq!(*err, ErrorKind::Registry);
    }

    #[test]
    fn test_storage_not_found_maps_to_not_found() {
        let err = from_storage(exn::Exn::from(StorageErrorKind::NotFound(PathBuf::from("a.epub"))));
        assert_eq!(*err, ErrorKind::NotFound("a.epub".into()));
    }

    #[test]
    fn test_extract_kinds() {
        let err = from_extract(exn::Exn::from(ExtractErrorKind::WorkNotFound("b2.xhtml".into())));
        assert_eq!(*err, ErrorKind::Unprocessable("b2.xhtml".into()));
        assert_eq!(*from_extract(exn::Exn::from(ExtractErrorKind::ParseError)), ErrorKind::ParseError);
    }
}
