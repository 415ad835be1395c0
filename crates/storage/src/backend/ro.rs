//! Read-only storage backend.
//!
//! Wraps another backend and refuses every mutating operation. The library
//! root is opened through this wrapper: source archives are never written to.

use async_trait::async_trait;
use std::path::Path;

use crate::backend::{BoxSyncRead, FileInfoStream};
use crate::error::{ErrorKind, Result};
use crate::{BackendHandle, StorageBackend, file::FileInfo};

/// Read-only storage backend.
///
/// Reads pass straight through to the wrapped backend. Writes, deletes and
/// renames fail with [`PermissionDenied`](ErrorKind::PermissionDenied) and log
/// a warning.
#[derive(Clone)]
pub struct ReadOnlyBackend {
    inner: BackendHandle,
}
impl ReadOnlyBackend {
    pub fn new(inner: BackendHandle) -> Self {
        Self { inner }
    }

    fn refuse(&self, op: &str, path: &Path) -> Result<()> {
        tracing::warn!(backend = self.inner.name(), path = %path.display(), op, "Refusing write to read-only backend");
        exn::bail!(ErrorKind::PermissionDenied(path.to_path_buf()))
    }
}

#[async_trait]
impl StorageBackend for ReadOnlyBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        self.inner.list_stream(prefix)
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        self.inner.exists(path).await
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.inner.read(path).await
    }

    async fn reader(&self, path: &Path) -> Result<BoxSyncRead> {
        self.inner.reader(path).await
    }

    async fn write(&self, path: &Path, _data: &[u8]) -> Result<()> {
        self.refuse("write", path)
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        self.refuse("delete", path)
    }

    async fn rename(&self, from: &Path, _to: &Path) -> Result<()> {
        self.refuse("rename", from)
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        self.inner.stat(path).await
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_reads_pass_through_and_writes_fail() {
        let inner: BackendHandle = Arc::new(MockBackend::with_files([("book.epub", Vec::from(*b"PK"))]));
        let backend = ReadOnlyBackend::new(inner.clone());
        assert_eq!(backend.read(Path::new("book.epub")).await.unwrap(), b"PK");
        let err = backend.write(Path::new("book.epub"), b"changed").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::PermissionDenied(_)));
        assert!(backend.delete(Path::new("book.epub")).await.is_err());
        assert_eq!(inner.read(Path::new("book.epub")).await.unwrap(), b"PK");
    }
}
