//! Catalog sync: keeps the registry's book records in step with the files in
//! the library.
//!
//! Each library file is one book, identified by a hash of its path. New and
//! changed files are (re-)described from their own metadata and reset to
//! unprocessed; books whose file is gone are deleted along with their
//! virtual books and artifacts.

use crate::error::{Result, from_registry, from_storage};
use crate::lifecycle::Lifecycle;
use futures::TryStreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::instrument;
use vellum_container::media_type;
use vellum_registry::models::{Book, Page};
use vellum_registry::{RegistryHandle, timestamp};
use vellum_storage::{BackendHandle, FileInfo};

const PDF: &str = "application/pdf";
const CBZ: &str = "application/vnd.comicbook+zip";
const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub removed: usize,
}

/// Stable book id for a library path.
pub fn book_id(path: &Path) -> String {
    let hash = blake3::hash(path.to_string_lossy().as_bytes());
    hash.to_hex()[..32].to_string()
}

/// Media type from the file extension.
pub fn media_type_of(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("epub") => media_type::EPUB,
        Some("pdf") => PDF,
        Some("cbz") => CBZ,
        _ => OCTET_STREAM,
    }
}

fn is_hidden(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str().to_str().is_some_and(|s| s.starts_with('.')))
}

/// Walk the library and bring the registry's book records up to date.
#[instrument(skip_all, fields(library = library.name()))]
pub async fn sync(library: &BackendHandle, registry: &RegistryHandle, lifecycle: &Lifecycle) -> Result<SyncReport> {
    let mut known = known_books(registry).await?;
    let mut report = SyncReport::default();

    let files: Vec<FileInfo> = library.list_stream(None).try_collect().await.map_err(from_storage)?;
    for file in files.into_iter().filter(|f| !is_hidden(&f.path)) {
        let id = book_id(&file.path);
        let existing = known.remove(&id);
        if let Some(book) = &existing
            && book.size == file.size
            && book.modified_at == timestamp::truncate(file.modified)
        {
            report.unchanged += 1;
            continue;
        }
        let book = describe(library, &file).await;
        registry.upsert_book(&book).await.map_err(from_registry)?;
        match existing {
            Some(_) => {
                tracing::info!(book = %book.id, path = %file.path.display(), "Updated book");
                report.updated += 1;
            },
            None => {
                tracing::info!(book = %book.id, path = %file.path.display(), "Added book");
                report.added += 1;
            },
        }
    }

    for (id, book) in known {
        tracing::info!(book = %id, path = %book.path.display(), "Book file disappeared");
        lifecycle.delete_parent(&id).await?;
        report.removed += 1;
    }
    Ok(report)
}

async fn known_books(registry: &RegistryHandle) -> Result<HashMap<String, Book>> {
    let mut books = HashMap::new();
    let mut page = Page::default();
    loop {
        let batch = registry.list_books(page).await.map_err(from_registry)?;
        let done = batch.len() < page.limit as usize;
        books.extend(batch.into_iter().map(|book| (book.id.clone(), book)));
        if done {
            return Ok(books);
        }
        page = page.next();
    }
}

/// Build an unprocessed book record for a library file.
///
/// EPUB metadata is used when the archive can be read; otherwise the title is
/// the file stem and the book is left for the scan to mark as failed.
pub(crate) async fn describe(library: &BackendHandle, file: &FileInfo) -> Book {
    let media_type = media_type_of(&file.path);
    let fallback = file.stem().unwrap_or("Untitled").to_string();
    let modified = timestamp::truncate(file.modified);
    let book = Book::new(book_id(&file.path), file.path.clone(), media_type, fallback, file.size, modified);
    if media_type != media_type::EPUB {
        return book;
    }

    let bytes = match library.read(&file.path).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(path = %file.path.display(), error = ?err, "Failed to read book for metadata");
            return book;
        },
    };
    let metadata = tokio::task::spawn_blocking(move || vellum_container::read(&bytes).map(|c| c.metadata)).await;
    match metadata {
        Ok(Ok(metadata)) => {
            let title = match metadata.title.trim() {
                "" => book.title.clone(),
                title => title.to_string(),
            };
            Book::new(book.id, book.path, media_type, title, book.size, book.modified_at)
                .with_authors(metadata.authors)
                .with_language(metadata.language)
                .with_publisher(metadata.publisher)
        },
        Ok(Err(err)) => {
            tracing::debug!(path = %file.path.display(), error = ?err, "Unreadable EPUB metadata, using file name");
            book
        },
        Err(err) => {
            tracing::warn!(path = %file.path.display(), error = ?err, "Metadata task failed");
            book
        },
    }
}
