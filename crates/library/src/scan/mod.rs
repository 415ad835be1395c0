//! Batch omnibus scan.
//!
//! Every EPUB book in the registry goes through detection, then (when it is
//! an omnibus) table of contents flattening and replacement of its virtual
//! books. Failures are isolated per book: they are logged, recorded on the
//! book, counted in the [`ScanReport`], and never stop the scan.

mod book;
mod stream;

use crate::content::ContentCache;
use crate::error::{ErrorKind, Result, from_registry};
use crate::lifecycle::Lifecycle;
use exn::OptionExt;
use futures::StreamExt;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing::instrument;
use vellum_extract::models::PatternTag;
use vellum_extract::{Detector, TocParser};
use vellum_registry::RegistryHandle;
use vellum_registry::models::Book;
use vellum_storage::BackendHandle;

pub use self::stream::ScanEvent;

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_BOOK_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Books processed at once.
    pub concurrency: usize,
    /// Upper bound on processing one book.
    pub timeout: Duration,
    /// Materialize every virtual book of an omnibus right after detection.
    pub prewarm: bool,
}
impl Default for ScanOptions {
    fn default() -> Self {
        Self { concurrency: DEFAULT_CONCURRENCY, timeout: DEFAULT_BOOK_TIMEOUT, prewarm: false }
    }
}

/// What happened to one book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Not an archive type the scan understands.
    Skipped { media_type: String },
    NotOmnibus,
    Omnibus { pattern: Option<PatternTag>, virtual_books: usize },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookOutcome {
    pub book_id: String,
    pub path: PathBuf,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}
impl BookOutcome {
    fn new(book: &Book, status: OutcomeStatus) -> Self {
        Self { book_id: book.id.clone(), path: book.path.clone(), status }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, OutcomeStatus::Failed { .. })
    }
}

/// Counts over a whole scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Books classified successfully, omnibus or not.
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Books classified as omnibus editions.
    pub omnibus: usize,
    /// Virtual books across all omnibus editions.
    pub virtual_books: usize,
}
impl ScanReport {
    pub(crate) fn record(&mut self, outcome: &BookOutcome) {
        match &outcome.status {
            OutcomeStatus::Skipped { .. } => self.skipped += 1,
            OutcomeStatus::NotOmnibus => self.processed += 1,
            OutcomeStatus::Omnibus { virtual_books, .. } => {
                self.processed += 1;
                self.omnibus += 1;
                self.virtual_books += virtual_books;
            },
            OutcomeStatus::Failed { .. } => self.failed += 1,
        }
    }
}

/// Runs omnibus detection over the library.
///
/// A full-library [`scan`](Self::scan) is guarded against re-entry;
/// [`process_book`](Self::process_book) is not, and may run alongside it.
pub struct Scanner {
    library: BackendHandle,
    registry: RegistryHandle,
    lifecycle: Lifecycle,
    content: Arc<ContentCache>,
    detector: Detector,
    toc: TocParser,
    options: ScanOptions,
    running: AtomicBool,
}
impl Scanner {
    pub fn new(
        library: BackendHandle,
        registry: RegistryHandle,
        lifecycle: Lifecycle,
        content: Arc<ContentCache>,
        detector: Detector,
        toc: TocParser,
        options: ScanOptions,
    ) -> Self {
        Self { library, registry, lifecycle, content, detector, toc, options, running: AtomicBool::new(false) }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Process a single book by id, with the same isolation as a full scan:
    /// only an unknown id is an error.
    #[instrument(skip(self))]
    pub async fn process_book(&self, id: &str) -> Result<BookOutcome> {
        let book = self
            .registry
            .get_book(id)
            .await
            .map_err(from_registry)?
            .ok_or_raise(|| ErrorKind::NotFound(id.to_string()))?;
        Ok(self.process(&book).await)
    }

    /// Process every book and return the totals.
    ///
    /// Fails with [`AlreadyRunning`](ErrorKind::AlreadyRunning) while another
    /// full scan is in progress.
    pub async fn process_all_books(&self) -> Result<ScanReport> {
        let mut events = std::pin::pin!(self.scan());
        let mut report = ScanReport::default();
        while let Some(event) = events.next().await {
            if let ScanEvent::Complete(complete) = event? {
                report = complete;
            }
        }
        Ok(report)
    }
}
