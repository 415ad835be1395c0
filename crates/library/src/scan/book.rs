use super::{BookOutcome, OutcomeStatus, Scanner};
use crate::error::{Error, ErrorKind, Result, from_registry, from_storage};
use exn::ResultExt;
use tracing::instrument;
use uuid::Uuid;
use vellum_container::media_type;
use vellum_extract::models::{Classification, Work};
use vellum_registry::models::{Book, BookState};

impl Scanner {
    /// Process one book. Never fails: every error ends up in the outcome and
    /// on the book's record.
    #[instrument(skip_all, fields(book = %book.id, path = %book.path.display()))]
    pub async fn process(&self, book: &Book) -> BookOutcome {
        if book.media_type != media_type::EPUB {
            tracing::debug!(media_type = %book.media_type, "Skipping book that is not an EPUB");
            return BookOutcome::new(book, OutcomeStatus::Skipped { media_type: book.media_type.clone() });
        }
        let error = match tokio::time::timeout(self.options.timeout, self.apply(book)).await {
            Ok(Ok((status, virtual_books))) => {
                self.prewarm(&virtual_books).await;
                return BookOutcome::new(book, status);
            },
            Ok(Err(err)) => {
                tracing::warn!(error = ?err, "Failed to process book");
                (*err).to_string()
            },
            Err(_) => {
                tracing::warn!(timeout = ?self.options.timeout, "Processing book timed out");
                ErrorKind::Timeout(self.options.timeout).to_string()
            },
        };
        let state = BookState::Failed { error: error.clone() };
        if let Err(err) = self.registry.record_outcome(&book.id, &state, None).await {
            tracing::warn!(error = ?err, "Failed to record processing failure");
        }
        BookOutcome::new(book, OutcomeStatus::Failed { error })
    }

    /// Detect, replace the virtual books, and record the outcome. Returns the
    /// ids of the book's virtual books alongside the outcome.
    async fn apply(&self, book: &Book) -> Result<(OutcomeStatus, Vec<Uuid>)> {
        let (classification, works) = self.detect(book).await?;
        let replacement = self.lifecycle.replace(&book.id, &works).await?;
        let count = replacement.virtual_books.len();

        let (state, status) = match classification.is_omnibus {
            true => (
                BookState::Omnibus { virtual_books: u32::try_from(count).unwrap_or(u32::MAX) },
                OutcomeStatus::Omnibus { pattern: classification.pattern, virtual_books: count },
            ),
            false => (BookState::NotOmnibus, OutcomeStatus::NotOmnibus),
        };
        self.registry.record_outcome(&book.id, &state, classification.pattern).await.map_err(from_registry)?;
        tracing::info!(state = %state, "Processed book");
        Ok((status, replacement.virtual_books.iter().map(|vb| vb.id).collect()))
    }

    /// Materialize freshly recorded virtual books. Runs after the outcome is
    /// committed; each artifact is bounded by the content timeout and a
    /// failure is only logged.
    async fn prewarm(&self, virtual_books: &[Uuid]) {
        if !self.options.prewarm {
            return;
        }
        for id in virtual_books {
            if let Err(err) = self.content.ensure(*id).await {
                tracing::warn!(virtual_book = %id, error = ?err, "Failed to pre-warm virtual book");
            }
        }
    }

    /// Classify the archive and, for an omnibus, flatten its works.
    async fn detect(&self, book: &Book) -> Result<(Classification, Vec<Work>)> {
        let bytes = self.library.read(&book.path).await.map_err(from_storage)?;
        let (detector, toc) = (self.detector, self.toc);
        tokio::task::spawn_blocking(move || {
            let container = vellum_container::read(&bytes).or_raise(|| ErrorKind::ParseError)?;
            let classification = detector.classify(&container);
            let works = match classification.is_omnibus {
                true => toc.parse(&container),
                false => Vec::new(),
            };
            Ok::<_, Error>((classification, works))
        })
        .await
        .or_raise(|| ErrorKind::Extract)?
    }
}
