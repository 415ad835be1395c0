use super::{BookOutcome, ScanReport, Scanner};
use crate::error::{Error, ErrorKind, Result, from_registry};
use async_stream::stream;
use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use vellum_registry::models::{Book, Page};

/// Progress events emitted by [`Scanner::scan`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started) exactly once.
/// 2. [`DiscoveryComplete`](Self::DiscoveryComplete) exactly once, with the
///    total book count.
/// 3. [`Processed`](Self::Processed) once per book, failures included.
/// 4. [`Complete`](Self::Complete) exactly once, with the totals.
///
/// Only a failure to start (another scan running, or the registry failing
/// to list books) ends the stream early, as a single `Err` item.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    Started,
    DiscoveryComplete(u64),
    Processed(BookOutcome),
    Complete(ScanReport),
}

/// Clears the running flag when the scan ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);
impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::from(ErrorKind::AlreadyRunning))?;
        Ok(Self(flag))
    }
}
impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Scanner {
    /// Stream [`ScanEvent`]s while processing every book in the registry,
    /// up to `concurrency` books at a time.
    pub fn scan(&self) -> impl Stream<Item = Result<ScanEvent>> + '_ {
        // `rustfmt` does not format macros that use braces. Wrap in parentheses!
        stream!({
            let _guard = match RunningGuard::acquire(&self.running) {
                Ok(guard) => guard,
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            yield Ok(ScanEvent::Started);

            let books = match self.all_books().await {
                Ok(books) => books,
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            tracing::info!(books = books.len(), "Starting library scan");
            // Infallible: a usize (either 32- or 64-bit) will always fit in a u64.
            yield Ok(ScanEvent::DiscoveryComplete(u64::try_from(books.len()).unwrap_or(0)));

            let mut report = ScanReport::default();
            let mut queue = books.iter().map(|book| self.process(book));
            let mut processing = FuturesUnordered::new();
            processing.extend(queue.by_ref().take(self.options.concurrency.max(1)));
            while let Some(outcome) = processing.next().await {
                report.record(&outcome);
                yield Ok(ScanEvent::Processed(outcome));
                // Pop-n-push, in registry order.
                if let Some(next) = queue.next() {
                    processing.push(next);
                }
            }

            tracing::info!(
                processed = report.processed,
                skipped = report.skipped,
                failed = report.failed,
                omnibus = report.omnibus,
                "Library scan complete"
            );
            yield Ok(ScanEvent::Complete(report));
        })
    }

    async fn all_books(&self) -> Result<Vec<Book>> {
        let mut books = Vec::new();
        let mut page = Page::default();
        loop {
            let batch = self.registry.list_books(page).await.map_err(from_registry)?;
            let done = batch.len() < page.limit as usize;
            books.extend(batch);
            if done {
                return Ok(books);
            }
            page = page.next();
        }
    }
}
