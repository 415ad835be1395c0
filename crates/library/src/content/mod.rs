//! On-demand materialization of virtual books.
//!
//! Artifacts live in their own storage keyspace under `artifacts/<id>.epub`.
//! They are written to `artifacts/.partial/` first and renamed into place, so
//! a reader never observes a partial archive.
//!
//! # Concurrency
//! Every virtual book id has a slot with two locks:
//! - a gate ([`tokio::sync::RwLock`]). Readers hold the shared side for as
//!   long as they hold the returned [`Content`]. Only deletion takes the
//!   exclusive side, and eviction only when it can take it immediately.
//! - a fill lock ([`tokio::sync::Mutex`]). A caller that finds the artifact
//!   missing or stale takes it and checks again once it has it, so
//!   concurrent callers for the same id share a single extraction.
//!
//! Publication is a rename over the old artifact, which leaves open readers
//! of the previous version untouched, so rebuilding never waits for them.

mod materialize;

pub use self::materialize::{EpubMaterializer, Materializer};
use crate::error::{Error, ErrorKind, Result, from_registry, from_storage};
use exn::{OptionExt, ResultExt};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{Mutex as AsyncMutex, OwnedRwLockReadGuard, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::instrument;
use uuid::Uuid;
use vellum_registry::RegistryHandle;
use vellum_registry::models::VirtualBook;
use vellum_storage::BackendHandle;
use vellum_storage::backend::BoxSyncRead;

const ARTIFACT_DIR: &str = "artifacts";
const PARTIAL_DIR: &str = "artifacts/.partial";
const ARTIFACT_EXTENSION: &str = "epub";

pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_EVICTION_AGE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentOptions {
    /// Extractions allowed to run at once.
    pub workers: usize,
    /// Upper bound on one `get_content`/`ensure` call, queueing included.
    pub timeout: Duration,
    /// Artifacts not accessed for this long are evicted by [`ContentCache::sweep`].
    pub eviction_age: Duration,
}
impl Default for ContentOptions {
    fn default() -> Self {
        Self { workers: DEFAULT_WORKERS, timeout: DEFAULT_TIMEOUT, eviction_age: DEFAULT_EVICTION_AGE }
    }
}

fn artifact_path(id: Uuid) -> PathBuf {
    Path::new(ARTIFACT_DIR).join(format!("{id}.{ARTIFACT_EXTENSION}"))
}

fn partial_path(id: Uuid) -> PathBuf {
    Path::new(PARTIAL_DIR).join(format!("{id}.{}", Uuid::new_v4().simple()))
}

/// Virtual book id of a published artifact path.
fn artifact_id(path: &Path) -> Option<Uuid> {
    if path.parent() != Some(Path::new(ARTIFACT_DIR)) {
        return None;
    }
    if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXTENSION) {
        return None;
    }
    path.file_stem().and_then(|s| s.to_str()).and_then(|s| Uuid::parse_str(s).ok())
}

fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

#[derive(Debug)]
struct Slot {
    gate: Arc<RwLock<()>>,
    fill: AsyncMutex<()>,
    /// Unix seconds; zero when never accessed by this process.
    last_access: AtomicI64,
}
impl Slot {
    fn new() -> Self {
        Self { gate: Arc::new(RwLock::new(())), fill: AsyncMutex::new(()), last_access: AtomicI64::new(0) }
    }

    fn touch(&self) {
        self.last_access.store(unix_now(), Ordering::Relaxed);
    }
}

/// A readable materialized archive.
///
/// Holds a shared lease on the artifact: it will not be evicted or replaced
/// until this value is dropped.
pub struct Content {
    reader: BoxSyncRead,
    size: u64,
    virtual_book: VirtualBook,
    _lease: OwnedRwLockReadGuard<()>,
}
impl Content {
    /// Size of the archive in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn virtual_book(&self) -> &VirtualBook {
        &self.virtual_book
    }

    /// Read the remaining archive into memory.
    pub fn into_bytes(mut self) -> std::io::Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(usize::try_from(self.size).unwrap_or(0));
        self.reader.read_to_end(&mut buffer)?;
        Ok(buffer)
    }
}
impl Read for Content {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}
impl std::fmt::Debug for Content {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Content").field("virtual_book", &self.virtual_book.id).field("size", &self.size).finish()
    }
}

/// Outcome of an eviction sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Artifacts deleted for being idle too long.
    pub evicted: usize,
    /// Idle artifacts left alone because they were being read or rebuilt.
    pub busy: usize,
    /// Abandoned partial files deleted.
    pub partials: usize,
}

/// Cache of materialized virtual books.
pub struct ContentCache {
    library: BackendHandle,
    artifacts: BackendHandle,
    registry: RegistryHandle,
    materializer: Arc<dyn Materializer>,
    workers: Semaphore,
    options: ContentOptions,
    slots: Mutex<HashMap<Uuid, Arc<Slot>>>,
}
impl std::fmt::Debug for ContentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentCache")
            .field("library", &self.library.name())
            .field("artifacts", &self.artifacts.name())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
impl ContentCache {
    pub fn new(
        library: BackendHandle,
        artifacts: BackendHandle,
        registry: RegistryHandle,
        materializer: Arc<dyn Materializer>,
        options: ContentOptions,
    ) -> Self {
        Self {
            library,
            artifacts,
            registry,
            materializer,
            workers: Semaphore::new(options.workers.max(1)),
            options,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &ContentOptions {
        &self.options
    }

    fn slot(&self, id: Uuid) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(id).or_insert_with(|| Arc::new(Slot::new())).clone()
    }

    /// Forget the slot of `id` unless somebody else is using it.
    fn release_slot(&self, id: Uuid) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one held by the caller.
        if slots.get(&id).is_some_and(|slot| Arc::strong_count(slot) <= 2) {
            slots.remove(&id);
        }
    }

    fn timeout_error(&self) -> Error {
        Error::from(ErrorKind::Timeout(self.options.timeout))
    }

    /// Fetch the materialized archive of a virtual book, extracting it first
    /// if there is no fresh artifact.
    #[instrument(skip(self))]
    pub async fn get_content(&self, id: Uuid) -> Result<Content> {
        let work = async {
            let (lease, virtual_book) = self.acquire(id).await?;
            let path = artifact_path(id);
            let size = self.artifacts.stat(&path).await.or_raise(|| ErrorKind::CacheStorage)?.size;
            let reader = self.artifacts.reader(&path).await.or_raise(|| ErrorKind::CacheStorage)?;
            Ok::<_, Error>(Content { reader, size, virtual_book, _lease: lease })
        };
        tokio::time::timeout(self.options.timeout, work).await.map_err(|_| self.timeout_error())?
    }

    /// Make sure a fresh artifact exists for `id`, extracting it if needed.
    ///
    /// This is the single extract-if-absent entry point: both
    /// [`get_content`](Self::get_content) and scan pre-warming go through it.
    #[instrument(skip(self))]
    pub async fn ensure(&self, id: Uuid) -> Result<()> {
        tokio::time::timeout(self.options.timeout, self.acquire(id)).await.map_err(|_| self.timeout_error())??;
        Ok(())
    }

    /// Resolve `id` and return a shared lease on its fresh artifact.
    async fn acquire(&self, id: Uuid) -> Result<(OwnedRwLockReadGuard<()>, VirtualBook)> {
        let virtual_book =
            self.registry.get(id).await.map_err(from_registry)?.ok_or_raise(|| ErrorKind::NotFound(id.to_string()))?;
        let parent = self
            .registry
            .get_book(&virtual_book.parent_id)
            .await
            .map_err(from_registry)?
            .ok_or_raise(|| ErrorKind::NotFound(virtual_book.parent_id.clone()))?;
        let slot = self.slot(id);
        slot.touch();

        let lease = slot.gate.clone().read_owned().await;
        let source_modified = self.source_modified(&parent.path).await?;
        if self.is_fresh(id, source_modified).await? {
            tracing::debug!(virtual_book = %id, "Artifact cache hit");
            return Ok((lease, virtual_book));
        }
        drop(lease);

        let _filling = slot.fill.lock().await;
        let lease = slot.gate.clone().read_owned().await;
        // Another caller may have rebuilt the artifact while this one queued.
        if !self.is_fresh(id, source_modified).await? {
            self.materialize(&virtual_book, &parent.path).await?;
        }
        slot.touch();
        Ok((lease, virtual_book))
    }

    async fn source_modified(&self, path: &Path) -> Result<OffsetDateTime> {
        Ok(self.library.stat(path).await.map_err(from_storage)?.modified)
    }

    /// An artifact is fresh when it exists and is no older than its source.
    async fn is_fresh(&self, id: Uuid, source_modified: OffsetDateTime) -> Result<bool> {
        match self.artifacts.stat(&artifact_path(id)).await {
            Ok(info) => Ok(info.modified >= source_modified),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err.raise(ErrorKind::CacheStorage)),
        }
    }

    /// Extract and publish. Must be called with the virtual book's fill lock
    /// and a shared lease on its gate held.
    #[instrument(skip_all, fields(virtual_book = %virtual_book.id, parent = %virtual_book.parent_id))]
    async fn materialize(&self, virtual_book: &VirtualBook, source: &Path) -> Result<()> {
        let _permit = self.workers.acquire().await.or_raise(|| ErrorKind::Extract)?;
        let mut reader = self.library.reader(source).await.map_err(from_storage)?;
        let materializer = self.materializer.clone();
        let work = virtual_book.work();
        let bytes = tokio::task::spawn_blocking(move || {
            let mut buffer = Vec::new();
            reader.read_to_end(&mut buffer).or_raise(|| ErrorKind::Storage)?;
            materializer.materialize(&work, &buffer)
        })
        .await
        .or_raise(|| ErrorKind::Extract)??;
        self.publish(virtual_book.id, &bytes).await?;
        tracing::info!(bytes = bytes.len(), "Materialized virtual book");
        Ok(())
    }

    async fn publish(&self, id: Uuid, bytes: &[u8]) -> Result<()> {
        let partial = partial_path(id);
        self.artifacts.write(&partial, bytes).await.or_raise(|| ErrorKind::CacheStorage)?;
        if let Err(err) = self.artifacts.rename(&partial, &artifact_path(id)).await {
            if let Err(cleanup) = self.artifacts.delete(&partial).await {
                tracing::warn!(path = %partial.display(), error = ?cleanup, "Failed to remove partial artifact");
            }
            return Err(err.raise(ErrorKind::CacheStorage));
        }
        Ok(())
    }

    /// Delete the artifact of `id`, waiting for current readers to finish.
    #[instrument(skip(self))]
    pub async fn purge(&self, id: Uuid) -> Result<bool> {
        let slot = self.slot(id);
        let exclusive = slot.gate.clone().write_owned().await;
        let deleted = match self.artifacts.delete(&artifact_path(id)).await {
            Ok(()) => true,
            Err(err) if err.is_not_found() => false,
            Err(err) => return Err(err.raise(ErrorKind::CacheStorage)),
        };
        drop(exclusive);
        self.release_slot(id);
        if deleted {
            tracing::debug!("Purged artifact");
        }
        Ok(deleted)
    }

    /// Delete every artifact (waiting for readers) and every partial file.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<usize> {
        let files = self.artifacts.list(Some(Path::new(ARTIFACT_DIR))).await.or_raise(|| ErrorKind::CacheStorage)?;
        let mut removed = 0;
        for file in files {
            match artifact_id(&file.path) {
                Some(id) => removed += usize::from(self.purge(id).await?),
                None if file.path.starts_with(PARTIAL_DIR) => {
                    self.delete_ignoring_missing(&file.path).await?;
                },
                None => {},
            }
        }
        tracing::info!(removed, "Cleared artifact cache");
        Ok(removed)
    }

    /// Evict idle artifacts and abandoned partial files.
    ///
    /// An artifact is idle when neither its creation nor its last access in
    /// this process is within the eviction age. Artifacts currently being read
    /// or rebuilt are skipped and counted as busy.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<SweepReport> {
        let now = OffsetDateTime::now_utc();
        let eviction_age = time::Duration::try_from(self.options.eviction_age).unwrap_or(time::Duration::MAX);
        let partial_age = time::Duration::try_from(self.options.timeout).unwrap_or(time::Duration::MAX);
        let files = self.artifacts.list(Some(Path::new(ARTIFACT_DIR))).await.or_raise(|| ErrorKind::CacheStorage)?;
        let mut report = SweepReport::default();
        for file in files {
            let Some(id) = artifact_id(&file.path) else {
                // Anything in the partial directory older than the extraction
                // timeout belongs to an extraction that will never finish.
                if file.path.starts_with(PARTIAL_DIR) && now - file.modified > partial_age {
                    self.delete_ignoring_missing(&file.path).await?;
                    report.partials += 1;
                }
                continue;
            };
            let slot = self.slot(id);
            let last_access = OffsetDateTime::from_unix_timestamp(slot.last_access.load(Ordering::Relaxed))
                .unwrap_or(OffsetDateTime::UNIX_EPOCH)
                .max(file.modified);
            if now - last_access <= eviction_age {
                continue;
            }
            let Ok(exclusive) = slot.gate.clone().try_write_owned() else {
                report.busy += 1;
                continue;
            };
            self.delete_ignoring_missing(&file.path).await?;
            report.evicted += 1;
            drop(exclusive);
            self.release_slot(id);
        }
        if report != SweepReport::default() {
            tracing::info!(evicted = report.evicted, busy = report.busy, partials = report.partials, "Swept artifact cache");
        }
        Ok(report)
    }

    async fn delete_ignoring_missing(&self, path: &Path) -> Result<()> {
        match self.artifacts.delete(path).await {
            Err(err) if !err.is_not_found() => Err(err.raise(ErrorKind::CacheStorage)),
            _ => Ok(()),
        }
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = self.sweep().await {
                    tracing::warn!(error = ?err, "Artifact sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests;
