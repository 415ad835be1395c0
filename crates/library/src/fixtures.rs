//! Shared test setup: in-memory EPUBs and a fully wired library over mocks.

use crate::api::Api;
use crate::catalog;
use crate::content::{ContentCache, ContentOptions, EpubMaterializer, Materializer};
use crate::error::{ErrorKind, Result};
use crate::lifecycle::Lifecycle;
use crate::scan::{ScanOptions, Scanner};
use crate::{Library, LibraryOptions};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;
use vellum_container::{Container, Metadata, NavPoint, Resource, media_type};
use vellum_extract::models::Work;
use vellum_registry::models::Page;
use vellum_registry::{MemoryRegistry, RegistryHandle};
use vellum_storage::StorageBackend;
use vellum_storage::backend::MockBackend;

fn xhtml(title: &str, body: &str) -> Vec<u8> {
    format!(
        r#"<html xmlns="http://www.w3.org/1999/xhtml"><head><title>{title}</title><link rel="stylesheet" href="../css/base.css"/></head><body>{body}</body></html>"#
    )
    .into_bytes()
}

fn metadata(title: &str) -> Metadata {
    Metadata {
        title: title.to_string(),
        authors: vec!["Ann Author".into()],
        language: Some("en".into()),
        identifier: Some(format!("urn:test:{}", title.to_lowercase().replace(' ', "-"))),
        ..Default::default()
    }
}

/// An omnibus with `works` top-level entries, each in its own document
/// (`text/book<n>.xhtml`, titled `Book <n>`).
pub(crate) fn omnibus_epub(title: &str, works: usize) -> Vec<u8> {
    let mut container = Container {
        metadata: metadata(title),
        resources: vec![Resource::new("css/base.css", media_type::CSS, "p { margin: 0 }")],
        ..Default::default()
    };
    for n in 1..=works {
        let doc = format!("text/book{n}.xhtml");
        let body = format!("<h1>Book {n}</h1><p>Text of book {n}.</p>");
        container.resources.push(Resource::new(&doc, media_type::XHTML, xhtml(&format!("Book {n}"), &body)));
        container.spine.push(doc.clone());
        container.nav.push(NavPoint::new(format!("Book {n}"), doc));
    }
    vellum_container::write(&container).unwrap()
}

/// An ordinary novel: one document, chapters pointing into it.
pub(crate) fn single_epub(title: &str) -> Vec<u8> {
    let doc = "text/novel.xhtml";
    let body = r#"<h2 id="c1">One</h2><h2 id="c2">Two</h2><h2 id="c3">Three</h2>"#;
    let container = Container {
        metadata: metadata(title),
        resources: vec![
            Resource::new("css/base.css", media_type::CSS, "p { margin: 0 }"),
            Resource::new(doc, media_type::XHTML, xhtml(title, body)),
        ],
        spine: vec![doc.to_string()],
        nav: (1..=3).map(|i| NavPoint::new(format!("Chapter {i}"), format!("{doc}#c{i}"))).collect(),
        nav_documents: Vec::new(),
    };
    vellum_container::write(&container).unwrap()
}

/// Counts extractions at the materializer seam, optionally slowing them down
/// or making them fail.
#[derive(Default)]
pub(crate) struct CountingMaterializer {
    inner: EpubMaterializer,
    calls: AtomicUsize,
    delay: Duration,
    fail: AtomicBool,
}
impl CountingMaterializer {
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self { delay, ..Default::default() }
    }

    pub(crate) fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}
impl Materializer for CountingMaterializer {
    fn materialize(&self, work: &Work, source: &[u8]) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.fail.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Extract);
        }
        self.inner.materialize(work, source)
    }
}

#[derive(Default)]
pub(crate) struct HarnessBuilder {
    content: ContentOptions,
    scan: ScanOptions,
    delay: Duration,
}
impl HarnessBuilder {
    pub(crate) fn prewarm(mut self, prewarm: bool) -> Self {
        self.scan.prewarm = prewarm;
        self
    }

    pub(crate) fn scan(mut self, scan: ScanOptions) -> Self {
        self.scan = scan;
        self
    }

    pub(crate) fn content(mut self, content: ContentOptions) -> Self {
        self.content = content;
        self
    }

    /// Time every extraction takes.
    pub(crate) fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) async fn build(self) -> Harness {
        let library = Arc::new(MockBackend::default().with_name("library"));
        let artifacts = Arc::new(MockBackend::default().with_name("artifacts"));
        let registry: RegistryHandle = Arc::new(MemoryRegistry::new());
        let materializer = Arc::new(CountingMaterializer::with_delay(self.delay));
        let options = LibraryOptions { content: self.content, scan: self.scan, ..Default::default() };
        let system = Library::with_materializer(
            library.clone(),
            artifacts.clone(),
            registry.clone(),
            materializer.clone(),
            options,
        );
        Harness {
            library,
            artifacts,
            registry,
            materializer,
            content: system.content().clone(),
            lifecycle: system.lifecycle().clone(),
            scanner: system.scanner().clone(),
            system,
        }
    }
}

pub(crate) struct Harness {
    pub library: Arc<MockBackend>,
    pub artifacts: Arc<MockBackend>,
    pub registry: RegistryHandle,
    pub materializer: Arc<CountingMaterializer>,
    pub content: Arc<ContentCache>,
    pub lifecycle: Lifecycle,
    pub scanner: Arc<Scanner>,
    pub system: Library,
}
impl Harness {
    pub(crate) async fn new() -> Self {
        Self::builder().build().await
    }

    pub(crate) fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    pub(crate) fn api(&self) -> Api {
        self.system.api()
    }

    pub(crate) fn book_id(&self, path: &str) -> String {
        catalog::book_id(Path::new(path))
    }

    /// Store a file in the library and register it as an unprocessed book.
    pub(crate) async fn add_file(&self, path: &str, bytes: Vec<u8>) -> String {
        self.library.write(Path::new(path), &bytes).await.unwrap();
        let file = self.library.stat(Path::new(path)).await.unwrap();
        let library: vellum_storage::BackendHandle = self.library.clone();
        let book = catalog::describe(&library, &file).await;
        self.registry.upsert_book(&book).await.unwrap();
        book.id
    }

    pub(crate) async fn add_omnibus(&self, path: &str, works: usize) -> String {
        self.add_file(path, omnibus_epub("The Complete Series", works)).await
    }

    pub(crate) async fn add_single(&self, path: &str) -> String {
        self.add_file(path, single_epub("A Novel")).await
    }

    /// Overwrite a library file without touching its book record.
    pub(crate) async fn replace_file(&self, path: &str, bytes: Vec<u8>) {
        self.library.write(Path::new(path), &bytes).await.unwrap();
    }

    /// Process a book, which must succeed, and return its virtual book ids in
    /// position order.
    pub(crate) async fn process(&self, book_id: &str) -> Vec<Uuid> {
        let outcome = self.scanner.process_book(book_id).await.unwrap();
        assert!(!outcome.is_failed(), "processing failed: {outcome:?}");
        let listed = self.registry.list_by_parent(book_id, Page::default()).await.unwrap();
        listed.into_iter().map(|vb| vb.id).collect()
    }

    pub(crate) async fn artifact_exists(&self, id: Uuid) -> bool {
        self.artifacts.exists(Path::new(&format!("artifacts/{id}.epub"))).await.unwrap()
    }
}
