//! Omnibus splitting for a book library.
//!
//! An omnibus edition bundles several works in one archive. This crate finds
//! them (the [`scan`]), keeps one *virtual book* per work in the registry
//! (the [`lifecycle`]), and materializes a standalone archive for a virtual
//! book only when somebody asks for it (the [`content`] cache).
//!
//! [`Library`] wires the pieces together around three collaborators: the
//! library storage backend (read-only), the artifact storage backend, and the
//! registry.

pub mod api;
pub mod catalog;
pub mod content;
pub mod error;
#[cfg(test)]
mod fixtures;
pub mod lifecycle;
pub mod scan;

use crate::api::Api;
use crate::catalog::SyncReport;
use crate::content::{ContentCache, ContentOptions, EpubMaterializer, Materializer};
use crate::error::Result;
use crate::lifecycle::Lifecycle;
use crate::scan::{ScanOptions, Scanner};
use std::sync::Arc;
use vellum_extract::{DEFAULT_MAX_REFERENCE_DEPTH, DEFAULT_MIN_WORKS, DEFAULT_TOC_DEPTH, Detector, ExtractionService, TocParser};
use vellum_registry::RegistryHandle;
use vellum_storage::BackendHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibraryOptions {
    /// Fewest works for a book to count as an omnibus.
    pub min_works: usize,
    /// Navigation depth at which works start.
    pub toc_depth: usize,
    /// How many references deep extraction follows from a work's documents.
    pub max_reference_depth: usize,
    pub content: ContentOptions,
    pub scan: ScanOptions,
}
impl Default for LibraryOptions {
    fn default() -> Self {
        Self {
            min_works: DEFAULT_MIN_WORKS,
            toc_depth: DEFAULT_TOC_DEPTH,
            max_reference_depth: DEFAULT_MAX_REFERENCE_DEPTH,
            content: ContentOptions::default(),
            scan: ScanOptions::default(),
        }
    }
}

/// The assembled system.
#[derive(Clone)]
pub struct Library {
    library: BackendHandle,
    registry: RegistryHandle,
    content: Arc<ContentCache>,
    lifecycle: Lifecycle,
    scanner: Arc<Scanner>,
}
impl Library {
    pub fn new(library: BackendHandle, artifacts: BackendHandle, registry: RegistryHandle, options: LibraryOptions) -> Self {
        let toc = TocParser::new(options.toc_depth);
        let service = ExtractionService::new(toc, options.max_reference_depth);
        Self::with_materializer(library, artifacts, registry, Arc::new(EpubMaterializer::new(service)), options)
    }

    /// Like [`new`](Self::new), with a custom extraction step.
    pub fn with_materializer(
        library: BackendHandle,
        artifacts: BackendHandle,
        registry: RegistryHandle,
        materializer: Arc<dyn Materializer>,
        options: LibraryOptions,
    ) -> Self {
        let toc = TocParser::new(options.toc_depth);
        let detector = Detector::new(options.min_works, toc);
        let content =
            Arc::new(ContentCache::new(library.clone(), artifacts, registry.clone(), materializer, options.content));
        let lifecycle = Lifecycle::new(registry.clone(), content.clone());
        let scanner = Arc::new(Scanner::new(
            library.clone(),
            registry.clone(),
            lifecycle.clone(),
            content.clone(),
            detector,
            toc,
            options.scan,
        ));
        Self { library, registry, content, lifecycle, scanner }
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub fn content(&self) -> &Arc<ContentCache> {
        &self.content
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn scanner(&self) -> &Arc<Scanner> {
        &self.scanner
    }

    pub fn api(&self) -> Api {
        Api::new(self.registry.clone(), self.lifecycle.clone(), self.scanner.clone(), self.content.clone())
    }

    /// Bring the registry's book records in line with the library files.
    pub async fn sync(&self) -> Result<SyncReport> {
        catalog::sync(&self.library, &self.registry, &self.lifecycle).await
    }
}
