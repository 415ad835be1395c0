//! Omnibus detection.

use std::collections::HashSet;

use tracing::instrument;
use vellum_container::{Container, path};

use crate::TocParser;
use crate::consts;
use crate::error::ErrorKind;
use crate::models::{Classification, Detection, PatternTag};

/// Minimum number of works for a container to count as an omnibus.
pub const DEFAULT_MIN_WORKS: usize = 2;

/// Classifies containers as omnibus editions or ordinary books.
///
/// Known bundle signatures are checked first, then the generic rule: enough
/// boundary entries in the navigation tree, each landing in a *different*
/// content document. An ordinary chaptered book fails the generic rule
/// because its chapter entries share documents.
#[derive(Debug, Clone, Copy)]
pub struct Detector {
    min_works: usize,
    toc: TocParser,
}
impl Default for Detector {
    fn default() -> Self {
        Self { min_works: DEFAULT_MIN_WORKS, toc: TocParser::default() }
    }
}
impl Detector {
    pub fn new(min_works: usize, toc: TocParser) -> Self {
        Self { min_works: min_works.max(2), toc }
    }

    /// Classify a parsed container.
    #[instrument(level = "debug", skip_all, fields(title = %container.metadata.title))]
    pub fn classify(&self, container: &Container) -> Classification {
        let documents: Vec<&str> = self
            .toc
            .boundary_entries(&container.nav)
            .into_iter()
            .map(|point| point.path())
            .filter(|doc| container.is_content_document(doc))
            .collect();
        if documents.len() < self.min_works {
            return Classification::NOT_OMNIBUS;
        }
        if self.merged_volumes(container, &documents) {
            return Classification::omnibus(PatternTag::MergedVolumes);
        }
        let distinct: HashSet<&str> = documents.iter().copied().collect();
        if distinct.len() != documents.len() {
            tracing::debug!(entries = documents.len(), documents = distinct.len(), "Entries share content documents");
            return Classification::NOT_OMNIBUS;
        }
        match consts::BUNDLE_TITLE_REGEX.is_match(&container.metadata.title) {
            true => Classification::omnibus(PatternTag::TitleKeyword),
            false => Classification::omnibus(PatternTag::DistinctDocuments),
        }
    }

    /// Classify raw archive bytes. Unparseable input is not an omnibus; the
    /// parse failure is carried in [`Detection::error`].
    pub fn classify_bytes(&self, bytes: &[u8]) -> Detection {
        match vellum_container::read(bytes) {
            Ok(container) => Detection { classification: self.classify(&container), error: None },
            Err(err) => {
                tracing::debug!(error = ?err, "Classifying unparseable archive as not an omnibus");
                Detection { classification: Classification::NOT_OMNIBUS, error: Some(err.raise(ErrorKind::ParseError)) }
            },
        }
    }

    /// Every boundary entry lives in its own per-volume directory, and the
    /// content is split over at least `min_works` such directories.
    fn merged_volumes(&self, container: &Container, documents: &[&str]) -> bool {
        let all_volumes: HashSet<&str> = container.content_documents().filter_map(volume_of).collect();
        if all_volumes.len() < self.min_works {
            return false;
        }
        let mut entry_volumes = HashSet::new();
        documents.iter().all(|doc| volume_of(doc).is_some_and(|volume| entry_volumes.insert(volume)))
    }
}

/// Directory prefix up to and including the first component that names a
/// volume (`OEBPS/book2/text/ch1.xhtml` gives `OEBPS/book2`).
fn volume_of(doc: &str) -> Option<&str> {
    let dir = path::parent(doc);
    let mut end = 0;
    for component in dir.split('/') {
        end += component.len();
        if consts::VOLUME_DIR_REGEX.is_match(component) {
            return Some(&dir[..end]);
        }
        end += 1;
    }
    None
}
