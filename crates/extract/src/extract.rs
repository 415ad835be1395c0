//! Standalone archive assembly for a single work.

use std::collections::HashSet;

use exn::ResultExt;
use tracing::instrument;
use vellum_container::{Container, Metadata, NavPoint};

use crate::closure::{DEFAULT_MAX_REFERENCE_DEPTH, ResourceClosure};
use crate::error::{ErrorKind, Result};
use crate::models::{ResourceWarning, WarningReason, Work};
use crate::toc::TocParser;

/// A standalone container for one work plus the references that could not be
/// carried over.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub container: Container,
    pub warnings: Vec<ResourceWarning>,
}

/// Builds standalone containers for individual works.
///
/// The seed set for a work is its anchor document, the spine documents that
/// follow it up to the next work's anchor document, the documents of its own
/// navigation subtree, and the source cover. Everything those reference,
/// transitively, is carried over.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionService {
    toc: TocParser,
    max_reference_depth: usize,
}
impl Default for ExtractionService {
    fn default() -> Self {
        Self { toc: TocParser::default(), max_reference_depth: DEFAULT_MAX_REFERENCE_DEPTH }
    }
}
impl ExtractionService {
    /// `toc` must match the parser the works were produced with, so that
    /// work spans end where the next work begins.
    pub fn new(toc: TocParser, max_reference_depth: usize) -> Self {
        Self { toc, max_reference_depth }
    }

    /// Extract one work from a parsed source container.
    ///
    /// Fails with [`WorkNotFound`](ErrorKind::WorkNotFound) when the work's
    /// anchor is not a content document of `source`. Unresolvable individual
    /// references only produce warnings.
    #[instrument(skip_all, fields(work = %work.title, position = work.position, anchor = %work.anchor))]
    pub fn extract(&self, work: &Work, source: &Container) -> Result<Extraction> {
        let anchor_doc = work.document();
        if !source.is_content_document(anchor_doc) {
            exn::bail!(ErrorKind::WorkNotFound(work.anchor.clone()));
        }
        let mut warnings = Vec::new();

        let mut seeds = vec![anchor_doc.to_string()];
        seeds.extend(self.span(work, source));
        let subtree = find_nav_point(&source.nav, work);
        if let Some(point) = subtree {
            for child in point.descendants().into_iter().skip(1) {
                let doc = child.path();
                match source.is_content_document(doc) {
                    true => seeds.push(doc.to_string()),
                    false if !source.contains(doc) => warnings.push(ResourceWarning {
                        document: anchor_doc.to_string(),
                        reference: child.href.clone(),
                        reason: WarningReason::Missing,
                    }),
                    false => {},
                }
            }
        }
        seeds.extend(source.metadata.cover.clone());

        let closure = ResourceClosure::compute(source, seeds, self.max_reference_depth);
        warnings.extend(closure.warnings.iter().cloned());

        let nav = subtree.map(|point| scope_nav(&point.children, &closure)).unwrap_or_default();
        let nav = match nav.is_empty() {
            true => vec![NavPoint::new(work.title.clone(), work.anchor.clone())],
            false => nav,
        };
        let container = Container {
            metadata: Metadata {
                title: work.title.clone(),
                identifier: Some(derive_identifier(&source.metadata, &work.anchor)),
                cover: source.metadata.cover.clone().filter(|cover| closure.contains(cover)),
                ..source.metadata.clone()
            },
            resources: source
                .resources
                .iter()
                .filter(|r| closure.contains(&r.path) && !source.nav_documents.contains(&r.path))
                .cloned()
                .collect(),
            spine: source.spine.iter().filter(|p| closure.contains(p)).cloned().collect(),
            nav,
            nav_documents: Vec::new(),
        };
        tracing::debug!(resources = container.resources.len(), warnings = warnings.len(), "Extracted work");
        Ok(Extraction { container, warnings })
    }

    /// Parse `source` bytes, extract `work` and serialize the result.
    pub fn extract_bytes(&self, work: &Work, source: &[u8]) -> Result<(Vec<u8>, Vec<ResourceWarning>)> {
        let container = vellum_container::read(source).or_raise(|| ErrorKind::ParseError)?;
        let extraction = self.extract(work, &container)?;
        let bytes = vellum_container::write(&extraction.container).or_raise(|| ErrorKind::Assemble)?;
        Ok((bytes, extraction.warnings))
    }

    /// Spine documents after the anchor document, up to the next document
    /// that starts another work.
    fn span(&self, work: &Work, source: &Container) -> Vec<String> {
        let anchor_doc = work.document();
        let Some(start) = source.spine_index(anchor_doc) else {
            return Vec::new();
        };
        let boundaries: HashSet<String> = self
            .toc
            .parse(source)
            .iter()
            .map(|w| w.document().to_string())
            .filter(|doc| doc != anchor_doc)
            .collect();
        source.spine[start + 1..].iter().take_while(|doc| !boundaries.contains(*doc)).cloned().collect()
    }
}

/// The navigation entry a work was created from: an exact anchor match
/// first, otherwise the first entry pointing into the anchor document.
fn find_nav_point<'a>(nav: &'a [NavPoint], work: &Work) -> Option<&'a NavPoint> {
    let all: Vec<&NavPoint> = nav.iter().flat_map(NavPoint::descendants).collect();
    all.iter()
        .find(|point| point.href == work.anchor)
        .or_else(|| all.iter().find(|point| point.path() == work.document()))
        .copied()
}

/// Keep entries whose documents made it into the closure; the children of a
/// dropped entry move up to take its place.
fn scope_nav(points: &[NavPoint], closure: &ResourceClosure) -> Vec<NavPoint> {
    let mut out = Vec::new();
    for point in points {
        let children = scope_nav(&point.children, closure);
        match closure.contains(point.path()) {
            true => out.push(NavPoint { label: point.label.clone(), href: point.href.clone(), children }),
            false => out.extend(children),
        }
    }
    out
}

/// Stable identifier for an extracted work: the same source and anchor
/// always give the same identifier.
fn derive_identifier(source: &Metadata, anchor: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(source.identifier.as_deref().unwrap_or(&source.title).as_bytes());
    hasher.update(b"\0");
    hasher.update(anchor.as_bytes());
    let hash = hasher.finalize().to_string();
    format!("urn:vellum:{}", &hash[..32])
}
