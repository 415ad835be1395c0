//! Navigation tree flattening.

use std::collections::HashSet;

use tracing::instrument;
use vellum_container::{Container, NavPoint};

use crate::consts;
use crate::models::{Work, WorkKind};

/// Navigation depth at which works start, counting top-level entries as 1.
pub const DEFAULT_TOC_DEPTH: usize = 1;
/// A boundary entry with at least this many children reads as a novel.
const NOVEL_MIN_CHAPTERS: usize = 3;

/// Flattens a container's navigation tree into an ordered list of [`Work`]s.
///
/// Entries at the boundary depth become works, and so do shallower entries
/// that have no children. Everything below a boundary entry belongs to that
/// entry's work.
///
/// # Examples
///
/// ```
/// use vellum_container::{Container, NavPoint, Resource, media_type};
/// use vellum_extract::TocParser;
///
/// let container = Container {
///     resources: ["one.xhtml", "two.xhtml"]
///         .into_iter()
///         .map(|doc| Resource::new(doc, media_type::XHTML, "<html/>"))
///         .collect(),
///     nav: vec![
///         NavPoint::new("Book One", "one.xhtml"),
///         NavPoint::new("", "two.xhtml"),
///         NavPoint::new("Book One again", "one.xhtml"),
///     ],
///     ..Default::default()
/// };
/// let works = TocParser::default().parse(&container);
/// assert_eq!(works.len(), 2);
/// assert_eq!(works[1].title, "Work 2");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TocParser {
    depth: usize,
}
impl Default for TocParser {
    fn default() -> Self {
        Self { depth: DEFAULT_TOC_DEPTH }
    }
}
impl TocParser {
    /// Create a parser with the given boundary depth (at least 1).
    pub fn new(depth: usize) -> Self {
        Self { depth: depth.max(1) }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Entries on the work boundary, in navigation order, before any
    /// de-duplication.
    pub(crate) fn boundary_entries<'a>(&self, nav: &'a [NavPoint]) -> Vec<&'a NavPoint> {
        fn walk<'a>(points: &'a [NavPoint], level: usize, depth: usize, out: &mut Vec<&'a NavPoint>) {
            for point in points {
                match level >= depth || point.children.is_empty() {
                    true => out.push(point),
                    false => walk(&point.children, level + 1, depth, out),
                }
            }
        }
        let mut out = Vec::new();
        walk(nav, 1, self.depth, &mut out);
        out
    }

    /// Flatten the navigation tree of `container` into works.
    ///
    /// Only entries landing in a content document become works: entries
    /// pointing at navigation documents, non-markup resources or files the
    /// package does not contain are skipped. Duplicate anchors collapse onto
    /// the first entry. Positions are assigned afterwards, so they are always
    /// `1..=n`.
    #[instrument(level = "debug", skip_all, fields(depth = self.depth))]
    pub fn parse(&self, container: &Container) -> Vec<Work> {
        let mut seen = HashSet::new();
        let mut works = Vec::new();
        for point in self.boundary_entries(&container.nav) {
            if !container.is_content_document(point.path()) {
                tracing::debug!(href = %point.href, "Skipping entry outside the content documents");
                continue;
            }
            if !seen.insert(point.href.as_str()) {
                tracing::debug!(href = %point.href, label = %point.label, "Dropping duplicate work anchor");
                continue;
            }
            let position = u32::try_from(works.len() + 1).unwrap_or(u32::MAX);
            let title = match point.label.trim() {
                "" => format!("Work {position}"),
                label => label.to_string(),
            };
            works.push(Work::new(title, position, point.href.clone(), kind_of(point)));
        }
        works
    }
}

/// Classify an entry from its label, falling back to its sub-structure.
fn kind_of(point: &NavPoint) -> WorkKind {
    let label = point.label.as_str();
    if consts::SUPPLEMENT_REGEX.is_match(label) {
        WorkKind::Supplement
    } else if consts::NOVELLA_REGEX.is_match(label) {
        WorkKind::Novella
    } else if consts::STORY_REGEX.is_match(label) {
        WorkKind::ShortStory
    } else if consts::NOVEL_REGEX.is_match(label) || point.children.len() >= NOVEL_MIN_CHAPTERS {
        WorkKind::Novel
    } else {
        WorkKind::Entry
    }
}
