//! Transitive resource closure.

use std::collections::{HashSet, VecDeque};

use scraper::Html;
use tracing::instrument;
use vellum_container::path::{self, Reference};
use vellum_container::{Container, Resource};

use crate::consts;
use crate::models::{ResourceWarning, WarningReason};

/// Longest chain of references followed from a seed document.
pub const DEFAULT_MAX_REFERENCE_DEPTH: usize = 16;

/// Attributes that load a resource wherever they appear (lazy-loading
/// plugins stash the real source in `data-*` attributes).
const SOURCE_ATTRIBUTES: &[&str] = &["src", "data-src", "data-original", "data-lazy-src", "poster"];
const SRCSET_ATTRIBUTES: &[&str] = &["srcset", "data-srcset"];
/// Elements whose `href` (or `xlink:href`) loads a resource: SVG images.
const SVG_HREF_ELEMENTS: &[&str] = &["image", "use", "feImage"];

/// The set of resources a group of seed documents needs.
///
/// Computed with an explicit visited set and an iterative work list, since
/// stylesheet `@import` graphs can contain cycles.
#[derive(Debug, Clone, Default)]
pub struct ResourceClosure {
    paths: HashSet<String>,
    pub warnings: Vec<ResourceWarning>,
}
impl ResourceClosure {
    /// Compute the closure of `seeds` inside `container`.
    ///
    /// Seeds that are not in the container are ignored (callers validate
    /// the seeds they care about). References more than `max_depth` hops
    /// away from a seed are not followed and produce a warning.
    #[instrument(level = "debug", skip_all, fields(max_depth = max_depth))]
    pub fn compute<I, S>(container: &Container, seeds: I, max_depth: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut closure = Self::default();
        let mut reported: HashSet<(String, String)> = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        for seed in seeds {
            let seed = seed.into();
            if container.contains(&seed) && closure.paths.insert(seed.clone()) {
                queue.push_back((seed, 0));
            }
        }

        while let Some((current, depth)) = queue.pop_front() {
            let Some(resource) = container.resource(&current) else { continue };
            for reference in references(resource) {
                let reason = match path::resolve(&current, &reference) {
                    Reference::External => continue,
                    Reference::Escapes => WarningReason::OutsidePackage,
                    Reference::Local { path: target, .. } if container.contains(&target) => {
                        if closure.paths.contains(&target) {
                            continue;
                        }
                        if depth + 1 > max_depth {
                            WarningReason::DepthExceeded
                        } else {
                            closure.paths.insert(target.clone());
                            queue.push_back((target, depth + 1));
                            continue;
                        }
                    },
                    Reference::Local { .. } => WarningReason::Missing,
                };
                if reported.insert((current.clone(), reference.clone())) {
                    tracing::debug!(document = %current, %reference, %reason, "Unresolved resource reference");
                    closure.warnings.push(ResourceWarning { document: current.clone(), reference, reason });
                }
            }
        }
        closure
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Raw references found in a resource, in document order.
fn references(resource: &Resource) -> Vec<String> {
    if resource.is_stylesheet() {
        css_references(&resource.text())
    } else if resource.is_markup() || resource.is_svg() {
        markup_references(&resource.text())
    } else {
        Vec::new()
    }
}

fn markup_references(markup: &str) -> Vec<String> {
    let document = Html::parse_document(markup);
    let mut out = Vec::new();
    for element in document.select(&consts::ANY_ELEMENT_SELECTOR) {
        let value = element.value();
        let name = value.name();
        for (attribute, content) in value.attrs() {
            match attribute {
                a if SOURCE_ATTRIBUTES.contains(&a) => out.push(content.to_string()),
                a if SRCSET_ATTRIBUTES.contains(&a) => out.extend(
                    content.split(',').filter_map(|candidate| candidate.split_whitespace().next()).map(String::from),
                ),
                "href" if name == "link" && is_stylesheet_link(value) => out.push(content.to_string()),
                "href" if SVG_HREF_ELEMENTS.iter().any(|e| e.eq_ignore_ascii_case(name)) => out.push(content.to_string()),
                "style" => out.extend(css_references(content)),
                _ => {},
            }
        }
    }
    for style in document.select(&consts::STYLE_ELEMENT_SELECTOR) {
        out.extend(css_references(&style.text().collect::<String>()));
    }
    out.retain(|reference| !reference.trim().is_empty());
    out
}

fn is_stylesheet_link(element: &scraper::node::Element) -> bool {
    element.attr("rel").is_some_and(|rel| rel.split_ascii_whitespace().any(|r| r.eq_ignore_ascii_case("stylesheet")))
}

fn css_references(css: &str) -> Vec<String> {
    let css = consts::CSS_COMMENT_REGEX.replace_all(css, "");
    let imports = consts::CSS_IMPORT_REGEX.captures_iter(&css);
    let urls = consts::CSS_URL_REGEX.captures_iter(&css);
    imports
        .chain(urls)
        .filter_map(|captures| captures.iter().skip(1).flatten().next().map(|m| m.as_str().trim().to_string()))
        .filter(|reference| !reference.is_empty())
        .collect()
}
