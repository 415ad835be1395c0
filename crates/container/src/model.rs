use std::borrow::Cow;

/// Media types the rest of the system cares about.
pub mod media_type {
    pub const EPUB: &str = "application/epub+zip";
    pub const XHTML: &str = "application/xhtml+xml";
    pub const HTML: &str = "text/html";
    pub const CSS: &str = "text/css";
    pub const SVG: &str = "image/svg+xml";
    pub const NCX: &str = "application/x-dtbncx+xml";
}

/// One file inside the package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Normalized path relative to the package document directory.
    pub path: String,
    pub media_type: String,
    pub data: Vec<u8>,
}
impl Resource {
    pub fn new(path: impl Into<String>, media_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self { path: path.into(), media_type: media_type.into(), data: data.into() }
    }

    /// XHTML or HTML content document.
    pub fn is_markup(&self) -> bool {
        matches!(self.media_type.as_str(), media_type::XHTML | media_type::HTML)
    }

    pub fn is_stylesheet(&self) -> bool {
        self.media_type == media_type::CSS
    }

    pub fn is_svg(&self) -> bool {
        self.media_type == media_type::SVG
    }

    /// Resources that can reference other resources.
    pub fn is_textual(&self) -> bool {
        self.is_markup() || self.is_stylesheet() || self.is_svg()
    }

    /// Resource bytes as text, without a byte order mark.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(crate::xml::strip_bom(&self.data))
    }
}

/// A navigation entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavPoint {
    pub label: String,
    /// Normalized resource path, optionally followed by `#fragment`.
    pub href: String,
    pub children: Vec<NavPoint>,
}
impl NavPoint {
    pub fn new(label: impl Into<String>, href: impl Into<String>) -> Self {
        Self { label: label.into(), href: href.into(), children: Vec::new() }
    }

    pub fn with_children(mut self, children: Vec<NavPoint>) -> Self {
        self.children = children;
        self
    }

    /// The resource path this entry points into.
    pub fn path(&self) -> &str {
        crate::path::split_fragment(&self.href).0
    }

    pub fn fragment(&self) -> Option<&str> {
        crate::path::split_fragment(&self.href).1
    }

    /// Depth-first walk over this entry and all of its descendants.
    pub fn descendants(&self) -> Vec<&NavPoint> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(point) = stack.pop() {
            out.push(point);
            stack.extend(point.children.iter().rev());
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub title: String,
    pub authors: Vec<String>,
    pub language: Option<String>,
    pub identifier: Option<String>,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
    /// Path of the cover image resource.
    pub cover: Option<String>,
}

/// A parsed archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Container {
    pub metadata: Metadata,
    /// Every resource, in manifest order.
    pub resources: Vec<Resource>,
    /// Linear reading order, as resource paths.
    pub spine: Vec<String>,
    pub nav: Vec<NavPoint>,
    /// Resources that are the package's own navigation documents. These are
    /// regenerated on write and never treated as content.
    pub nav_documents: Vec<String>,
}
impl Container {
    pub fn resource(&self, path: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.path == path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.resource(path).is_some()
    }

    /// Whether `path` names a content document (markup that is not one of
    /// the package's navigation documents).
    pub fn is_content_document(&self, path: &str) -> bool {
        !self.nav_documents.iter().any(|n| n == path) && self.resource(path).is_some_and(Resource::is_markup)
    }

    /// Position of `path` in the reading order.
    pub fn spine_index(&self, path: &str) -> Option<usize> {
        self.spine.iter().position(|p| p == path)
    }

    /// Content documents in reading order.
    pub fn content_documents(&self) -> impl Iterator<Item = &str> {
        self.spine.iter().map(String::as_str).filter(|p| self.is_content_document(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container() -> Container {
        Container {
            resources: vec![
                Resource::new("nav.xhtml", media_type::XHTML, "<html/>"),
                Resource::new("text/one.xhtml", media_type::XHTML, "<html/>"),
                Resource::new("style.css", media_type::CSS, "p {}"),
            ],
            spine: vec!["nav.xhtml".into(), "text/one.xhtml".into()],
            nav_documents: vec!["nav.xhtml".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_content_documents_skip_navigation() {
        let container = container();
        assert!(container.is_content_document("text/one.xhtml"));
        assert!(!container.is_content_document("nav.xhtml"));
        assert!(!container.is_content_document("style.css"));
        assert_eq!(container.content_documents().collect::<Vec<_>>(), vec!["text/one.xhtml"]);
    }

    #[test]
    fn test_nav_point_fragment_and_descendants() {
        let point = NavPoint::new("Book One", "one.xhtml#start")
            .with_children(vec![NavPoint::new("Chapter 1", "one.xhtml#c1"), NavPoint::new("Chapter 2", "two.xhtml")]);
        assert_eq!(point.path(), "one.xhtml");
        assert_eq!(point.fragment(), Some("start"));
        let labels: Vec<_> = point.descendants().iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["Book One", "Chapter 1", "Chapter 2"]);
    }

    #[test]
    fn test_text_strips_bom() {
        let resource = Resource::new("a.css", media_type::CSS, b"\xEF\xBB\xBFp {}".to_vec());
        assert_eq!(resource.text(), "p {}");
        assert!(resource.is_textual());
    }
}
