//! Resource path handling.
//!
//! References inside documents are URLs relative to the referring document;
//! resources are keyed by normalized paths relative to the package root.

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

/// Characters escaped when a resource path is written back out as an href.
const HREF: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'#').add(b'%').add(b'<').add(b'>').add(b'?').add(b'`');

/// Where a reference found inside a document points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// A resource inside the package (which may or may not exist).
    Local { path: String, fragment: Option<String> },
    /// An external URL or a `data:` URI. Not part of the package namespace.
    External,
    /// A relative reference that climbs out of the package root.
    Escapes,
}

/// Split an href into its path and optional fragment.
pub fn split_fragment(href: &str) -> (&str, Option<&str>) {
    match href.split_once('#') {
        Some((path, fragment)) => (path, Some(fragment)),
        None => (href, None),
    }
}

/// Directory part of a resource path (empty for the package root).
pub fn parent(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Normalize a `/`-separated relative path, resolving `.` and `..`.
///
/// Returns `None` if the path climbs above its root or is empty.
pub fn normalize(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {},
            ".." => {
                parts.pop()?;
            },
            other => parts.push(other),
        }
    }
    match parts.is_empty() {
        true => None,
        false => Some(parts.join("/")),
    }
}

fn has_scheme(href: &str) -> bool {
    let Some((scheme, _)) = href.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Resolve `href`, found inside the document at `base`, against the package
/// namespace.
///
/// Query strings are dropped, fragments are kept separately, and the path is
/// percent-decoded. A fragment-only or empty reference points at `base`
/// itself.
///
/// # Examples
///
/// ```
/// use vellum_container::path::{Reference, resolve};
///
/// assert_eq!(
///     resolve("text/ch01.xhtml", "../css/style.css"),
///     Reference::Local { path: "css/style.css".into(), fragment: None },
/// );
/// assert_eq!(resolve("text/ch01.xhtml", "https://example.com/a.png"), Reference::External);
/// assert_eq!(resolve("text/ch01.xhtml", "../../outside.css"), Reference::Escapes);
/// ```
pub fn resolve(base: &str, href: &str) -> Reference {
    let href = href.trim();
    if href.starts_with("//") || has_scheme(href) {
        return Reference::External;
    }
    let (rest, fragment) = split_fragment(href);
    let rest = rest.split_once('?').map(|(path, _)| path).unwrap_or(rest);
    let fragment = fragment.filter(|f| !f.is_empty()).map(String::from);
    if rest.is_empty() {
        return match normalize(base) {
            Some(path) => Reference::Local { path, fragment },
            None => Reference::Escapes,
        };
    }
    let decoded = percent_decode_str(rest).decode_utf8_lossy();
    let joined = match decoded.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => match parent(base) {
            "" => decoded.into_owned(),
            dir => format!("{dir}/{decoded}"),
        },
    };
    match normalize(&joined) {
        Some(path) => Reference::Local { path, fragment },
        None => Reference::Escapes,
    }
}

/// Percent-encode a package-root-relative path for use as an href.
pub fn encode(path: &str) -> String {
    path.split('/').map(|p| utf8_percent_encode(p, HREF).to_string()).collect::<Vec<_>>().join("/")
}
