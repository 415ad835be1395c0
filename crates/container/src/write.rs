//! Deterministic EPUB 3 writer.

use crate::error::{ErrorKind, Result};
use crate::model::{Container, NavPoint, media_type};
use crate::path;
use crate::xml::escape_xml;
use exn::ResultExt;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use tracing::instrument;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

const PACKAGE_DIR: &str = "OEBPS";
pub(crate) const NAV_PATH: &str = "vellum-nav.xhtml";
pub(crate) const NCX_PATH: &str = "vellum-toc.ncx";
/// Fixed `dcterms:modified` value; output must not depend on the clock.
const MODIFIED: &str = "1980-01-01T00:00:00Z";

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

/// Serialize a [`Container`] into EPUB 3 archive bytes.
///
/// The container's own navigation documents are dropped and regenerated from
/// [`Container::nav`]. Timestamps, permissions, manifest ids and entry order
/// are all fixed, so the same container always produces the same bytes.
#[instrument(level = "debug", skip_all, fields(resources = container.resources.len()))]
pub fn write(container: &Container) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let stored = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);
    let deflated = stored.compression_method(zip::CompressionMethod::Deflated);

    let identifier = container.metadata.identifier.clone().unwrap_or_else(|| {
        // Without a source identifier, derive one from the title so that the
        // output stays deterministic.
        format!("urn:vellum:{}", path::encode(&container.metadata.title))
    });
    let ids = ManifestIds::new(container);

    let mut entries: Vec<(String, SimpleFileOptions, Vec<u8>)> = vec![
        ("mimetype".to_string(), stored, media_type::EPUB.as_bytes().to_vec()),
        ("META-INF/container.xml".to_string(), deflated, CONTAINER_XML.as_bytes().to_vec()),
        (format!("{PACKAGE_DIR}/content.opf"), deflated, generate_opf(container, &identifier, &ids).into_bytes()),
        (format!("{PACKAGE_DIR}/{NAV_PATH}"), deflated, generate_nav(container).into_bytes()),
        (format!("{PACKAGE_DIR}/{NCX_PATH}"), deflated, generate_ncx(container, &identifier).into_bytes()),
    ];
    for resource in written_resources(container) {
        entries.push((format!("{PACKAGE_DIR}/{}", resource.path), deflated, resource.data.clone()));
    }

    for (name, options, data) in entries {
        zip.start_file(name, options).or_raise(|| ErrorKind::Write)?;
        zip.write_all(&data).or_raise(|| ErrorKind::Write)?;
    }
    Ok(zip.finish().or_raise(|| ErrorKind::Write)?.into_inner())
}

fn written_resources(container: &Container) -> impl Iterator<Item = &crate::Resource> {
    container.resources.iter().filter(|r| {
        !container.nav_documents.contains(&r.path) && r.path != NAV_PATH && r.path != NCX_PATH && r.path != "content.opf"
    })
}

/// Manifest ids derived from resource paths.
struct ManifestIds(Vec<(String, String)>);
impl ManifestIds {
    fn new(container: &Container) -> Self {
        let mut seen = HashSet::from(["nav".to_string(), "ncx".to_string()]);
        let mut ids = Vec::new();
        for resource in written_resources(container) {
            let base: String = resource
                .path
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
                .collect();
            let base = format!("r-{base}");
            let mut id = base.clone();
            let mut n = 2;
            while !seen.insert(id.clone()) {
                id = format!("{base}-{n}");
                n += 1;
            }
            ids.push((resource.path.clone(), id));
        }
        Self(ids)
    }

    fn get(&self, path: &str) -> Option<&str> {
        self.0.iter().find(|(p, _)| p == path).map(|(_, id)| id.as_str())
    }
}

fn generate_opf(container: &Container, identifier: &str, ids: &ManifestIds) -> String {
    let metadata = &container.metadata;
    let mut opf = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="book-id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
"#,
    );
    opf.push_str(&format!("    <dc:identifier id=\"book-id\">{}</dc:identifier>\n", escape_xml(identifier)));
    opf.push_str(&format!("    <dc:title>{}</dc:title>\n", escape_xml(&metadata.title)));
    opf.push_str(&format!(
        "    <dc:language>{}</dc:language>\n",
        escape_xml(metadata.language.as_deref().unwrap_or("und"))
    ));
    for author in &metadata.authors {
        opf.push_str(&format!("    <dc:creator>{}</dc:creator>\n", escape_xml(author)));
    }
    for (tag, value) in
        [("publisher", &metadata.publisher), ("description", &metadata.description), ("date", &metadata.date)]
    {
        if let Some(value) = value {
            opf.push_str(&format!("    <dc:{tag}>{}</dc:{tag}>\n", escape_xml(value)));
        }
    }
    opf.push_str(&format!("    <meta property=\"dcterms:modified\">{MODIFIED}</meta>\n"));
    let cover_id = metadata.cover.as_deref().and_then(|cover| ids.get(cover));
    if let Some(cover_id) = cover_id {
        opf.push_str(&format!("    <meta name=\"cover\" content=\"{cover_id}\"/>\n"));
    }
    opf.push_str("  </metadata>\n  <manifest>\n");
    opf.push_str(&format!(
        "    <item id=\"nav\" href=\"{NAV_PATH}\" media-type=\"{}\" properties=\"nav\"/>\n",
        media_type::XHTML
    ));
    opf.push_str(&format!("    <item id=\"ncx\" href=\"{NCX_PATH}\" media-type=\"{}\"/>\n", media_type::NCX));
    for resource in written_resources(container) {
        let Some(id) = ids.get(&resource.path) else { continue };
        let properties = match Some(id) == cover_id {
            true => " properties=\"cover-image\"",
            false => "",
        };
        opf.push_str(&format!(
            "    <item id=\"{id}\" href=\"{}\" media-type=\"{}\"{properties}/>\n",
            escape_xml(&path::encode(&resource.path)),
            escape_xml(&resource.media_type)
        ));
    }
    opf.push_str("  </manifest>\n  <spine toc=\"ncx\">\n");
    for item in &container.spine {
        if let Some(id) = ids.get(item) {
            opf.push_str(&format!("    <itemref idref=\"{id}\"/>\n"));
        }
    }
    opf.push_str("  </spine>\n</package>\n");
    opf
}

/// Navigation entries to write. An empty tree falls back to a single entry
/// for the first spine document so the navigation document stays valid.
fn nav_points(container: &Container) -> Vec<NavPoint> {
    match (container.nav.is_empty(), container.spine.first()) {
        (true, Some(first)) => vec![NavPoint::new(container.metadata.title.clone(), first.clone())],
        _ => container.nav.clone(),
    }
}

fn nav_href(href: &str) -> String {
    let (path, fragment) = path::split_fragment(href);
    match fragment {
        Some(fragment) => format!("{}#{}", path::encode(path), fragment),
        None => path::encode(path),
    }
}

fn generate_nav(container: &Container) -> String {
    fn list(points: &[NavPoint], indent: usize, out: &mut String) {
        let pad = "  ".repeat(indent);
        out.push_str(&format!("{pad}<ol>\n"));
        for point in points {
            out.push_str(&format!(
                "{pad}  <li><a href=\"{}\">{}</a>",
                escape_xml(&nav_href(&point.href)),
                escape_xml(&point.label)
            ));
            if !point.children.is_empty() {
                out.push('\n');
                list(&point.children, indent + 2, out);
                out.push_str(&format!("{pad}  "));
            }
            out.push_str("</li>\n");
        }
        out.push_str(&format!("{pad}</ol>\n"));
    }

    let mut nav = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>{}</title></head>
<body>
  <nav epub:type="toc" id="toc">
"#,
        escape_xml(&container.metadata.title)
    );
    list(&nav_points(container), 2, &mut nav);
    nav.push_str("  </nav>\n</body>\n</html>\n");
    nav
}

fn generate_ncx(container: &Container, identifier: &str) -> String {
    fn nav_map(points: &[NavPoint], depth: usize, order: &mut usize, out: &mut String) {
        let pad = "  ".repeat(depth + 1);
        for point in points {
            *order += 1;
            out.push_str(&format!("{pad}<navPoint id=\"np-{order}\" playOrder=\"{order}\">\n"));
            out.push_str(&format!("{pad}  <navLabel><text>{}</text></navLabel>\n", escape_xml(&point.label)));
            out.push_str(&format!("{pad}  <content src=\"{}\"/>\n", escape_xml(&nav_href(&point.href))));
            nav_map(&point.children, depth + 1, order, out);
            out.push_str(&format!("{pad}</navPoint>\n"));
        }
    }

    let mut ncx = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head><meta name="dtb:uid" content="{}"/></head>
  <docTitle><text>{}</text></docTitle>
  <navMap>
"#,
        escape_xml(identifier),
        escape_xml(&container.metadata.title)
    );
    let mut order = 0;
    nav_map(&nav_points(container), 1, &mut order, &mut ncx);
    ncx.push_str("  </navMap>\n</ncx>\n");
    ncx
}
