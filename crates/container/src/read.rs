//! EPUB reader (OCF container, OPF package, EPUB 3 nav and EPUB 2 NCX).

use crate::error::{ErrorKind, Result};
use crate::model::{Container, Metadata, NavPoint, Resource, media_type};
use crate::path::{self, Reference};
use crate::xml::{self, attr, attr_exact, local_name};
use exn::{OptionExt, ResultExt};
use quick_xml::events::Event;
use std::io::{Cursor, Read, Seek};
use tracing::instrument;
use zip::ZipArchive;

const CONTAINER_XML: &str = "META-INF/container.xml";

struct ManifestItem {
    id: String,
    href: String,
    media_type: String,
    properties: Option<String>,
}
impl ManifestItem {
    fn has_property(&self, property: &str) -> bool {
        self.properties.as_ref().is_some_and(|props| props.split_ascii_whitespace().any(|p| p == property))
    }
}

struct Package {
    metadata: Metadata,
    manifest: Vec<ManifestItem>,
    spine_ids: Vec<String>,
    toc_id: Option<String>,
    epub2_cover_id: Option<String>,
}

/// Parse EPUB archive bytes into a [`Container`].
///
/// Resources listed in the manifest but missing from the archive are
/// skipped. Navigation comes from the EPUB 3 navigation document when it has
/// any entries, otherwise from the NCX.
#[instrument(level = "debug", skip_all, fields(bytes = bytes.len()))]
pub fn read(bytes: &[u8]) -> Result<Container> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).or_raise(|| ErrorKind::InvalidArchive)?;

    let container_xml = entry_text(&mut archive, CONTAINER_XML)?
        .ok_or_raise(|| ErrorKind::MissingEntry(CONTAINER_XML.to_string()))?;
    let opf_path = parse_container_xml(&container_xml)?;
    let opf = entry_text(&mut archive, &opf_path)?.ok_or_raise(|| ErrorKind::MissingEntry(opf_path.clone()))?;
    let package = parse_opf(&opf).or_raise(|| ErrorKind::MalformedXml(opf_path.clone()))?;
    let base = path::parent(&opf_path);

    let mut container = Container { metadata: package.metadata, ..Default::default() };
    // Manifest id -> container path, for the items that made it in.
    let mut by_id: Vec<(&str, String)> = Vec::with_capacity(package.manifest.len());
    for item in &package.manifest {
        // Hrefs are resolved as if from a document at the package root, so
        // the resulting path is relative to the package directory.
        let Reference::Local { path: resource_path, .. } = path::resolve("package.opf", &item.href) else {
            tracing::warn!(href = %item.href, "Skipping manifest item outside the package");
            continue;
        };
        if container.contains(&resource_path) {
            continue;
        }
        let entry = match base {
            "" => resource_path.clone(),
            dir => format!("{dir}/{resource_path}"),
        };
        let Some(data) = entry_bytes(&mut archive, &entry)? else {
            tracing::debug!(path = %entry, "Skipping manifest item missing from archive");
            continue;
        };
        by_id.push((item.id.as_str(), resource_path.clone()));
        container.resources.push(Resource::new(resource_path, item.media_type.clone(), data));
    }
    let path_of = |id: &str| by_id.iter().find(|(i, _)| *i == id).map(|(_, p)| p.clone());

    container.spine = package.spine_ids.iter().filter_map(|id| path_of(id)).collect();
    if container.spine.is_empty() {
        exn::bail!(ErrorKind::InvalidPackage("empty spine".to_string()));
    }

    let cover_item = package.manifest.iter().find(|item| item.has_property("cover-image"));
    container.metadata.cover = match (cover_item, &package.epub2_cover_id) {
        (Some(item), _) => path_of(&item.id),
        (None, Some(id)) => path_of(id),
        (None, None) => None,
    };

    let nav_doc = package.manifest.iter().find(|item| item.has_property("nav")).and_then(|item| path_of(&item.id));
    let ncx_doc = package
        .toc_id
        .as_deref()
        .and_then(path_of)
        .or_else(|| package.manifest.iter().find(|item| item.media_type == media_type::NCX).and_then(|i| path_of(&i.id)));

    if let Some(nav_path) = &nav_doc
        && let Some(resource) = container.resource(nav_path)
    {
        container.nav = parse_nav(&resource.text(), nav_path).or_raise(|| ErrorKind::MalformedXml(nav_path.clone()))?;
    }
    if container.nav.is_empty()
        && let Some(ncx_path) = &ncx_doc
        && let Some(resource) = container.resource(ncx_path)
    {
        container.nav = parse_ncx(&resource.text(), ncx_path).or_raise(|| ErrorKind::MalformedXml(ncx_path.clone()))?;
    }
    container.nav_documents = nav_doc.into_iter().chain(ncx_doc).collect();
    Ok(container)
}

fn entry_bytes<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Option<Vec<u8>>> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e).or_raise(|| ErrorKind::InvalidArchive),
    };
    let mut contents = Vec::new();
    file.read_to_end(&mut contents).or_raise(|| ErrorKind::InvalidArchive)?;
    Ok(Some(contents))
}

fn entry_text<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Option<String>> {
    Ok(entry_bytes(archive, name)?.map(|bytes| String::from_utf8_lossy(xml::strip_bom(&bytes)).into_owned()))
}

/// Find the package document path in `META-INF/container.xml`.
fn parse_container_xml(content: &str) -> Result<String> {
    let mut reader = xml::reader(content);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if local_name(e.name().as_ref()) == b"rootfile" => {
                if let Some(full_path) = attr(&e, b"full-path") {
                    return path::normalize(&full_path)
                        .ok_or_raise(|| ErrorKind::InvalidPackage(format!("rootfile path {full_path}")));
                }
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e).or_raise(|| ErrorKind::MalformedXml(CONTAINER_XML.to_string())),
            _ => {},
        }
    }
    exn::bail!(ErrorKind::InvalidPackage("no rootfile in container.xml".to_string()))
}

fn parse_opf(content: &str) -> std::result::Result<Package, quick_xml::Error> {
    let mut reader = xml::reader(content);
    let mut package = Package {
        metadata: Metadata::default(),
        manifest: Vec::new(),
        spine_ids: Vec::new(),
        toc_id: None,
        epub2_cover_id: None,
    };
    let mut in_metadata = false;
    let mut current: Option<Vec<u8>> = None;
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"metadata" => in_metadata = true,
                    field @ (b"title" | b"creator" | b"language" | b"identifier" | b"publisher" | b"description"
                    | b"date")
                        if in_metadata =>
                    {
                        current = Some(field.to_vec());
                        text.clear();
                    },
                    b"meta" if in_metadata => {
                        if attr(&e, b"name").as_deref() == Some("cover") {
                            package.epub2_cover_id = attr(&e, b"content");
                        }
                    },
                    b"item" => {
                        let (Some(id), Some(href)) = (attr(&e, b"id"), attr(&e, b"href")) else {
                            continue;
                        };
                        package.manifest.push(ManifestItem {
                            id,
                            href,
                            media_type: attr(&e, b"media-type").unwrap_or_default(),
                            properties: attr(&e, b"properties"),
                        });
                    },
                    b"spine" => package.toc_id = attr(&e, b"toc"),
                    b"itemref" => package.spine_ids.extend(attr(&e, b"idref")),
                    _ => {},
                }
            },
            Event::Text(e) if current.is_some() => text.push_str(&String::from_utf8_lossy(e.as_ref())),
            Event::GeneralRef(e) if current.is_some() => {
                if let Some(resolved) = xml::resolve_entity(&String::from_utf8_lossy(e.as_ref())) {
                    text.push_str(&resolved);
                }
            },
            Event::End(e) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if local == b"metadata" {
                    in_metadata = false;
                }
                if current.as_deref() == Some(local) {
                    let value = xml::collapse_whitespace(&text);
                    let metadata = &mut package.metadata;
                    match local {
                        b"title" if metadata.title.is_empty() => metadata.title = value,
                        b"creator" if !value.is_empty() => metadata.authors.push(value),
                        b"language" if metadata.language.is_none() => metadata.language = Some(value),
                        b"identifier" if metadata.identifier.is_none() => metadata.identifier = Some(value),
                        b"publisher" if metadata.publisher.is_none() => metadata.publisher = Some(value),
                        b"description" if metadata.description.is_none() => metadata.description = Some(value),
                        b"date" if metadata.date.is_none() => metadata.date = Some(value),
                        _ => {},
                    }
                    current = None;
                    text.clear();
                }
            },
            Event::Eof => break,
            _ => {},
        }
    }
    Ok(package)
}

struct Pending {
    label: String,
    href: Option<String>,
    children: Vec<NavPoint>,
}
impl Pending {
    fn new() -> Self {
        Self { label: String::new(), href: None, children: Vec::new() }
    }

    /// Finish the entry, resolving its href against the navigation document.
    /// Entries without a target borrow their first child's.
    fn finish(self, doc_path: &str) -> Option<NavPoint> {
        let href = match self.href.map(|href| path::resolve(doc_path, &href)) {
            Some(Reference::Local { path, fragment: Some(fragment) }) => format!("{path}#{fragment}"),
            Some(Reference::Local { path, fragment: None }) => path,
            _ => self.children.first()?.href.clone(),
        };
        Some(NavPoint { label: xml::collapse_whitespace(&self.label), href, children: self.children })
    }
}

/// Parse the table of contents out of an EPUB 3 navigation document.
///
/// The `<nav epub:type="toc">` element wins; without one the first `<nav>`
/// in the document is used.
fn parse_nav(content: &str, doc_path: &str) -> std::result::Result<Vec<NavPoint>, quick_xml::Error> {
    let mut reader = xml::reader(content);
    let mut navs: Vec<(bool, Vec<NavPoint>)> = Vec::new();
    let mut stack: Vec<Pending> = Vec::new();
    let mut is_toc = false;
    let mut label_depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"nav" => {
                        is_toc = attr_exact(&e, b"epub:type")
                            .or_else(|| attr(&e, b"type"))
                            .is_some_and(|t| t.split_ascii_whitespace().any(|t| t == "toc"));
                        stack = vec![Pending::new()];
                        label_depth = 0;
                    },
                    b"li" if !stack.is_empty() => stack.push(Pending::new()),
                    tag @ (b"a" | b"span") if stack.len() > 1 => {
                        if tag == b"a"
                            && label_depth == 0
                            && let Some(top) = stack.last_mut()
                        {
                            top.href = attr(&e, b"href");
                        }
                        label_depth += 1;
                    },
                    _ => {},
                }
            },
            Event::Text(e) if label_depth > 0 => {
                if let Some(top) = stack.last_mut() {
                    top.label.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            },
            Event::GeneralRef(e) if label_depth > 0 => {
                if let Some(top) = stack.last_mut()
                    && let Some(resolved) = xml::resolve_entity(&String::from_utf8_lossy(e.as_ref()))
                {
                    top.label.push_str(&resolved);
                }
            },
            Event::End(e) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"a" | b"span" if label_depth > 0 => label_depth -= 1,
                    b"li" if stack.len() > 1 => {
                        if let Some(pending) = stack.pop()
                            && let Some(point) = pending.finish(doc_path)
                            && let Some(parent) = stack.last_mut()
                        {
                            parent.children.push(point);
                        }
                    },
                    b"nav" if !stack.is_empty() => {
                        // Unclosed list items still count.
                        while stack.len() > 1 {
                            if let Some(pending) = stack.pop()
                                && let Some(point) = pending.finish(doc_path)
                                && let Some(parent) = stack.last_mut()
                            {
                                parent.children.push(point);
                            }
                        }
                        let root = std::mem::take(&mut stack);
                        navs.push((is_toc, root.into_iter().flat_map(|p| p.children).collect()));
                    },
                    _ => {},
                }
            },
            Event::Eof => break,
            _ => {},
        }
    }
    let index = navs.iter().position(|(toc, _)| *toc).unwrap_or(0);
    Ok(match index < navs.len() {
        true => navs.swap_remove(index).1,
        false => Vec::new(),
    })
}

/// Parse the `navMap` of an EPUB 2 NCX document.
fn parse_ncx(content: &str, doc_path: &str) -> std::result::Result<Vec<NavPoint>, quick_xml::Error> {
    let mut reader = xml::reader(content);
    let mut stack: Vec<Pending> = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"navMap" => stack = vec![Pending::new()],
                    b"navPoint" if !stack.is_empty() => stack.push(Pending::new()),
                    b"text" if stack.len() > 1 => in_text = true,
                    b"content" if stack.len() > 1 => {
                        if let Some(top) = stack.last_mut() {
                            top.href = attr(&e, b"src");
                        }
                    },
                    _ => {},
                }
            },
            Event::Text(e) if in_text => {
                if let Some(top) = stack.last_mut() {
                    top.label.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            },
            Event::GeneralRef(e) if in_text => {
                if let Some(top) = stack.last_mut()
                    && let Some(resolved) = xml::resolve_entity(&String::from_utf8_lossy(e.as_ref()))
                {
                    top.label.push_str(&resolved);
                }
            },
            Event::End(e) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"text" => in_text = false,
                    b"navPoint" if stack.len() > 1 => {
                        if let Some(pending) = stack.pop()
                            && let Some(point) = pending.finish(doc_path)
                            && let Some(parent) = stack.last_mut()
                        {
                            parent.children.push(point);
                        }
                    },
                    b"navMap" => break,
                    _ => {},
                }
            },
            Event::Eof => break,
            _ => {},
        }
    }
    Ok(stack.into_iter().next().map(|root| root.children).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_container_xml() {
        let container = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;
        assert_eq!(parse_container_xml(container).unwrap(), "OEBPS/content.opf");
        assert!(parse_container_xml("<container/>").is_err());
    }

    #[test]
    fn test_parse_opf() {
        let opf = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>The Complete   Trilogy</dc:title>
    <dc:creator>Ann Author</dc:creator>
    <dc:language>en</dc:language>
    <dc:identifier>urn:isbn:1234567890</dc:identifier>
    <dc:publisher>Salt &amp; Pepper Press</dc:publisher>
    <meta name="cover" content="cover"/>
  </metadata>
  <manifest>
    <item id="cover" href="images/cover.jpg" media-type="image/jpeg"/>
    <item id="b1" href="text/book1.xhtml" media-type="application/xhtml+xml"/>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="b1"/>
  </spine>
</package>"#;
        let package = parse_opf(opf).unwrap();
        assert_eq!(package.metadata.title, "The Complete Trilogy");
        assert_eq!(package.metadata.authors, vec!["Ann Author"]);
        assert_eq!(package.metadata.publisher.as_deref(), Some("Salt & Pepper Press"));
        assert_eq!(package.manifest.len(), 3);
        assert_eq!(package.spine_ids, vec!["b1"]);
        assert_eq!(package.toc_id.as_deref(), Some("ncx"));
        assert_eq!(package.epub2_cover_id.as_deref(), Some("cover"));
    }

    #[test]
    fn test_parse_nav_prefers_toc() {
        let nav = r#"<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<body>
  <nav epub:type="landmarks"><ol><li><a href="text/cover.xhtml">Cover</a></li></ol></nav>
  <nav epub:type="toc"><h1>Contents</h1>
    <ol>
      <li><a href="text/book1.xhtml">Book &amp; One</a>
        <ol><li><a href="text/book1.xhtml#c1"><span>Chapter</span> 1</a></li></ol>
      </li>
      <li><span>Book Two</span>
        <ol><li><a href="text/book2.xhtml">Chapter 1</a></li></ol>
      </li>
      <li><a href="../../outside.xhtml">Broken</a></li>
    </ol>
  </nav>
</body></html>"#;
        let points = parse_nav(nav, "nav/nav.xhtml").unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].label, "Book & One");
        assert_eq!(points[0].href, "text/book1.xhtml");
        assert_eq!(points[0].children[0].label, "Chapter 1");
        assert_eq!(points[0].children[0].href, "text/book1.xhtml#c1");
        assert_eq!(points[1].label, "Book Two");
        assert_eq!(points[1].href, "text/book2.xhtml");
    }

    #[test]
    fn test_parse_ncx_nested() {
        let ncx = r#"<?xml version="1.0"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <navMap>
    <navPoint id="part1" playOrder="1">
      <navLabel><text>Part I</text></navLabel>
      <content src="Text/part1.xhtml"/>
      <navPoint id="ch1" playOrder="2">
        <navLabel><text>Chapter 1</text></navLabel>
        <content src="Text/ch1.xhtml#start"/>
      </navPoint>
    </navPoint>
  </navMap>
</ncx>"#;
        let points = parse_ncx(ncx, "toc.ncx").unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].label, "Part I");
        assert_eq!(points[0].children[0].href, "Text/ch1.xhtml#start");
    }

    #[test]
    fn test_read_rejects_garbage() {
        let err = read(b"definitely not a zip").unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidArchive);
        assert!(err.is_parse_error());
    }
}
