//! Container and OPF parsing
//!
//! The manifest and spine are deserialized with `quick_xml::de`. Metadata and
//! the position of `<spine>` under `<package>` come from the parsed node
//! tree, since both depend on document structure serde does not keep.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use tracing::{debug, warn};

use super::types::{BookMetadata, Container, ManifestItem, Package, SpineItem};
use crate::cfi::generate_chapter_component;
use crate::dom::{Document, NodeId};
use crate::error::{ReaderError, Result};

pub const CONTAINER_PATH: &str = "META-INF/container.xml";
pub const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";

#[derive(Debug, Deserialize)]
struct ContainerXml {
    rootfiles: RootFiles,
}

#[derive(Debug, Deserialize)]
struct RootFiles {
    #[serde(default)]
    rootfile: Vec<RootFile>,
}

#[derive(Debug, Deserialize)]
struct RootFile {
    #[serde(rename = "@full-path")]
    full_path: String,
}

#[derive(Debug, Deserialize)]
struct OpfPackage {
    manifest: OpfManifest,
    spine: OpfSpine,
}

#[derive(Debug, Deserialize)]
struct OpfManifest {
    #[serde(default)]
    item: Vec<OpfItem>,
}

#[derive(Debug, Deserialize)]
struct OpfItem {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@href", default)]
    href: String,
    #[serde(rename = "@media-type", default)]
    media_type: String,
    #[serde(rename = "@properties", default)]
    properties: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpfSpine {
    #[serde(rename = "@toc", default)]
    toc: Option<String>,
    #[serde(rename = "@page-progression-direction", default)]
    page_progression_direction: Option<String>,
    #[serde(default)]
    itemref: Vec<OpfItemRef>,
}

#[derive(Debug, Deserialize)]
struct OpfItemRef {
    #[serde(rename = "@idref")]
    idref: String,
    #[serde(rename = "@linear", default)]
    linear: Option<String>,
    #[serde(rename = "@properties", default)]
    properties: Option<String>,
}

fn split_properties(value: Option<&str>) -> Vec<String> {
    value
        .map(|p| p.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Directory part of a path, with a trailing `/` (empty at the root)
pub fn directory_of(path: &str) -> String {
    match path.rfind('/') {
        Some(i) => path[..=i].to_string(),
        None => String::new(),
    }
}

/// Resolve an href against a directory and percent-decode it.
///
/// `..` and `.` segments are collapsed; fragments are kept.
pub fn resolve_href(base: &str, href: &str) -> String {
    let (path, fragment) = match href.split_once('#') {
        Some((p, f)) => (p, Some(f)),
        None => (href, None),
    };
    let decoded = urlencoding::decode(path)
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| path.to_string());

    let joined = if decoded.starts_with('/') {
        decoded.trim_start_matches('/').to_string()
    } else {
        format!("{}{}", base, decoded)
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    let mut resolved = segments.join("/");
    if let Some(f) = fragment {
        resolved.push('#');
        resolved.push_str(f);
    }
    resolved
}

/// Read the OPF location from `META-INF/container.xml`
pub fn parse_container(xml: &str) -> Result<Container> {
    let container: ContainerXml = quick_xml::de::from_str(xml)?;
    let rootfile = container
        .rootfiles
        .rootfile
        .into_iter()
        .next()
        .ok_or_else(|| ReaderError::Package("No RootFile Found".into()))?;

    let package_path = urlencoding::decode(&rootfile.full_path)
        .map(|p| p.into_owned())
        .unwrap_or(rootfile.full_path);
    Ok(Container {
        base_path: directory_of(&package_path),
        package_path,
    })
}

fn child_element(doc: &Document, parent: NodeId, name: &str) -> Option<NodeId> {
    doc.element_children(parent)
        .find(|&c| doc.tag_name(c) == Some(name))
}

fn element_text(doc: &Document, parent: NodeId, name: &str) -> String {
    doc.find_element(parent, name)
        .map(|n| doc.text_content(n).trim().to_string())
        .unwrap_or_default()
}

fn parse_metadata(doc: &Document, metadata: NodeId) -> BookMetadata {
    let mut meta = BookMetadata {
        title: element_text(doc, metadata, "title"),
        creator: element_text(doc, metadata, "creator"),
        description: element_text(doc, metadata, "description"),
        pubdate: element_text(doc, metadata, "date"),
        publisher: element_text(doc, metadata, "publisher"),
        identifier: element_text(doc, metadata, "identifier"),
        language: element_text(doc, metadata, "language"),
        rights: element_text(doc, metadata, "rights"),
        ..BookMetadata::default()
    };

    for node in doc.elements_by_name(metadata, "meta") {
        let Some(property) = doc.attribute(node, "property") else {
            continue;
        };
        let value = doc.text_content(node).trim().to_string();
        match property {
            "dcterms:modified" => meta.modified_date = value,
            "rendition:layout" => meta.layout = value.parse().ok(),
            "rendition:orientation" => meta.orientation = value.parse().ok(),
            "rendition:spread" => meta.spread = value.parse().ok(),
            _ => {}
        }
    }
    meta
}

/// Parse an OPF package document found at `container.package_path`
pub fn parse_package(xml: &str, container: Container) -> Result<Package> {
    let opf: OpfPackage = quick_xml::de::from_str(xml)?;
    let doc = Document::parse(xml)?;

    let package = doc
        .document_element()
        .ok_or_else(|| ReaderError::Package("Package File Not Found".into()))?;
    let metadata_node = child_element(&doc, package, "metadata")
        .ok_or_else(|| ReaderError::Package("No Metadata Found".into()))?;
    let spine_node = child_element(&doc, package, "spine")
        .ok_or_else(|| ReaderError::Package("No Spine Found".into()))?;
    let spine_node_index = doc
        .child_nodes(package)
        .iter()
        .position(|&n| n == spine_node)
        .unwrap_or_default();

    let base = container.base_path.clone();

    let manifest: BTreeMap<String, ManifestItem> = opf
        .manifest
        .item
        .into_iter()
        .map(|item| {
            let manifest_item = ManifestItem {
                url: resolve_href(&base, &item.href),
                properties: split_properties(item.properties.as_deref()),
                id: item.id,
                href: item.href,
                media_type: item.media_type,
            };
            (manifest_item.id.clone(), manifest_item)
        })
        .collect();

    let nav_path = manifest
        .values()
        .find(|item| item.properties.iter().any(|p| p == "nav"))
        .map(|item| item.href.clone());

    let ncx_path = manifest
        .values()
        .find(|item| item.media_type == NCX_MEDIA_TYPE)
        .or_else(|| {
            let toc_id = opf.spine.toc.as_deref()?;
            manifest.get(toc_id)
        })
        .map(|item| item.href.clone());

    let mut metadata = parse_metadata(&doc, metadata_node);
    metadata.direction = opf
        .spine
        .page_progression_direction
        .as_deref()
        .and_then(|d| d.parse().ok());

    let cover_path = manifest
        .values()
        .find(|item| item.properties.iter().any(|p| p == "cover-image"))
        .or_else(|| {
            let cover_id = doc
                .elements_by_name(metadata_node, "meta")
                .into_iter()
                .find(|&m| doc.attribute(m, "name") == Some("cover"))
                .and_then(|m| doc.attribute(m, "content"))?;
            manifest.get(cover_id)
        })
        .map(|item| item.href.clone());

    let mut spine = Vec::with_capacity(opf.spine.itemref.len());
    let mut spine_index_by_url = HashMap::new();
    for (index, itemref) in opf.spine.itemref.into_iter().enumerate() {
        let item = manifest.get(&itemref.idref).ok_or_else(|| {
            ReaderError::Package(format!("Spine item {} is not in the manifest", itemref.idref))
        })?;

        spine_index_by_url.insert(item.href.clone(), index);
        spine_index_by_url.insert(item.url.clone(), index);

        spine.push(SpineItem {
            cfi_base: generate_chapter_component(spine_node_index, index, Some(&itemref.idref)),
            linear: itemref.linear.as_deref() != Some("no"),
            properties: split_properties(itemref.properties.as_deref()),
            href: item.href.clone(),
            url: item.url.clone(),
            id: itemref.idref,
            index,
        });
    }

    if spine.is_empty() {
        warn!(package = %container.package_path, "empty spine");
    }
    debug!(
        spine = spine.len(),
        manifest = manifest.len(),
        spine_node_index,
        "package parsed"
    );

    Ok(Package {
        container,
        metadata,
        manifest,
        spine,
        spine_node_index,
        spine_index_by_url,
        nav_path,
        ncx_path,
        cover_path,
        toc: Vec::new(),
        page_list: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{RenditionLayout, SpreadMode};
    use crate::render::Direction;

    const OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="uid">urn:uuid:1234</dc:identifier>
    <dc:title>A Tale</dc:title>
    <dc:creator>Ana Autor</dc:creator>
    <meta property="dcterms:modified">2024-01-01T00:00:00Z</meta>
    <dc:language>es</dc:language>
    <meta property="rendition:layout">reflowable</meta>
    <meta property="rendition:spread">none</meta>
    <meta name="cover" content="cover-img"/>
  </metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="cover-img" href="images/cover.jpg" media-type="image/jpeg"/>
    <item id="ch01" href="text/ch%2001.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch02" href="text/ch02.xhtml" media-type="application/xhtml+xml"/>
    <item id="notes" href="text/notes.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine toc="ncx" page-progression-direction="rtl">
    <itemref idref="ch01"/>
    <itemref idref="notes" linear="no"/>
    <itemref idref="ch02" properties="page-spread-left rendition:layout-pre-paginated"/>
  </spine>
</package>"#;

    fn container() -> Container {
        parse_container(
            r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#,
        )
        .unwrap()
    }

    #[test]
    fn test_container() {
        let c = container();
        assert_eq!(c.package_path, "OEBPS/content.opf");
        assert_eq!(c.base_path, "OEBPS/");
    }

    #[test]
    fn test_container_without_rootfile() {
        let err = parse_container("<container><rootfiles></rootfiles></container>").unwrap_err();
        assert!(matches!(err, ReaderError::Package(_)));
    }

    #[test]
    fn test_spine_and_cfi_base() {
        let package = parse_package(OPF, container()).unwrap();
        assert_eq!(package.spine_node_index, 5);
        assert_eq!(package.spine.len(), 3);

        let first = &package.spine[0];
        assert_eq!(first.cfi_base, "/6/2[ch01]");
        assert_eq!(first.url, "OEBPS/text/ch 01.xhtml");
        assert!(first.linear);
        assert!(!package.spine[1].linear);
        assert_eq!(package.spine[2].cfi_base, "/6/6[ch02]");
        assert_eq!(
            package.spine[2].properties,
            vec!["page-spread-left", "rendition:layout-pre-paginated"]
        );
    }

    #[test]
    fn test_metadata_and_paths() {
        let package = parse_package(OPF, container()).unwrap();
        let meta = &package.metadata;
        assert_eq!(meta.title, "A Tale");
        assert_eq!(meta.creator, "Ana Autor");
        assert_eq!(meta.identifier, "urn:uuid:1234");
        assert_eq!(meta.modified_date, "2024-01-01T00:00:00Z");
        assert_eq!(meta.layout, Some(RenditionLayout::Reflowable));
        assert_eq!(meta.spread, Some(SpreadMode::None));
        assert_eq!(meta.direction, Some(Direction::Rtl));

        assert_eq!(package.nav_path.as_deref(), Some("nav.xhtml"));
        assert_eq!(package.ncx_path.as_deref(), Some("toc.ncx"));
        assert_eq!(package.cover_path.as_deref(), Some("images/cover.jpg"));
    }

    #[test]
    fn test_spine_index_by_url() {
        let package = parse_package(OPF, container()).unwrap();
        assert_eq!(package.spine_index_by_url("text/ch02.xhtml"), Some(2));
        assert_eq!(package.spine_index_by_url("OEBPS/text/ch02.xhtml#sec"), Some(2));
        assert_eq!(package.spine_index_by_url("text/ch%2001.xhtml"), Some(0));
        assert_eq!(package.spine_index_by_url("text/missing.xhtml"), None);
    }

    #[test]
    fn test_missing_manifest_entry() {
        let opf = OPF.replace(r#"<itemref idref="ch01"/>"#, r#"<itemref idref="gone"/>"#);
        assert!(parse_package(&opf, container()).is_err());
    }

    #[test]
    fn test_resolve_href() {
        assert_eq!(resolve_href("OEBPS/", "text/a.xhtml"), "OEBPS/text/a.xhtml");
        assert_eq!(resolve_href("OEBPS/text/", "../images/b.png"), "OEBPS/images/b.png");
        assert_eq!(resolve_href("OEBPS/", "./a%20b.xhtml#x"), "OEBPS/a b.xhtml#x");
        assert_eq!(resolve_href("", "a.xhtml"), "a.xhtml");
        assert_eq!(directory_of("a/b/c.opf"), "a/b/");
        assert_eq!(directory_of("c.opf"), "");
    }
}
