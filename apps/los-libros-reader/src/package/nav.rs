//! Table of contents and page list
//!
//! EPUB 3 books carry them in the navigation document
//! (`<nav epub:type="toc">`, `<nav epub:type="page-list">`), EPUB 2 books in
//! the NCX (`navMap`, `pageList`). Both nest arbitrarily deep, so the trees
//! are walked with an explicit stack.

use tracing::debug;
use uuid::Uuid;

use super::parser::{directory_of, resolve_href};
use super::types::{Package, PageListItem, TocEntry};
use crate::dom::{Document, NodeId};
use crate::error::Result;

/// Where nav hrefs point, relative to the package directory
struct Target {
    href: String,
    spine_pos: Option<usize>,
    spine_cfi: Option<String>,
    spine_id: Option<String>,
}

fn target(package: &Package, doc_path: &str, href: &str) -> Target {
    let url = resolve_href(&directory_of(doc_path), href);
    let base = &package.container.base_path;
    let href = url.strip_prefix(base.as_str()).unwrap_or(&url).to_string();
    let spine_item = package
        .spine_index_by_url(&url)
        .and_then(|i| package.spine_item(i));
    Target {
        href,
        spine_pos: spine_item.map(|s| s.index),
        spine_cfi: spine_item.map(|s| s.cfi()),
        spine_id: spine_item.map(|s| s.id.clone()),
    }
}

fn autogen_id() -> String {
    format!("toc-{}", Uuid::new_v4())
}

fn element_children_named<'a>(
    doc: &'a Document,
    parent: NodeId,
    name: &'a str,
) -> impl Iterator<Item = NodeId> + 'a {
    doc.element_children(parent)
        .filter(move |&c| doc.tag_name(c) == Some(name))
}

/// `epub:type` is matched with or without its prefix
fn has_epub_type(doc: &Document, node: NodeId, value: &str) -> bool {
    doc.attribute(node, "epub:type")
        .or_else(|| doc.attribute(node, "type"))
        .map(|t| t.split_whitespace().any(|v| v == value))
        .unwrap_or(false)
}

fn find_nav(doc: &Document, kind: &str) -> Option<NodeId> {
    doc.elements_by_name(doc.root(), "nav")
        .into_iter()
        .find(|&n| has_epub_type(doc, n, kind))
}

struct FlatEntry {
    entry: TocEntry,
    parent: Option<usize>,
}

/// Turn parent-linked entries back into a tree, keeping document order
fn assemble(flat: Vec<FlatEntry>) -> Vec<TocEntry> {
    let parents: Vec<Option<usize>> = flat.iter().map(|f| f.parent).collect();
    let mut entries: Vec<Option<TocEntry>> = flat.into_iter().map(|f| Some(f.entry)).collect();

    // Children always come after their parent, so walking backwards moves
    // every subtree only once it is complete
    for i in (0..entries.len()).rev() {
        let Some(parent) = parents[i] else {
            continue;
        };
        if let Some(child) = entries[i].take() {
            if let Some(p) = entries[parent].as_mut() {
                p.subitems.insert(0, child);
            }
        }
    }
    entries.into_iter().flatten().collect()
}

/// Table of contents from an EPUB 3 navigation document at `nav_path`
pub fn parse_nav_toc(xml: &str, nav_path: &str, package: &Package) -> Result<Vec<TocEntry>> {
    let doc = Document::parse(xml)?;
    let Some(nav) = find_nav(&doc, "toc") else {
        debug!(nav_path, "no toc nav");
        return Ok(Vec::new());
    };
    let Some(list) = doc.find_element(nav, "ol") else {
        return Ok(Vec::new());
    };

    let mut flat: Vec<FlatEntry> = Vec::new();
    let mut stack = vec![(list, None)];
    while let Some((list, parent)) = stack.pop() {
        for li in element_children_named(&doc, list, "li") {
            let content = doc
                .element_children(li)
                .find(|&c| matches!(doc.tag_name(c), Some("a") | Some("span")));
            let href = content
                .and_then(|c| doc.attribute(c, "href"))
                .unwrap_or_default();
            let label = content
                .map(|c| doc.text_content(c).trim().to_string())
                .unwrap_or_default();
            let target = target(package, nav_path, href);

            let id = doc
                .attribute(li, "id")
                .map(str::to_string)
                .or(target.spine_id)
                .unwrap_or_else(autogen_id);

            let index = flat.len();
            flat.push(FlatEntry {
                entry: TocEntry {
                    id,
                    href: if href.is_empty() { String::new() } else { target.href },
                    label,
                    spine_pos: target.spine_pos,
                    spine_cfi: target.spine_cfi,
                    subitems: Vec::new(),
                },
                parent,
            });

            if let Some(sub) = element_children_named(&doc, li, "ol").next() {
                stack.push((sub, Some(index)));
            }
        }
    }
    Ok(assemble(flat))
}

/// Table of contents from an NCX `navMap`
pub fn parse_ncx_toc(xml: &str, ncx_path: &str, package: &Package) -> Result<Vec<TocEntry>> {
    let doc = Document::parse(xml)?;
    let Some(nav_map) = doc.find_element(doc.root(), "navMap") else {
        return Ok(Vec::new());
    };

    let mut flat: Vec<FlatEntry> = Vec::new();
    let mut stack = vec![(nav_map, None)];
    while let Some((parent_node, parent)) = stack.pop() {
        for point in element_children_named(&doc, parent_node, "navPoint") {
            let src = element_children_named(&doc, point, "content")
                .next()
                .and_then(|c| doc.attribute(c, "src"))
                .unwrap_or_default();
            let label = element_children_named(&doc, point, "navLabel")
                .next()
                .map(|l| doc.text_content(l).trim().to_string())
                .unwrap_or_default();
            let target = target(package, ncx_path, src);

            let id = doc
                .attribute(point, "id")
                .map(str::to_string)
                .or(target.spine_id)
                .unwrap_or_else(autogen_id);

            let index = flat.len();
            flat.push(FlatEntry {
                entry: TocEntry {
                    id,
                    href: target.href,
                    label,
                    spine_pos: target.spine_pos,
                    spine_cfi: target.spine_cfi,
                    subitems: Vec::new(),
                },
                parent,
            });
            stack.push((point, Some(index)));
        }
    }
    Ok(assemble(flat))
}

/// Leading digits of a page label
fn page_number(label: &str) -> Option<u32> {
    let digits: String = label
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn page_list_item(package: &Package, doc_path: &str, href: &str, label: &str) -> Option<PageListItem> {
    let Some(page) = page_number(label) else {
        debug!(label, "page label is not a number, skipped");
        return None;
    };

    if href.contains("epubcfi") {
        let cfi = href.split_once('#').map(|(_, cfi)| cfi.to_string());
        return Some(PageListItem {
            cfi,
            href: Some(href.to_string()),
            page_label: Some(label.to_string()),
            page,
        });
    }

    Some(PageListItem {
        cfi: None,
        href: Some(target(package, doc_path, href).href),
        page_label: Some(label.to_string()),
        page,
    })
}

/// Page list from an EPUB 3 navigation document
pub fn parse_nav_page_list(xml: &str, nav_path: &str, package: &Package) -> Result<Vec<PageListItem>> {
    let doc = Document::parse(xml)?;
    let Some(nav) = find_nav(&doc, "page-list") else {
        return Ok(Vec::new());
    };

    let items = doc
        .elements_by_name(nav, "li")
        .into_iter()
        .filter_map(|li| {
            let a = doc.find_element(li, "a")?;
            let href = doc.attribute(a, "href").unwrap_or_default();
            let label = doc.text_content(a);
            page_list_item(package, nav_path, href, label.trim())
        })
        .collect();
    Ok(items)
}

/// Page list from an NCX `pageList`
pub fn parse_ncx_page_list(xml: &str, ncx_path: &str, package: &Package) -> Result<Vec<PageListItem>> {
    let doc = Document::parse(xml)?;
    let Some(list) = doc.find_element(doc.root(), "pageList") else {
        return Ok(Vec::new());
    };

    let items = element_children_named(&doc, list, "pageTarget")
        .filter_map(|target| {
            let src = element_children_named(&doc, target, "content")
                .next()
                .and_then(|c| doc.attribute(c, "src"))
                .unwrap_or_default();
            let label = element_children_named(&doc, target, "navLabel")
                .next()
                .map(|l| doc.text_content(l).trim().to_string())
                .or_else(|| doc.attribute(target, "value").map(str::to_string))
                .unwrap_or_default();
            page_list_item(package, ncx_path, src, &label)
        })
        .collect();
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{parse_container, parse_package};

    const CONTAINER: &str = r#"<container><rootfiles><rootfile full-path="OEBPS/content.opf"/></rootfiles></container>"#;

    const OPF: &str = r#"<package>
  <metadata><title>T</title></metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="ch01" href="text/ch01.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch02" href="text/ch02.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine>
    <itemref idref="ch01"/>
    <itemref idref="ch02"/>
  </spine>
</package>"#;

    const NAV: &str = r#"<html xmlns:epub="http://www.idpf.org/2007/ops"><body>
<nav epub:type="toc"><ol>
  <li><a href="text/ch01.xhtml">One</a>
    <ol>
      <li id="s1"><a href="text/ch01.xhtml#s1">One, first</a></li>
      <li><span>Heading only</span></li>
    </ol>
  </li>
  <li><a href="text/ch02.xhtml">Two</a></li>
</ol></nav>
<nav epub:type="page-list"><ol>
  <li><a href="text/ch01.xhtml#p1">1</a></li>
  <li><a href="text/ch02.xhtml#p2">2</a></li>
  <li><a href="text/ch02.xhtml#px">xii</a></li>
  <li><a href="content.opf#epubcfi(/6/4[ch02]!/4/2/1:0)">3</a></li>
</ol></nav>
</body></html>"#;

    const NCX: &str = r#"<ncx><navMap>
  <navPoint id="np1"><navLabel><text>One</text></navLabel><content src="text/ch01.xhtml"/>
    <navPoint id="np2"><navLabel><text>Deeper</text></navLabel><content src="text/ch01.xhtml#d"/></navPoint>
  </navPoint>
  <navPoint id="np3"><navLabel><text>Two</text></navLabel><content src="text/ch02.xhtml"/></navPoint>
</navMap>
<pageList><pageTarget value="7" type="normal"><navLabel><text>7</text></navLabel><content src="text/ch02.xhtml#p7"/></pageTarget></pageList>
</ncx>"#;

    fn package() -> Package {
        parse_package(OPF, parse_container(CONTAINER).unwrap()).unwrap()
    }

    #[test]
    fn test_nav_toc_tree() {
        let package = package();
        let toc = parse_nav_toc(NAV, "OEBPS/nav.xhtml", &package).unwrap();

        assert_eq!(toc.len(), 2);
        assert_eq!(toc[0].label, "One");
        assert_eq!(toc[0].id, "ch01");
        assert_eq!(toc[0].spine_pos, Some(0));
        assert_eq!(toc[0].spine_cfi.as_deref(), Some("epubcfi(/6/2[ch01])"));
        assert_eq!(toc[0].subitems.len(), 2);
        assert_eq!(toc[0].subitems[0].id, "s1");
        assert_eq!(toc[0].subitems[0].href, "text/ch01.xhtml#s1");
        assert_eq!(toc[0].subitems[1].label, "Heading only");
        assert!(toc[0].subitems[1].id.starts_with("toc-"));
        assert_eq!(toc[1].spine_pos, Some(1));
    }

    #[test]
    fn test_ncx_toc_tree() {
        let package = package();
        let toc = parse_ncx_toc(NCX, "OEBPS/toc.ncx", &package).unwrap();
        assert_eq!(toc.len(), 2);
        assert_eq!(toc[0].id, "np1");
        assert_eq!(toc[0].subitems[0].label, "Deeper");
        assert_eq!(toc[1].label, "Two");
    }

    #[test]
    fn test_nav_page_list() {
        let package = package();
        let pages = parse_nav_page_list(NAV, "OEBPS/nav.xhtml", &package).unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].page, 1);
        assert_eq!(pages[0].cfi, None);
        assert_eq!(pages[0].href.as_deref(), Some("text/ch01.xhtml#p1"));
        assert_eq!(pages[2].cfi.as_deref(), Some("epubcfi(/6/4[ch02]!/4/2/1:0)"));
    }

    #[test]
    fn test_ncx_page_list() {
        let package = package();
        let pages = parse_ncx_page_list(NCX, "OEBPS/toc.ncx", &package).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page, 7);
        assert_eq!(pages[0].href.as_deref(), Some("text/ch02.xhtml#p7"));
    }

    #[test]
    fn test_page_number() {
        assert_eq!(page_number("12"), Some(12));
        assert_eq!(page_number(" 3a"), Some(3));
        assert_eq!(page_number("iv"), None);
    }
}
