//! CFI resolution against a loaded content document

use tracing::error;
use uuid::Uuid;

use super::types::*;
use crate::dom::{Document, NodeId, Range};

pub const MARKER_CLASS: &str = "EPUBJS-CFI-MARKER";
pub const SPLIT_CLASS: &str = "EPUBJS-CFI-SPLIT";

/// Walk the element steps of a CFI.
///
/// Returns the terminal element, or for a text terminal the element that
/// holds the text. A CFI without steps resolves to `<body>`.
pub fn find_parent(cfi: &EpubCfi, doc: &Document) -> Option<NodeId> {
    if cfi.steps.is_empty() {
        return doc.body();
    }

    let mut current = doc.document_element()?;
    for step in cfi.steps.iter().filter(|s| !s.is_text()) {
        let by_id = step
            .id
            .as_deref()
            .and_then(|id| doc.get_element_by_id(id));
        let next = by_id.or_else(|| doc.nth_element_child(current, step.index as usize));
        match next {
            Some(node) => current = node,
            None => {
                error!(cfi = %cfi.raw, step = step.encoded(), "No element for CFI step");
                return None;
            }
        }
    }
    Some(current)
}

/// The text node a text-terminal CFI points into
pub fn find_text_node(cfi: &EpubCfi, doc: &Document) -> Option<NodeId> {
    let terminal = cfi.terminal().filter(|s| s.is_text())?;
    let parent = find_parent(cfi, doc)?;
    doc.nth_text_child(parent, terminal.index as usize)
}

/// Build a range for a CFI.
///
/// Text terminals give the text from the offset to the end of the node, the
/// offset clamped to the last character. Element terminals select the node.
pub fn range_from_cfi(cfi: &EpubCfi, doc: &Document) -> Option<Range> {
    let parent = find_parent(cfi, doc)?;

    if cfi.ends_in_text() {
        if let Some(text) = find_text_node(cfi, doc) {
            let len = doc.text_len(text);
            let mut offset = cfi.character_offset.unwrap_or(0) as usize;
            if offset >= len {
                offset = len.saturating_sub(1);
            }
            return Some(Range::text(text, offset, len));
        }
    }

    Range::select_node(doc, parent).or_else(|| Some(Range::select_node_contents(doc, parent)))
}

/// Insert a marker span at the CFI position and return it.
///
/// A position inside a text node splits the node around the marker.
pub fn add_marker(cfi: &EpubCfi, doc: &mut Document) -> Option<NodeId> {
    let parent = find_parent(cfi, doc)?;
    let marker = doc.create_element("span");
    doc.set_attribute(marker, "id", &format!("{}:{}", MARKER_CLASS, Uuid::new_v4()));
    doc.set_attribute(marker, "class", MARKER_CLASS);

    let text = if cfi.ends_in_text() {
        find_text_node(cfi, doc)
    } else {
        None
    };

    let inserted = match text {
        Some(text) => {
            let offset = cfi.character_offset.unwrap_or(0) as usize;
            let len = doc.text_len(text);
            if offset == 0 {
                doc.insert_before(parent, marker, Some(text))
            } else if offset >= len {
                let after = doc.next_sibling(text);
                doc.insert_before(parent, marker, after)
            } else {
                let tail = doc.split_text(text, offset);
                doc.set_attribute(marker, "class", &format!("{} {}", MARKER_CLASS, SPLIT_CLASS));
                doc.insert_before(parent, marker, tail)
            }
        }
        None => {
            let first = doc.child_nodes(parent).first().copied();
            doc.insert_before(parent, marker, first)
        }
    };

    inserted.then_some(marker)
}

/// Remove a marker, joining text that was split to make room for it
pub fn remove_marker(doc: &mut Document, marker: NodeId) {
    if doc.has_class(marker, SPLIT_CLASS) {
        let prev = doc.previous_sibling(marker).filter(|&n| doc.is_text(n));
        let next = doc.next_sibling(marker).filter(|&n| doc.is_text(n));
        if let (Some(prev), Some(next)) = (prev, next) {
            let tail = doc.text(next).unwrap_or_default().to_string();
            doc.append_text(prev, &tail);
            doc.remove(next);
        }
    }
    doc.remove(marker);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfi::{generate_from_element, generate_from_text_node, parse};

    const BASE: &str = "/6/2[ch01]";

    fn sample() -> Document {
        Document::parse(
            r#"<html><head></head><body><p>First paragraph</p><section id="s"><p>Alpha <em>beta</em> gamma</p></section></body></html>"#,
        )
        .unwrap()
    }

    #[test]
    fn test_roundtrip_text_node() {
        let doc = sample();
        let section = doc.get_element_by_id("s").unwrap();
        let p = doc.nth_element_child(section, 0).unwrap();
        let gamma = doc.nth_text_child(p, 1).unwrap();

        let cfi = parse(&generate_from_text_node(&doc, gamma, 2, BASE));
        assert_eq!(find_parent(&cfi, &doc), Some(p));
        assert_eq!(find_text_node(&cfi, &doc), Some(gamma));

        let range = range_from_cfi(&cfi, &doc).unwrap();
        assert_eq!(range, Range::text(gamma, 2, doc.text_len(gamma)));
    }

    #[test]
    fn test_roundtrip_element() {
        let doc = sample();
        let section = doc.get_element_by_id("s").unwrap();
        let cfi = parse(&generate_from_element(&doc, section, BASE));
        assert_eq!(find_parent(&cfi, &doc), Some(section));
    }

    #[test]
    fn test_id_assertion_beats_index() {
        let doc = sample();
        let section = doc.get_element_by_id("s").unwrap();
        // Wrong index, right id
        let cfi = parse("epubcfi(/6/2!/4/8[s])");
        assert_eq!(find_parent(&cfi, &doc), Some(section));
    }

    #[test]
    fn test_empty_steps_resolve_to_body() {
        let doc = sample();
        let cfi = parse("epubcfi(/6/2)");
        assert_eq!(find_parent(&cfi, &doc), doc.body());
    }

    #[test]
    fn test_miss_returns_none() {
        let doc = sample();
        assert_eq!(find_parent(&parse("epubcfi(/6/2!/4/20/2)"), &doc), None);
        assert!(range_from_cfi(&parse("epubcfi(/6/2!/4/20/2)"), &doc).is_none());
    }

    #[test]
    fn test_offset_clamped() {
        let doc = sample();
        let cfi = parse("epubcfi(/6/2!/4/2/1:500)");
        let range = range_from_cfi(&cfi, &doc).unwrap();
        let len = "First paragraph".len();
        assert_eq!(range.start.offset, len - 1);
        assert_eq!(range.end.offset, len);
    }

    #[test]
    fn test_marker_split_and_rejoin() {
        let mut doc = sample();
        let body = doc.body().unwrap();
        let p = doc.nth_element_child(body, 0).unwrap();
        let cfi = parse("epubcfi(/6/2!/4/2/1:5)");

        let marker = add_marker(&cfi, &mut doc).unwrap();
        assert!(doc.has_class(marker, MARKER_CLASS));
        assert!(doc.has_class(marker, SPLIT_CLASS));
        assert!(doc
            .attribute(marker, "id")
            .unwrap()
            .starts_with("EPUBJS-CFI-MARKER:"));
        assert_eq!(doc.child_nodes(p).len(), 3);
        assert_eq!(doc.text(doc.child_nodes(p)[0]), Some("First"));

        remove_marker(&mut doc, marker);
        assert_eq!(doc.child_nodes(p).len(), 1);
        assert_eq!(doc.text_content(p), "First paragraph");
    }

    #[test]
    fn test_marker_at_element() {
        let mut doc = sample();
        let section = doc.get_element_by_id("s").unwrap();
        let cfi = parse("epubcfi(/6/2!/4/4[s])");
        let marker = add_marker(&cfi, &mut doc).unwrap();
        assert_eq!(doc.child_nodes(section)[0], marker);
        assert!(!doc.has_class(marker, SPLIT_CLASS));
        remove_marker(&mut doc, marker);
        assert_eq!(doc.child_nodes(section).len(), 1);
    }
}
