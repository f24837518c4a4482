//! XHTML to [`Document`] conversion using quick-xml events

use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;

use super::{Document, ElementData, NodeId, NodeKind};
use crate::error::Result;

/// Decode character references in a text run or attribute value.
///
/// The HTML5 entity table comes from quick-xml's `escape-html` feature. An
/// unknown or unterminated reference is kept as written, the rest of the run
/// is still decoded.
pub fn decode_entities(raw: &str) -> String {
    if let Ok(text) = unescape(raw) {
        return text.into_owned();
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let end = tail[1..]
            .find(|c: char| c == ';' || c == '&')
            .map(|i| i + 1)
            .filter(|&i| tail.as_bytes()[i] == b';');
        match end {
            Some(end) => {
                let reference = &tail[..=end];
                match unescape(reference) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => {
                        debug!(reference, "unknown character reference");
                        out.push_str(reference);
                    }
                }
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

pub(super) fn parse(xml: &str) -> Result<Document> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);
    reader.check_end_names(false);

    let mut doc = Document::new();
    let mut stack: Vec<NodeId> = vec![doc.root()];
    // Set while the last event added text, so a following CDATA section
    // joins the same text node. Comments end the run.
    let mut in_text = false;

    loop {
        let event = reader.read_event()?;
        let was_text = std::mem::replace(&mut in_text, false);
        match event {
            Event::Start(e) => {
                let id = push_element(&mut doc, &stack, &e)?;
                stack.push(id);
            }
            Event::Empty(e) => {
                push_element(&mut doc, &stack, &e)?;
            }
            Event::End(_) => {
                if stack.len() > 1 {
                    stack.pop();
                }
            }
            Event::Text(e) => {
                let text = decode_entities(&String::from_utf8_lossy(&e));
                in_text = push_text(&mut doc, &stack, &text, was_text);
            }
            Event::CData(e) => {
                let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                in_text = push_text(&mut doc, &stack, &text, was_text);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(doc)
}

fn current(doc: &Document, stack: &[NodeId]) -> NodeId {
    stack.last().copied().unwrap_or_else(|| doc.root())
}

fn push_element(doc: &mut Document, stack: &[NodeId], e: &BytesStart<'_>) -> Result<NodeId> {
    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::InvalidAttr)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = decode_entities(&String::from_utf8_lossy(&attr.value));
        attributes.push((key, value));
    }

    let id = doc.push_node(NodeKind::Element(ElementData { name, attributes }));
    doc.append_child(current(doc, stack), id);
    Ok(id)
}

/// Returns whether a text node was added or extended
fn push_text(doc: &mut Document, stack: &[NodeId], text: &str, join: bool) -> bool {
    let parent = current(doc, stack);
    if parent == doc.root() && text.trim().is_empty() {
        return false;
    }
    if join {
        if let Some(&last) = doc.child_nodes(parent).last() {
            if doc.is_text(last) {
                doc.append_text(last, text);
                return true;
            }
        }
    }
    let id = doc.create_text(text);
    doc.append_child(parent, id);
    true
}
