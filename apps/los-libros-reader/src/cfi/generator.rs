//! CFI Generator
//!
//! Generates CFI strings from document positions and text selections.

use super::parser;
use super::types::*;
use crate::dom::{Boundary, Document, NodeId, Range};

/// Builder for constructing CFIs programmatically
#[derive(Debug, Clone, Default)]
pub struct CfiBuilder {
    chapter: String,
    spine_pos: i32,
    spine_id: Option<String>,
    steps: Vec<CfiStep>,
    character_offset: Option<u32>,
    text_assertion: Option<String>,
}

impl CfiBuilder {
    /// Create a new CFI builder
    pub fn new() -> Self {
        Self {
            spine_pos: -1,
            ..Self::default()
        }
    }

    /// Set the chapter component from the spine position
    pub fn chapter(mut self, spine_node_index: usize, pos: usize, id: Option<&str>) -> Self {
        self.chapter = generate_chapter_component(spine_node_index, pos, id);
        self.spine_pos = i32::try_from(pos).unwrap_or(-1);
        self.spine_id = id.map(str::to_string);
        self
    }

    /// Set the chapter component from an existing base such as `/6/4[ch02]`
    pub fn chapter_base(mut self, base: &str) -> Self {
        let decoded = parser::parse(base);
        self.chapter = base.to_string();
        self.spine_pos = decoded.spine_pos;
        self.spine_id = decoded.spine_id;
        self
    }

    /// Add an element step (0-based index among element siblings)
    pub fn element(mut self, index: u32) -> Self {
        self.steps.push(CfiStep::element(index));
        self
    }

    /// Add an element step with ID assertion
    pub fn element_with_id(mut self, index: u32, id: impl Into<String>) -> Self {
        self.steps.push(CfiStep::element_with_id(index, id));
        self
    }

    /// Add a text node step (0-based index among text siblings)
    pub fn text_node(mut self, index: u32) -> Self {
        self.steps.push(CfiStep::text(index));
        self
    }

    /// Set the character offset within the terminal text node
    pub fn character_offset(mut self, offset: u32) -> Self {
        self.character_offset = Some(offset);
        self
    }

    /// Set the character offset with a text assertion
    pub fn character_offset_with_assertion(mut self, offset: u32, assertion: impl Into<String>) -> Self {
        self.character_offset = Some(offset);
        self.text_assertion = Some(assertion.into());
        self
    }

    /// Build the final CFI
    pub fn build(self) -> EpubCfi {
        let mut cfi = EpubCfi {
            raw: String::new(),
            chapter: self.chapter,
            spine_pos: self.spine_pos,
            spine_id: self.spine_id,
            steps: self.steps,
            character_offset: self.character_offset,
            text_assertion: self.text_assertion,
        };
        cfi.raw = cfi.to_string();
        cfi
    }
}

/// Chapter component for a spine item: `/{spine step}/{item step}[id]`
///
/// `spine_node_index` is the child-node position of `<spine>` inside
/// `<package>`, so `spine_node_index + 1` is its even step number.
pub fn generate_chapter_component(spine_node_index: usize, pos: usize, id: Option<&str>) -> String {
    let mut out = format!("/{}/{}", spine_node_index + 1, (pos + 1) * 2);
    if let Some(id) = id {
        out.push('[');
        out.push_str(&escape_assertion(id));
        out.push(']');
    }
    out
}

/// Encode decoded steps as a path, e.g. `/4/2[intro]/1`
pub fn generate_path_component(steps: &[CfiStep]) -> String {
    steps.iter().map(|s| s.to_string()).collect()
}

/// Element steps from below the root element down to `node` (inclusive)
fn element_steps(doc: &Document, node: NodeId) -> Vec<CfiStep> {
    doc.path_to(node)
        .into_iter()
        .filter(|&n| doc.is_element(n))
        .filter_map(|n| {
            let index = u32::try_from(doc.element_index(n)?).ok()?;
            Some(match doc.attribute(n, "id") {
                Some(id) if !id.is_empty() => CfiStep::element_with_id(index, id),
                _ => CfiStep::element(index),
            })
        })
        .collect()
}

/// Steps addressing a text node: its element ancestors plus the text step
fn text_steps(doc: &Document, node: NodeId) -> Vec<CfiStep> {
    let Some(parent) = doc.parent(node) else {
        return Vec::new();
    };
    let mut steps = element_steps(doc, parent);
    let index = doc
        .text_index(node)
        .and_then(|i| u32::try_from(i).ok())
        .unwrap_or(0);
    steps.push(CfiStep::text(index));
    steps
}

fn offset_u32(offset: usize) -> u32 {
    u32::try_from(offset).unwrap_or(u32::MAX)
}

/// CFI for the first text position of an element
pub fn generate_from_element(doc: &Document, node: NodeId, base: &str) -> String {
    let path = generate_path_component(&element_steps(doc, node));
    if path.is_empty() {
        return format!("epubcfi({}!/4/)", base);
    }
    format!("epubcfi({}!{}/1:0)", base, path)
}

/// CFI for a character offset inside a text node
pub fn generate_from_text_node(doc: &Document, node: NodeId, offset: usize, base: &str) -> String {
    format!(
        "epubcfi({}!{}:{})",
        base,
        generate_path_component(&text_steps(doc, node)),
        offset
    )
}

/// CFI for a range.
///
/// A collapsed range gives a single position. Otherwise the end is written
/// after a comma with the path it shares with the start removed; readers of
/// this form only use the start.
pub fn generate_from_range(doc: &Document, range: &Range, base: &str) -> String {
    let start = range.start.normalize(doc);
    let end = range.end.normalize(doc);

    if !doc.is_text(start.node) {
        let element = element_at(doc, start);
        return generate_from_element(doc, element, base);
    }

    let start_steps = text_steps(doc, start.node);
    let start_path = format!(
        "{}:{}",
        generate_path_component(&start_steps),
        offset_u32(start.offset)
    );

    if start == end || !doc.is_text(end.node) {
        return format!("epubcfi({}!{})", base, start_path);
    }

    let end_steps = text_steps(doc, end.node);
    let shared = start_steps
        .iter()
        .zip(end_steps.iter())
        .take_while(|(a, b)| a == b && !a.is_text())
        .count();
    format!(
        "epubcfi({}!{},{}:{})",
        base,
        start_path,
        generate_path_component(&end_steps[shared..]),
        offset_u32(end.offset)
    )
}

/// The element a boundary in an element container points at
fn element_at(doc: &Document, b: Boundary) -> NodeId {
    doc.child_nodes(b.node)
        .get(b.offset)
        .copied()
        .filter(|&n| doc.is_element(n))
        .unwrap_or(b.node)
}
