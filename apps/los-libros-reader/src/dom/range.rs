//! DOM ranges over a [`Document`]

use super::{Document, NodeId};

/// A point in the tree: a text node and a character offset, or an element
/// and a child index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    pub node: NodeId,
    pub offset: usize,
}

impl Boundary {
    pub fn new(node: NodeId, offset: usize) -> Self {
        Self { node, offset }
    }

    /// Move an element boundary onto the nearest text position at or after
    /// it, so it can be written as a text step.
    pub fn normalize(self, doc: &Document) -> Boundary {
        if doc.is_text(self.node) {
            return self;
        }
        let children = doc.child_nodes(self.node);
        if let Some(&child) = children.get(self.offset) {
            if doc.is_text(child) {
                return Boundary::new(child, 0);
            }
            let first_text = std::iter::once(child)
                .chain(doc.descendants(child))
                .find(|&n| doc.is_text(n));
            if let Some(text) = first_text {
                return Boundary::new(text, 0);
            }
        } else if let Some(last_text) = doc.descendants(self.node).filter(|&n| doc.is_text(n)).last() {
            return Boundary::new(last_text, doc.text_len(last_text));
        }
        self
    }
}

/// A start/end pair of boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: Boundary,
    pub end: Boundary,
}

impl Range {
    pub fn new(start: Boundary, end: Boundary) -> Self {
        Self { start, end }
    }

    /// A range over characters `start..end` of one text node
    pub fn text(node: NodeId, start: usize, end: usize) -> Self {
        Self::new(Boundary::new(node, start), Boundary::new(node, end))
    }

    pub fn collapsed_at(node: NodeId, offset: usize) -> Self {
        Self::text(node, offset, offset)
    }

    /// Range around a node, expressed in its parent
    pub fn select_node(doc: &Document, node: NodeId) -> Option<Self> {
        let parent = doc.parent(node)?;
        let at = doc.child_nodes(parent).iter().position(|&c| c == node)?;
        Some(Self::new(Boundary::new(parent, at), Boundary::new(parent, at + 1)))
    }

    /// Range over a node's contents
    pub fn select_node_contents(doc: &Document, node: NodeId) -> Self {
        let len = if doc.is_text(node) {
            doc.text_len(node)
        } else {
            doc.child_nodes(node).len()
        };
        Self::new(Boundary::new(node, 0), Boundary::new(node, len))
    }

    pub fn collapsed(&self) -> bool {
        self.start == self.end
    }

    /// Collapse to the start (`true`) or end boundary
    pub fn collapse(&self, to_start: bool) -> Self {
        let b = if to_start { self.start } else { self.end };
        Self::new(b, b)
    }

    /// Text segments covered by the range in document order, as
    /// `(text node, start char, end char)`.
    pub fn text_segments(&self, doc: &Document) -> Vec<(NodeId, usize, usize)> {
        if self.start.node == self.end.node && doc.is_text(self.start.node) {
            return vec![(self.start.node, self.start.offset, self.end.offset)];
        }

        let order = doc.document_order();
        let (Some(start), Some(end)) = (
            position_key(doc, &order, self.start),
            position_key(doc, &order, self.end),
        ) else {
            return Vec::new();
        };

        doc.descendants(doc.root())
            .filter(|&n| doc.is_text(n))
            .filter_map(|n| {
                let k = order[n.index()]?;
                let len = doc.text_len(n);
                let s = match start.0.cmp(&k) {
                    std::cmp::Ordering::Less => 0,
                    std::cmp::Ordering::Equal => start.1,
                    std::cmp::Ordering::Greater => return None,
                };
                let e = match end.0.cmp(&k) {
                    std::cmp::Ordering::Greater => len,
                    std::cmp::Ordering::Equal => end.1,
                    std::cmp::Ordering::Less => return None,
                };
                (s < e).then_some((n, s, e))
            })
            .collect()
    }
}

/// Comparable `(pre-order index, char offset)` key for a boundary
fn position_key(doc: &Document, order: &[Option<usize>], b: Boundary) -> Option<(usize, usize)> {
    if doc.is_text(b.node) {
        return Some((order[b.node.index()]?, b.offset));
    }
    let children = doc.child_nodes(b.node);
    match children.get(b.offset) {
        Some(&child) => Some((order[child.index()]?, 0)),
        None => {
            // After the last descendant
            let last = doc.descendants(b.node).last().unwrap_or(b.node);
            Some((order[last.index()]? + 1, 0))
        }
    }
}
