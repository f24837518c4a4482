//! Content document tree
//!
//! Chapter XHTML is parsed into an arena of nodes addressed by [`NodeId`].
//! The arena gives the CFI codec and the page mapper the DOM operations they
//! need (children, element/text sibling indices, id lookup, text splitting)
//! without a browser.
//!
//! Nodes are only ever attached through [`Document::insert_before`] and
//! [`Document::append_child`], which refuse to create cycles, so every
//! traversal terminates.

mod parser;
mod range;

pub use parser::decode_entities;
pub use range::{Boundary, Range};

use crate::error::Result;

/// Handle to a node in a [`Document`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the node in the arena
    pub fn index(self) -> usize {
        self.0
    }
}

/// Node payload
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Document,
    Element(ElementData),
    Text(String),
}

/// Element name and attributes
#[derive(Debug, Clone, PartialEq)]
pub struct ElementData {
    /// Local name (namespace prefix stripped)
    pub name: String,
    /// Attributes in source order, keys as written (`epub:type`, `xml:lang`)
    pub attributes: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct NodeData {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: NodeKind,
}

/// A parsed content document
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<NodeData>,
    /// Slots of removed nodes, reused by the next created node
    free: Vec<NodeId>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document containing only the document node
    pub fn new() -> Self {
        Self {
            nodes: vec![NodeData {
                parent: None,
                children: Vec::new(),
                kind: NodeKind::Document,
            }],
            free: Vec::new(),
        }
    }

    /// Parse an XHTML or XML string
    pub fn parse(xml: &str) -> Result<Self> {
        parser::parse(xml)
    }

    /// The document node
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// The root element (`<html>` for chapters)
    pub fn document_element(&self) -> Option<NodeId> {
        self.element_children(self.root()).next()
    }

    /// The `<body>` element
    pub fn body(&self) -> Option<NodeId> {
        let html = self.document_element()?;
        self.element_children(html)
            .find(|&id| self.tag_name(id) == Some("body"))
            .or_else(|| self.find_element(html, "body"))
    }

    /// The `<head>` element
    pub fn head(&self) -> Option<NodeId> {
        let html = self.document_element()?;
        self.element_children(html)
            .find(|&id| self.tag_name(id) == Some("head"))
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Element(_))
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Text(_))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// All child nodes, text and elements
    pub fn child_nodes(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Element children only
    pub fn element_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.child_nodes(id)
            .iter()
            .copied()
            .filter(move |&c| self.is_element(c))
    }

    /// Text children only
    pub fn text_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.child_nodes(id)
            .iter()
            .copied()
            .filter(move |&c| self.is_text(c))
    }

    pub fn nth_element_child(&self, id: NodeId, n: usize) -> Option<NodeId> {
        self.element_children(id).nth(n)
    }

    pub fn nth_text_child(&self, id: NodeId, n: usize) -> Option<NodeId> {
        self.text_children(id).nth(n)
    }

    /// Index among the parent's element children
    pub fn element_index(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.element_children(parent).position(|c| c == id)
    }

    /// Index among the parent's text children
    pub fn text_index(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.text_children(parent).position(|c| c == id)
    }

    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            NodeKind::Element(el) => Some(el.name.as_str()),
            _ => None,
        }
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        match self.kind(id) {
            NodeKind::Element(el) => el
                .attributes
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) {
        if let NodeKind::Element(el) = &mut self.nodes[id.0].kind {
            match el.attributes.iter_mut().find(|(k, _)| k == name) {
                Some((_, v)) => *v = value.to_string(),
                None => el.attributes.push((name.to_string(), value.to_string())),
            }
        }
    }

    /// Whitespace separated `class` tokens
    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.attribute(id, "class")
            .map(|c| c.split_whitespace().any(|t| t == class))
            .unwrap_or(false)
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            NodeKind::Text(t) => Some(t.as_str()),
            _ => None,
        }
    }

    /// Length of a text node in characters
    pub fn text_len(&self, id: NodeId) -> usize {
        self.text(id).map(|t| t.chars().count()).unwrap_or(0)
    }

    /// Concatenated text of all descendant text nodes
    pub fn text_content(&self, id: NodeId) -> String {
        if let Some(text) = self.text(id) {
            return text.to_string();
        }
        self.descendants(id)
            .filter_map(|d| self.text(d))
            .collect()
    }

    /// Pre-order traversal of every node below `id` (excluding `id`)
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        let mut stack: Vec<NodeId> = self.child_nodes(id).to_vec();
        stack.reverse();
        Descendants { doc: self, stack }
    }

    /// Ancestors from the parent upwards, ending at the document node
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&n| self.parent(n))
    }

    pub fn get_element_by_id(&self, value: &str) -> Option<NodeId> {
        self.descendants(self.root())
            .find(|&n| self.attribute(n, "id") == Some(value))
    }

    /// First descendant element of `from` with the given local name
    pub fn find_element(&self, from: NodeId, name: &str) -> Option<NodeId> {
        self.descendants(from)
            .find(|&n| self.tag_name(n) == Some(name))
    }

    /// All descendant elements of `from` with the given local name
    pub fn elements_by_name(&self, from: NodeId, name: &str) -> Vec<NodeId> {
        self.descendants(from)
            .filter(|&n| self.tag_name(n) == Some(name))
            .collect()
    }

    /// Element ancestors between a node and the document element, outermost
    /// first. The document element itself is not included.
    pub fn path_to(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            match self.parent(node) {
                Some(parent) if parent != self.root() => {
                    path.push(node);
                    current = Some(parent);
                }
                _ => break,
            }
        }
        path.reverse();
        path
    }

    /// True when `ancestor` is `id` or contains it
    pub fn contains(&self, ancestor: NodeId, id: NodeId) -> bool {
        ancestor == id || self.ancestors(id).any(|a| a == ancestor)
    }

    pub fn create_element(&mut self, name: &str) -> NodeId {
        self.push_node(NodeKind::Element(ElementData {
            name: name.to_string(),
            attributes: Vec::new(),
        }))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push_node(NodeKind::Text(text.to_string()))
    }

    fn push_node(&mut self, kind: NodeKind) -> NodeId {
        let data = NodeData {
            parent: None,
            children: Vec::new(),
            kind,
        };
        if let Some(id) = self.free.pop() {
            self.nodes[id.0] = data;
            return id;
        }
        self.nodes.push(data);
        NodeId(self.nodes.len() - 1)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` under `parent` before `reference` (or last).
    ///
    /// Returns false without touching the tree when the insert would make a
    /// node its own ancestor or `reference` is not a child of `parent`.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) -> bool {
        if self.contains(child, parent) {
            return false;
        }
        if let Some(r) = reference {
            if self.parent(r) != Some(parent) {
                return false;
            }
        }
        self.detach(child);
        let siblings = &mut self.nodes[parent.0].children;
        let at = reference
            .and_then(|r| siblings.iter().position(|&c| c == r))
            .unwrap_or(siblings.len());
        siblings.insert(at, child);
        self.nodes[child.0].parent = Some(parent);
        true
    }

    /// Detach a node (and its subtree) from the tree
    /// Detach a node and drop it with its subtree. Their ids must not be
    /// used afterwards; the slots go to the next created nodes.
    pub fn remove(&mut self, id: NodeId) {
        if id == self.root() {
            return;
        }
        self.detach(id);
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            let data = &mut self.nodes[node.0];
            stack.append(&mut data.children);
            data.kind = NodeKind::Text(String::new());
            self.free.push(node);
        }
    }

    fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|&c| c != id);
        }
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let siblings = self.child_nodes(self.parent(id)?);
        let at = siblings.iter().position(|&c| c == id)?;
        siblings.get(at + 1).copied()
    }

    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        let siblings = self.child_nodes(self.parent(id)?);
        let at = siblings.iter().position(|&c| c == id)?;
        at.checked_sub(1).map(|i| siblings[i])
    }

    /// Split a text node at a character offset.
    ///
    /// The original node keeps the text before `offset`; a new sibling
    /// holding the rest is inserted after it and returned.
    pub fn split_text(&mut self, id: NodeId, offset: usize) -> Option<NodeId> {
        let text = self.text(id)?;
        let byte = text
            .char_indices()
            .nth(offset)
            .map(|(b, _)| b)
            .unwrap_or(text.len());
        let tail = text[byte..].to_string();
        let head = text[..byte].to_string();
        let parent = self.parent(id)?;
        let reference = self.next_sibling(id);

        self.nodes[id.0].kind = NodeKind::Text(head);
        let new = self.create_text(&tail);
        self.insert_before(parent, new, reference);
        Some(new)
    }

    /// Append text to an existing text node
    pub fn append_text(&mut self, id: NodeId, more: &str) {
        if let NodeKind::Text(t) = &mut self.nodes[id.0].kind {
            t.push_str(more);
        }
    }

    /// Pre-order position of every attached node, indexed by [`NodeId::index`].
    /// Detached nodes map to `None`.
    pub fn document_order(&self) -> Vec<Option<usize>> {
        let mut order = vec![None; self.nodes.len()];
        order[0] = Some(0);
        for (i, node) in self.descendants(self.root()).enumerate() {
            order[node.0] = Some(i + 1);
        }
        order
    }
}

/// Iterator returned by [`Document::descendants`]
pub struct Descendants<'a> {
    doc: &'a Document,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let node = self.stack.pop()?;
        self.stack
            .extend(self.doc.child_nodes(node).iter().rev().copied());
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAPTER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>One</title></head>
<body>
<p id="first">Hello <em>brave</em> world</p>
<p>Second&nbsp;para</p>
</body>
</html>"#;

    #[test]
    fn test_parse_structure() {
        let doc = Document::parse(CHAPTER).unwrap();
        let html = doc.document_element().unwrap();
        assert_eq!(doc.tag_name(html), Some("html"));
        let body = doc.body().unwrap();
        assert_eq!(doc.element_index(body), Some(1));
        let paras: Vec<_> = doc.element_children(body).collect();
        assert_eq!(paras.len(), 2);
        assert_eq!(doc.text_content(paras[0]), "Hello brave world");
        assert_eq!(doc.text_content(paras[1]), "Second\u{a0}para");
    }

    #[test]
    fn test_text_and_element_indices() {
        let doc = Document::parse(CHAPTER).unwrap();
        let p = doc.get_element_by_id("first").unwrap();
        let texts: Vec<_> = doc.text_children(p).collect();
        assert_eq!(texts.len(), 2);
        assert_eq!(doc.text_index(texts[1]), Some(1));
        assert_eq!(doc.text(texts[1]), Some(" world"));
        let em = doc.nth_element_child(p, 0).unwrap();
        assert_eq!(doc.tag_name(em), Some("em"));
    }

    #[test]
    fn test_path_to_excludes_root_element() {
        let doc = Document::parse(CHAPTER).unwrap();
        let body = doc.body().unwrap();
        let p = doc.get_element_by_id("first").unwrap();
        assert_eq!(doc.path_to(p), vec![body, p]);
        assert!(doc.path_to(doc.document_element().unwrap()).is_empty());
    }

    #[test]
    fn test_split_text() {
        let mut doc = Document::parse(CHAPTER).unwrap();
        let p = doc.get_element_by_id("first").unwrap();
        let first = doc.nth_text_child(p, 0).unwrap();
        let tail = doc.split_text(first, 2).unwrap();
        assert_eq!(doc.text(first), Some("He"));
        assert_eq!(doc.text(tail), Some("llo "));
        assert_eq!(doc.next_sibling(first), Some(tail));
        assert_eq!(doc.text_content(p), "Hello brave world");
    }

    #[test]
    fn test_insert_refuses_cycles() {
        let mut doc = Document::parse(CHAPTER).unwrap();
        let body = doc.body().unwrap();
        let p = doc.get_element_by_id("first").unwrap();
        assert!(!doc.append_child(p, body));
        assert_eq!(doc.parent(body), doc.document_element());
    }

    #[test]
    fn test_document_order() {
        let doc = Document::parse(CHAPTER).unwrap();
        let order = doc.document_order();
        let body = doc.body().unwrap();
        let p = doc.get_element_by_id("first").unwrap();
        assert!(order[body.index()] < order[p.index()]);
    }

    #[test]
    fn test_removed_slots_are_reused() {
        let mut doc = Document::parse(CHAPTER).unwrap();
        let p = doc.get_element_by_id("first").unwrap();
        let hello = doc.text_children(p).next().unwrap();
        let size = doc.nodes.len();

        for _ in 0..10 {
            let marker = doc.create_element("span");
            let tail = doc.split_text(hello, 2);
            doc.insert_before(p, marker, tail);
            let tail = tail.unwrap();
            let rest = doc.text(tail).unwrap_or_default().to_string();
            doc.append_text(hello, &rest);
            doc.remove(tail);
            doc.remove(marker);
        }

        assert_eq!(doc.nodes.len(), size + 2);
        assert_eq!(doc.text_content(p), "Hello brave world");
    }

    #[test]
    fn test_remove_drops_subtree() {
        let mut doc = Document::parse(CHAPTER).unwrap();
        let body = doc.body().unwrap();
        let p = doc.get_element_by_id("first").unwrap();
        doc.remove(p);

        assert_eq!(doc.element_children(body).count(), 1);
        assert!(doc.get_element_by_id("first").is_none());
        // p, its two text nodes and em with its text
        assert_eq!(doc.free.len(), 5);
    }
}
