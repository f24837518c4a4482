//! Headless column-flow surface
//!
//! [`FlowSurface`] lays chapter text out the way CSS columns would with a
//! monospace font: fixed character width and line height, block elements
//! start new lines, words wrap, and a line that does not fit in the column
//! height moves to the next column. It is deterministic, which makes it the
//! surface for tests, page-list generation and the CLI.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::surface::{Direction, Frame, Rect, RenderSurface};
use crate::dom::{Document, NodeId, Range};

const BASE_FONT_SIZE: f64 = 16.0;

const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "body", "dd", "div", "dl", "dt", "figcaption",
    "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "html", "li", "main",
    "nav", "ol", "p", "pre", "section", "table", "tr", "ul",
];

const HIDDEN_TAGS: &[&str] = &["head", "script", "style", "title", "template"];

/// Text metrics at the base font size
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowMetrics {
    pub char_width: f64,
    pub line_height: f64,
}

impl Default for FlowMetrics {
    fn default() -> Self {
        Self {
            char_width: 8.0,
            line_height: 16.0,
        }
    }
}

/// Deterministic headless surface
#[derive(Debug, Clone)]
pub struct FlowSurface {
    metrics: FlowMetrics,
    width: f64,
    height: f64,
    frame: Option<Frame>,
    left: f64,
    direction: Direction,
    ranges_supported: bool,
    document: Option<Document>,
    url: Option<String>,
    styles: BTreeMap<String, String>,
    head_tags: Vec<(String, BTreeMap<String, String>)>,
    // Absolute layout results
    char_boxes: HashMap<NodeId, Vec<Rect>>,
    element_boxes: HashMap<NodeId, Rect>,
    line_height: f64,
    extent: f64,
}

impl FlowSurface {
    pub fn new(width: f64, height: f64) -> Self {
        Self::with_metrics(width, height, FlowMetrics::default())
    }

    pub fn with_metrics(width: f64, height: f64, metrics: FlowMetrics) -> Self {
        Self {
            metrics,
            width,
            height,
            frame: None,
            left: 0.0,
            direction: Direction::Ltr,
            ranges_supported: true,
            document: None,
            url: None,
            styles: BTreeMap::new(),
            head_tags: Vec::new(),
            char_boxes: HashMap::new(),
            element_boxes: HashMap::new(),
            line_height: metrics.line_height,
            extent: 0.0,
        }
    }

    /// Pretend range measurement is unavailable, forcing marker lookups
    pub fn set_ranges_supported(&mut self, supported: bool) {
        self.ranges_supported = supported;
    }

    pub fn frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    pub fn styles(&self) -> &BTreeMap<String, String> {
        &self.styles
    }

    pub fn head_tags(&self) -> &[(String, BTreeMap<String, String>)] {
        &self.head_tags
    }

    /// Font scale from the `font-size` style (`px`, `em` or `%`)
    fn font_scale(&self) -> f64 {
        let Some(value) = self.styles.get("font-size") else {
            return 1.0;
        };
        let value = value.trim();
        let parsed = if let Some(px) = value.strip_suffix("px") {
            px.trim().parse::<f64>().ok().map(|v| v / BASE_FONT_SIZE)
        } else if let Some(em) = value.strip_suffix("em") {
            em.trim().parse::<f64>().ok()
        } else if let Some(pct) = value.strip_suffix('%') {
            pct.trim().parse::<f64>().ok().map(|v| v / 100.0)
        } else {
            None
        };
        parsed.filter(|s| *s > 0.0).unwrap_or(1.0)
    }

    fn layout(&mut self) {
        self.char_boxes.clear();
        self.element_boxes.clear();
        self.extent = 0.0;

        let scale = self.font_scale();
        let char_width = self.metrics.char_width * scale;
        let line_height = self.metrics.line_height * scale;
        self.line_height = line_height;

        let (column_width, stride, column_height) = match self.frame {
            Some(Frame {
                column_width: Some(col),
                gap,
                height,
                ..
            }) => (col, col + gap, Some(height)),
            Some(frame) => (frame.width, frame.width, None),
            None => (self.width, self.width, None),
        };

        let Some(doc) = self.document.as_ref() else {
            return;
        };
        let Some(start) = doc.body().or_else(|| doc.document_element()) else {
            return;
        };

        let mut cursor = Cursor {
            column_width,
            stride,
            column_height,
            char_width,
            line_height,
            column: 0,
            max_column: 0,
            x: 0.0,
            y: 0.0,
            line_has_content: false,
            pending_space: false,
            placed: false,
        };

        let mut char_boxes: HashMap<NodeId, Vec<Rect>> = HashMap::new();
        let mut element_boxes: HashMap<NodeId, Rect> = HashMap::new();

        // (node, exiting)
        let mut stack = vec![(start, false)];
        while let Some((node, exiting)) = stack.pop() {
            if doc.is_text(node) {
                let text = doc.text(node).unwrap_or_default();
                char_boxes.insert(node, cursor.place_text(text));
                continue;
            }
            let Some(tag) = doc.tag_name(node) else {
                continue;
            };
            let block = BLOCK_TAGS.contains(&tag);

            if exiting {
                if block {
                    cursor.break_line(false);
                }
                continue;
            }

            if HIDDEN_TAGS.contains(&tag) || doc.attribute(node, "hidden").is_some() {
                continue;
            }
            if block {
                cursor.break_line(false);
            }

            match tag {
                "br" => {
                    element_boxes.insert(node, cursor.anchor());
                    cursor.break_line(true);
                }
                "img" | "svg" | "image" => {
                    cursor.break_line(false);
                    let rect = cursor.place_box();
                    element_boxes.insert(node, rect);
                    cursor.break_line(false);
                }
                _ => {
                    element_boxes.insert(node, cursor.anchor());
                    stack.push((node, true));
                    for &child in doc.child_nodes(node).iter().rev() {
                        stack.push((child, false));
                    }
                }
            }
        }

        self.extent = match column_height {
            Some(_) if cursor.placed => {
                let columns = cursor.max_column as f64 + 1.0;
                columns * column_width + (columns - 1.0) * (stride - column_width)
            }
            _ => column_width,
        };
        trace!(extent = self.extent, columns = cursor.max_column + 1, "flow layout");

        self.char_boxes = char_boxes;
        self.element_boxes = element_boxes;
    }

    fn to_viewport(&self, rect: Rect) -> Rect {
        Rect {
            left: rect.left - self.left.abs(),
            ..rect
        }
    }

    fn char_box(&self, node: NodeId, index: usize) -> Option<Rect> {
        self.char_boxes.get(&node)?.get(index).copied()
    }

    /// Zero-width caret box before character `index`
    fn caret(&self, node: NodeId, index: usize) -> Option<Rect> {
        let boxes = self.char_boxes.get(&node)?;
        match boxes.get(index) {
            Some(b) => Some(Rect::new(b.left, b.top, 0.0, self.line_height)),
            None => boxes
                .last()
                .map(|b| Rect::new(b.right(), b.top, 0.0, self.line_height)),
        }
    }
}

/// Position of the next glyph
struct Cursor {
    column_width: f64,
    stride: f64,
    column_height: Option<f64>,
    char_width: f64,
    line_height: f64,
    column: usize,
    max_column: usize,
    x: f64,
    y: f64,
    line_has_content: bool,
    pending_space: bool,
    placed: bool,
}

impl Cursor {
    fn origin(&self) -> f64 {
        self.column as f64 * self.stride
    }

    fn anchor(&self) -> Rect {
        Rect::new(self.origin() + self.x, self.y, 0.0, self.line_height)
    }

    fn break_line(&mut self, force: bool) {
        if !self.line_has_content && !force {
            self.pending_space = false;
            return;
        }
        self.x = 0.0;
        self.y += self.line_height;
        self.line_has_content = false;
        self.pending_space = false;
        if let Some(height) = self.column_height {
            if self.y + self.line_height > height {
                self.column += 1;
                self.y = 0.0;
            }
        }
    }

    fn mark_placed(&mut self) {
        self.line_has_content = true;
        self.placed = true;
        self.max_column = self.max_column.max(self.column);
    }

    /// Replaced content (images): one line, column wide
    fn place_box(&mut self) -> Rect {
        let rect = Rect::new(self.origin(), self.y, self.column_width, self.line_height);
        self.mark_placed();
        rect
    }

    fn place_text(&mut self, text: &str) -> Vec<Rect> {
        let chars: Vec<char> = text.chars().collect();
        let mut boxes = Vec::with_capacity(chars.len());
        let mut i = 0;

        while i < chars.len() {
            if chars[i].is_whitespace() {
                if self.line_has_content {
                    self.pending_space = true;
                }
                boxes.push(Rect::new(self.origin() + self.x, self.y, 0.0, 0.0));
                i += 1;
                continue;
            }

            let word_len = chars[i..].iter().take_while(|c| !c.is_whitespace()).count();
            let space = if self.pending_space { self.char_width } else { 0.0 };
            let needed = space + word_len as f64 * self.char_width;
            if self.line_has_content && self.x + needed > self.column_width {
                self.break_line(false);
            } else if self.pending_space {
                self.x += self.char_width;
            }
            self.pending_space = false;

            for _ in 0..word_len {
                if self.x > 0.0 && self.x + self.char_width > self.column_width {
                    self.break_line(true);
                }
                boxes.push(Rect::new(
                    self.origin() + self.x,
                    self.y,
                    self.char_width,
                    self.line_height,
                ));
                self.x += self.char_width;
                self.mark_placed();
            }
            i += word_len;
        }
        boxes
    }
}

impl RenderSurface for FlowSurface {
    fn load(&mut self, document: Document, url: &str) {
        self.document = Some(document);
        self.url = Some(url.to_string());
        self.left = 0.0;
        self.layout();
    }

    fn unload(&mut self) {
        self.document = None;
        self.url = None;
        self.left = 0.0;
        self.char_boxes.clear();
        self.element_boxes.clear();
        self.extent = 0.0;
    }

    fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    fn document_mut(&mut self) -> Option<&mut Document> {
        self.document.as_mut()
    }

    fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    fn resize(&mut self, width: f64, height: f64) {
        self.width = width;
        self.height = height;
    }

    fn width(&self) -> f64 {
        self.width
    }

    fn height(&self) -> f64 {
        self.height
    }

    fn apply_frame(&mut self, frame: &Frame) {
        self.frame = Some(*frame);
        self.layout();
    }

    fn reflow(&mut self) {
        self.layout();
    }

    fn scroll_width(&self) -> f64 {
        self.extent
    }

    fn set_left(&mut self, left: f64) {
        self.left = left;
    }

    fn left(&self) -> f64 {
        self.left
    }

    fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn range_rect(&self, range: &Range) -> Option<Rect> {
        let doc = self.document.as_ref()?;
        let mut rect: Option<Rect> = None;
        for (node, start, end) in range.text_segments(doc) {
            for i in start..end {
                if let Some(b) = self.char_box(node, i).filter(|b| !b.is_empty()) {
                    rect = Some(match rect {
                        Some(r) => r.union(&b),
                        None => b,
                    });
                }
            }
        }
        if rect.is_none() && range.collapsed() && doc.is_text(range.start.node) {
            rect = self.caret(range.start.node, range.start.offset);
        }
        rect.map(|r| self.to_viewport(r))
    }

    fn element_rect(&self, node: NodeId) -> Option<Rect> {
        let doc = self.document.as_ref()?;
        let mut rect = self.element_boxes.get(&node).copied();
        for d in doc.descendants(node) {
            let boxes: Vec<Rect> = if doc.is_text(d) {
                self.char_boxes
                    .get(&d)
                    .map(|b| b.iter().copied().filter(|r| !r.is_empty()).collect())
                    .unwrap_or_default()
            } else {
                self.element_boxes.get(&d).copied().into_iter().collect()
            };
            for b in boxes {
                rect = Some(match rect {
                    Some(r) => r.union(&b),
                    None => b,
                });
            }
        }
        rect.map(|r| self.to_viewport(r))
    }

    fn supports_ranges(&self) -> bool {
        self.ranges_supported
    }

    fn set_style(&mut self, property: &str, value: &str) {
        self.styles.insert(property.to_string(), value.to_string());
        self.layout();
    }

    fn remove_style(&mut self, property: &str) {
        if self.styles.remove(property).is_some() {
            self.layout();
        }
    }

    fn add_head_tag(&mut self, tag: &str, attributes: &BTreeMap<String, String>) {
        self.head_tags.push((tag.to_string(), attributes.clone()));
    }
}
