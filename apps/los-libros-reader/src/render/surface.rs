//! Render surface
//!
//! The renderer never lays out boxes itself. It hands the chapter document to
//! a [`RenderSurface`], tells it the column geometry and asks it for
//! measurements: content width and the on-screen rectangles of ranges and
//! elements.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dom::{Document, NodeId, Range};

/// A rectangle in viewport coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// Zero-sized boxes belong to invisible or collapsed nodes
    pub fn is_empty(&self) -> bool {
        self.width == 0.0 && self.height == 0.0
    }

    /// Smallest rectangle containing both
    pub fn union(&self, other: &Rect) -> Rect {
        let left = self.left.min(other.left);
        let top = self.top.min(other.top);
        Rect::new(
            left,
            top,
            self.right().max(other.right()) - left,
            self.bottom().max(other.bottom()) - top,
        )
    }
}

/// Page progression direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Ltr,
    Rtl,
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ltr" | "default" => Ok(Direction::Ltr),
            "rtl" => Ok(Direction::Rtl),
            other => Err(format!("Unknown direction: {}", other)),
        }
    }
}

/// Geometry a layout applies to the surface
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub width: f64,
    pub height: f64,
    /// Column width, `None` disables columns
    pub column_width: Option<f64>,
    pub gap: f64,
}

/// Surface a chapter is rendered into
pub trait RenderSurface: Send + Sync {
    /// Replace the displayed document
    fn load(&mut self, document: Document, url: &str);

    fn unload(&mut self);

    fn document(&self) -> Option<&Document>;

    fn document_mut(&mut self) -> Option<&mut Document>;

    /// Url of the loaded chapter
    fn url(&self) -> Option<&str>;

    /// Viewport size
    fn resize(&mut self, width: f64, height: f64);

    fn width(&self) -> f64;

    fn height(&self) -> f64;

    /// Apply column geometry and lay the content out again
    fn apply_frame(&mut self, frame: &Frame);

    /// Lay the content out again with the current frame
    fn reflow(&mut self);

    /// Total width of the laid out content
    fn scroll_width(&self) -> f64;

    /// Horizontal scroll offset (negative for right-to-left)
    fn set_left(&mut self, left: f64);

    fn left(&self) -> f64;

    fn set_direction(&mut self, direction: Direction);

    fn direction(&self) -> Direction;

    /// First box of a range, in viewport coordinates
    fn range_rect(&self, range: &Range) -> Option<Rect>;

    /// Bounding box of an element's contents, in viewport coordinates
    fn element_rect(&self, node: NodeId) -> Option<Rect>;

    /// False when ranges cannot be measured and markers must be used
    fn supports_ranges(&self) -> bool {
        true
    }

    fn set_style(&mut self, property: &str, value: &str);

    fn remove_style(&mut self, property: &str);

    fn add_head_tag(&mut self, tag: &str, attributes: &BTreeMap<String, String>);
}
