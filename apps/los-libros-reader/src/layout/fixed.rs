//! Pre-paginated layout
//!
//! Content is sized 1:1 from its viewport meta hint:
//! `<meta name="viewport" content="width=1024,height=697"/>`

use tracing::debug;

use super::{Formatted, Layout, LayoutMethod, PageCount};
use crate::dom::Document;
use crate::render::{Frame, RenderSurface};

/// One fixed page, no columns
#[derive(Debug, Clone, Default)]
pub struct Fixed {
    width: f64,
}

impl Fixed {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Width and height from the viewport meta tag, when present
pub fn viewport_hint(doc: &Document) -> (Option<f64>, Option<f64>) {
    let meta = doc
        .elements_by_name(doc.root(), "meta")
        .into_iter()
        .find(|&m| doc.attribute(m, "name") == Some("viewport"));
    let Some(content) = meta.and_then(|m| doc.attribute(m, "content")) else {
        return (None, None);
    };

    let mut width = None;
    let mut height = None;
    for part in content.split(',') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_end_matches("px").parse::<f64>().ok();
        match key.trim() {
            "width" => width = value,
            "height" => height = value,
            _ => {}
        }
    }
    (width, height)
}

impl Layout for Fixed {
    fn method(&self) -> LayoutMethod {
        LayoutMethod::Fixed
    }

    fn format(
        &mut self,
        surface: &mut dyn RenderSurface,
        width: f64,
        height: f64,
        _gap: Option<f64>,
    ) -> Formatted {
        let (hint_width, hint_height) = surface
            .document()
            .map(viewport_hint)
            .unwrap_or((None, None));
        if hint_width.is_none() {
            debug!("no viewport hint, using viewport size");
        }
        let width = hint_width.unwrap_or(width);
        let height = hint_height.unwrap_or(height);
        self.width = width;

        surface.apply_frame(&Frame {
            width,
            height,
            column_width: None,
            gap: 0.0,
        });

        Formatted {
            page_width: width,
            page_height: height,
        }
    }

    fn calculate_pages(&mut self, _surface: &mut dyn RenderSurface) -> PageCount {
        PageCount {
            displayed_pages: 1,
            page_count: 1,
        }
    }

    fn column_width(&self) -> f64 {
        self.width
    }

    fn gap(&self) -> f64 {
        0.0
    }
}
