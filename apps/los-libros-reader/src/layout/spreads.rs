//! Two columns per screen

use super::{pages_for, resolve_gap, Formatted, Layout, LayoutMethod, PageCount};
use crate::render::{Frame, RenderSurface};

const DIVISOR: f64 = 2.0;

/// Reflowable content shown as a two page spread
#[derive(Debug, Clone, Default)]
pub struct ReflowableSpreads {
    spread_width: f64,
    column_width: f64,
    gap: f64,
}

impl ReflowableSpreads {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layout for ReflowableSpreads {
    fn method(&self) -> LayoutMethod {
        LayoutMethod::ReflowableSpreads
    }

    fn format(
        &mut self,
        surface: &mut dyn RenderSurface,
        width: f64,
        height: f64,
        gap: Option<f64>,
    ) -> Formatted {
        // Both columns must be the same width
        let full = width.floor();
        let width = if full % 2.0 == 0.0 { full } else { full - 1.0 };
        let gap = resolve_gap(width, gap);
        let column_width = ((width - gap) / DIVISOR).floor();

        self.spread_width = (column_width + gap) * DIVISOR;
        self.column_width = column_width;
        self.gap = gap;

        surface.apply_frame(&Frame {
            width,
            height,
            column_width: Some(column_width),
            gap,
        });

        Formatted {
            page_width: self.spread_width,
            page_height: height,
        }
    }

    fn calculate_pages(&mut self, surface: &mut dyn RenderSurface) -> PageCount {
        let displayed_pages = pages_for(surface.scroll_width(), self.spread_width);
        PageCount {
            displayed_pages,
            page_count: displayed_pages * 2,
        }
    }

    fn column_width(&self) -> f64 {
        self.column_width
    }

    fn gap(&self) -> f64 {
        self.gap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;
    use crate::render::FlowSurface;

    #[test]
    fn test_format_forces_even_width() {
        let mut surface = FlowSurface::new(801.0, 600.0);
        let mut layout = ReflowableSpreads::new();
        let formatted = layout.format(&mut surface, 801.0, 600.0, None);

        // 800 wide, gap 100, two 350 columns
        assert_eq!(layout.gap(), 100.0);
        assert_eq!(layout.column_width(), 350.0);
        assert_eq!(formatted.page_width, 900.0);
    }

    #[test]
    fn test_page_count_is_double() {
        let mut surface = FlowSurface::new(200.0, 16.0);
        let doc = Document::parse("<html><body><p>a</p><p>b</p><p>c</p></body></html>").unwrap();
        surface.load(doc, "c.xhtml");

        let mut layout = ReflowableSpreads::new();
        layout.format(&mut surface, 200.0, 16.0, Some(20.0));
        // Three 90px columns need two screens
        let pages = layout.calculate_pages(&mut surface);
        assert_eq!(pages, PageCount { displayed_pages: 2, page_count: 4 });
    }
}
