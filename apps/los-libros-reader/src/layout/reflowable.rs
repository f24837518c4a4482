//! Single column reflowable layout

use super::{pages_for, resolve_gap, Formatted, Layout, LayoutMethod, PageCount};
use crate::render::{Frame, RenderSurface};

/// One column per screen
#[derive(Debug, Clone, Default)]
pub struct Reflowable {
    spread_width: f64,
    column_width: f64,
    gap: f64,
}

impl Reflowable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layout for Reflowable {
    fn method(&self) -> LayoutMethod {
        LayoutMethod::Reflowable
    }

    fn format(
        &mut self,
        surface: &mut dyn RenderSurface,
        width: f64,
        height: f64,
        gap: Option<f64>,
    ) -> Formatted {
        let width = width.floor();
        let gap = resolve_gap(width, gap);

        self.spread_width = width + gap;
        self.column_width = width;
        self.gap = gap;

        surface.apply_frame(&Frame {
            width,
            height,
            column_width: Some(width),
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
            page_count: displayed_pages,
        }
    }

    fn column_width(&self) -> f64 {
        self.column_width
    }

    fn gap(&self) -> f64 {
        self.gap
    }
}
