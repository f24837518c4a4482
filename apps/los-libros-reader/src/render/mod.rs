//! Rendering
//!
//! A [`Renderer`] drives one chapter at a time through a [`RenderSurface`].
//! The surface does box layout and measurement, the renderer turns those
//! measurements into pages and CFIs.

mod flow;
mod page_map;
mod renderer;
mod surface;

pub use flow::{FlowMetrics, FlowSurface};
pub use page_map::{map_pages, word_ranges, PageMapEntry};
pub use renderer::{RenderState, Renderer, RendererTask};
pub use surface::{Direction, Frame, Rect, RenderSurface};
