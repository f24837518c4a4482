//! Layout strategies
//!
//! A layout turns a viewport size into column geometry on the render
//! surface, then counts the pages the laid out chapter occupies.
//!
//! | layout        | spread | method                                     |
//! |---------------|--------|--------------------------------------------|
//! | pre-paginated | any    | [`Fixed`]                                  |
//! | reflowable    | none   | [`Reflowable`]                             |
//! | reflowable    | both   | [`ReflowableSpreads`]                      |
//! | reflowable    | other  | spreads when the viewport is wide enough   |

mod fixed;
mod reflowable;
mod spreads;

pub use fixed::Fixed;
pub use reflowable::Reflowable;
pub use spreads::ReflowableSpreads;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::render::RenderSurface;

/// `rendition:layout`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenditionLayout {
    #[default]
    Reflowable,
    PrePaginated,
}

impl FromStr for RenditionLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "reflowable" => Ok(Self::Reflowable),
            "pre-paginated" => Ok(Self::PrePaginated),
            other => Err(format!("Unknown rendition layout: {}", other)),
        }
    }
}

/// `rendition:spread`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpreadMode {
    None,
    #[default]
    Auto,
    Both,
    Landscape,
    Portrait,
}

impl FromStr for SpreadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "none" => Ok(Self::None),
            "auto" => Ok(Self::Auto),
            "both" => Ok(Self::Both),
            "landscape" => Ok(Self::Landscape),
            "portrait" => Ok(Self::Portrait),
            other => Err(format!("Unknown spread mode: {}", other)),
        }
    }
}

/// `rendition:orientation`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Orientation {
    #[default]
    Auto,
    Landscape,
    Portrait,
}

impl FromStr for Orientation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "auto" => Ok(Self::Auto),
            "landscape" => Ok(Self::Landscape),
            "portrait" => Ok(Self::Portrait),
            other => Err(format!("Unknown orientation: {}", other)),
        }
    }
}

/// Rendition settings for the book or a single chapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutSettings {
    pub layout: RenditionLayout,
    pub spread: SpreadMode,
    pub orientation: Orientation,
}

/// Caller overrides applied on top of the package metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutOverride {
    pub layout: Option<RenditionLayout>,
    pub spread: Option<SpreadMode>,
    pub orientation: Option<Orientation>,
}

impl LayoutSettings {
    /// Apply overrides, keeping values the override leaves unset
    pub fn with_override(self, over: &LayoutOverride) -> Self {
        Self {
            layout: over.layout.unwrap_or(self.layout),
            spread: over.spread.unwrap_or(self.spread),
            orientation: over.orientation.unwrap_or(self.orientation),
        }
    }
}

/// Combine the book settings with a chapter's spine properties.
///
/// Properties look like `rendition:layout-pre-paginated`: the part before
/// the first `-` names the setting, the rest is its value.
pub fn reconcile_layout_settings(global: &LayoutSettings, properties: &[String]) -> LayoutSettings {
    let mut settings = *global;
    for prop in properties {
        let rendition = prop.strip_prefix("rendition:").unwrap_or(prop);
        let Some((property, value)) = rendition.split_once('-') else {
            continue;
        };
        match property {
            "layout" => {
                if let Ok(v) = value.parse() {
                    settings.layout = v;
                }
            }
            "spread" => {
                if let Ok(v) = value.parse() {
                    settings.spread = v;
                }
            }
            "orientation" => {
                if let Ok(v) = value.parse() {
                    settings.orientation = v;
                }
            }
            _ => {}
        }
    }
    settings
}

/// Which strategy lays out a chapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutMethod {
    Reflowable,
    ReflowableSpreads,
    Fixed,
}

impl fmt::Display for LayoutMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayoutMethod::Reflowable => "Reflowable",
            LayoutMethod::ReflowableSpreads => "ReflowableSpreads",
            LayoutMethod::Fixed => "Fixed",
        };
        f.write_str(name)
    }
}

/// Pick a layout method. Returns the method and whether spreads are shown.
pub fn determine_layout(settings: &LayoutSettings, spreads_allowed: bool) -> (LayoutMethod, bool) {
    let decision = match (settings.layout, settings.spread) {
        (RenditionLayout::PrePaginated, _) => (LayoutMethod::Fixed, false),
        (RenditionLayout::Reflowable, SpreadMode::None) => (LayoutMethod::Reflowable, false),
        (RenditionLayout::Reflowable, SpreadMode::Both) => (LayoutMethod::ReflowableSpreads, true),
        _ if spreads_allowed => (LayoutMethod::ReflowableSpreads, true),
        _ => (LayoutMethod::Reflowable, false),
    };
    debug!(method = %decision.0, spreads = decision.1, "determined layout");
    decision
}

/// Whether a viewport is wide enough for two columns
pub fn spreads_allowed(width: f64, min_spread_width: Option<f64>, forced_single: bool) -> bool {
    match min_spread_width {
        Some(cutoff) if cutoff > 0.0 && !forced_single => width >= cutoff,
        _ => false,
    }
}

/// Gap for a column width when none is configured: an eighth of the
/// width, rounded down to an even number
pub fn auto_gap(width: f64) -> f64 {
    let section = (width / 8.0).floor();
    if section % 2.0 == 0.0 {
        section
    } else {
        section - 1.0
    }
}

pub(crate) fn resolve_gap(width: f64, gap: Option<f64>) -> f64 {
    match gap {
        Some(g) if g >= 0.0 => g,
        _ => auto_gap(width),
    }
}

/// Page size produced by [`Layout::format`]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Formatted {
    pub page_width: f64,
    pub page_height: f64,
}

/// Page counts produced by [`Layout::calculate_pages`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageCount {
    pub displayed_pages: u32,
    pub page_count: u32,
}

/// A layout strategy
pub trait Layout: Send + Sync + fmt::Debug {
    fn method(&self) -> LayoutMethod;

    /// Apply the geometry for a viewport to the surface
    fn format(
        &mut self,
        surface: &mut dyn RenderSurface,
        width: f64,
        height: f64,
        gap: Option<f64>,
    ) -> Formatted;

    /// Count pages of the formatted content
    fn calculate_pages(&mut self, surface: &mut dyn RenderSurface) -> PageCount;

    fn column_width(&self) -> f64;

    fn gap(&self) -> f64;
}

/// Create the strategy for a method
pub fn create_layout(method: LayoutMethod) -> Box<dyn Layout> {
    match method {
        LayoutMethod::Reflowable => Box::new(Reflowable::new()),
        LayoutMethod::ReflowableSpreads => Box::new(ReflowableSpreads::new()),
        LayoutMethod::Fixed => Box::new(Fixed::new()),
    }
}

pub(crate) fn pages_for(extent: f64, page_width: f64) -> u32 {
    if page_width <= 0.0 {
        return 1;
    }
    (extent / page_width).ceil().max(1.0) as u32
}
