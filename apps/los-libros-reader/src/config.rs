//! Configuration management for the reader core

use std::collections::BTreeMap;
use std::env;

use serde::{Deserialize, Deserializer, Serialize};

use crate::layout::{LayoutOverride, Orientation, RenditionLayout, SpreadMode};
use crate::render::FlowMetrics;

/// Reader settings
///
/// Deserializes from the JSON a reader front end sends; missing keys take
/// the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReaderSettings {
    /// Book archive or unpacked directory
    pub book_path: Option<String>,
    /// Viewport size, the surface size when unset
    pub width: Option<f64>,
    pub height: Option<f64>,
    /// Overrides for the package's rendition properties
    pub layout_override: LayoutOverride,
    /// Narrowest viewport that shows two page spreads, `None` disables them
    pub min_spread_width: Option<f64>,
    /// Column gap in pixels, `None` (or `"auto"`) for an eighth of the width
    #[serde(deserialize_with = "deserialize_gap")]
    pub gap: Option<f64>,
    /// Allow two page spreads
    pub spreads: bool,
    /// Return to `previous_location_cfi` when the book is rendered
    pub restore: bool,
    pub previous_location_cfi: Option<String>,
    /// Initial target: CFI, href, page number or percentage
    pub goto: Option<String>,
    /// Styles applied to every chapter
    pub styles: BTreeMap<String, String>,
    /// Tags added to every chapter head, keyed by tag name
    pub head_tags: BTreeMap<String, BTreeMap<String, String>>,
    /// Characters between generated locations
    pub location_break: usize,
    /// Text metrics of the headless surface
    pub flow: FlowMetrics,
}

pub const DEFAULT_MIN_SPREAD_WIDTH: f64 = 768.0;
pub const DEFAULT_LOCATION_BREAK: usize = 150;

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            book_path: None,
            width: None,
            height: None,
            layout_override: LayoutOverride::default(),
            min_spread_width: Some(DEFAULT_MIN_SPREAD_WIDTH),
            gap: None,
            spreads: true,
            restore: false,
            previous_location_cfi: None,
            goto: None,
            styles: BTreeMap::new(),
            head_tags: BTreeMap::new(),
            location_break: DEFAULT_LOCATION_BREAK,
            flow: FlowMetrics::default(),
        }
    }
}

fn deserialize_gap<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Gap {
        Pixels(f64),
        Keyword(String),
    }

    match Option::<Gap>::deserialize(deserializer)? {
        Some(Gap::Pixels(px)) if px >= 0.0 => Ok(Some(px)),
        Some(Gap::Keyword(k)) if k != "auto" => k
            .trim_end_matches("px")
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid gap: {}", k))),
        _ => Ok(None),
    }
}

fn parse_gap(value: &str) -> Option<f64> {
    match value.trim() {
        "" | "auto" => None,
        v => v.trim_end_matches("px").parse::<f64>().ok().filter(|g| *g >= 0.0),
    }
}

impl ReaderSettings {
    /// Settings from `READER_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let number = |key: &str| env::var(key).ok().and_then(|v| v.trim().parse::<f64>().ok());

        Self {
            book_path: env::var("READER_BOOK_PATH").ok(),
            width: number("READER_WIDTH"),
            height: number("READER_HEIGHT"),
            layout_override: LayoutOverride {
                layout: env::var("READER_LAYOUT")
                    .ok()
                    .and_then(|v| v.parse::<RenditionLayout>().ok()),
                spread: env::var("READER_SPREAD")
                    .ok()
                    .and_then(|v| v.parse::<SpreadMode>().ok()),
                orientation: env::var("READER_ORIENTATION")
                    .ok()
                    .and_then(|v| v.parse::<Orientation>().ok()),
            },
            min_spread_width: match env::var("READER_MIN_SPREAD_WIDTH") {
                Ok(v) if v.trim() == "none" => None,
                Ok(v) => v.trim().parse().ok().or(defaults.min_spread_width),
                Err(_) => defaults.min_spread_width,
            },
            gap: env::var("READER_GAP").ok().and_then(|v| parse_gap(&v)),
            spreads: env::var("READER_SPREADS")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(defaults.spreads),
            restore: env::var("READER_RESTORE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.restore),
            previous_location_cfi: env::var("READER_PREVIOUS_LOCATION").ok(),
            goto: env::var("READER_GOTO").ok(),
            location_break: env::var("READER_LOCATION_BREAK")
                .unwrap_or_else(|_| DEFAULT_LOCATION_BREAK.to_string())
                .parse()
                .unwrap_or(DEFAULT_LOCATION_BREAK),
            ..defaults
        }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ReaderSettings::default();
        assert_eq!(settings.min_spread_width, Some(768.0));
        assert_eq!(settings.gap, None);
        assert_eq!(settings.location_break, 150);
        assert!(settings.spreads);
        assert_eq!(settings.layout_override, LayoutOverride::default());
    }

    #[test]
    fn test_from_json_partial() {
        let settings = ReaderSettings::from_json(
            r#"{"width":600,"gap":"auto","layoutOverride":{"spread":"none"},"styles":{"font-size":"20px"}}"#,
        )
        .unwrap();
        assert_eq!(settings.width, Some(600.0));
        assert_eq!(settings.gap, None);
        assert_eq!(settings.layout_override.spread, Some(SpreadMode::None));
        assert_eq!(settings.styles.get("font-size").map(String::as_str), Some("20px"));
        assert_eq!(settings.location_break, 150);
    }

    #[test]
    fn test_gap_forms() {
        let px = ReaderSettings::from_json(r#"{"gap":75}"#).unwrap();
        assert_eq!(px.gap, Some(75.0));
        let text = ReaderSettings::from_json(r#"{"gap":"40px"}"#).unwrap();
        assert_eq!(text.gap, Some(40.0));
        let negative = ReaderSettings::from_json(r#"{"gap":-3}"#).unwrap();
        assert_eq!(negative.gap, None);
        assert!(ReaderSettings::from_json(r#"{"gap":"wide"}"#).is_err());
    }

    #[test]
    fn test_parse_gap() {
        assert_eq!(parse_gap("auto"), None);
        assert_eq!(parse_gap("32"), Some(32.0));
        assert_eq!(parse_gap("-1"), None);
    }
}
