//! Package data types
//!
//! Shapes produced from `container.xml`, the OPF package document and the
//! navigation documents.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::layout::{LayoutSettings, Orientation, RenditionLayout, SpreadMode};
use crate::render::Direction;

/// Where the package document lives inside the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Path of the OPF file, e.g. `OEBPS/content.opf`
    pub package_path: String,
    /// Directory hrefs in the OPF are relative to, with a trailing `/`
    pub base_path: String,
}

/// Book metadata extracted from the OPF
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookMetadata {
    pub title: String,
    pub creator: String,
    pub description: String,
    pub pubdate: String,
    pub publisher: String,
    pub identifier: String,
    pub language: String,
    pub rights: String,
    /// `dcterms:modified`
    pub modified_date: String,
    /// `rendition:layout`, when declared
    pub layout: Option<RenditionLayout>,
    /// `rendition:orientation`, when declared
    pub orientation: Option<Orientation>,
    /// `rendition:spread`, when declared
    pub spread: Option<SpreadMode>,
    /// Spine `page-progression-direction`
    pub direction: Option<Direction>,
}

impl BookMetadata {
    /// Layout properties declared by the package, defaults elsewhere
    pub fn layout_settings(&self) -> LayoutSettings {
        let defaults = LayoutSettings::default();
        LayoutSettings {
            layout: self.layout.unwrap_or(defaults.layout),
            spread: self.spread.unwrap_or(defaults.spread),
            orientation: self.orientation.unwrap_or(defaults.orientation),
        }
    }
}

/// Manifest item (resource in the EPUB)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestItem {
    pub id: String,
    /// Href as written in the OPF
    pub href: String,
    /// Href resolved against the OPF directory
    pub url: String,
    pub media_type: String,
    pub properties: Vec<String>,
}

/// Spine item (reading order)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpineItem {
    /// Manifest idref
    pub id: String,
    pub href: String,
    pub url: String,
    /// Position in the spine
    pub index: usize,
    /// `false` for `linear="no"` items
    pub linear: bool,
    /// Itemref properties (`rendition:layout-pre-paginated`, `page-spread-left`, ...)
    pub properties: Vec<String>,
    /// Chapter component of every CFI into this item, e.g. `/6/4[ch02]`
    pub cfi_base: String,
}

impl SpineItem {
    /// CFI addressing the item itself
    pub fn cfi(&self) -> String {
        format!("epubcfi({})", self.cfi_base)
    }
}

/// Table of contents entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TocEntry {
    pub id: String,
    pub href: String,
    pub label: String,
    /// Spine position of the target, when it is in the spine
    pub spine_pos: Option<usize>,
    /// CFI of the target spine item
    pub spine_cfi: Option<String>,
    pub subitems: Vec<TocEntry>,
}

/// Page list entry from the navigation document or a generated page list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageListItem {
    pub cfi: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub page_label: Option<String>,
    pub page: u32,
}

/// An opened package: everything the book needs to navigate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub container: Container,
    pub metadata: BookMetadata,
    pub manifest: BTreeMap<String, ManifestItem>,
    pub spine: Vec<SpineItem>,
    /// Child-node position of `<spine>` under `<package>`
    pub spine_node_index: usize,
    /// Spine index keyed by href and by resolved url
    pub spine_index_by_url: HashMap<String, usize>,
    pub nav_path: Option<String>,
    pub ncx_path: Option<String>,
    pub cover_path: Option<String>,
    #[serde(default)]
    pub toc: Vec<TocEntry>,
    #[serde(default)]
    pub page_list: Vec<PageListItem>,
}

impl Package {
    /// Spine index of a chapter href or url
    pub fn spine_index_by_url(&self, url: &str) -> Option<usize> {
        let path = url.split('#').next().unwrap_or(url);
        self.spine_index_by_url
            .get(path)
            .or_else(|| {
                let decoded = urlencoding::decode(path).ok()?;
                self.spine_index_by_url.get(decoded.as_ref())
            })
            .copied()
    }

    pub fn spine_item(&self, index: usize) -> Option<&SpineItem> {
        self.spine.get(index)
    }
}
