//! Locations index
//!
//! Splits the book's text into runs of about `break_chars` characters and
//! records a range CFI for each. The sorted list gives stable "location N of
//! M" positions and percentages that do not depend on the screen size.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::chapter::Chapter;
use super::store::ContentStore;
use crate::cfi::{self, location_of};
use crate::config::DEFAULT_LOCATION_BREAK;
use crate::dom::{Boundary, Document, NodeId, Range};
use crate::error::Result;
use crate::events::{EventChannel, LocationsEvent};
use crate::package::SpineItem;

/// A position given either as a CFI or as a location index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CurrentLocation {
    Location(usize),
    Cfi(String),
}

impl From<usize> for CurrentLocation {
    fn from(location: usize) -> Self {
        CurrentLocation::Location(location)
    }
}

impl From<&str> for CurrentLocation {
    fn from(cfi: &str) -> Self {
        CurrentLocation::Cfi(cfi.to_string())
    }
}

#[derive(Debug)]
pub struct Locations {
    locations: Vec<String>,
    total: usize,
    break_chars: usize,
    current: usize,
    current_cfi: Option<String>,
    events: EventChannel<LocationsEvent>,
}

impl Default for Locations {
    fn default() -> Self {
        Self::new(DEFAULT_LOCATION_BREAK)
    }
}

impl Locations {
    pub fn new(break_chars: usize) -> Self {
        Self {
            locations: Vec::new(),
            total: 0,
            break_chars: break_chars.max(1),
            current: 0,
            current_cfi: None,
            events: EventChannel::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LocationsEvent> {
        self.events.subscribe()
    }

    /// Build the index from every chapter in the spine
    pub async fn generate(&mut self, spine: &[SpineItem], store: Arc<dyn ContentStore>) -> Result<usize> {
        let chapters: Vec<Chapter> = spine
            .iter()
            .map(|item| Chapter::new(item.clone(), store.clone()))
            .collect();
        self.generate_from_chapters(&chapters).await
    }

    /// Build the index from already bound chapters
    pub async fn generate_from_chapters(&mut self, chapters: &[Chapter]) -> Result<usize> {
        let mut locations = Vec::new();
        for chapter in chapters {
            let doc = chapter.load().await?;
            let found = self.process_chapter(&doc, chapter.cfi_base());
            debug!(href = %chapter.href(), locations = found.len(), "chapter processed");
            locations.extend(found);
        }

        self.set_locations(locations);
        if let Some(cfi) = self.current_cfi.clone() {
            self.set_current(CurrentLocation::Cfi(cfi));
        }
        Ok(self.locations.len())
    }

    /// Range CFIs of one chapter
    pub fn process_chapter(&self, doc: &Document, cfi_base: &str) -> Vec<String> {
        let Some(body) = doc.body() else {
            warn!(cfi_base, "chapter has no body");
            return Vec::new();
        };

        let mut found = Vec::new();
        let mut counter = 0usize;
        let mut start: Option<Boundary> = None;
        let mut last: Option<NodeId> = None;

        let text_nodes: Vec<NodeId> = doc.descendants(body).filter(|&n| doc.is_text(n)).collect();
        for node in text_nodes {
            let len = doc.text_len(node);
            if counter == 0 || start.is_none() {
                start = Some(Boundary::new(node, 0));
            }

            let mut pos = 0;
            let mut boundary = self.break_chars.saturating_sub(counter);
            while boundary < len {
                if let Some(from) = start {
                    let range = Range::new(from, Boundary::new(node, boundary));
                    found.push(cfi::generate_from_range(doc, &range, cfi_base));
                }
                counter = 0;
                pos = boundary + 1;
                start = Some(Boundary::new(node, pos));
                boundary = pos + self.break_chars;
            }

            counter += len.saturating_sub(pos);
            last = Some(node);
        }

        // Whatever is left after the last boundary
        if let (Some(from), Some(node)) = (start, last) {
            let range = Range::new(from, Boundary::new(node, doc.text_len(node)));
            found.push(cfi::generate_from_range(doc, &range, cfi_base));
        }
        found
    }

    fn set_locations(&mut self, locations: Vec<String>) {
        self.total = locations.len().saturating_sub(1);
        self.locations = locations;
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Index of the last location
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn locations(&self) -> &[String] {
        &self.locations
    }

    pub fn location_from_cfi(&self, cfi: &str) -> Option<usize> {
        if self.locations.is_empty() {
            return None;
        }
        Some(location_of(cfi, &self.locations))
    }

    pub fn percentage_from_cfi(&self, cfi: &str) -> Option<f64> {
        self.location_from_cfi(cfi)
            .map(|loc| self.percentage_from_location(loc))
    }

    pub fn percentage_from_location(&self, loc: usize) -> f64 {
        if loc == 0 || self.total == 0 {
            return 0.0;
        }
        loc as f64 / self.total as f64
    }

    pub fn cfi_from_location(&self, loc: usize) -> Option<&str> {
        self.locations.get(loc).map(String::as_str)
    }

    /// CFI at a fraction of the book. Values above 1 are read as percents.
    pub fn cfi_from_percentage(&self, percentage: f64) -> Option<&str> {
        let percentage = if percentage > 1.0 {
            percentage / 100.0
        } else {
            percentage
        };
        let loc = (self.total as f64 * percentage).ceil();
        if loc < 0.0 {
            return None;
        }
        self.cfi_from_location(loc as usize)
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn current_cfi(&self) -> Option<&str> {
        self.current_cfi.as_deref()
    }

    /// Record the reading position. Emits `Changed` once the index exists.
    pub fn set_current(&mut self, current: impl Into<CurrentLocation>) {
        let loc = match current.into() {
            CurrentLocation::Cfi(cfi) => {
                let loc = self.location_from_cfi(&cfi);
                self.current_cfi = Some(cfi);
                match loc {
                    Some(loc) => loc,
                    None => return,
                }
            }
            CurrentLocation::Location(loc) => {
                if self.locations.is_empty() {
                    self.current = loc;
                    return;
                }
                loc
            }
        };

        self.current = loc;
        self.events.emit(LocationsEvent::Changed {
            percentage: self.percentage_from_location(loc),
        });
    }

    /// Replace the index with a saved one
    pub fn load(&mut self, json: &str) -> Result<usize> {
        let locations: Vec<String> = serde_json::from_str(json)?;
        self.set_locations(locations);
        Ok(self.locations.len())
    }

    pub fn save(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.locations)?)
    }
}
