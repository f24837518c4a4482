//! Page map builder
//!
//! Walks the laid out chapter and records the CFI at which each column
//! starts and ends. Words are the unit of measurement: the first word whose
//! right edge passes the current column limit opens the next page.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::surface::{Direction, Rect, RenderSurface};
use crate::cfi::generate_from_range;
use crate::dom::{Document, NodeId, Range};

/// Characters a line may break at
const BREAKABLE: &[char] = &['-', ' ', '\t', '\r', '\n', '\u{8}', '\u{c}'];

/// CFIs bounding one page of the current chapter layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMapEntry {
    pub start: String,
    pub end: String,
}

/// Split a text node into word ranges at breakable characters
pub fn word_ranges(doc: &Document, node: NodeId) -> Vec<Range> {
    let Some(text) = doc.text(node) else {
        return Vec::new();
    };
    let mut ranges = Vec::new();
    let mut start = None;
    let mut len = 0;
    for (i, ch) in text.chars().enumerate() {
        if BREAKABLE.contains(&ch) {
            if let Some(s) = start.take() {
                ranges.push(Range::text(node, s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
        len = i + 1;
    }
    if let Some(s) = start {
        ranges.push(Range::text(node, s, len));
    }
    ranges
}

struct OpenEntry {
    start: String,
    end: Option<String>,
}

/// Build the page map for the chapter loaded in `surface`.
///
/// `offset` is the scroll position the measurements were taken at. Right to
/// left content is measured left to right and restored afterwards.
pub fn map_pages(
    surface: &mut dyn RenderSurface,
    base: &str,
    column_width: f64,
    gap: f64,
    offset: f64,
) -> Vec<PageMapEntry> {
    let direction = surface.direction();
    if direction == Direction::Rtl {
        surface.set_direction(Direction::Ltr);
        surface.reflow();
    }

    let map = walk(&*surface, base, column_width, gap, offset);

    if direction == Direction::Rtl {
        surface.set_direction(direction);
        surface.reflow();
    }
    map
}

fn walk(
    surface: &dyn RenderSurface,
    base: &str,
    column_width: f64,
    gap: f64,
    offset: f64,
) -> Vec<PageMapEntry> {
    let Some(doc) = surface.document() else {
        return Vec::new();
    };
    let Some(root) = doc.body().or_else(|| doc.document_element()) else {
        return Vec::new();
    };

    let width = column_width + gap;
    let mut page: usize = 1;
    let mut limit = width * page as f64 - offset;
    let mut el_limit = 0.0;
    let mut map: Vec<OpenEntry> = Vec::new();
    let mut prev: Option<Range> = None;
    let mut element_rects: HashMap<NodeId, Option<Rect>> = HashMap::new();

    let cfi_at = |range: &Range| generate_from_range(doc, &range.collapse(true), base);

    // Text nodes in document order, each measured once
    for node in doc.descendants(root).filter(|&n| doc.is_text(n)) {
        let Some(parent) = doc.parent(node) else {
            continue;
        };
        let rect = *element_rects
            .entry(parent)
            .or_insert_with(|| surface.element_rect(parent));
        let Some(rect) = rect.filter(|r| !r.is_empty()) else {
            continue;
        };
        if !(rect.left > el_limit || rect.right() > el_limit) {
            continue;
        }
        if doc.text(node).map(|t| t.trim().is_empty()).unwrap_or(true) {
            continue;
        }

        for word in word_ranges(doc, node) {
            let Some(pos) = surface.range_rect(&word).filter(|r| !r.is_empty()) else {
                continue;
            };

            if pos.right() < limit {
                if map.len() < page {
                    map.push(OpenEntry {
                        start: cfi_at(&word),
                        end: None,
                    });
                }
            } else {
                if let (Some(p), Some(last)) = (prev.as_ref(), map.last_mut()) {
                    last.end = Some(cfi_at(p));
                }

                let cfi = cfi_at(&word);
                // Columns without text still occupy a page
                let column = ((pos.left + offset) / width).floor().max(0.0) as usize + 1;
                let target = column.max(page + 1);
                while map.len() + 1 < target {
                    map.push(OpenEntry {
                        start: cfi.clone(),
                        end: Some(cfi.clone()),
                    });
                }
                map.push(OpenEntry {
                    start: cfi,
                    end: None,
                });

                page = target;
                limit = width * page as f64 - offset;
                el_limit = limit;
            }

            prev = Some(word);
        }
    }

    if let (Some(p), Some(last)) = (prev.as_ref(), map.last_mut()) {
        last.end = Some(cfi_at(p));
    }

    if map.is_empty() {
        let cfi = cfi_at(&Range::select_node_contents(doc, root));
        debug!(cfi = %cfi, "no breakable content, single page");
        return vec![PageMapEntry {
            start: cfi.clone(),
            end: cfi,
        }];
    }

    map.into_iter()
        .map(|entry| PageMapEntry {
            end: entry.end.unwrap_or_else(|| entry.start.clone()),
            start: entry.start,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfi::{compare, find_text_node, parse};
    use crate::layout::{Layout, Reflowable};
    use crate::render::FlowSurface;
    use std::cmp::Ordering;

    const BASE: &str = "/6/2[ch01]";

    fn laid_out(body: &str, width: f64, height: f64, gap: f64) -> (FlowSurface, Reflowable) {
        let doc = Document::parse(&format!("<html><head></head><body>{}</body></html>", body)).unwrap();
        let mut surface = FlowSurface::new(width, height);
        surface.load(doc, "ch01.xhtml");
        let mut layout = Reflowable::new();
        layout.format(&mut surface, width, height, Some(gap));
        (surface, layout)
    }

    fn map(surface: &mut FlowSurface, layout: &Reflowable) -> Vec<PageMapEntry> {
        map_pages(surface, BASE, layout.column_width(), layout.gap(), 0.0)
    }

    #[test]
    fn test_word_ranges() {
        let doc = Document::parse("<p>well-known  words\there</p>").unwrap();
        let p = doc.document_element().unwrap();
        let text = doc.nth_text_child(p, 0).unwrap();
        let words: Vec<(usize, usize)> = word_ranges(&doc, text)
            .iter()
            .map(|r| (r.start.offset, r.end.offset))
            .collect();
        assert_eq!(words, vec![(0, 4), (5, 10), (12, 17), (18, 22)]);
    }

    #[test]
    fn test_one_entry_per_column() {
        // 10 chars per line, 2 lines per column
        let (mut surface, layout) = laid_out(
            "<p>aaaa bbbb cccc dddd</p><p>eeee ffff gggg hhhh</p><p>iiii</p>",
            80.0,
            32.0,
            20.0,
        );
        let entries = map(&mut surface, &layout);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].start, "epubcfi(/6/2[ch01]!/4/2/1:0)");
        assert_eq!(entries[0].end, "epubcfi(/6/2[ch01]!/4/2/1:15)");
        assert_eq!(entries[1].start, "epubcfi(/6/2[ch01]!/4/4/1:0)");
        assert_eq!(entries[2].start, "epubcfi(/6/2[ch01]!/4/6/1:0)");
        assert_eq!(entries[2].end, entries[2].start);
    }

    #[test]
    fn test_entries_are_ordered() {
        let text = "lorem ipsum dolor sit amet consectetur adipiscing elit ".repeat(12);
        let (mut surface, layout) = laid_out(
            &format!("<p>{}</p><div><p>{}</p></div>", text, text),
            120.0,
            64.0,
            16.0,
        );
        let entries = map(&mut surface, &layout);
        assert!(entries.len() > 3);

        for entry in &entries {
            assert_ne!(compare(&parse(&entry.start), &parse(&entry.end)), Ordering::Greater);
        }
        for pair in entries.windows(2) {
            assert_ne!(
                compare(&parse(&pair[0].end), &parse(&pair[1].start)),
                Ordering::Greater
            );
        }
    }

    #[test]
    fn test_starts_resolve_to_text() {
        let (mut surface, layout) = laid_out(
            "<p>aaaa bbbb cccc dddd eeee ffff</p>",
            80.0,
            32.0,
            20.0,
        );
        let entries = map(&mut surface, &layout);
        assert_eq!(entries.len(), 2);
        let doc = surface.document().unwrap();
        let cfi = parse(&entries[1].start);
        assert!(find_text_node(&cfi, doc).is_some());
        assert_eq!(cfi.character_offset, Some(20));
    }

    #[test]
    fn test_image_column_gets_filler_page() {
        // The image fills column 2 on its own
        let (mut surface, layout) = laid_out(
            "<p>aaaa</p><p>bbbb</p><img src=\"a.png\"/><img src=\"b.png\"/><p>cccc</p>",
            80.0,
            32.0,
            20.0,
        );
        let entries = map(&mut surface, &layout);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].start, entries[1].end);
        assert_eq!(entries[1].start, entries[2].start);
    }

    #[test]
    fn test_empty_chapter_single_entry() {
        let (mut surface, layout) = laid_out("", 80.0, 32.0, 20.0);
        let entries = map(&mut surface, &layout);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].start, entries[0].end);
    }

    #[test]
    fn test_rtl_restored() {
        let (mut surface, layout) = laid_out("<p>aaaa bbbb</p>", 80.0, 32.0, 20.0);
        surface.set_direction(Direction::Rtl);
        let entries = map(&mut surface, &layout);
        assert_eq!(entries.len(), 1);
        assert_eq!(surface.direction(), Direction::Rtl);
    }
}
