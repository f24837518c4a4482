//! Chapter renderer
//!
//! Owns the render surface and the navigation state of the chapter on
//! screen: the layout, the page map, the current page and the location CFI.
//!
//! ```text
//!   display_chapter ──► Loading ──load()──► hooks ──► page map ──► Idle
//!                          │      └─abort_load()──────────────────► Idle
//!                   tasks queued here                      queued tasks replayed
//!
//!   reformat ──► Moving ──► format ──► page map ──► Idle
//! ```
//!
//! Page and CFI requests that arrive while the gate is held are queued as
//! [`RendererTask`] values and replayed in order once it clears. The chapter
//! on screen is only replaced when the next one loads; a failed load leaves
//! it displayed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::page_map::{map_pages, PageMapEntry};
use super::surface::{Direction, Rect, RenderSurface};
use crate::cfi::{self, add_marker, range_from_cfi, remove_marker, EpubCfi};
use crate::config::ReaderSettings;
use crate::dom::{Document, NodeId};
use crate::error::{ReaderError, Result};
use crate::events::{EventChannel, RendererEvent, VisibleRange};
use crate::hooks::{HookContext, HookList};
use crate::layout::{
    create_layout, determine_layout, reconcile_layout_settings, spreads_allowed, Formatted, Layout,
    LayoutMethod, LayoutSettings,
};
use crate::package::SpineItem;
use crate::queue::TaskQueue;

/// Renderer gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RenderState {
    #[default]
    Idle,
    /// A chapter has been requested and its document is not laid out yet
    Loading,
    /// The displayed chapter is being laid out again
    Moving,
}

/// Navigation deferred until the chapter is laid out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RendererTask {
    Page(u32),
    GotoCfi(String),
    FirstPage,
    LastPage,
    Section(String),
}

/// Lays out one chapter at a time and pages through it
pub struct Renderer {
    surface: Box<dyn RenderSurface>,
    events: EventChannel<RendererEvent>,
    hooks: HookList,
    queue: TaskQueue<RendererTask>,
    state: RenderState,

    chapter: Option<SpineItem>,
    pending: Option<(SpineItem, LayoutSettings)>,
    layout_settings: LayoutSettings,
    layout: Option<Box<dyn Layout>>,
    formatted: Formatted,
    page_count: u32,

    page_map: Option<Vec<PageMapEntry>>,
    chapter_pos: u32,
    displayed_pages: u32,

    spreads: bool,
    forced_single: bool,
    min_spread_width: Option<f64>,
    gap: Option<f64>,
    width: f64,
    height: f64,
    direction: Direction,

    current_location_cfi: Option<String>,
    visible_range: Option<VisibleRange>,

    styles: BTreeMap<String, String>,
    head_tags: BTreeMap<String, BTreeMap<String, String>>,
}

impl Renderer {
    pub fn new(mut surface: Box<dyn RenderSurface>, settings: &ReaderSettings) -> Self {
        let width = settings.width.unwrap_or_else(|| surface.width());
        let height = settings.height.unwrap_or_else(|| surface.height());
        surface.resize(width, height);

        Self {
            surface,
            events: EventChannel::new(),
            hooks: HookList::new(),
            queue: TaskQueue::new(),
            state: RenderState::Idle,
            chapter: None,
            pending: None,
            layout_settings: LayoutSettings::default(),
            layout: None,
            formatted: Formatted::default(),
            page_count: 0,
            page_map: None,
            chapter_pos: 1,
            displayed_pages: 0,
            spreads: false,
            forced_single: !settings.spreads,
            min_spread_width: settings.min_spread_width,
            gap: settings.gap,
            width,
            height,
            direction: Direction::Ltr,
            current_location_cfi: None,
            visible_range: None,
            styles: settings.styles.clone(),
            head_tags: settings.head_tags.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RendererEvent> {
        self.events.subscribe()
    }

    /// Hooks run before each chapter is displayed
    pub fn hooks_mut(&mut self) -> &mut HookList {
        &mut self.hooks
    }

    // ------------------------------------------------------------------
    // Chapter loading
    // ------------------------------------------------------------------

    /// Start displaying a chapter. The caller fetches its document and
    /// hands it to [`Renderer::load`].
    pub fn display_chapter(&mut self, chapter: &SpineItem, global: &LayoutSettings) -> Result<()> {
        match self.state {
            RenderState::Idle => {}
            RenderState::Loading => {
                error!(href = %chapter.href, "Rendering In Progress");
                return Err(ReaderError::Busy("chapter load in progress"));
            }
            RenderState::Moving => {
                error!(href = %chapter.href, "Moving In Progress");
                return Err(ReaderError::Busy("page move in progress"));
            }
        }

        let settings = reconcile_layout_settings(global, &chapter.properties);
        self.pending = Some((chapter.clone(), settings));
        self.state = RenderState::Loading;
        debug!(href = %chapter.href, spine_pos = chapter.index, "displaying chapter");
        Ok(())
    }

    /// Lay out the document of the chapter being displayed
    pub async fn load(&mut self, document: Document) -> Result<()> {
        let Some((chapter, settings)) = self.pending.take() else {
            self.state = RenderState::Idle;
            return Err(ReaderError::NotFound("no chapter to load".into()));
        };

        if let Some(previous) = self.chapter.take() {
            self.surface.unload();
            self.page_map = None;
            self.events.emit(RendererEvent::ChapterUnloaded {
                spine_pos: previous.index,
                href: previous.href,
            });
        }
        self.layout_settings = settings;
        self.chapter = Some(chapter.clone());
        self.chapter_pos = 1;

        self.surface.load(document, &chapter.url);
        self.surface.set_direction(self.direction);
        for (property, value) in &self.styles {
            self.surface.set_style(property, value);
        }
        for (tag, attributes) in &self.head_tags {
            self.surface.add_head_tag(tag, attributes);
        }

        let (method, spreads) = determine_layout(&self.layout_settings, self.spreads_allowed());
        self.set_spreads(spreads);
        self.layout = Some(create_layout(method));
        self.format();

        if let Some(document) = self.surface.document() {
            let ctx = HookContext {
                href: &chapter.href,
                spine_pos: chapter.index,
                document,
            };
            self.hooks.run(&ctx).await;
        }

        let queued = self.queue.len();
        self.state = RenderState::Idle;
        self.update_pages();

        self.visible_range = self.compute_visible_range();
        self.current_location_cfi = self.visible_range.as_ref().map(|r| r.start.clone());
        if queued == 0 {
            self.emit_location();
        }
        self.flush_queue();

        self.events.emit(RendererEvent::ChapterDisplayed {
            spine_pos: chapter.index,
            href: chapter.href,
            pages: self.displayed_pages,
        });
        Ok(())
    }

    /// The chapter document could not be fetched. The displayed chapter
    /// stays on screen and tasks queued for the failed one are dropped.
    pub fn abort_load(&mut self) {
        if let Some((chapter, _)) = self.pending.take() {
            debug!(href = %chapter.href, dropped = self.queue.len(), "chapter load aborted");
        }
        self.queue.clear();
        self.state = RenderState::Idle;
    }

    /// Drop the displayed chapter
    pub fn unload(&mut self) {
        if let Some(previous) = self.chapter.take() {
            self.events.emit(RendererEvent::ChapterUnloaded {
                spine_pos: previous.index,
                href: previous.href,
            });
        }
        self.pending = None;
        self.surface.unload();
        self.page_map = None;
        self.visible_range = None;
        self.queue.clear();
        self.state = RenderState::Idle;
    }

    fn format(&mut self) {
        let Some(layout) = self.layout.as_mut() else {
            return;
        };
        self.formatted = layout.format(self.surface.as_mut(), self.width, self.height, self.gap);
        self.page_count = layout.calculate_pages(self.surface.as_mut()).page_count;
    }

    /// Rebuild the page map at the current scroll position
    fn update_pages(&mut self) {
        let Some(layout) = self.layout.as_ref() else {
            return;
        };
        let (column_width, gap) = (layout.column_width(), layout.gap());
        let base = self
            .chapter
            .as_ref()
            .map(|c| c.cfi_base.clone())
            .unwrap_or_default();

        let left = self.left_for(self.chapter_pos);
        self.surface.set_left(left);
        let map = map_pages(self.surface.as_mut(), &base, column_width, gap, left.abs());

        let len = map.len() as u32;
        self.displayed_pages = if self.spreads { len.div_ceil(2) } else { len };
        debug!(pages = len, displayed = self.displayed_pages, "page map built");
        self.page_map = Some(map);
    }

    fn flush_queue(&mut self) {
        for task in self.queue.drain() {
            debug!(?task, "replaying queued task");
            match task {
                RendererTask::Page(pg) => {
                    self.page(pg);
                }
                RendererTask::GotoCfi(cfi) => self.goto_cfi(&cfi),
                RendererTask::FirstPage => self.first_page(),
                RendererTask::LastPage => self.last_page(),
                RendererTask::Section(fragment) => {
                    self.section(&fragment);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Page navigation
    // ------------------------------------------------------------------

    fn left_for(&self, pg: u32) -> f64 {
        let left = self.formatted.page_width * pg.saturating_sub(1) as f64;
        match self.direction {
            Direction::Rtl => -left,
            Direction::Ltr => left,
        }
    }

    /// Show page `pg` (1-based) of the chapter. Returns false when the page
    /// is outside the chapter.
    pub fn page(&mut self, pg: u32) -> bool {
        if self.is_gated() {
            debug!(page = pg, state = ?self.state, "page queued");
            self.queue.enqueue(RendererTask::Page(pg));
            return true;
        }
        if self.page_map.is_none() {
            return false;
        }

        if pg < 1 || pg > self.displayed_pages {
            return false;
        }

        self.chapter_pos = pg;
        let left = self.left_for(pg);
        self.surface.set_left(left);

        self.visible_range = self.compute_visible_range();
        self.current_location_cfi = self.visible_range.as_ref().map(|r| r.start.clone());
        self.emit_location();
        true
    }

    pub fn next_page(&mut self) -> bool {
        self.page(self.chapter_pos + 1)
    }

    pub fn prev_page(&mut self) -> bool {
        match self.chapter_pos.checked_sub(1) {
            Some(pg) => self.page(pg),
            None => false,
        }
    }

    pub fn first_page(&mut self) {
        if self.is_gated() {
            self.queue.enqueue(RendererTask::FirstPage);
            return;
        }
        self.page(1);
    }

    pub fn last_page(&mut self) {
        if self.is_gated() {
            self.queue.enqueue(RendererTask::LastPage);
            return;
        }
        self.page(self.displayed_pages);
    }

    /// Show the page holding the element with id `fragment`
    pub fn section(&mut self, fragment: &str) -> bool {
        if self.is_gated() {
            self.queue.enqueue(RendererTask::Section(fragment.to_string()));
            return true;
        }
        let node = self
            .surface
            .document()
            .and_then(|doc| doc.get_element_by_id(fragment));
        match node {
            Some(node) => self.page_of_element(node),
            None => {
                warn!(fragment, "section not found");
                false
            }
        }
    }

    /// Show the page an element starts on
    pub fn page_of_element(&mut self, node: NodeId) -> bool {
        match self.surface.element_rect(node) {
            Some(rect) => {
                let pg = self.page_of_rect(&rect);
                self.page(pg)
            }
            None => false,
        }
    }

    fn page_of_rect(&self, rect: &Rect) -> u32 {
        let page_width = self.formatted.page_width;
        if page_width <= 0.0 {
            return 1;
        }
        let left = self.surface.left().abs() + rect.left;
        (left / page_width).floor().max(0.0) as u32 + 1
    }

    /// Show the page holding a CFI. A CFI that does not resolve in this
    /// chapter shows the first page.
    pub fn goto_cfi(&mut self, cfi_str: &str) {
        if self.is_gated() {
            self.queue.enqueue(RendererTask::GotoCfi(cfi_str.to_string()));
            return;
        }

        let cfi = cfi::parse(cfi_str);
        match self.page_of_cfi(&cfi) {
            Some(pg) => {
                self.page(pg);
                self.current_location_cfi = Some(cfi_str.to_string());
            }
            None => {
                error!(cfi = cfi_str, "CFI not found in chapter, showing first page");
                self.page(1);
            }
        }
    }

    fn page_of_cfi(&mut self, cfi: &EpubCfi) -> Option<u32> {
        let chapter = self.chapter.as_ref()?;
        if cfi.spine_index() != Some(chapter.index) {
            warn!(cfi = %cfi, spine_pos = chapter.index, "CFI is for another chapter");
            return None;
        }

        if !self.surface.supports_ranges() {
            let marker = add_marker(cfi, self.surface.document_mut()?)?;
            self.surface.reflow();
            let rect = self.surface.element_rect(marker);
            if let Some(doc) = self.surface.document_mut() {
                remove_marker(doc, marker);
            }
            self.surface.reflow();
            return rect.map(|r| self.page_of_rect(&r));
        }

        let range = range_from_cfi(cfi, self.surface.document()?)?;
        let pg = match self.surface.range_rect(&range) {
            Some(rect) => self.page_of_rect(&rect),
            None => 1,
        };
        Some(pg)
    }

    // ------------------------------------------------------------------
    // Reflow
    // ------------------------------------------------------------------

    /// Lay the chapter out again and return to the current location
    pub fn reformat(&mut self) {
        if self.chapter.is_none() || self.surface.document().is_none() {
            return;
        }
        // A pending load formats with the current size
        if self.is_gated() {
            return;
        }

        let (method, spreads) = determine_layout(&self.layout_settings, self.spreads_allowed());
        if spreads != self.spreads || self.layout.is_none() {
            self.set_spreads(spreads);
            self.layout = Some(create_layout(method));
        }

        let cfi = self.current_location_cfi.clone();
        self.begin_move();
        self.chapter_pos = 1;
        self.surface.set_left(0.0);
        self.format();
        self.update_pages();
        if let Some(cfi) = cfi {
            self.queue.enqueue(RendererTask::GotoCfi(cfi));
        }
        self.end_move();
    }

    fn begin_move(&mut self) {
        self.state = RenderState::Moving;
    }

    /// Clear the move gate and replay what queued behind it
    fn end_move(&mut self) {
        self.state = RenderState::Idle;
        self.flush_queue();
    }

    pub fn resize(&mut self, width: f64, height: f64) {
        self.width = width;
        self.height = height;
        self.surface.resize(width, height);
        if self.surface.document().is_some() {
            self.reformat();
        }
        self.events.emit(RendererEvent::Resized { width, height });
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    fn spreads_allowed(&self) -> bool {
        spreads_allowed(self.width, self.min_spread_width, self.forced_single)
    }

    fn set_spreads(&mut self, spreads: bool) {
        if spreads != self.spreads {
            self.spreads = spreads;
            self.events.emit(RendererEvent::SpreadsChanged { spreads });
        }
    }

    /// Disable or allow two page spreads. Takes effect on the next reformat.
    pub fn force_single(&mut self, single: bool) {
        self.forced_single = single;
    }

    pub fn set_min_spread_width(&mut self, width: Option<f64>) {
        self.min_spread_width = width;
    }

    /// Column gap, `None` for the automatic gap
    pub fn set_gap(&mut self, gap: Option<f64>) {
        self.gap = gap;
    }

    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
        self.surface.set_direction(direction);
    }

    pub fn set_style(&mut self, property: &str, value: &str) {
        self.styles.insert(property.to_string(), value.to_string());
        self.surface.set_style(property, value);
    }

    pub fn remove_style(&mut self, property: &str) {
        self.styles.remove(property);
        self.surface.remove_style(property);
    }

    pub fn add_head_tag(&mut self, tag: &str, attributes: BTreeMap<String, String>) {
        self.surface.add_head_tag(tag, &attributes);
        self.head_tags.insert(tag.to_string(), attributes);
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    fn compute_visible_range(&self) -> Option<VisibleRange> {
        let map = self.page_map.as_ref()?;
        let last = map.last()?;
        let pos = self.chapter_pos as usize;

        if self.spreads {
            let pg = pos * 2;
            let start = pg.checked_sub(2).and_then(|i| map.get(i)).unwrap_or(last);
            let end = if self.page_count > 1 {
                map.get(pg - 1).unwrap_or(start)
            } else {
                start
            };
            Some(VisibleRange {
                start: start.start.clone(),
                end: end.end.clone(),
            })
        } else {
            let entry = pos.checked_sub(1).and_then(|i| map.get(i)).unwrap_or(last);
            Some(VisibleRange {
                start: entry.start.clone(),
                end: entry.end.clone(),
            })
        }
    }

    fn emit_location(&self) {
        let Some(range) = self.visible_range.clone() else {
            return;
        };
        self.events.emit(RendererEvent::LocationChanged {
            cfi: range.start.clone(),
        });
        self.events.emit(RendererEvent::VisibleRangeChanged {
            range,
            page: self.chapter_pos,
        });
    }

    fn is_gated(&self) -> bool {
        self.state != RenderState::Idle
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn chapter(&self) -> Option<&SpineItem> {
        self.chapter.as_ref()
    }

    pub fn spine_pos(&self) -> Option<usize> {
        self.chapter.as_ref().map(|c| c.index)
    }

    /// Current page of the chapter, 1-based
    pub fn chapter_pos(&self) -> u32 {
        self.chapter_pos
    }

    pub fn displayed_pages(&self) -> u32 {
        self.displayed_pages
    }

    pub fn page_map(&self) -> Option<&[PageMapEntry]> {
        self.page_map.as_deref()
    }

    pub fn spreads(&self) -> bool {
        self.spreads
    }

    pub fn layout_method(&self) -> Option<LayoutMethod> {
        self.layout.as_ref().map(|l| l.method())
    }

    pub fn formatted(&self) -> Formatted {
        self.formatted
    }

    pub fn current_location_cfi(&self) -> Option<&str> {
        self.current_location_cfi.as_deref()
    }

    pub fn visible_range(&self) -> Option<&VisibleRange> {
        self.visible_range.as_ref()
    }

    pub fn queued_tasks(&self) -> usize {
        self.queue.len()
    }

    pub fn surface(&self) -> &dyn RenderSurface {
        self.surface.as_ref()
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    /// Pages of the chapter as the reader counts them
    pub fn pages_in_current_chapter(&self) -> Option<u32> {
        let len = self.page_map.as_ref()?.len() as u32;
        Some(if self.spreads { len.div_ceil(2) } else { len })
    }

    /// Rendered (column) page on screen; with spreads this is the right page
    pub fn current_rendered_page(&self) -> Option<u32> {
        self.page_map.as_ref()?;
        Some(if self.spreads && self.page_count > 1 {
            self.chapter_pos * 2
        } else {
            self.chapter_pos
        })
    }

    /// Rendered pages after the current one
    pub fn rendered_pages_left(&self) -> Option<u32> {
        let len = self.page_map.as_ref()?.len() as u32;
        let pg = if self.spreads {
            self.chapter_pos * 2
        } else {
            self.chapter_pos
        };
        Some(len.saturating_sub(pg))
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("state", &self.state)
            .field("chapter", &self.chapter.as_ref().map(|c| &c.href))
            .field("chapter_pos", &self.chapter_pos)
            .field("displayed_pages", &self.displayed_pages)
            .field("spreads", &self.spreads)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::FnHook;
    use crate::render::FlowSurface;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// 45 four-letter words fill three 600px lines exactly
    fn paragraph(word: &str) -> String {
        format!("<p>{}</p>", vec![word; 45].join(" "))
    }

    fn chapter_doc(paragraphs: &[&str]) -> Document {
        let body: String = paragraphs.iter().map(|w| paragraph(w)).collect();
        Document::parse(&format!(
            "<html><head><title>c</title></head><body>{}</body></html>",
            body
        ))
        .unwrap()
    }

    fn spine_item(index: usize, id: &str) -> SpineItem {
        SpineItem {
            id: id.to_string(),
            href: format!("{}.xhtml", id),
            url: format!("OEBPS/{}.xhtml", id),
            index,
            linear: true,
            properties: Vec::new(),
            cfi_base: format!("/6/{}[{}]", (index + 1) * 2, id),
        }
    }

    fn settings() -> ReaderSettings {
        ReaderSettings {
            width: Some(600.0),
            height: Some(48.0),
            gap: Some(75.0),
            ..ReaderSettings::default()
        }
    }

    async fn loaded(paragraphs: &[&str]) -> Renderer {
        let mut renderer = Renderer::new(Box::new(FlowSurface::new(600.0, 48.0)), &settings());
        renderer
            .display_chapter(&spine_item(0, "ch01"), &LayoutSettings::default())
            .unwrap();
        renderer.load(chapter_doc(paragraphs)).await.unwrap();
        renderer
    }

    fn drain(rx: &mut broadcast::Receiver<RendererEvent>) -> Vec<RendererEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_three_columns_three_pages() {
        let mut renderer = loaded(&["aaaa", "bbbb", "cccc"]).await;

        assert_eq!(renderer.formatted().page_width, 675.0);
        assert_eq!(renderer.layout_method(), Some(LayoutMethod::Reflowable));
        assert_eq!(renderer.displayed_pages(), 3);
        assert_eq!(renderer.chapter_pos(), 1);
        assert_eq!(
            renderer.current_location_cfi(),
            Some("epubcfi(/6/2[ch01]!/4/2/1:0)")
        );

        let mut rx = renderer.subscribe();
        assert!(renderer.page(2));
        assert_eq!(renderer.chapter_pos(), 2);
        assert_eq!(renderer.surface().left(), 675.0);

        let second = renderer.page_map().unwrap()[1].start.clone();
        assert_eq!(second, "epubcfi(/6/2[ch01]!/4/4/1:0)");
        let events = drain(&mut rx);
        assert_eq!(events[0], RendererEvent::LocationChanged { cfi: second });
        assert!(matches!(
            events[1],
            RendererEvent::VisibleRangeChanged { page: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_out_of_range_pages_are_ignored() {
        let mut renderer = loaded(&["aaaa", "bbbb", "cccc"]).await;
        let mut rx = renderer.subscribe();

        assert!(!renderer.page(0));
        assert!(!renderer.page(4));
        assert_eq!(renderer.chapter_pos(), 1);
        assert!(drain(&mut rx).is_empty());

        assert!(!renderer.prev_page());
        assert!(renderer.next_page());
        assert!(renderer.next_page());
        assert!(!renderer.next_page());
        assert_eq!(renderer.chapter_pos(), 3);
        assert_eq!(renderer.rendered_pages_left(), Some(0));
    }

    #[tokio::test]
    async fn test_reformat_is_idempotent() {
        let mut renderer = loaded(&["aaaa", "bbbb", "cccc"]).await;
        renderer.page(3);

        renderer.reformat();
        let map = renderer.page_map().unwrap().to_vec();
        let cfi = renderer.current_location_cfi().map(str::to_string);
        assert_eq!(renderer.chapter_pos(), 3);

        renderer.reformat();
        assert_eq!(renderer.page_map().unwrap(), map.as_slice());
        assert_eq!(renderer.current_location_cfi().map(str::to_string), cfi);
        assert_eq!(renderer.chapter_pos(), 3);
    }

    #[tokio::test]
    async fn test_tasks_queue_while_loading() {
        let mut renderer = Renderer::new(Box::new(FlowSurface::new(600.0, 48.0)), &settings());
        renderer
            .display_chapter(&spine_item(0, "ch01"), &LayoutSettings::default())
            .unwrap();
        assert_eq!(renderer.state(), RenderState::Loading);

        assert!(renderer
            .display_chapter(&spine_item(1, "ch02"), &LayoutSettings::default())
            .is_err());

        renderer.last_page();
        renderer.goto_cfi("epubcfi(/6/2[ch01]!/4/4/1:0)");
        assert_eq!(renderer.queued_tasks(), 2);

        let mut rx = renderer.subscribe();
        renderer
            .load(chapter_doc(&["aaaa", "bbbb", "cccc"]))
            .await
            .unwrap();

        assert_eq!(renderer.queued_tasks(), 0);
        assert_eq!(renderer.chapter_pos(), 2);
        assert_eq!(
            renderer.current_location_cfi(),
            Some("epubcfi(/6/2[ch01]!/4/4/1:0)")
        );
        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(RendererEvent::ChapterDisplayed { pages: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_goto_cfi_miss_shows_first_page() {
        let mut renderer = loaded(&["aaaa", "bbbb", "cccc"]).await;
        renderer.page(3);

        renderer.goto_cfi("epubcfi(/6/2[ch01]!/4/40/1:0)");
        assert_eq!(renderer.chapter_pos(), 1);

        renderer.page(3);
        renderer.goto_cfi("epubcfi(/6/4[ch02]!/4/2/1:0)");
        assert_eq!(renderer.chapter_pos(), 1);
    }

    #[tokio::test]
    async fn test_goto_cfi_with_markers() {
        let mut surface = FlowSurface::new(600.0, 48.0);
        surface.set_ranges_supported(false);
        let mut renderer = Renderer::new(Box::new(surface), &settings());
        renderer
            .display_chapter(&spine_item(0, "ch01"), &LayoutSettings::default())
            .unwrap();
        renderer
            .load(chapter_doc(&["aaaa", "bbbb", "cccc"]))
            .await
            .unwrap();

        renderer.goto_cfi("epubcfi(/6/2[ch01]!/4/6/1:10)");
        assert_eq!(renderer.chapter_pos(), 3);

        // The marker is gone and the text is whole again
        let doc = renderer.surface().document().unwrap();
        assert!(!doc
            .descendants(doc.root())
            .any(|n| doc.has_class(n, cfi::MARKER_CLASS)));
        let p = doc.nth_element_child(doc.body().unwrap(), 2).unwrap();
        assert_eq!(doc.text_children(p).count(), 1);
    }

    #[tokio::test]
    async fn test_section_and_spreads() {
        let mut renderer = Renderer::new(
            Box::new(FlowSurface::new(600.0, 48.0)),
            &ReaderSettings {
                width: Some(600.0),
                height: Some(48.0),
                gap: Some(20.0),
                min_spread_width: Some(500.0),
                ..ReaderSettings::default()
            },
        );
        renderer
            .display_chapter(&spine_item(0, "ch01"), &LayoutSettings::default())
            .unwrap();
        let doc = Document::parse(
            "<html><body><p>one</p><p>two</p><p>three</p><p>four</p><p>five</p><p>six</p><p id=\"end\">seven</p></body></html>",
        )
        .unwrap();
        renderer.load(doc).await.unwrap();

        // 290px columns hold three lines each
        assert!(renderer.spreads());
        assert_eq!(renderer.page_map().unwrap().len(), 3);
        assert_eq!(renderer.displayed_pages(), 2);
        assert_eq!(renderer.pages_in_current_chapter(), Some(2));

        assert!(renderer.section("end"));
        assert_eq!(renderer.chapter_pos(), 2);
        assert_eq!(renderer.current_rendered_page(), Some(4));

        renderer.force_single(true);
        renderer.reformat();
        assert!(!renderer.spreads());
        assert_eq!(renderer.displayed_pages(), 3);
    }

    #[tokio::test]
    async fn test_hooks_run_before_display() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let mut renderer = Renderer::new(Box::new(FlowSurface::new(600.0, 48.0)), &settings());
        renderer.hooks_mut().register(Arc::new(FnHook::new("count", move |ctx| {
            assert!(ctx.document.body().is_some());
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })));
        renderer
            .display_chapter(&spine_item(0, "ch01"), &LayoutSettings::default())
            .unwrap();
        renderer.load(chapter_doc(&["aaaa"])).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unload_emitted_on_next_chapter() {
        let mut renderer = loaded(&["aaaa"]).await;
        let mut rx = renderer.subscribe();

        renderer
            .display_chapter(&spine_item(1, "ch02"), &LayoutSettings::default())
            .unwrap();
        assert!(renderer.page_map().is_some());
        assert_eq!(renderer.spine_pos(), Some(0));
        assert!(drain(&mut rx).is_empty());

        renderer.load(chapter_doc(&["bbbb"])).await.unwrap();
        assert_eq!(renderer.spine_pos(), Some(1));
        assert_eq!(
            drain(&mut rx).first(),
            Some(&RendererEvent::ChapterUnloaded {
                spine_pos: 0,
                href: "ch01.xhtml".into()
            })
        );
    }

    #[tokio::test]
    async fn test_failed_load_keeps_chapter_on_screen() {
        let mut renderer = loaded(&["aaaa", "bbbb", "cccc"]).await;

        renderer
            .display_chapter(&spine_item(1, "ch02"), &LayoutSettings::default())
            .unwrap();
        renderer.last_page();
        assert_eq!(renderer.queued_tasks(), 1);

        renderer.abort_load();
        assert_eq!(renderer.state(), RenderState::Idle);
        assert_eq!(renderer.queued_tasks(), 0);
        assert_eq!(renderer.spine_pos(), Some(0));
        assert_eq!(renderer.displayed_pages(), 3);

        assert!(renderer.next_page());
        assert_eq!(renderer.chapter_pos(), 2);
        assert_eq!(
            renderer.current_location_cfi(),
            Some("epubcfi(/6/2[ch01]!/4/4/1:0)")
        );
        assert_eq!(renderer.queued_tasks(), 0);
    }

    #[tokio::test]
    async fn test_page_without_chapter_is_refused() {
        let mut renderer = Renderer::new(Box::new(FlowSurface::new(600.0, 48.0)), &settings());
        renderer
            .display_chapter(&spine_item(0, "ch01"), &LayoutSettings::default())
            .unwrap();
        renderer.abort_load();

        assert!(!renderer.next_page());
        assert_eq!(renderer.queued_tasks(), 0);
    }

    #[tokio::test]
    async fn test_moving_gate_queues_navigation() {
        let mut renderer = loaded(&["aaaa", "bbbb", "cccc"]).await;

        renderer.begin_move();
        assert_eq!(renderer.state(), RenderState::Moving);
        assert!(matches!(
            renderer.display_chapter(&spine_item(1, "ch02"), &LayoutSettings::default()),
            Err(ReaderError::Busy(_))
        ));
        assert!(renderer.page(3));
        assert_eq!(renderer.chapter_pos(), 1);
        assert_eq!(renderer.queued_tasks(), 1);

        renderer.end_move();
        assert_eq!(renderer.state(), RenderState::Idle);
        assert_eq!(renderer.chapter_pos(), 3);
        assert_eq!(renderer.queued_tasks(), 0);
    }

    #[tokio::test]
    async fn test_reformat_waits_for_pending_load() {
        let mut renderer = loaded(&["aaaa", "bbbb", "cccc"]).await;
        renderer
            .display_chapter(&spine_item(1, "ch02"), &LayoutSettings::default())
            .unwrap();

        renderer.resize(600.0, 48.0);
        assert_eq!(renderer.state(), RenderState::Loading);

        renderer.load(chapter_doc(&["bbbb", "cccc"])).await.unwrap();
        assert_eq!(renderer.state(), RenderState::Idle);
        assert_eq!(renderer.displayed_pages(), 2);
    }
}
