//! Book orchestration
//!
//! A [`Book`] opens a package through a [`ContentStore`], renders it into a
//! [`RenderSurface`] one chapter at a time and translates navigation
//! requests (CFIs, hrefs, page numbers, percentages) into chapter loads and
//! page moves.
//!
//! ```text
//!   Unopened ──open()──► Opening ──► Ready ──render_to()──► rendered
//!                                                  │
//!                                 early queue replayed, first chapter shown
//! ```
//!
//! Navigation requested before `render_to` is queued and replayed once the
//! renderer exists.

mod chapter;
mod handle;
mod locations;
mod pagination;
mod store;

pub use chapter::Chapter;
pub use handle::{spawn_reader, ReaderHandle};
pub use locations::{CurrentLocation, Locations};
pub use pagination::Pagination;
pub use store::{open_store, ContentStore, DirectoryStore, MemoryStore, StoreResult, ZipStore};

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, error, info, warn};

use crate::cfi;
use crate::config::ReaderSettings;
use crate::dom::Document;
use crate::error::{ReaderError, Result};
use crate::events::{BookEvent, EventChannel, PageChange, RendererEvent, VisibleRange};
use crate::layout::LayoutSettings;
use crate::package::{
    parse_container, parse_nav_page_list, parse_nav_toc, parse_ncx_page_list, parse_ncx_toc,
    parse_package, resolve_href, BookMetadata, Package, PageListItem, SpineItem, TocEntry,
    CONTAINER_PATH,
};
use crate::queue::TaskQueue;
use crate::render::{FlowSurface, RenderSurface, Renderer};

/// Styles that repaint without moving text
const NO_REFLOW_STYLES: [&str; 3] = ["color", "background", "background-color"];

/// Book lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BookState {
    #[default]
    Unopened,
    Opening,
    Ready,
}

/// Outcome of a navigation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Navigation {
    /// Held until the book is rendered
    Queued,
    /// Now showing `cfi`
    Moved { cfi: Option<String> },
    AtStart,
    AtEnd,
    /// The target did not resolve; nothing moved
    Ignored,
}

/// Chapter to display: a spine position or a CFI inside it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChapterTarget {
    Position(usize),
    Cfi(String),
}

impl From<usize> for ChapterTarget {
    fn from(pos: usize) -> Self {
        ChapterTarget::Position(pos)
    }
}

impl From<&str> for ChapterTarget {
    fn from(cfi: &str) -> Self {
        ChapterTarget::Cfi(cfi.to_string())
    }
}

/// A deferred book operation
#[derive(Debug, Clone, PartialEq)]
pub enum BookTask {
    DisplayChapter { target: ChapterTarget, end: bool },
    NextPage,
    PrevPage,
    NextChapter,
    PrevChapter,
    Goto(String),
    GotoCfi(String),
    GotoHref(String),
    GotoPage(u32),
    GotoPercentage(f64),
    SetStyle { property: String, value: String },
    RemoveStyle(String),
    AddHeadTag { tag: String, attributes: BTreeMap<String, String> },
}

impl BookTask {
    /// True for tasks that may load another chapter
    pub fn is_display(&self) -> bool {
        matches!(
            self,
            BookTask::DisplayChapter { .. }
                | BookTask::NextPage
                | BookTask::PrevPage
                | BookTask::NextChapter
                | BookTask::PrevChapter
        )
    }
}

/// An EPUB book
pub struct Book {
    settings: ReaderSettings,
    store: Arc<dyn ContentStore>,
    state: BookState,
    package: Option<Package>,
    layout_settings: LayoutSettings,

    renderer: Option<Renderer>,
    renderer_events: Option<broadcast::Receiver<RendererEvent>>,
    rendered: bool,
    rendering: bool,
    spine_pos: usize,
    early: TaskQueue<BookTask>,

    pagination: Pagination,
    page_list: Vec<PageListItem>,
    locations: Locations,
    events: EventChannel<BookEvent>,
}

impl Book {
    pub fn new(settings: ReaderSettings, store: Arc<dyn ContentStore>) -> Self {
        let locations = Locations::new(settings.location_break);
        Self {
            settings,
            store,
            state: BookState::Unopened,
            package: None,
            layout_settings: LayoutSettings::default(),
            renderer: None,
            renderer_events: None,
            rendered: false,
            rendering: false,
            spine_pos: 0,
            early: TaskQueue::new(),
            pagination: Pagination::new(),
            page_list: Vec::new(),
            locations,
            events: EventChannel::new(),
        }
    }

    /// Open the book at `path` (a directory or `.epub` file)
    pub async fn open_at(path: impl AsRef<Path>, settings: ReaderSettings) -> Result<Self> {
        let store = open_store(path).await?;
        let mut book = Self::new(settings, store);
        book.open().await?;
        Ok(book)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BookEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Opening
    // ------------------------------------------------------------------

    /// Read the container, package, table of contents and page list
    pub async fn open(&mut self) -> Result<()> {
        self.state = BookState::Opening;
        match self.load_package().await {
            Ok(package) => {
                info!(
                    title = %package.metadata.title,
                    chapters = package.spine.len(),
                    "book opened"
                );
                self.set_package(package);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to open book");
                self.state = BookState::Unopened;
                self.events.emit(BookEvent::LoadFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn load_package(&self) -> Result<Package> {
        let container = parse_container(&self.store.get_text(CONTAINER_PATH).await?)?;
        let opf = self.store.get_text(&container.package_path).await?;
        let mut package = parse_package(&opf, container)?;
        let base = package.container.base_path.clone();

        if let Some(nav_path) = package.nav_path.clone() {
            let nav_url = resolve_href(&base, &nav_path);
            if let Some(xml) = self.optional_text(&nav_url).await? {
                package.toc = parse_nav_toc(&xml, &nav_url, &package)?;
                package.page_list = parse_nav_page_list(&xml, &nav_url, &package)?;
            }
        }

        if let Some(ncx_path) = package.ncx_path.clone() {
            if package.toc.is_empty() || package.page_list.is_empty() {
                let ncx_url = resolve_href(&base, &ncx_path);
                if let Some(xml) = self.optional_text(&ncx_url).await? {
                    if package.toc.is_empty() {
                        package.toc = parse_ncx_toc(&xml, &ncx_url, &package)?;
                    }
                    if package.page_list.is_empty() {
                        package.page_list = parse_ncx_page_list(&xml, &ncx_url, &package)?;
                    }
                }
            }
        }

        self.resolve_page_list_cfis(&mut package).await;
        Ok(package)
    }

    /// Text of a file the book can do without
    async fn optional_text(&self, path: &str) -> Result<Option<String>> {
        match self.store.get_text(path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) => {
                let e = ReaderError::from(e);
                if e.is_not_found() {
                    warn!(path, "navigation file missing");
                    Ok(None)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Give page-list entries that only have an href a CFI
    async fn resolve_page_list_cfis(&self, package: &mut Package) {
        let mut page_list = std::mem::take(&mut package.page_list);
        let mut documents: HashMap<usize, Option<Document>> = HashMap::new();

        for item in page_list.iter_mut().filter(|item| item.cfi.is_none()) {
            let Some(href) = item.href.as_deref() else {
                continue;
            };
            let (path, fragment) = match href.split_once('#') {
                Some((p, f)) => (p, Some(f)),
                None => (href, None),
            };
            let Some(spine_item) = package
                .spine_index_by_url(path)
                .and_then(|i| package.spine_item(i))
            else {
                debug!(href, "page outside the spine");
                continue;
            };

            if !documents.contains_key(&spine_item.index) {
                let doc = match self.store.get_xml(&spine_item.url).await {
                    Ok(doc) => Some(doc),
                    Err(e) => {
                        warn!(url = %spine_item.url, error = %e, "cannot read chapter for page list");
                        None
                    }
                };
                documents.insert(spine_item.index, doc);
            }

            let element = documents.get(&spine_item.index).and_then(|doc| {
                let doc = doc.as_ref()?;
                let node = match fragment {
                    Some(id) => doc.get_element_by_id(id)?,
                    None => doc.body()?,
                };
                Some(cfi::generate_from_element(doc, node, &spine_item.cfi_base))
            });
            item.cfi = Some(element.unwrap_or_else(|| spine_item.cfi()));
        }

        package.page_list = page_list;
    }

    fn set_package(&mut self, package: Package) {
        self.layout_settings = package
            .metadata
            .layout_settings()
            .with_override(&self.settings.layout_override);
        if !package.page_list.is_empty() {
            self.pagination.process(&package.page_list);
            self.page_list = package.page_list.clone();
        }
        self.package = Some(package);
        self.state = BookState::Ready;
        self.events.emit(BookEvent::Ready);
    }

    /// The opened package as JSON
    pub fn contents_snapshot(&self) -> Result<String> {
        let package = self.package.as_ref().ok_or(ReaderError::NotOpen)?;
        Ok(serde_json::to_string(package)?)
    }

    /// Open from a [`Book::contents_snapshot`] instead of the store
    pub fn restore_contents(&mut self, json: &str) -> Result<()> {
        let package: Package = serde_json::from_str(json)?;
        debug!(chapters = package.spine.len(), "package restored");
        self.set_package(package);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// Render into `surface` and show the starting position
    pub async fn render_to(&mut self, surface: Box<dyn RenderSurface>) -> Result<Navigation> {
        let direction = self.package()?.metadata.direction;

        let mut renderer = Renderer::new(surface, &self.settings);
        if let Some(direction) = direction {
            renderer.set_direction(direction);
        }
        self.renderer_events = Some(renderer.subscribe());
        self.renderer = Some(renderer);
        self.rendered = true;
        self.events.emit(BookEvent::Rendered);

        for task in self.early.drain() {
            debug!(?task, "replaying early task");
            if let Err(e) = self.run(task).await {
                warn!(error = %e, "queued task failed");
            }
        }

        let displayed = self
            .renderer
            .as_ref()
            .map(|r| r.chapter().is_some())
            .unwrap_or(false);
        if displayed {
            return Ok(Navigation::Moved {
                cfi: self.current_location_cfi(),
            });
        }
        self.start_display().await
    }

    async fn start_display(&mut self) -> Result<Navigation> {
        if let Some(target) = self.settings.goto.clone() {
            let moved = self.goto(&target).await?;
            if moved != Navigation::Ignored {
                return Ok(moved);
            }
        }
        if self.settings.restore {
            if let Some(cfi) = self.settings.previous_location_cfi.clone() {
                let moved = self.goto_cfi(&cfi).await?;
                if moved != Navigation::Ignored {
                    return Ok(moved);
                }
            }
        }
        let spine_pos = self.spine_pos;
        self.display_chapter(spine_pos, false).await
    }

    /// Run a deferred task
    pub async fn run(&mut self, task: BookTask) -> Result<Navigation> {
        match task {
            BookTask::DisplayChapter { target, end } => self.display_chapter(target, end).await,
            BookTask::NextPage => self.next_page().await,
            BookTask::PrevPage => self.prev_page().await,
            BookTask::NextChapter => self.next_chapter().await,
            BookTask::PrevChapter => self.prev_chapter().await,
            BookTask::Goto(target) => self.goto(&target).await,
            BookTask::GotoCfi(cfi) => self.goto_cfi(&cfi).await,
            BookTask::GotoHref(href) => self.goto_href(&href).await,
            BookTask::GotoPage(page) => self.goto_page(page).await,
            BookTask::GotoPercentage(p) => self.goto_percentage(p).await,
            BookTask::SetStyle { property, value } => Ok(self.set_style(&property, &value)),
            BookTask::RemoveStyle(property) => Ok(self.remove_style(&property)),
            BookTask::AddHeadTag { tag, attributes } => Ok(self.add_head_tag(&tag, attributes)),
        }
    }

    fn defer(&mut self, task: BookTask) -> Navigation {
        debug!(?task, "book not rendered, queued");
        self.early.enqueue(task);
        Navigation::Queued
    }

    /// Show a chapter, at its last page when `end` is set
    pub async fn display_chapter(
        &mut self,
        target: impl Into<ChapterTarget>,
        end: bool,
    ) -> Result<Navigation> {
        let target = target.into();
        if !self.rendered {
            return Ok(self.defer(BookTask::DisplayChapter { target, end }));
        }
        if self.rendering {
            return Err(ReaderError::Busy("chapter display in progress"));
        }

        let package = self.package.as_ref().ok_or(ReaderError::NotOpen)?;
        let (pos, cfi) = match target {
            ChapterTarget::Position(pos) => (Some(pos), None),
            ChapterTarget::Cfi(cfi) => (cfi::parse(&cfi).spine_index(), Some(cfi)),
        };

        let (item, end, cfi) = match pos.and_then(|p| package.spine_item(p)) {
            Some(item) => (item.clone(), end, cfi),
            None => {
                warn!(?pos, "Not A Valid Location");
                let first = package.spine_item(0).cloned().ok_or_else(|| {
                    ReaderError::Package("spine is empty".into())
                })?;
                (first, false, None)
            }
        };

        let renderer = self.renderer.as_mut().ok_or(ReaderError::NotRendered)?;
        self.rendering = true;
        if let Err(e) = renderer.display_chapter(&item, &self.layout_settings) {
            self.rendering = false;
            return Err(e);
        }
        if let Some(cfi) = cfi.as_deref() {
            renderer.goto_cfi(cfi);
        } else if end {
            renderer.last_page();
        }

        let chapter = Chapter::new(item, self.store.clone());
        let loaded = match chapter.load().await {
            Ok(doc) => renderer.load(doc).await,
            Err(e) => Err(e),
        };

        self.rendering = false;
        match loaded {
            Ok(()) => {
                self.spine_pos = chapter.spine_pos();
                self.relay_renderer_events();
                Ok(Navigation::Moved {
                    cfi: self.current_location_cfi(),
                })
            }
            Err(e) => {
                error!(href = %chapter.href(), error = %e, "chapter failed to load");
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.abort_load();
                }
                self.relay_renderer_events();
                self.events.emit(BookEvent::ChapterLoadFailed {
                    href: chapter.href().to_string(),
                });
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Page and chapter navigation
    // ------------------------------------------------------------------

    pub async fn next_page(&mut self) -> Result<Navigation> {
        if !self.rendered {
            return Ok(self.defer(BookTask::NextPage));
        }
        let moved = self.renderer_mut()?.next_page();
        if moved {
            return Ok(self.moved());
        }
        self.next_chapter().await
    }

    pub async fn prev_page(&mut self) -> Result<Navigation> {
        if !self.rendered {
            return Ok(self.defer(BookTask::PrevPage));
        }
        let moved = self.renderer_mut()?.prev_page();
        if moved {
            return Ok(self.moved());
        }
        self.prev_chapter().await
    }

    /// Next linear chapter, or `AtEnd`
    pub async fn next_chapter(&mut self) -> Result<Navigation> {
        if !self.rendered {
            return Ok(self.defer(BookTask::NextChapter));
        }
        let spine = &self.package()?.spine;
        let next = spine
            .iter()
            .skip(self.spine_pos + 1)
            .find(|item| item.linear)
            .map(|item| item.index);

        match next {
            Some(next) => self.display_chapter(next, false).await,
            None => {
                debug!("at end of book");
                self.events.emit(BookEvent::AtEnd);
                Ok(Navigation::AtEnd)
            }
        }
    }

    /// Last page of the previous linear chapter, or `AtStart`
    pub async fn prev_chapter(&mut self) -> Result<Navigation> {
        if !self.rendered {
            return Ok(self.defer(BookTask::PrevChapter));
        }
        let spine = &self.package()?.spine;
        let prev = spine
            .iter()
            .take(self.spine_pos)
            .rev()
            .find(|item| item.linear)
            .map(|item| item.index);

        match prev {
            Some(prev) => self.display_chapter(prev, true).await,
            None => {
                debug!("at start of book");
                self.events.emit(BookEvent::AtStart);
                Ok(Navigation::AtStart)
            }
        }
    }

    /// Go to a CFI, `NN%`, page number or href
    pub async fn goto(&mut self, target: &str) -> Result<Navigation> {
        if !self.rendered {
            return Ok(self.defer(BookTask::Goto(target.to_string())));
        }
        let target = target.trim();
        if target.starts_with("epubcfi(") {
            return self.goto_cfi(target).await;
        }
        if let Some(percent) = target.strip_suffix('%') {
            return match percent.trim().parse::<f64>() {
                Ok(p) => self.goto_percentage(p / 100.0).await,
                Err(_) => {
                    warn!(target, "invalid percentage");
                    Ok(Navigation::Ignored)
                }
            };
        }
        if let Ok(page) = target.parse::<u32>() {
            return self.goto_page(page).await;
        }
        self.goto_href(target).await
    }

    pub async fn goto_cfi(&mut self, cfi_str: &str) -> Result<Navigation> {
        if !self.rendered {
            return Ok(self.defer(BookTask::GotoCfi(cfi_str.to_string())));
        }
        let target = cfi::parse(cfi_str);
        let Some(spine_pos) = target.spine_index() else {
            return Ok(Navigation::Ignored);
        };

        let renderer = self.renderer_mut()?;
        if renderer.spine_pos() == Some(spine_pos) {
            renderer.goto_cfi(cfi_str);
            return Ok(self.moved());
        }
        if self.package()?.spine_item(spine_pos).is_none() {
            warn!(cfi = cfi_str, "CFI outside the spine");
            return Ok(Navigation::Ignored);
        }
        self.display_chapter(ChapterTarget::Cfi(cfi_str.to_string()), false)
            .await
    }

    /// Go to `chapter.xhtml#fragment`. An empty chapter part means the
    /// current chapter.
    pub async fn goto_href(&mut self, href: &str) -> Result<Navigation> {
        if !self.rendered {
            return Ok(self.defer(BookTask::GotoHref(href.to_string())));
        }
        let (path, fragment) = match href.split_once('#') {
            Some((p, f)) => (p, Some(f).filter(|f| !f.is_empty())),
            None => (href, None),
        };

        let package = self.package()?;
        let spine_pos = if path.is_empty() {
            Some(self.spine_pos)
        } else {
            package.spine_index_by_url(path).or_else(|| {
                let url = resolve_href(&package.container.base_path, path);
                package.spine_index_by_url(&url)
            })
        };
        let Some(spine_pos) = spine_pos else {
            warn!(href, "href not in spine");
            return Ok(Navigation::Ignored);
        };

        let current = self.renderer_mut()?.spine_pos();
        if current != Some(spine_pos) {
            self.display_chapter(spine_pos, false).await?;
            if let Some(fragment) = fragment {
                self.renderer_mut()?.section(fragment);
            }
        } else {
            let renderer = self.renderer_mut()?;
            match fragment {
                Some(fragment) => {
                    renderer.section(fragment);
                }
                None => renderer.first_page(),
            }
        }
        Ok(self.moved())
    }

    /// Go to a page of the book-wide page list
    pub async fn goto_page(&mut self, page: u32) -> Result<Navigation> {
        if !self.rendered {
            return Ok(self.defer(BookTask::GotoPage(page)));
        }
        match self.pagination.cfi_from_page(page).map(str::to_string) {
            Some(cfi) => self.goto_cfi(&cfi).await,
            None => {
                debug!(page, "page not in page list");
                Ok(Navigation::Ignored)
            }
        }
    }

    /// Go to a fraction (0.0 to 1.0) of the page list
    pub async fn goto_percentage(&mut self, percent: f64) -> Result<Navigation> {
        if !self.rendered {
            return Ok(self.defer(BookTask::GotoPercentage(percent)));
        }
        let page = self
            .pagination
            .page_from_percentage(percent)
            .max(self.pagination.first_page());
        self.goto_page(page).await
    }

    // ------------------------------------------------------------------
    // Styles and layout settings
    // ------------------------------------------------------------------

    pub fn set_style(&mut self, property: &str, value: &str) -> Navigation {
        if !self.rendered {
            return self.defer(BookTask::SetStyle {
                property: property.to_string(),
                value: value.to_string(),
            });
        }
        self.settings
            .styles
            .insert(property.to_string(), value.to_string());
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.set_style(property, value);
            if !NO_REFLOW_STYLES.contains(&property) {
                renderer.reformat();
            }
        }
        self.moved()
    }

    pub fn remove_style(&mut self, property: &str) -> Navigation {
        if !self.rendered {
            return self.defer(BookTask::RemoveStyle(property.to_string()));
        }
        self.settings.styles.remove(property);
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.remove_style(property);
            renderer.reformat();
        }
        self.moved()
    }

    pub fn add_head_tag(&mut self, tag: &str, attributes: BTreeMap<String, String>) -> Navigation {
        if !self.rendered {
            return self.defer(BookTask::AddHeadTag {
                tag: tag.to_string(),
                attributes,
            });
        }
        self.settings
            .head_tags
            .insert(tag.to_string(), attributes.clone());
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.add_head_tag(tag, attributes);
        }
        self.moved()
    }

    pub fn force_single(&mut self, single: bool) {
        self.settings.spreads = !single;
        self.reformat_with(|renderer| renderer.force_single(single));
    }

    pub fn use_spreads(&mut self, spreads: bool) {
        self.force_single(!spreads);
    }

    pub fn set_min_spread_width(&mut self, width: Option<f64>) {
        self.settings.min_spread_width = width;
        self.reformat_with(|renderer| renderer.set_min_spread_width(width));
    }

    pub fn set_gap(&mut self, gap: Option<f64>) {
        self.settings.gap = gap;
        self.reformat_with(|renderer| renderer.set_gap(gap));
    }

    pub fn resize(&mut self, width: f64, height: f64) {
        self.settings.width = Some(width);
        self.settings.height = Some(height);
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.resize(width, height);
        }
        self.relay_renderer_events();
    }

    fn reformat_with(&mut self, apply: impl FnOnce(&mut Renderer)) {
        if let Some(renderer) = self.renderer.as_mut() {
            apply(renderer);
            if self.rendered {
                renderer.reformat();
            }
        }
        self.relay_renderer_events();
    }

    // ------------------------------------------------------------------
    // Page list
    // ------------------------------------------------------------------

    /// Lay out every chapter at `width` x `height` off screen and number
    /// the pages
    pub async fn generate_pagination(&mut self, width: f64, height: f64) -> Result<&[PageListItem]> {
        let settings = ReaderSettings {
            width: Some(width),
            height: Some(height),
            ..self.settings.clone()
        };
        let surface = FlowSurface::with_metrics(width, height, settings.flow);
        self.generate_pagination_with(Box::new(surface), &settings)
            .await
    }

    /// [`Book::generate_pagination`] on a caller supplied surface
    pub async fn generate_pagination_with(
        &mut self,
        surface: Box<dyn RenderSurface>,
        settings: &ReaderSettings,
    ) -> Result<&[PageListItem]> {
        let package = self.package()?;
        let spine: Vec<SpineItem> = package.spine.clone();
        let direction = package.metadata.direction;

        let mut pager = Renderer::new(surface, settings);
        if let Some(direction) = direction {
            pager.set_direction(direction);
        }

        let mut page_list = Vec::new();
        let mut page = 0u32;
        for item in spine {
            pager.display_chapter(&item, &self.layout_settings)?;
            let chapter = Chapter::new(item, self.store.clone());
            let doc = match chapter.load().await {
                Ok(doc) => doc,
                Err(e) => {
                    pager.abort_load();
                    return Err(e);
                }
            };
            pager.load(doc).await?;

            let Some(map) = pager.page_map() else {
                continue;
            };
            for entry in map {
                page += 1;
                page_list.push(PageListItem {
                    cfi: Some(entry.start.clone()),
                    href: None,
                    page_label: None,
                    page,
                });
            }
            // A spread with an empty right page still counts
            if map.len() % 2 == 1 && pager.spreads() {
                if let Some(last) = map.last() {
                    page += 1;
                    page_list.push(PageListItem {
                        cfi: Some(last.end.clone()),
                        href: None,
                        page_label: None,
                        page,
                    });
                }
            }
        }

        info!(pages = page, "pagination generated");
        self.pagination.process(&page_list);
        self.page_list = page_list;
        Ok(&self.page_list)
    }

    /// Use a saved page list
    pub fn load_pagination(&mut self, json: &str) -> Result<&[PageListItem]> {
        let page_list: Vec<PageListItem> = serde_json::from_str(json)?;
        if !page_list.is_empty() {
            self.pagination.process(&page_list);
            self.page_list = page_list;
        }
        Ok(&self.page_list)
    }

    pub fn page_list(&self) -> &[PageListItem] {
        &self.page_list
    }

    pub fn pagination(&self) -> &Pagination {
        &self.pagination
    }

    // ------------------------------------------------------------------
    // Locations
    // ------------------------------------------------------------------

    /// Build the locations index over the whole spine
    pub async fn generate_locations(&mut self) -> Result<usize> {
        let spine = self.package()?.spine.clone();
        let count = self.locations.generate(&spine, self.store.clone()).await?;
        if let Some(cfi) = self.current_location_cfi() {
            self.locations.set_current(CurrentLocation::Cfi(cfi));
        }
        Ok(count)
    }

    pub fn locations(&self) -> &Locations {
        &self.locations
    }

    pub fn locations_mut(&mut self) -> &mut Locations {
        &mut self.locations
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    fn moved(&mut self) -> Navigation {
        self.relay_renderer_events();
        Navigation::Moved {
            cfi: self.current_location_cfi(),
        }
    }

    /// Republish what the renderer emitted since the last call
    fn relay_renderer_events(&mut self) {
        let Some(rx) = self.renderer_events.as_mut() else {
            return;
        };
        let mut pending = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => pending.push(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "renderer events dropped");
                }
                Err(_) => break,
            }
        }

        for event in pending {
            let range = match &event {
                RendererEvent::VisibleRangeChanged { range, .. } => Some(range.clone()),
                _ => None,
            };
            self.events.emit(BookEvent::Renderer(event));
            if let Some(range) = range {
                self.page_changed(&range);
            }
        }
    }

    fn page_changed(&self, range: &VisibleRange) {
        if self.page_list.is_empty() {
            return;
        }
        let Some(anchor_page) = self.pagination.page_from_cfi(&range.start) else {
            return;
        };
        let mut page_range = vec![anchor_page];
        if let Some(end_page) = self.pagination.page_from_cfi(&range.end) {
            page_range.push(end_page);
        }
        self.events.emit(BookEvent::PageChanged(PageChange {
            anchor_page,
            percentage: self.pagination.percentage_from_page(anchor_page),
            page_range,
        }));
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    fn package(&self) -> Result<&Package> {
        self.package.as_ref().ok_or(ReaderError::NotOpen)
    }

    fn renderer_mut(&mut self) -> Result<&mut Renderer> {
        self.renderer.as_mut().ok_or(ReaderError::NotRendered)
    }

    pub fn state(&self) -> BookState {
        self.state
    }

    pub fn is_rendered(&self) -> bool {
        self.rendered
    }

    pub fn is_rendering(&self) -> bool {
        self.rendering
    }

    pub fn settings(&self) -> &ReaderSettings {
        &self.settings
    }

    pub fn layout_settings(&self) -> LayoutSettings {
        self.layout_settings
    }

    pub fn metadata(&self) -> Option<&BookMetadata> {
        self.package.as_ref().map(|p| &p.metadata)
    }

    pub fn spine(&self) -> &[SpineItem] {
        self.package.as_ref().map(|p| p.spine.as_slice()).unwrap_or_default()
    }

    pub fn toc(&self) -> &[TocEntry] {
        self.package.as_ref().map(|p| p.toc.as_slice()).unwrap_or_default()
    }

    pub fn spine_pos(&self) -> usize {
        self.spine_pos
    }

    pub fn renderer(&self) -> Option<&Renderer> {
        self.renderer.as_ref()
    }

    pub fn current_location_cfi(&self) -> Option<String> {
        self.renderer
            .as_ref()
            .and_then(|r| r.current_location_cfi())
            .map(str::to_string)
    }

    /// Tasks waiting for `render_to`
    pub fn queued_tasks(&self) -> usize {
        self.early.len()
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    pub fn unload(&mut self) {
        if self.settings.restore {
            if let Some(cfi) = self.current_location_cfi() {
                self.settings.previous_location_cfi = Some(cfi);
            }
        }
        self.events.emit(BookEvent::Unloaded);
    }

    /// Unload and drop the renderer
    pub fn destroy(&mut self) {
        self.unload();
        if let Some(mut renderer) = self.renderer.take() {
            renderer.unload();
        }
        self.renderer_events = None;
        self.rendered = false;
        self.rendering = false;
        self.early.clear();
    }
}

impl std::fmt::Debug for Book {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Book")
            .field("state", &self.state)
            .field("rendered", &self.rendered)
            .field("spine_pos", &self.spine_pos)
            .field("pages", &self.page_list.len())
            .field("queued", &self.early.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTAINER: &str = r#"<container><rootfiles><rootfile full-path="OEBPS/content.opf"/></rootfiles></container>"#;

    const OPF: &str = r#"<package>
  <metadata><title>Tres</title></metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="ch01" href="text/ch01.xhtml" media-type="application/xhtml+xml"/>
    <item id="notes" href="text/notes.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch02" href="text/ch02.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine>
    <itemref idref="ch01"/>
    <itemref idref="notes" linear="no"/>
    <itemref idref="ch02"/>
  </spine>
</package>"#;

    const NAV: &str = r#"<html xmlns:epub="http://www.idpf.org/2007/ops"><body>
<nav epub:type="toc"><ol>
  <li><a href="text/ch01.xhtml">One</a></li>
  <li><a href="text/ch02.xhtml">Two</a></li>
</ol></nav>
<nav epub:type="page-list"><ol>
  <li><a href="text/ch02.xhtml#second">1</a></li>
</ol></nav>
</body></html>"#;

    /// 45 four-letter words fill one 600x48 column
    fn chapter(words: &[&str]) -> String {
        let body: String = words
            .iter()
            .enumerate()
            .map(|(i, w)| format!(r#"<p id="p{}">{}</p>"#, i + 1, vec![*w; 45].join(" ")))
            .collect();
        format!("<html><head><title>c</title></head><body>{}</body></html>", body)
    }

    fn store() -> MemoryStore {
        MemoryStore::new()
            .with(CONTAINER_PATH, CONTAINER)
            .with("OEBPS/content.opf", OPF)
            .with("OEBPS/nav.xhtml", NAV)
            .with("OEBPS/text/ch01.xhtml", chapter(&["aaaa", "bbbb", "cccc"]))
            .with("OEBPS/text/notes.xhtml", chapter(&["note"]))
            .with(
                "OEBPS/text/ch02.xhtml",
                chapter(&["dddd", "eeee"]).replace(r#"id="p2""#, r#"id="second""#),
            )
    }

    fn settings() -> ReaderSettings {
        ReaderSettings {
            width: Some(600.0),
            height: Some(48.0),
            gap: Some(75.0),
            spreads: false,
            ..ReaderSettings::default()
        }
    }

    async fn opened(store: MemoryStore) -> Book {
        let mut book = Book::new(settings(), Arc::new(store));
        book.open().await.unwrap();
        book
    }

    async fn rendered() -> Book {
        let mut book = opened(store()).await;
        book.render_to(Box::new(FlowSurface::new(600.0, 48.0)))
            .await
            .unwrap();
        book
    }

    fn drain(rx: &mut broadcast::Receiver<BookEvent>) -> Vec<BookEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_open_reads_package_and_nav() {
        let book = opened(store()).await;
        assert_eq!(book.state(), BookState::Ready);
        assert_eq!(book.spine().len(), 3);
        assert_eq!(book.toc().len(), 2);
        assert_eq!(book.metadata().map(|m| m.title.as_str()), Some("Tres"));

        // The nav page list entry got a CFI from its fragment
        assert_eq!(
            book.page_list()[0].cfi.as_deref(),
            Some("epubcfi(/6/6[ch02]!/4/4[second]/1:0)")
        );
    }

    #[tokio::test]
    async fn test_open_failure_emits_load_failed() {
        let mut book = Book::new(settings(), Arc::new(MemoryStore::new()));
        let mut rx = book.subscribe();
        assert!(book.open().await.is_err());
        assert_eq!(book.state(), BookState::Unopened);
        assert!(matches!(drain(&mut rx).as_slice(), [BookEvent::LoadFailed { .. }]));
    }

    #[tokio::test]
    async fn test_render_shows_first_chapter() {
        let book = rendered().await;
        assert_eq!(book.spine_pos(), 0);
        assert_eq!(
            book.current_location_cfi().as_deref(),
            Some("epubcfi(/6/2[ch01]!/4/2[p1]/1:0)")
        );
        assert_eq!(book.renderer().map(|r| r.displayed_pages()), Some(3));
    }

    #[tokio::test]
    async fn test_early_queue_replayed_on_render() {
        let mut book = opened(store()).await;
        assert_eq!(book.next_page().await.unwrap(), Navigation::Queued);
        assert_eq!(book.set_style("color", "red"), Navigation::Queued);
        assert_eq!(book.queued_tasks(), 2);

        let mut rx = book.subscribe();
        book.render_to(Box::new(FlowSurface::new(600.0, 48.0)))
            .await
            .unwrap();
        assert_eq!(book.queued_tasks(), 0);
        assert_eq!(drain(&mut rx).first(), Some(&BookEvent::Rendered));
        assert_eq!(book.renderer().map(|r| r.chapter_pos()), Some(2));
        assert_eq!(book.settings().styles.get("color").map(String::as_str), Some("red"));
    }

    #[tokio::test]
    async fn test_next_chapter_skips_non_linear() {
        let mut book = rendered().await;
        let moved = book.next_chapter().await.unwrap();
        assert_eq!(book.spine_pos(), 2);
        assert_eq!(
            moved,
            Navigation::Moved {
                cfi: Some("epubcfi(/6/6[ch02]!/4/2[p1]/1:0)".into())
            }
        );
    }

    #[tokio::test]
    async fn test_page_turns_cross_chapters() {
        let mut book = rendered().await;
        book.next_page().await.unwrap();
        book.next_page().await.unwrap();
        assert_eq!(book.spine_pos(), 0);
        book.next_page().await.unwrap();
        assert_eq!(book.spine_pos(), 2);

        // Back into the previous linear chapter, on its last page
        book.prev_page().await.unwrap();
        assert_eq!(book.spine_pos(), 0);
        assert_eq!(book.renderer().map(|r| r.chapter_pos()), Some(3));
    }

    #[tokio::test]
    async fn test_at_start_and_at_end() {
        let mut book = rendered().await;
        let mut rx = book.subscribe();
        assert_eq!(book.prev_chapter().await.unwrap(), Navigation::AtStart);
        assert!(drain(&mut rx).contains(&BookEvent::AtStart));

        book.display_chapter(2usize, false).await.unwrap();
        assert_eq!(book.next_chapter().await.unwrap(), Navigation::AtEnd);
        assert!(drain(&mut rx).contains(&BookEvent::AtEnd));
    }

    #[tokio::test]
    async fn test_display_invalid_position_falls_back_to_first() {
        let mut book = rendered().await;
        book.display_chapter(2usize, false).await.unwrap();
        book.display_chapter(9usize, true).await.unwrap();
        assert_eq!(book.spine_pos(), 0);
        assert_eq!(book.renderer().map(|r| r.chapter_pos()), Some(1));
    }

    #[tokio::test]
    async fn test_chapter_load_failure() {
        let mut files = store();
        files.insert("OEBPS/text/ch02.xhtml", vec![0xff, 0xfe]);
        let mut book = opened(files).await;
        book.render_to(Box::new(FlowSurface::new(600.0, 48.0)))
            .await
            .unwrap();
        let mut rx = book.subscribe();

        assert!(book.display_chapter(2usize, false).await.is_err());
        assert!(!book.is_rendering());
        assert!(drain(&mut rx).contains(&BookEvent::ChapterLoadFailed {
            href: "text/ch02.xhtml".into()
        }));
        assert_eq!(book.spine_pos(), 0);

        // ch01 stays on screen and keeps paging
        let renderer = book.renderer().unwrap();
        assert_eq!(renderer.spine_pos(), Some(0));
        assert_eq!(renderer.queued_tasks(), 0);
        assert_eq!(book.next_page().await.unwrap(), Navigation::Moved {
            cfi: Some("epubcfi(/6/2[ch01]!/4/4[p2]/1:0)".into())
        });
        assert_eq!(book.renderer().map(|r| r.chapter_pos()), Some(2));
        assert_eq!(book.renderer().map(|r| r.queued_tasks()), Some(0));
        assert_eq!(book.queued_tasks(), 0);

        assert!(book.prev_page().await.is_ok());
        assert_eq!(book.renderer().map(|r| r.chapter_pos()), Some(1));
    }

    #[tokio::test]
    async fn test_goto_sniffs_targets() {
        let mut book = rendered().await;

        book.goto("epubcfi(/6/6[ch02]!/4/4[second]/1:10)").await.unwrap();
        assert_eq!(book.spine_pos(), 2);
        assert_eq!(book.renderer().map(|r| r.chapter_pos()), Some(2));

        book.goto("text/ch01.xhtml#p3").await.unwrap();
        assert_eq!(book.spine_pos(), 0);
        assert_eq!(book.renderer().map(|r| r.chapter_pos()), Some(3));

        book.goto("#p2").await.unwrap();
        assert_eq!(book.renderer().map(|r| r.chapter_pos()), Some(2));

        assert_eq!(book.goto("missing.xhtml").await.unwrap(), Navigation::Ignored);
        assert_eq!(book.goto("abc%").await.unwrap(), Navigation::Ignored);
    }

    #[tokio::test]
    async fn test_generate_pagination_and_goto_page() {
        let mut book = rendered().await;
        let pages: Vec<u32> = book
            .generate_pagination(600.0, 48.0)
            .await
            .unwrap()
            .iter()
            .map(|p| p.page)
            .collect();
        // Three pages, one for the notes, two for the last chapter
        assert_eq!(pages, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(book.pagination().total_pages(), 5);

        let mut rx = book.subscribe();
        book.goto("5").await.unwrap();
        assert_eq!(book.spine_pos(), 2);
        let changed = drain(&mut rx).into_iter().find_map(|e| match e {
            BookEvent::PageChanged(change) => Some(change),
            _ => None,
        });
        let change = changed.unwrap();
        assert_eq!(change.anchor_page, 5);
        assert_eq!(change.percentage, 0.8);

        book.goto("0%").await.unwrap();
        assert_eq!(book.spine_pos(), 0);
    }

    #[tokio::test]
    async fn test_load_pagination() {
        let mut book = rendered().await;
        let json = r#"[{"cfi":"epubcfi(/6/2[ch01]!/4/2[p1]/1:0)","page":1},{"cfi":"epubcfi(/6/6[ch02]!/4/2[p1]/1:0)","page":2}]"#;
        assert_eq!(book.load_pagination(json).unwrap().len(), 2);
        assert_eq!(book.goto_page(2).await.unwrap(), Navigation::Moved {
            cfi: Some("epubcfi(/6/6[ch02]!/4/2[p1]/1:0)".into())
        });
        assert!(book.load_pagination("nope").is_err());
    }

    #[tokio::test]
    async fn test_styles_reformat() {
        let mut book = rendered().await;
        book.next_page().await.unwrap();
        let before = book.current_location_cfi();
        book.set_style("font-size", "100%");
        assert_eq!(book.current_location_cfi(), before);
        book.remove_style("font-size");
        assert!(!book.settings().styles.contains_key("font-size"));
    }

    #[tokio::test]
    async fn test_restore_contents() {
        let book = opened(store()).await;
        let json = book.contents_snapshot().unwrap();

        let mut copy = Book::new(settings(), Arc::new(store()));
        copy.restore_contents(&json).unwrap();
        assert_eq!(copy.state(), BookState::Ready);
        assert_eq!(copy.spine(), book.spine());
    }

    #[tokio::test]
    async fn test_generate_locations() {
        let mut book = rendered().await;
        let count = book.generate_locations().await.unwrap();
        assert!(count >= 3);
        assert_eq!(book.locations().current(), 0);
    }

    #[tokio::test]
    async fn test_destroy() {
        let mut book = rendered().await;
        let mut rx = book.subscribe();
        book.destroy();
        assert!(!book.is_rendered());
        assert!(drain(&mut rx).contains(&BookEvent::Unloaded));
        assert_eq!(book.next_page().await.unwrap(), Navigation::Queued);
    }
}
