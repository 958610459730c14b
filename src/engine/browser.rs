//! One browsing session: table, filters, optimizer and uploads wired to a
//! row source, an upload sink and the UI context.
//!
//! The host feeds events (`on_scroll`, filter actions, uploads) and calls
//! [`StudyBrowser::tick`] regularly. Visibility is recomputed from scratch
//! after every change and rendered rows follow through frame-batched writes.

use std::collections::BTreeSet;

use crate::config::RadConfig;

use super::context::{NoticeLevel, Rect, UiContext};
use super::filter::{FilterManager, HeaderState};
use super::optimizer::{
    LayoutSnapshot, Metrics, OptimizerConfig, PerformanceOptimizer, WriteQueue,
};
use super::table::{Column, LoadOutcome, Row, RowSource, TableManager};
use super::timing::Debouncer;
use super::upload::{BatchSummary, UploadFile, UploadManager, UploadSink};
use super::visibility::{VisibleSet, compute_visible_rows};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub optimizer: OptimizerConfig,
    /// Distance from the document bottom that requests the next page (px).
    pub scroll_threshold: f64,
    pub debounce_ms: u64,
    pub max_concurrent_uploads: usize,
    pub max_upload_bytes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerConfig::default(),
            scroll_threshold: 500.0,
            debounce_ms: 300,
            max_concurrent_uploads: super::upload::DEFAULT_MAX_CONCURRENT,
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

impl SessionConfig {
    pub fn from_config(config: &RadConfig) -> Self {
        Self {
            optimizer: OptimizerConfig::from_client(&config.client),
            scroll_threshold: f64::from(config.client.scroll_threshold),
            debounce_ms: config.client.debounce_ms,
            max_concurrent_uploads: config.upload.max_concurrent,
            max_upload_bytes: config.upload.max_size_bytes,
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// A change to the set of rows on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowWrite {
    Show(usize),
    Hide(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeaderView {
    pub column: Column,
    pub state: HeaderState,
    pub width: Option<f64>,
}

/// Everything a host needs to draw the current frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedView {
    pub headers: Vec<HeaderView>,
    /// Row index and cells of every row on screen, in table order.
    pub rows: Vec<(usize, Vec<String>)>,
    pub loaded: usize,
    pub matching: usize,
    pub sticky_offset: f64,
    pub notices: Vec<(NoticeLevel, String)>,
    /// Upload batch progress in percent while uploads run.
    pub upload_progress: Option<u8>,
}

/// What happened during one [`StudyBrowser::tick`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub outcomes: Vec<LoadOutcome>,
    pub recomputed: bool,
    pub upload_batch: Option<BatchSummary>,
    pub lazy_loaded: Vec<String>,
}

// ---------------------------------------------------------------------------
// StudyBrowser
// ---------------------------------------------------------------------------

pub struct StudyBrowser {
    config: SessionConfig,
    ctx: UiContext,
    source: Box<dyn RowSource>,
    sink: Box<dyn UploadSink>,
    table: TableManager,
    filters: FilterManager,
    optimizer: PerformanceOptimizer,
    uploads: UploadManager,
    writes: WriteQueue<RowWrite>,
    scroll_trigger: Debouncer,
    visible: VisibleSet,
    rendered: BTreeSet<usize>,
}

impl std::fmt::Debug for StudyBrowser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StudyBrowser")
            .field("table", &self.table)
            .field("filters", &self.filters)
            .field("uploads", &self.uploads)
            .field("visible", &self.visible.visible.len())
            .finish_non_exhaustive()
    }
}

impl StudyBrowser {
    pub fn new(
        config: SessionConfig,
        ctx: UiContext,
        source: Box<dyn RowSource>,
        sink: Box<dyn UploadSink>,
    ) -> Self {
        Self {
            table: TableManager::new(),
            filters: FilterManager::new(config.debounce_ms),
            optimizer: PerformanceOptimizer::new(config.optimizer.clone()),
            uploads: UploadManager::new(config.max_concurrent_uploads, config.max_upload_bytes),
            writes: WriteQueue::new(config.optimizer.batch_size),
            scroll_trigger: Debouncer::new(config.debounce_ms),
            visible: VisibleSet::default(),
            rendered: BTreeSet::new(),
            config,
            ctx,
            source,
            sink,
        }
    }

    /// Restore persisted filters and request the first page.
    pub fn init(&mut self, now: u64) {
        self.filters.restore(&mut self.ctx);
        self.load_page(0);
        self.recompute(now);
    }

    /// Request `page` unless a fetch is already in flight.
    pub fn load_page(&mut self, page: u32) -> bool {
        match self.table.begin_load(page) {
            Some(page) => {
                self.source.request(page);
                true
            }
            None => false,
        }
    }

    pub fn load_next(&mut self) -> bool {
        self.load_page(self.table.current_page())
    }

    /// Drop all rows and start again from page 0.
    pub fn reset_and_reload(&mut self, now: u64) {
        tracing::info!("reloading table");
        if let Some(page) = self.table.reset() {
            self.source.request(page);
        }
        self.writes.clear();
        self.rendered.clear();
        self.recompute(now);
    }

    // -- Host events --

    pub fn on_scroll(&mut self, scroll_y: f64, now: u64) {
        self.ctx.viewport.scroll_y = scroll_y.max(0.0);
        self.optimizer.on_scroll(now);
        self.scroll_trigger.trigger(now);
    }

    pub fn on_resize(&mut self, width: f64, height: f64, now: u64) {
        self.ctx.viewport.width = width;
        self.ctx.viewport.height = height;
        self.optimizer.on_resize(now);
    }

    pub fn measure(&mut self, snapshot: LayoutSnapshot) {
        self.optimizer.measure(snapshot);
    }

    pub fn observe_lazy(&mut self, id: impl Into<String>, rect: Rect) -> bool {
        self.optimizer.observe_lazy(id, rect)
    }

    /// Advance everything that came due at `now`.
    pub fn tick(&mut self, now: u64) -> TickReport {
        let mut report = TickReport::default();
        let mut dirty = false;

        while let Some(result) = self.source.poll() {
            let outcome = self.table.finish_load(result, &mut self.ctx, now);
            match outcome {
                LoadOutcome::Appended(_) => {
                    self.filters.set_columns(self.table.column_ids());
                    self.optimizer.on_mutation(now);
                    dirty = true;
                }
                LoadOutcome::Restart => {
                    self.load_page(0);
                }
                LoadOutcome::EndOfData | LoadOutcome::Failed => {}
            }
            report.outcomes.push(outcome);
        }

        if let Some(summary) = self.uploads.tick(self.sink.as_mut(), &mut self.ctx, now) {
            if summary.reload {
                self.reset_and_reload(now);
            }
            report.upload_batch = Some(summary);
        }

        if self.filters.tick(now) {
            dirty = true;
        }

        let opt = self.optimizer.tick(&self.ctx.viewport, now);
        dirty |= opt.recompute;
        report.lazy_loaded = opt.loaded;

        if self.scroll_trigger.fire(now) && self.near_bottom() && self.table.wants_more() {
            tracing::debug!(page = self.table.current_page(), "scroll near bottom");
            self.load_next();
        }

        if dirty {
            self.recompute(now);
            report.recomputed = true;
        }

        for write in self.writes.drain_frame(now) {
            match write {
                RowWrite::Show(idx) => self.rendered.insert(idx),
                RowWrite::Hide(idx) => self.rendered.remove(&idx),
            };
        }

        self.ctx.notifier.expire(now);
        report
    }

    /// Within `scroll_threshold` of the bottom of the virtual document.
    fn near_bottom(&self) -> bool {
        let content = self.visible.matching.len() as f64 * self.config.optimizer.row_height;
        let document_height = self.optimizer.snapshot().table_top + content;
        let viewport = &self.ctx.viewport;
        viewport.scroll_y + viewport.height >= document_height - self.config.scroll_threshold
    }

    /// Re-evaluate every row and queue the on-screen changes.
    fn recompute(&mut self, now: u64) {
        self.filters.invalidate_values();
        let columns = self.table.column_ids();
        let next = compute_visible_rows(
            self.table.rows(),
            &columns,
            self.filters.active_filters(),
            self.filters.search_query(),
            &self.optimizer.window_params(&self.ctx.viewport),
        );

        let shown: BTreeSet<usize> = next.visible.iter().copied().collect();
        let hides = self
            .rendered
            .iter()
            .filter(|idx| !shown.contains(idx))
            .map(|&idx| RowWrite::Hide(idx));
        let shows = shown
            .iter()
            .filter(|idx| !self.rendered.contains(idx))
            .map(|&idx| RowWrite::Show(idx));
        let writes: Vec<RowWrite> = hides.chain(shows).collect();

        // rows whose writes are still queued must not be queued twice
        self.writes.clear();
        self.writes.extend(writes, now);
        self.visible = next;
    }

    // -- Filter actions --

    /// Open the menu for `column` below `anchor`, or close it when open.
    pub fn toggle_filter_menu(&mut self, column: &str, anchor: &Rect) -> bool {
        self.filters.toggle_menu(
            column,
            anchor,
            self.table.rows(),
            &self.visible,
            &self.ctx,
        )
    }

    /// Click outside any menu.
    pub fn click_outside(&mut self) {
        self.filters.close_menus();
    }

    pub fn type_menu_search(&mut self, text: &str, now: u64) {
        self.filters.type_menu_search(text, now);
    }

    pub fn toggle_option(&mut self, value: &str) {
        self.filters.toggle_option(value);
    }

    pub fn select_all(&mut self) {
        self.filters.select_all();
    }

    pub fn select_none(&mut self) {
        self.filters.select_none();
    }

    pub fn apply_filter(&mut self, now: u64) -> bool {
        let changed = self.filters.apply(&mut self.ctx);
        if changed {
            self.recompute(now);
        }
        changed
    }

    pub fn clear_filter(&mut self, now: u64) -> bool {
        let changed = self.filters.clear(&mut self.ctx);
        if changed {
            self.recompute(now);
        }
        changed
    }

    pub fn clear_column(&mut self, column: &str, now: u64) -> bool {
        let changed = self.filters.clear_column(column, &mut self.ctx);
        if changed {
            self.recompute(now);
        }
        changed
    }

    pub fn clear_all_filters(&mut self, now: u64) {
        self.filters.clear_all(&mut self.ctx);
        self.recompute(now);
    }

    /// Double-click on a header. Returns the pre-filled text.
    pub fn begin_direct_filter(&mut self, column: &str) -> Option<String> {
        self.filters.begin_direct_filter(column).map(str::to_string)
    }

    pub fn edit_direct_filter(&mut self, text: &str) {
        self.filters.edit_direct_filter(text);
    }

    /// Enter or blur on the header input.
    pub fn confirm_direct_filter(&mut self, now: u64) -> bool {
        let changed = self.filters.confirm_direct_filter(&mut self.ctx);
        if changed {
            self.recompute(now);
        }
        changed
    }

    /// Escape on the header input.
    pub fn cancel_direct_filter(&mut self) {
        self.filters.cancel_direct_filter();
    }

    /// Type into the global search box; applies after the debounce.
    pub fn type_search(&mut self, text: &str, now: u64) {
        self.filters.type_search(text, now);
    }

    /// Set the global search and apply it at once.
    pub fn set_search(&mut self, text: &str, now: u64) {
        self.filters.set_search(text);
        self.recompute(now);
    }

    // -- Uploads --

    /// Validate and queue files, then start as many as the cap allows.
    pub fn upload(&mut self, files: Vec<UploadFile>, now: u64) -> Vec<u64> {
        let ids = self.uploads.enqueue(files, &mut self.ctx, now);
        self.uploads.pump(self.sink.as_mut());
        ids
    }

    // -- State --

    pub fn render(&self) -> RenderedView {
        let widths = &self.optimizer.layout().column_widths;
        let headers = self
            .table
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, column)| HeaderView {
                state: self.filters.header_state(&column.id),
                width: widths.get(idx).copied(),
                column: column.clone(),
            })
            .collect();

        let rows = self
            .rendered
            .iter()
            .filter_map(|&idx| self.table.rows().get(idx).map(|row| (idx, row.cells.clone())))
            .collect();

        RenderedView {
            headers,
            rows,
            loaded: self.table.rows().len(),
            matching: self.visible.matching.len(),
            sticky_offset: self.optimizer.layout().sticky_offset,
            notices: self
                .ctx
                .notifier
                .notices()
                .iter()
                .map(|n| (n.level, n.message.clone()))
                .collect(),
            upload_progress: (!self.uploads.is_idle()).then(|| self.uploads.progress()),
        }
    }

    /// Rows inside the current window, ignoring frame batching.
    pub fn visible_rows(&self) -> impl Iterator<Item = &Row> {
        self.visible
            .visible
            .iter()
            .filter_map(|&idx| self.table.rows().get(idx))
    }

    /// Rows passing filters and search, ignoring the window.
    pub fn matching_rows(&self) -> impl Iterator<Item = &Row> {
        self.visible
            .matching
            .iter()
            .filter_map(|&idx| self.table.rows().get(idx))
    }

    pub fn visible(&self) -> &VisibleSet {
        &self.visible
    }

    pub fn metrics(&self) -> Metrics {
        self.optimizer
            .metrics(self.filters.value_cache().len(), self.writes.len())
    }

    /// Nothing is loading and no upload is queued or running.
    pub fn is_idle(&self) -> bool {
        !self.table.is_loading() && self.uploads.is_idle()
    }

    pub fn table(&self) -> &TableManager {
        &self.table
    }

    pub fn filters(&self) -> &FilterManager {
        &self.filters
    }

    pub fn uploads(&self) -> &UploadManager {
        &self.uploads
    }

    pub fn optimizer(&self) -> &PerformanceOptimizer {
        &self.optimizer
    }

    pub fn context(&self) -> &UiContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut UiContext {
        &mut self.ctx
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use serde_json::json;

    use super::*;
    use crate::engine::context::Viewport;
    use crate::engine::storage::MemoryFilterStore;
    use crate::engine::table::{Page, PageResult};
    use crate::engine::upload::{Transfer, TransferEvent};

    /// Answers each request on the next poll from a fixed list of pages.
    struct Pages {
        pages: Vec<Page>,
        pending: VecDeque<u32>,
        requested: std::rc::Rc<std::cell::RefCell<Vec<u32>>>,
    }

    impl RowSource for Pages {
        fn request(&mut self, page: u32) {
            self.requested.borrow_mut().push(page);
            self.pending.push_back(page);
        }

        fn poll(&mut self) -> Option<PageResult> {
            let page = self.pending.pop_front()?;
            let rows = self.pages.get(page as usize).cloned().unwrap_or_default();
            Some(PageResult { page, rows: Ok(rows) })
        }
    }

    struct NoUploads;

    impl UploadSink for NoUploads {
        fn start(&mut self, _file: &UploadFile) -> Box<dyn Transfer> {
            struct Never;
            impl Transfer for Never {
                fn poll(&mut self) -> Option<TransferEvent> {
                    None
                }
            }
            Box::new(Never)
        }
    }

    fn page(range: std::ops::Range<usize>) -> Page {
        range
            .map(|i| {
                let modality = if i % 2 == 0 { "CT" } else { "MR" };
                serde_json::from_value(json!({"Modalität": modality, "Nr": i})).unwrap()
            })
            .collect()
    }

    fn browser(pages: Vec<Page>) -> (StudyBrowser, std::rc::Rc<std::cell::RefCell<Vec<u32>>>) {
        let requested = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let source = Pages {
            pages,
            pending: VecDeque::new(),
            requested: requested.clone(),
        };
        let ctx = UiContext::new(Viewport::default(), Box::new(MemoryFilterStore::new()));
        let browser = StudyBrowser::new(
            SessionConfig::default(),
            ctx,
            Box::new(source),
            Box::new(NoUploads),
        );
        (browser, requested)
    }

    #[test]
    fn init_loads_first_page_and_renders_window() {
        let (mut b, requested) = browser(vec![page(0..100)]);
        b.init(0);
        let report = b.tick(1);
        assert_eq!(report.outcomes, vec![LoadOutcome::Appended(100)]);
        assert!(report.recomputed);
        assert_eq!(*requested.borrow(), vec![0]);

        // viewport 800 / row 40 = 20 rows plus a buffer of 10 below
        assert_eq!(b.visible().visible.len(), 30);
        assert_eq!(b.render().rows.len(), 0);
        b.tick(17);
        assert_eq!(b.render().rows.len(), 30);
        assert_eq!(b.render().headers[0].column.id, "modalitaet");
    }

    #[test]
    fn scroll_near_bottom_requests_next_page_until_empty() {
        let (mut b, requested) = browser(vec![page(0..30), page(30..60)]);
        b.init(0);
        b.tick(1);

        // 30 rows * 40 = 1200px document, 800px viewport
        b.on_scroll(100.0, 10);
        b.tick(310);
        b.tick(311);
        assert_eq!(b.table().rows().len(), 60);

        b.on_scroll(1600.0, 400);
        b.tick(700);
        b.tick(701);
        assert!(b.table().is_exhausted());

        b.on_scroll(1700.0, 800);
        b.tick(1100);
        assert_eq!(*requested.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn applied_filter_and_search_intersect() {
        let (mut b, _) = browser(vec![page(0..10)]);
        b.init(0);
        b.tick(1);

        b.toggle_filter_menu("modalitaet", &Rect::new(0.0, 0.0, 100.0, 30.0));
        b.select_none();
        b.toggle_option("CT");
        assert!(b.apply_filter(2));
        assert_eq!(b.matching_rows().count(), 5);

        b.set_search("8", 3);
        let cells: Vec<_> = b.matching_rows().map(|r| r.cell(1).to_string()).collect();
        assert_eq!(cells, vec!["8"]);
        assert_eq!(b.metrics().cache_size, 0);
    }

    #[test]
    fn menu_values_come_from_matching_rows() {
        let (mut b, _) = browser(vec![page(0..10)]);
        b.init(0);
        b.tick(1);
        b.set_search("MR", 2);

        b.toggle_filter_menu("modalitaet", &Rect::default());
        let menu = b.filters().open_menu_state().unwrap();
        let values: Vec<_> = menu.options.iter().map(|o| o.value.as_str()).collect();
        assert_eq!(values, vec!["MR"]);
        assert_eq!(b.metrics().cache_size, 1);
    }
}
