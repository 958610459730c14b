//! Rendering performance: virtualization window, layout sync, lazy loading
//! and frame-batched writes.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::config::ClientConfig;

use super::context::{Rect, Viewport};
use super::timing::{Debouncer, DeferredKind, DeferredTasks, FrameThrottle};
use super::visibility::WindowParams;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerConfig {
    pub row_height: f64,
    pub buffer: usize,
    pub batch_size: usize,
    pub defer_timeout_ms: u64,
    pub resize_debounce_ms: u64,
    /// Distance outside the viewport at which lazy elements load (px).
    pub root_margin: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            row_height: 40.0,
            buffer: 10,
            batch_size: 50,
            defer_timeout_ms: 100,
            resize_debounce_ms: 150,
            root_margin: 50.0,
        }
    }
}

impl OptimizerConfig {
    pub fn from_client(client: &ClientConfig) -> Self {
        Self {
            row_height: f64::from(client.row_height.max(1)),
            buffer: client.render_buffer,
            batch_size: client.batch_size.max(1),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Layout sync
// ---------------------------------------------------------------------------

/// Measured table geometry, supplied by the host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayoutSnapshot {
    pub header_widths: Vec<f64>,
    pub first_row_widths: Vec<f64>,
    /// Document offset of the table's top edge.
    pub table_top: f64,
}

/// Layout decided by the last sync.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Layout {
    pub column_widths: Vec<f64>,
    /// Translation applied to the sticky header.
    pub sticky_offset: f64,
}

/// Width per column is the wider of header and first-row cell. The header
/// follows the scroll once the table top has scrolled out of view.
pub fn sync_layout(snapshot: &LayoutSnapshot, scroll_y: f64) -> Layout {
    let columns = snapshot
        .header_widths
        .len()
        .max(snapshot.first_row_widths.len());
    let column_widths = (0..columns)
        .map(|i| {
            let header = snapshot.header_widths.get(i).copied().unwrap_or(0.0);
            let cell = snapshot.first_row_widths.get(i).copied().unwrap_or(0.0);
            header.max(cell)
        })
        .collect();

    let sticky_offset = if scroll_y > snapshot.table_top {
        scroll_y - snapshot.table_top
    } else {
        0.0
    };

    Layout {
        column_widths,
        sticky_offset,
    }
}

// ---------------------------------------------------------------------------
// Lazy loading
// ---------------------------------------------------------------------------

/// Elements whose content loads once they come near the viewport.
///
/// Rects are in document coordinates. An element loads at most once and is
/// unobserved afterwards.
#[derive(Debug, Clone)]
pub struct LazyLoader {
    root_margin: f64,
    observed: BTreeMap<String, Rect>,
    loaded: BTreeSet<String>,
}

impl LazyLoader {
    pub fn new(root_margin: f64) -> Self {
        Self {
            root_margin,
            observed: BTreeMap::new(),
            loaded: BTreeSet::new(),
        }
    }

    /// Start observing `id`. Already loaded elements are ignored.
    pub fn observe(&mut self, id: impl Into<String>, rect: Rect) -> bool {
        let id = id.into();
        if self.loaded.contains(&id) {
            return false;
        }
        self.observed.insert(id, rect);
        true
    }

    /// Load every observed element within the root margin of `viewport`.
    pub fn check(&mut self, viewport: &Viewport) -> Vec<String> {
        let top = viewport.scroll_y - self.root_margin;
        let bottom = viewport.scroll_y + viewport.height + self.root_margin;

        let due: Vec<String> = self
            .observed
            .iter()
            .filter(|(_, rect)| rect.bottom() >= top && rect.top <= bottom)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &due {
            self.observed.remove(id);
            self.loaded.insert(id.clone());
        }
        due
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.loaded.contains(id)
    }

    pub fn observed_len(&self) -> usize {
        self.observed.len()
    }
}

// ---------------------------------------------------------------------------
// Write batching
// ---------------------------------------------------------------------------

/// Pending writes applied at most `batch_size` per animation frame.
#[derive(Debug, Clone)]
pub struct WriteQueue<T> {
    batch_size: usize,
    queue: VecDeque<T>,
    frame: FrameThrottle,
}

impl<T> WriteQueue<T> {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            queue: VecDeque::new(),
            frame: FrameThrottle::default(),
        }
    }

    pub fn push(&mut self, write: T, now: u64) {
        self.queue.push_back(write);
        self.frame.request(now);
    }

    pub fn extend(&mut self, writes: impl IntoIterator<Item = T>, now: u64) {
        let before = self.queue.len();
        self.queue.extend(writes);
        if self.queue.len() > before {
            self.frame.request(now);
        }
    }

    /// Writes for the frame due at `now`. Leftovers are scheduled for the
    /// next frame.
    pub fn drain_frame(&mut self, now: u64) -> Vec<T> {
        if !self.frame.fire(now) {
            return Vec::new();
        }
        let take = self.batch_size.min(self.queue.len());
        let batch: Vec<T> = self.queue.drain(..take).collect();
        if !self.queue.is_empty() {
            self.frame.request(now);
        }
        batch
    }

    /// Drop pending writes, e.g. when the rows they target are gone.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

// ---------------------------------------------------------------------------
// PerformanceOptimizer
// ---------------------------------------------------------------------------

/// Snapshot of the optimizer's internal queues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct Metrics {
    /// Cached filter value lists.
    pub cache_size: usize,
    pub deferred_tasks: usize,
    pub queued_writes: usize,
}

/// What came due during one [`PerformanceOptimizer::tick`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizerTick {
    /// The visibility window must be recomputed.
    pub recompute: bool,
    /// Deferred kinds that ran.
    pub ran: Vec<DeferredKind>,
    /// Lazy elements that loaded.
    pub loaded: Vec<String>,
}

#[derive(Debug)]
pub struct PerformanceOptimizer {
    config: OptimizerConfig,
    scroll: FrameThrottle,
    resize: Debouncer,
    deferred: DeferredTasks,
    lazy: LazyLoader,
    snapshot: LayoutSnapshot,
    layout: Layout,
}

impl PerformanceOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            scroll: FrameThrottle::default(),
            resize: Debouncer::new(config.resize_debounce_ms),
            deferred: DeferredTasks::new(config.defer_timeout_ms),
            lazy: LazyLoader::new(config.root_margin),
            snapshot: LayoutSnapshot::default(),
            layout: Layout::default(),
            config,
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn window_params(&self, viewport: &Viewport) -> WindowParams {
        WindowParams {
            scroll_y: viewport.scroll_y,
            viewport_height: viewport.height,
            row_height: self.config.row_height,
            buffer: self.config.buffer,
        }
    }

    pub fn on_scroll(&mut self, now: u64) {
        self.scroll.request(now);
    }

    pub fn on_resize(&mut self, now: u64) {
        self.resize.trigger(now);
    }

    /// Table content changed (rows added or removed).
    pub fn on_mutation(&mut self, now: u64) {
        self.deferred.defer(DeferredKind::Mutation, now);
    }

    /// Record fresh measurements from the host.
    pub fn measure(&mut self, snapshot: LayoutSnapshot) {
        self.snapshot = snapshot;
    }

    pub fn observe_lazy(&mut self, id: impl Into<String>, rect: Rect) -> bool {
        self.lazy.observe(id, rect)
    }

    pub fn lazy(&self) -> &LazyLoader {
        &self.lazy
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn snapshot(&self) -> &LayoutSnapshot {
        &self.snapshot
    }

    /// Fire due timers against the current viewport.
    pub fn tick(&mut self, viewport: &Viewport, now: u64) -> OptimizerTick {
        let mut tick = OptimizerTick::default();

        if self.scroll.fire(now) {
            tick.recompute = true;
            tick.loaded = self.lazy.check(viewport);
            self.layout.sticky_offset =
                sync_layout(&self.snapshot, viewport.scroll_y).sticky_offset;
        }

        if self.resize.fire(now) {
            self.deferred.defer(DeferredKind::Resize, now);
        }

        let ran = self.deferred.fire(now);
        if !ran.is_empty() {
            tracing::trace!(
                kinds = ?ran.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
                "deferred layout tasks"
            );
            tick.recompute = true;
            self.layout = sync_layout(&self.snapshot, viewport.scroll_y);
            tick.loaded.extend(self.lazy.check(viewport));
            tick.ran = ran;
        }

        tick
    }

    pub fn metrics(&self, cache_size: usize, queued_writes: usize) -> Metrics {
        Metrics {
            cache_size,
            deferred_tasks: self.deferred.len(),
            queued_writes,
        }
    }
}
