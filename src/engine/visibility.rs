//! Per-row visibility.
//!
//! A row is shown when it is fetched, passes every column filter, passes the
//! global search and falls inside the virtualization window. The first three
//! predicates select the *matching* rows; the window is a range over that
//! matching list. [`compute_visible_rows`] evaluates everything from scratch
//! and has no side effects.

use std::ops::Range;

use super::filter::ActiveFilters;
use super::table::Row;

/// Inputs of the virtualization window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowParams {
    pub scroll_y: f64,
    pub viewport_height: f64,
    pub row_height: f64,
    /// Extra rows rendered above and below the visible range.
    pub buffer: usize,
}

/// Result of one visibility pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibleSet {
    /// Row indices passing filters and search, in table order.
    pub matching: Vec<usize>,
    /// Window over `matching` (positions, not row indices).
    pub window: Range<usize>,
    /// Row indices actually rendered: `matching[window]`.
    pub visible: Vec<usize>,
}

impl VisibleSet {
    pub fn is_visible(&self, row: usize) -> bool {
        self.visible.binary_search(&row).is_ok()
    }

    pub fn is_matching(&self, row: usize) -> bool {
        self.matching.binary_search(&row).is_ok()
    }
}

/// Buffered window `[max(0, first - buffer), min(total, first + visible + buffer))`.
pub fn window_range(total: usize, params: &WindowParams) -> Range<usize> {
    if params.row_height <= 0.0 {
        return 0..total;
    }
    let first = (params.scroll_y.max(0.0) / params.row_height).floor() as usize;
    let visible_rows = (params.viewport_height.max(0.0) / params.row_height).ceil() as usize;

    let start = first.saturating_sub(params.buffer);
    let end = (first + visible_rows + params.buffer).min(total);
    start.min(end)..end
}

/// Every column with a non-empty accepted set must contain the row's value.
pub fn passes_filters(row: &Row, columns: &[String], filters: &ActiveFilters) -> bool {
    filters
        .iter()
        .filter(|(_, accepted)| !accepted.is_empty())
        .all(|(column, accepted)| {
            let value = columns
                .iter()
                .position(|c| c == column)
                .map_or("", |idx| row.cell(idx));
            accepted.contains(value.trim())
        })
}

/// Some cell contains `query_lower` case-insensitively. An empty query
/// matches every row.
pub fn passes_search(row: &Row, query_lower: &str) -> bool {
    query_lower.is_empty()
        || row
            .cells
            .iter()
            .any(|cell| cell.to_lowercase().contains(query_lower))
}

/// Compose all predicates into the current visible set.
pub fn compute_visible_rows(
    rows: &[Row],
    columns: &[String],
    filters: &ActiveFilters,
    query: &str,
    window: &WindowParams,
) -> VisibleSet {
    let query_lower = query.trim().to_lowercase();

    let matching: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| {
            passes_filters(row, columns, filters) && passes_search(row, &query_lower)
        })
        .map(|(idx, _)| idx)
        .collect();

    let window = window_range(matching.len(), window);
    let visible = matching[window.clone()].to_vec();

    VisibleSet {
        matching,
        window,
        visible,
    }
}
