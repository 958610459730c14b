//! Paged row loading and column binding.

use anyhow::Result;
use serde_json::{Map, Value};

use crate::study::{column_id, display_value};

use super::context::UiContext;

// ---------------------------------------------------------------------------
// Row source
// ---------------------------------------------------------------------------

/// One page of study objects as returned by `GET /api/studies`.
pub type Page = Vec<Map<String, Value>>;

/// Completed page fetch.
#[derive(Debug)]
pub struct PageResult {
    pub page: u32,
    pub rows: Result<Page>,
}

/// Where pages come from. Fetches are asynchronous: `request` starts one and
/// the result shows up in a later `poll`.
pub trait RowSource {
    fn request(&mut self, page: u32);
    fn poll(&mut self) -> Option<PageResult>;
}

// ---------------------------------------------------------------------------
// Table model
// ---------------------------------------------------------------------------

/// A table column: canonical id plus the header text it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub id: String,
    pub label: String,
}

/// Cell texts in column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub cells: Vec<String>,
}

impl Row {
    /// Cell text, empty for a column the row has no cell for.
    pub fn cell(&self, idx: usize) -> &str {
        self.cells.get(idx).map_or("", String::as_str)
    }
}

/// What a finished fetch did to the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Appended(usize),
    /// Empty page; the scroll trigger stops asking for more.
    EndOfData,
    /// Fetch failed; table unchanged.
    Failed,
    /// A reset happened while the fetch was in flight. The result was
    /// dropped and page 0 must be requested.
    Restart,
}

/// Fetched rows, derived columns and paging state.
#[derive(Debug, Default)]
pub struct TableManager {
    columns: Vec<Column>,
    rows: Vec<Row>,
    current_page: u32,
    in_flight: Option<u32>,
    exhausted: bool,
    reload_pending: bool,
}

impl TableManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the single in-flight slot for `page`. Returns `None` (and does
    /// nothing) while another fetch is outstanding.
    pub fn begin_load(&mut self, page: u32) -> Option<u32> {
        if let Some(pending) = self.in_flight {
            tracing::debug!(page, pending, "page load dropped, fetch in flight");
            return None;
        }
        self.in_flight = Some(page);
        Some(page)
    }

    /// Apply a finished fetch.
    pub fn finish_load(
        &mut self,
        result: PageResult,
        ctx: &mut UiContext,
        now: u64,
    ) -> LoadOutcome {
        self.in_flight = None;

        if self.reload_pending {
            self.reload_pending = false;
            tracing::debug!(page = result.page, "discarding page fetched before reset");
            return LoadOutcome::Restart;
        }

        let page_rows = match result.rows {
            Ok(rows) => rows,
            Err(e) => {
                ctx.notifier
                    .error(format!("Fehler beim Laden der Daten: {e:#}"), now);
                return LoadOutcome::Failed;
            }
        };

        if page_rows.is_empty() {
            tracing::debug!(page = result.page, "end of data");
            self.exhausted = true;
            return LoadOutcome::EndOfData;
        }

        if self.columns.is_empty() {
            self.columns = derive_columns(&page_rows[0]);
            tracing::debug!(columns = self.columns.len(), "derived table columns");
        }

        let appended = page_rows.len();
        for record in &page_rows {
            let row = self.bind_row(record);
            self.rows.push(row);
        }
        self.current_page = self.current_page.max(result.page + 1);
        self.exhausted = false;
        tracing::debug!(page = result.page, appended, total = self.rows.len(), "page appended");
        LoadOutcome::Appended(appended)
    }

    /// Drop every row and restart paging at 0. Columns stay as derived.
    ///
    /// Returns the page to request now, or `None` when a fetch is still in
    /// flight (its result will come back as [`LoadOutcome::Restart`]).
    pub fn reset(&mut self) -> Option<u32> {
        self.rows.clear();
        self.current_page = 0;
        self.exhausted = false;
        if self.in_flight.is_some() {
            self.reload_pending = true;
            return None;
        }
        self.begin_load(0)
    }

    /// Place each value in the column with the matching id. Unknown keys
    /// are dropped; missing columns stay empty.
    fn bind_row(&self, record: &Map<String, Value>) -> Row {
        let mut cells = vec![String::new(); self.columns.len()];
        for (key, value) in record {
            let id = column_id(key);
            if let Some(idx) = self.columns.iter().position(|c| c.id == id) {
                cells[idx] = display_value(value);
            }
        }
        Row { cells }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_ids(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.id.clone()).collect()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Whether the scroll trigger may request the next page.
    pub fn wants_more(&self) -> bool {
        !self.exhausted && self.in_flight.is_none()
    }
}

/// Columns from the key order of the first row. Keys that canonicalize to
/// an id already taken are skipped.
fn derive_columns(first: &Map<String, Value>) -> Vec<Column> {
    let mut columns: Vec<Column> = Vec::with_capacity(first.len());
    for key in first.keys() {
        let id = column_id(key);
        if columns.iter().any(|c| c.id == id) {
            continue;
        }
        columns.push(Column {
            id,
            label: key.clone(),
        });
    }
    columns
}
