//! Column filter menus, direct header filters and the global search.
//!
//! Per column the state machine is closed → open (search typed) →
//! applied/cleared → closed. At most one menu is open. The active filter
//! set is persisted under [`FILTERS_KEY`] after every change.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::collate::{age_label, sort_values};
use super::context::{Rect, UiContext};
use super::storage::FILTERS_KEY;
use super::table::Row;
use super::timing::Debouncer;
use super::visibility::VisibleSet;
use crate::study::AGE_COLUMN;

/// Column id → accepted values. An empty set means unrestricted.
pub type ActiveFilters = BTreeMap<String, BTreeSet<String>>;

/// Height reserved for an open menu (px).
pub const MENU_HEIGHT: f64 = 400.0;

// ---------------------------------------------------------------------------
// Menu model
// ---------------------------------------------------------------------------

/// Where an open menu is placed, in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MenuPosition {
    pub top: f64,
    pub left: f64,
    pub min_width: f64,
    /// Opened above the header because it would overflow the bottom.
    pub flipped: bool,
}

/// Below the anchor, or above it when `anchor.bottom + MENU_HEIGHT` would
/// overflow the viewport.
pub fn menu_position(anchor: &Rect, viewport_height: f64) -> MenuPosition {
    let flipped = anchor.bottom() + MENU_HEIGHT > viewport_height;
    MenuPosition {
        top: if flipped {
            anchor.top - MENU_HEIGHT
        } else {
            anchor.bottom()
        },
        left: anchor.left,
        min_width: anchor.width,
        flipped,
    }
}

/// One checkbox in a filter menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOption {
    pub value: String,
    /// Display text; ages read `45 Jahre`.
    pub label: String,
    /// Matching rows carrying this value.
    pub count: usize,
    pub checked: bool,
    /// Hidden by the menu's own search box.
    pub hidden: bool,
}

/// The currently open filter menu.
#[derive(Debug, Clone)]
pub struct FilterMenu {
    pub column: String,
    pub position: MenuPosition,
    pub options: Vec<FilterOption>,
    /// Search text whose debounce has fired.
    pub search: String,
    typed: String,
    search_debounce: Debouncer,
}

impl FilterMenu {
    pub fn visible_options(&self) -> impl Iterator<Item = &FilterOption> {
        self.options.iter().filter(|o| !o.hidden)
    }

    fn apply_search(&mut self) {
        self.search = self.typed.clone();
        let needle = self.search.to_lowercase();
        for option in &mut self.options {
            option.hidden = !option.label.to_lowercase().contains(&needle);
        }
    }
}

/// Header rendering state for one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderState {
    pub filtered: bool,
    /// `"<n> Filter aktiv"` while filtered.
    pub title: Option<String>,
    /// Inline input text while a direct filter is being typed.
    pub editing: Option<String>,
}

// ---------------------------------------------------------------------------
// Value cache
// ---------------------------------------------------------------------------

/// Sorted distinct values per column, computed from the matching rows.
///
/// Entries live until the next visibility recompute.
#[derive(Debug, Clone, Default)]
pub struct FilterValueCache {
    entries: HashMap<String, Vec<String>>,
}

impl FilterValueCache {
    pub fn get(&self, column: &str) -> Option<&[String]> {
        self.entries.get(column).map(Vec::as_slice)
    }

    /// Cached values for `column`, computing them on first use.
    fn get_or_build(&mut self, column: &str, build: impl FnOnce() -> Vec<String>) -> &[String] {
        self.entries.entry(column.to_string()).or_insert_with(build)
    }

    pub fn invalidate(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// FilterManager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct DirectEdit {
    column: String,
    text: String,
}

#[derive(Debug)]
pub struct FilterManager {
    columns: Vec<String>,
    active: ActiveFilters,
    menu: Option<FilterMenu>,
    direct_edit: Option<DirectEdit>,
    /// Last confirmed direct-filter text per column, pre-filled next time.
    direct_texts: HashMap<String, String>,
    values: FilterValueCache,
    search_query: String,
    search_typed: String,
    search_debounce: Debouncer,
    debounce_ms: u64,
}

impl FilterManager {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            columns: Vec::new(),
            active: ActiveFilters::new(),
            menu: None,
            direct_edit: None,
            direct_texts: HashMap::new(),
            values: FilterValueCache::default(),
            search_query: String::new(),
            search_typed: String::new(),
            search_debounce: Debouncer::new(debounce_ms),
            debounce_ms,
        }
    }

    // -- Columns and persistence --

    /// Fix the known columns. Only the first call has an effect. Stored
    /// filters for unknown columns are dropped.
    pub fn set_columns(&mut self, columns: Vec<String>) {
        if !self.columns.is_empty() || columns.is_empty() {
            return;
        }
        self.active.retain(|column, _| {
            let known = columns.contains(column);
            if !known {
                tracing::warn!(column, "dropping filter for unknown column");
            }
            known
        });
        for column in &columns {
            self.active.entry(column.clone()).or_default();
        }
        self.columns = columns;
    }

    /// Load the persisted filter set. Malformed state is removed from
    /// storage and filters reset to empty.
    pub fn restore(&mut self, ctx: &mut UiContext) {
        let Some(raw) = ctx.storage.get(FILTERS_KEY) else {
            return;
        };

        match serde_json::from_str::<BTreeMap<String, Vec<String>>>(&raw) {
            Ok(stored) => {
                self.active = stored
                    .into_iter()
                    .filter(|(column, _)| self.columns.is_empty() || self.columns.contains(column))
                    .map(|(column, values)| (column, values.into_iter().collect()))
                    .collect();
                for column in &self.columns {
                    self.active.entry(column.clone()).or_default();
                }
                tracing::debug!(active = self.active_count(), "restored filters");
            }
            Err(e) => {
                tracing::warn!(error = %e, "discarding malformed stored filters");
                if let Err(e) = ctx.storage.remove(FILTERS_KEY) {
                    tracing::warn!(error = %e, "failed to remove stored filters");
                }
                self.active.values_mut().for_each(BTreeSet::clear);
            }
        }
    }

    /// Write `{column: [values]}` to storage.
    pub fn persist(&self, ctx: &mut UiContext) {
        let stored: BTreeMap<&str, Vec<&str>> = self
            .active
            .iter()
            .map(|(column, values)| {
                (column.as_str(), values.iter().map(String::as_str).collect())
            })
            .collect();

        let result = serde_json::to_string(&stored)
            .map_err(anyhow::Error::from)
            .and_then(|json| ctx.storage.set(FILTERS_KEY, json));
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to persist filters");
        }
    }

    // -- Menus --

    /// Open the menu for `column`, closing any other. Opening the column
    /// whose menu is already open closes it instead. Returns whether a menu
    /// is open afterwards.
    pub fn toggle_menu(
        &mut self,
        column: &str,
        anchor: &Rect,
        rows: &[Row],
        visible: &VisibleSet,
        ctx: &UiContext,
    ) -> bool {
        let was_open = self.menu.as_ref().is_some_and(|m| m.column == column);
        self.close_menus();
        if was_open {
            return false;
        }
        self.open_menu(column, anchor, rows, visible, ctx)
    }

    /// Open the menu for `column`. Values come from the matching rows.
    pub fn open_menu(
        &mut self,
        column: &str,
        anchor: &Rect,
        rows: &[Row],
        visible: &VisibleSet,
        ctx: &UiContext,
    ) -> bool {
        let Some(col_idx) = self.columns.iter().position(|c| c == column) else {
            tracing::warn!(column, "no filter menu for unknown column");
            return false;
        };

        let matching_values = || {
            visible
                .matching
                .iter()
                .filter_map(|&idx| rows.get(idx))
                .map(move |row| row.cell(col_idx).trim())
        };

        let values = self.values.get_or_build(column, || {
            let distinct: BTreeSet<&str> = matching_values().filter(|v| !v.is_empty()).collect();
            let mut values: Vec<String> = distinct.into_iter().map(str::to_string).collect();
            sort_values(column, &mut values);
            values
        });

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for value in matching_values() {
            *counts.entry(value).or_default() += 1;
        }

        let accepted = self.active.get(column);
        let options = values
            .iter()
            .map(|value| FilterOption {
                value: value.clone(),
                label: if column == AGE_COLUMN {
                    age_label(value)
                } else {
                    value.clone()
                },
                count: counts.get(value.as_str()).copied().unwrap_or(0),
                checked: accepted.is_some_and(|set| set.contains(value)),
                hidden: false,
            })
            .collect();

        self.menu = Some(FilterMenu {
            column: column.to_string(),
            position: menu_position(anchor, ctx.viewport.height),
            options,
            search: String::new(),
            typed: String::new(),
            search_debounce: Debouncer::new(self.debounce_ms),
        });
        true
    }

    /// Close every menu (click outside).
    pub fn close_menus(&mut self) {
        self.menu = None;
    }

    pub fn open_menu_state(&self) -> Option<&FilterMenu> {
        self.menu.as_ref()
    }

    /// Type into the open menu's search box.
    pub fn type_menu_search(&mut self, text: &str, now: u64) {
        if let Some(menu) = &mut self.menu {
            menu.typed = text.to_string();
            menu.search_debounce.trigger(now);
        }
    }

    pub fn toggle_option(&mut self, value: &str) {
        if let Some(menu) = &mut self.menu
            && let Some(option) = menu.options.iter_mut().find(|o| o.value == value)
        {
            option.checked = !option.checked;
        }
    }

    pub fn select_all(&mut self) {
        self.set_all_checked(true);
    }

    pub fn select_none(&mut self) {
        self.set_all_checked(false);
    }

    fn set_all_checked(&mut self, checked: bool) {
        if let Some(menu) = &mut self.menu {
            menu.options.iter_mut().for_each(|o| o.checked = checked);
        }
    }

    /// Replace the open column's filter with exactly the checked options.
    /// Returns `false` when no menu was open.
    pub fn apply(&mut self, ctx: &mut UiContext) -> bool {
        let Some(menu) = self.menu.take() else {
            return false;
        };
        let selected: BTreeSet<String> = menu
            .options
            .into_iter()
            .filter(|o| o.checked)
            .map(|o| o.value)
            .collect();
        tracing::debug!(column = %menu.column, selected = selected.len(), "filter applied");
        self.active.insert(menu.column, selected);
        self.persist(ctx);
        true
    }

    /// Empty the open column's filter.
    pub fn clear(&mut self, ctx: &mut UiContext) -> bool {
        let Some(menu) = self.menu.take() else {
            return false;
        };
        self.clear_column(&menu.column, ctx)
    }

    /// Empty one column's filter without going through its menu.
    pub fn clear_column(&mut self, column: &str, ctx: &mut UiContext) -> bool {
        let Some(values) = self.active.get_mut(column) else {
            return false;
        };
        values.clear();
        self.persist(ctx);
        true
    }

    /// Empty every filter.
    pub fn clear_all(&mut self, ctx: &mut UiContext) {
        self.active.values_mut().for_each(BTreeSet::clear);
        self.direct_texts.clear();
        self.persist(ctx);
    }

    // -- Direct header filter --

    /// Replace the header with an input pre-filled with the previous direct
    /// filter text. Returns that text.
    pub fn begin_direct_filter(&mut self, column: &str) -> Option<&str> {
        if !self.columns.iter().any(|c| c == column) {
            return None;
        }
        self.close_menus();
        let text = self.direct_texts.get(column).cloned().unwrap_or_default();
        let edit = self.direct_edit.insert(DirectEdit {
            column: column.to_string(),
            text,
        });
        Some(edit.text.as_str())
    }

    pub fn edit_direct_filter(&mut self, text: &str) {
        if let Some(edit) = &mut self.direct_edit {
            edit.text = text.to_string();
        }
    }

    /// Enter or blur: the column's filter becomes exactly `{text}`; empty
    /// text clears it.
    pub fn confirm_direct_filter(&mut self, ctx: &mut UiContext) -> bool {
        let Some(edit) = self.direct_edit.take() else {
            return false;
        };
        let text = edit.text.trim().to_string();
        let values = self.active.entry(edit.column.clone()).or_default();
        values.clear();
        if text.is_empty() {
            self.direct_texts.remove(&edit.column);
        } else {
            values.insert(text.clone());
            self.direct_texts.insert(edit.column, text);
        }
        self.persist(ctx);
        true
    }

    /// Escape: restore the header, filter untouched.
    pub fn cancel_direct_filter(&mut self) {
        self.direct_edit = None;
    }

    // -- Global search --

    /// Type into the global search box. Takes effect after the debounce.
    pub fn type_search(&mut self, text: &str, now: u64) {
        self.search_typed = text.to_string();
        self.search_debounce.trigger(now);
    }

    /// Set the global search immediately.
    pub fn set_search(&mut self, text: &str) {
        self.search_typed = text.to_string();
        self.search_query = text.to_string();
        self.search_debounce.cancel();
    }

    pub fn search_query(&self) -> &str {
        &self.search_query
    }

    /// Fire due debounces. Returns `true` when the global search changed.
    pub fn tick(&mut self, now: u64) -> bool {
        if let Some(menu) = &mut self.menu
            && menu.search_debounce.fire(now)
        {
            menu.apply_search();
        }

        if self.search_debounce.fire(now) && self.search_query != self.search_typed {
            self.search_query = self.search_typed.clone();
            return true;
        }
        false
    }

    // -- State access --

    pub fn active_filters(&self) -> &ActiveFilters {
        &self.active
    }

    /// Number of columns with a non-empty filter.
    pub fn active_count(&self) -> usize {
        self.active.values().filter(|v| !v.is_empty()).count()
    }

    pub fn header_state(&self, column: &str) -> HeaderState {
        let size = self.active.get(column).map_or(0, BTreeSet::len);
        HeaderState {
            filtered: size > 0,
            title: (size > 0).then(|| format!("{size} Filter aktiv")),
            editing: self
                .direct_edit
                .as_ref()
                .filter(|e| e.column == column)
                .map(|e| e.text.clone()),
        }
    }

    pub fn value_cache(&self) -> &FilterValueCache {
        &self.values
    }

    /// Drop cached option lists. Called by the visibility recompute.
    pub(crate) fn invalidate_values(&mut self) {
        self.values.invalidate();
    }
}
