/// Column filter, direct filter and global search tests.
///
/// Every test loads the same six studies into a `StudyBrowser` and drives
/// the filter actions a user would take.
use std::collections::{BTreeSet, VecDeque};

use rad_analyse::engine::storage::FILTERS_KEY;
use rad_analyse::engine::table::Page;
use rad_analyse::engine::upload::{Transfer, TransferEvent, UploadFile, UploadSink};
use rad_analyse::engine::{
    MemoryFilterStore, PageResult, Rect, RowSource, SessionConfig, StudyBrowser, UiContext,
    Viewport,
};
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct OnePage {
    rows: Page,
    pending: VecDeque<u32>,
}

impl RowSource for OnePage {
    fn request(&mut self, page: u32) {
        self.pending.push_back(page);
    }

    fn poll(&mut self) -> Option<PageResult> {
        let page = self.pending.pop_front()?;
        let rows = if page == 0 { self.rows.clone() } else { Page::new() };
        Some(PageResult { page, rows: Ok(rows) })
    }
}

struct NoUploads;

impl UploadSink for NoUploads {
    fn start(&mut self, _file: &UploadFile) -> Box<dyn Transfer> {
        struct Idle;
        impl Transfer for Idle {
            fn poll(&mut self) -> Option<TransferEvent> {
                None
            }
        }
        Box::new(Idle)
    }
}

/// Index: modality, date, age, institution.
fn rows() -> Page {
    [
        ("CT", "01-02-2023", "45Y", "Nord"),
        ("MR", "15-01-2024", "9Y", "Süd"),
        ("CT", "31-12-2023", "100Y", "Nord"),
        ("US", "01-02-2023", "45Y", "Ärztehaus"),
        ("MR", "15-01-2024 08:30", "62Y", "Nord"),
        ("US", "03-03-2022", "30Y", "Nord"),
    ]
    .into_iter()
    .map(|(modality, date, age, institution)| {
        serde_json::from_value(json!({
            "Modalität": modality,
            "Studiendatum": date,
            "Patientenalter": age,
            "Institution": institution,
        }))
        .unwrap()
    })
    .collect()
}

fn loaded_with(store: MemoryFilterStore) -> StudyBrowser {
    let source = OnePage {
        rows: rows(),
        pending: VecDeque::new(),
    };
    let ctx = UiContext::new(Viewport::default(), Box::new(store));
    let mut browser = StudyBrowser::new(
        SessionConfig::default(),
        ctx,
        Box::new(source),
        Box::new(NoUploads),
    );
    browser.init(0);
    browser.tick(1);
    browser
}

fn loaded() -> StudyBrowser {
    loaded_with(MemoryFilterStore::new())
}

fn header() -> Rect {
    Rect::new(0.0, 0.0, 120.0, 32.0)
}

/// Open `column`'s menu, check exactly `values` and apply.
fn apply_values(b: &mut StudyBrowser, column: &str, values: &[&str], now: u64) {
    assert!(b.toggle_filter_menu(column, &header()));
    b.select_none();
    for value in values {
        b.toggle_option(value);
    }
    assert!(b.apply_filter(now));
}

fn menu_values(b: &mut StudyBrowser, column: &str) -> Vec<String> {
    b.click_outside();
    assert!(b.toggle_filter_menu(column, &header()));
    b.filters()
        .open_menu_state()
        .unwrap()
        .options
        .iter()
        .map(|o| o.value.clone())
        .collect()
}

fn set(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Column filters
// ---------------------------------------------------------------------------

#[test]
fn filters_are_anded_across_columns_and_clear_independently() {
    let mut b = loaded();
    assert_eq!(b.visible().matching, vec![0, 1, 2, 3, 4, 5]);

    apply_values(&mut b, "modalitaet", &["CT", "MR"], 2);
    assert_eq!(b.visible().matching, vec![0, 1, 2, 4]);

    apply_values(&mut b, "institution", &["Nord"], 3);
    assert_eq!(b.visible().matching, vec![0, 2, 4]);
    assert_eq!(b.filters().active_count(), 2);

    assert!(b.clear_column("modalitaet", 4));
    assert_eq!(b.visible().matching, vec![0, 2, 4, 5]);

    b.clear_all_filters(5);
    assert_eq!(b.visible().matching.len(), 6);
}

#[test]
fn header_shows_number_of_accepted_values() {
    let mut b = loaded();
    apply_values(&mut b, "modalitaet", &["CT", "MR"], 2);

    let headers = b.render().headers;
    let modality = headers.iter().find(|h| h.column.id == "modalitaet").unwrap();
    assert!(modality.state.filtered);
    assert_eq!(modality.state.title.as_deref(), Some("2 Filter aktiv"));

    let date = headers.iter().find(|h| h.column.id == "studiendatum").unwrap();
    assert!(!date.state.filtered);
    assert_eq!(date.state.title, None);
}

#[test]
fn menu_lists_values_of_the_current_view_only() {
    let mut b = loaded();
    apply_values(&mut b, "modalitaet", &["CT"], 2);

    assert_eq!(menu_values(&mut b, "institution"), vec!["Nord"]);
    let menu = b.filters().open_menu_state().unwrap();
    assert_eq!(menu.options[0].count, 2);
    assert!(!menu.options[0].checked);
}

#[test]
fn clear_from_menu_empties_that_column() {
    let mut b = loaded();
    apply_values(&mut b, "modalitaet", &["US"], 2);
    assert_eq!(b.visible().matching, vec![3, 5]);

    assert!(b.toggle_filter_menu("modalitaet", &header()));
    assert!(b.clear_filter(3));
    assert!(b.filters().open_menu_state().is_none());
    assert_eq!(b.visible().matching.len(), 6);
}

#[test]
fn menu_search_hides_options_after_quiet_period() {
    let mut b = loaded();
    assert!(b.toggle_filter_menu("institution", &header()));
    b.type_menu_search("SÜ", 10);

    b.tick(100);
    assert_eq!(b.filters().open_menu_state().unwrap().visible_options().count(), 3);

    b.tick(310);
    let visible: Vec<_> = b
        .filters()
        .open_menu_state()
        .unwrap()
        .visible_options()
        .map(|o| o.value.clone())
        .collect();
    assert_eq!(visible, vec!["Süd"]);
}

// ---------------------------------------------------------------------------
// Option ordering
// ---------------------------------------------------------------------------

#[test]
fn option_values_follow_column_ordering_rules() {
    let mut b = loaded();

    assert_eq!(
        menu_values(&mut b, "studiendatum"),
        vec![
            "15-01-2024",
            "15-01-2024 08:30",
            "31-12-2023",
            "01-02-2023",
            "03-03-2022"
        ]
    );
    assert_eq!(
        menu_values(&mut b, "patientenalter"),
        vec!["9Y", "30Y", "45Y", "62Y", "100Y"]
    );
    assert_eq!(
        menu_values(&mut b, "institution"),
        vec!["Ärztehaus", "Nord", "Süd"]
    );
}

#[test]
fn age_options_are_labelled_in_years() {
    let mut b = loaded();
    menu_values(&mut b, "patientenalter");
    let labels: Vec<_> = b
        .filters()
        .open_menu_state()
        .unwrap()
        .options
        .iter()
        .map(|o| o.label.clone())
        .collect();
    assert_eq!(labels[0], "9 Jahre");
    assert_eq!(labels[4], "100 Jahre");
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn restart_restores_filters_and_visibility() {
    let mut b = loaded();
    apply_values(&mut b, "modalitaet", &["CT", "MR"], 2);
    apply_values(&mut b, "institution", &["Nord"], 3);

    let stored = b.context().storage.get(FILTERS_KEY).unwrap();
    let restarted = loaded_with(MemoryFilterStore::with_entry(FILTERS_KEY, &stored));

    assert_eq!(
        restarted.filters().active_filters(),
        b.filters().active_filters()
    );
    assert_eq!(restarted.visible().matching, b.visible().matching);
    assert_eq!(restarted.visible().matching, vec![0, 2, 4]);
}

#[test]
fn malformed_stored_filters_are_discarded() {
    let b = loaded_with(MemoryFilterStore::with_entry(FILTERS_KEY, "{kaputt"));
    assert_eq!(b.filters().active_count(), 0);
    assert_eq!(b.visible().matching.len(), 6);
    assert_eq!(b.context().storage.get(FILTERS_KEY), None);
}

#[test]
fn stored_filter_for_unknown_column_is_ignored() {
    let b = loaded_with(MemoryFilterStore::with_entry(
        FILTERS_KEY,
        r#"{"modalitaet":["US"],"gibt_es_nicht":["x"]}"#,
    ));
    assert_eq!(b.visible().matching, vec![3, 5]);
    assert!(!b.filters().active_filters().contains_key("gibt_es_nicht"));
}

// ---------------------------------------------------------------------------
// Direct header filter
// ---------------------------------------------------------------------------

#[test]
fn escape_restores_header_and_keeps_filter() {
    let mut b = loaded();
    apply_values(&mut b, "institution", &["Nord"], 2);

    assert_eq!(b.begin_direct_filter("institution").as_deref(), Some(""));
    b.edit_direct_filter("ABC");
    assert_eq!(
        b.filters().header_state("institution").editing.as_deref(),
        Some("ABC")
    );

    b.cancel_direct_filter();
    assert_eq!(b.filters().header_state("institution").editing, None);
    assert_eq!(
        b.filters().active_filters()["institution"],
        set(&["Nord"])
    );
    assert_eq!(b.visible().matching, vec![0, 2, 4, 5]);
}

#[test]
fn enter_sets_exactly_the_typed_value() {
    let mut b = loaded();
    apply_values(&mut b, "institution", &["Nord", "Süd"], 2);

    b.begin_direct_filter("institution");
    b.edit_direct_filter("ABC");
    assert!(b.confirm_direct_filter(3));

    assert_eq!(b.filters().active_filters()["institution"], set(&["ABC"]));
    assert!(b.visible().matching.is_empty());
    assert_eq!(
        b.begin_direct_filter("institution").as_deref(),
        Some("ABC")
    );
}

#[test]
fn direct_filter_on_existing_value_shows_those_rows() {
    let mut b = loaded();
    b.begin_direct_filter("modalitaet");
    b.edit_direct_filter(" MR ");
    assert!(b.confirm_direct_filter(2));
    assert_eq!(b.visible().matching, vec![1, 4]);
}

// ---------------------------------------------------------------------------
// Global search
// ---------------------------------------------------------------------------

#[test]
fn search_applies_after_debounce_and_intersects_filters() {
    let mut b = loaded();
    b.type_search("nord", 10);

    b.tick(100);
    assert_eq!(b.visible().matching.len(), 6);

    b.tick(310);
    assert_eq!(b.filters().search_query(), "nord");
    assert_eq!(b.visible().matching, vec![0, 2, 4, 5]);

    apply_values(&mut b, "modalitaet", &["MR"], 400);
    assert_eq!(b.visible().matching, vec![4]);

    b.set_search("", 500);
    assert_eq!(b.visible().matching, vec![1, 4]);
}
