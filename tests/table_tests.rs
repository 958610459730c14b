/// Table loading tests.
///
/// A `StudyBrowser` runs against a scripted row source that answers every
/// request on the following poll. Time is driven explicitly in milliseconds.
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use rad_analyse::engine::context::NoticeLevel;
use rad_analyse::engine::table::Page;
use rad_analyse::engine::upload::{Transfer, TransferEvent, UploadFile, UploadSink};
use rad_analyse::engine::{
    LoadOutcome, MemoryFilterStore, PageResult, RowSource, SessionConfig, StudyBrowser, UiContext,
    Viewport,
};
use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Serves scripted responses in request order; an empty page once the
/// script runs out.
struct Script {
    responses: VecDeque<Result<Page, String>>,
    pending: VecDeque<u32>,
    requested: Rc<RefCell<Vec<u32>>>,
}

impl RowSource for Script {
    fn request(&mut self, page: u32) {
        self.requested.borrow_mut().push(page);
        self.pending.push_back(page);
    }

    fn poll(&mut self) -> Option<PageResult> {
        let page = self.pending.pop_front()?;
        let rows = match self.responses.pop_front() {
            Some(Ok(rows)) => Ok(rows),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Ok(Page::new()),
        };
        Some(PageResult { page, rows })
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

fn objects(values: Vec<Value>) -> Page {
    values
        .into_iter()
        .map(|v| serde_json::from_value(v).unwrap())
        .collect()
}

fn studies(from: usize, len: usize) -> Page {
    objects(
        (from..from + len)
            .map(|i| json!({"Modalität": "CT", "Studiendatum": "01-02-2024", "Nr": i}))
            .collect(),
    )
}

fn browser(
    responses: Vec<Result<Page, String>>,
    viewport: Viewport,
) -> (StudyBrowser, Rc<RefCell<Vec<u32>>>) {
    let requested = Rc::new(RefCell::new(Vec::new()));
    let source = Script {
        responses: responses.into(),
        pending: VecDeque::new(),
        requested: requested.clone(),
    };
    let ctx = UiContext::new(viewport, Box::new(MemoryFilterStore::new()));
    let browser = StudyBrowser::new(
        SessionConfig::default(),
        ctx,
        Box::new(source),
        Box::new(NoUploads),
    );
    (browser, requested)
}

/// A viewport tall enough that the whole table is always near the bottom.
fn tall() -> Viewport {
    Viewport {
        width: 1280.0,
        height: 10_000.0,
        scroll_y: 0.0,
    }
}

/// Scroll, wait out the trigger debounce, then let the fetch arrive.
fn scroll_and_settle(b: &mut StudyBrowser, now: u64) {
    b.on_scroll(0.0, now);
    b.tick(now + 300);
    b.tick(now + 301);
}

// ---------------------------------------------------------------------------
// Paging
// ---------------------------------------------------------------------------

#[test]
fn loaded_rows_sum_page_lengths_until_empty_page() {
    let (mut b, requested) = browser(
        vec![Ok(studies(0, 5)), Ok(studies(5, 7)), Ok(studies(12, 3))],
        tall(),
    );
    b.init(0);
    assert_eq!(b.tick(1).outcomes, vec![LoadOutcome::Appended(5)]);

    let mut now = 1_000;
    for _ in 0..6 {
        scroll_and_settle(&mut b, now);
        now += 1_000;
    }

    assert_eq!(b.render().loaded, 15);
    assert!(b.table().is_exhausted());
    // page 3 came back empty, the trigger never asked again
    assert_eq!(*requested.borrow(), vec![0, 1, 2, 3]);

    b.tick(now);
    assert_eq!(b.render().rows.len(), 15);
}

#[test]
fn manual_load_after_end_of_data_is_still_allowed() {
    let (mut b, requested) = browser(vec![Ok(studies(0, 2))], tall());
    b.init(0);
    b.tick(1);
    scroll_and_settle(&mut b, 100);
    assert!(b.table().is_exhausted());

    assert!(b.load_next());
    b.tick(1_000);
    assert_eq!(*requested.borrow(), vec![0, 1, 1]);
    assert_eq!(b.table().rows().len(), 2);
}

#[test]
fn second_request_while_in_flight_is_dropped() {
    let (mut b, requested) = browser(vec![Ok(studies(0, 3))], tall());
    b.init(0);
    assert!(b.table().is_loading());
    assert!(!b.load_next());
    assert!(!b.load_page(4));
    assert_eq!(*requested.borrow(), vec![0]);

    b.tick(1);
    assert!(!b.table().is_loading());
    assert!(b.load_next());
}

#[test]
fn scroll_far_from_bottom_does_not_load() {
    let viewport = Viewport::default();
    let (mut b, requested) = browser(vec![Ok(studies(0, 100))], viewport);
    b.init(0);
    b.tick(1);

    // 100 rows * 40px = 4000px document, 800px viewport, 500px threshold
    b.on_scroll(1_000.0, 100);
    b.tick(400);
    b.tick(401);
    assert_eq!(*requested.borrow(), vec![0]);

    b.on_scroll(2_800.0, 500);
    b.tick(800);
    assert_eq!(*requested.borrow(), vec![0, 1]);
}

// ---------------------------------------------------------------------------
// Columns
// ---------------------------------------------------------------------------

#[test]
fn columns_come_from_first_page_and_stay_fixed() {
    let first = objects(vec![
        json!({"Modalität": "CT", "Studiendatum": "01-02-2024", "Anfragender Arzt": "Dr. Weber"}),
    ]);
    let second = objects(vec![json!({
        "anfragender_arzt": "Dr. Roth",
        "Extra": "x",
        "Modalität": "MR"
    })]);
    let (mut b, _) = browser(vec![Ok(first), Ok(second)], tall());
    b.init(0);
    b.tick(1);
    scroll_and_settle(&mut b, 100);

    let ids: Vec<_> = b.table().columns().iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["modalitaet", "studiendatum", "anfragender_arzt"]);
    let labels: Vec<_> = b
        .render()
        .headers
        .iter()
        .map(|h| h.column.label.clone())
        .collect();
    assert_eq!(labels, vec!["Modalität", "Studiendatum", "Anfragender Arzt"]);

    let rows = b.table().rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].cells, vec!["MR", "", "Dr. Roth"]);
}

#[test]
fn empty_first_page_derives_no_columns() {
    let (mut b, _) = browser(vec![Ok(Page::new())], tall());
    b.init(0);
    assert_eq!(b.tick(1).outcomes, vec![LoadOutcome::EndOfData]);
    assert!(b.table().columns().is_empty());
    assert!(b.render().headers.is_empty());
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn failed_fetch_keeps_rows_and_shows_error() {
    let (mut b, _) = browser(
        vec![Ok(studies(0, 4)), Err("connection refused".to_string())],
        tall(),
    );
    b.init(0);
    b.tick(1);

    b.on_scroll(0.0, 100);
    b.tick(400);
    let report = b.tick(401);
    assert_eq!(report.outcomes, vec![LoadOutcome::Failed]);
    assert_eq!(b.table().rows().len(), 4);
    assert!(!b.table().is_exhausted());

    let notices = b.render().notices;
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].0, NoticeLevel::Error);
    assert!(notices[0].1.contains("connection refused"));

    // transient: gone after the notice lifetime
    b.tick(10_000);
    assert!(b.render().notices.is_empty());
}

#[test]
fn reset_restarts_from_first_page() {
    let (mut b, requested) = browser(
        vec![Ok(studies(0, 3)), Ok(studies(0, 4))],
        tall(),
    );
    b.init(0);
    b.tick(1);
    assert_eq!(b.table().rows().len(), 3);

    b.reset_and_reload(10);
    assert!(b.table().rows().is_empty());
    b.tick(11);
    assert_eq!(b.table().rows().len(), 4);
    assert_eq!(*requested.borrow(), vec![0, 0]);
}
