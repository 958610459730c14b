/// HTTP API tests.
///
/// Requests go through `web::handle` directly, so no sockets are opened.
/// Each test uses its own in-memory SQLite store.
use rad_analyse::config::RadConfig;
use rad_analyse::logging::requests::RequestLog;
use rad_analyse::store::StudyStore;
use rad_analyse::web::{self, ApiRequest, AppState, BodyError, CacheStatus};
use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const BOUNDARY: &str = "----rad-analyse-test-boundary";

fn config(query_limit: u32, cache: Option<u64>) -> RadConfig {
    let mut config = RadConfig::default();
    config.database.query_limit = query_limit;
    config.logging.request_log = false;
    if let Some(ttl) = cache {
        config.cache.enabled = true;
        config.cache.ttl_secs = ttl;
    }
    config
}

fn state_with(config: &RadConfig) -> AppState {
    let store = StudyStore::open_in_memory().unwrap();
    AppState::new(config, store).with_request_log(RequestLog::disabled())
}

fn study(date: &str, modality: &str) -> Value {
    json!({
        "Modalität": modality,
        "Studiendatum": date,
        "Studienbeschreibung": "Thorax",
        "Anfragename": null,
        "Institution": "Klinikum Nord",
        "Anfragende Abteilung": "Innere",
        "Anfragender Arzt": "Dr. Weber",
        "Überweiser": null,
        "Befundverfasser": "Dr. Roth",
        "Patientengeschlecht": "M",
        "Patientenalter": "61Y",
        "Diagnose": null,
        "Untersuchungsstatus": "befundet"
    })
}

/// A multipart body with one `files` part per `(filename, content type, content)`.
fn multipart(files: &[(&str, &str, String)]) -> Vec<u8> {
    let mut body = String::new();
    for (name, content_type, content) in files {
        body.push_str(&format!("--{BOUNDARY}\r\n"));
        body.push_str(&format!(
            "Content-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\n"
        ));
        body.push_str(&format!("Content-Type: {content_type}\r\n\r\n"));
        body.push_str(content);
        body.push_str("\r\n");
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    body.into_bytes()
}

fn upload(state: &AppState, files: &[(&str, &str, String)]) -> web::ApiResponse {
    let request = ApiRequest::post(
        "/api/upload",
        &format!("multipart/form-data; boundary={BOUNDARY}"),
        multipart(files),
    );
    web::handle(state, &request)
}

fn get(state: &AppState, url: &str) -> web::ApiResponse {
    web::handle(state, &ApiRequest::get(url))
}

fn dates(response: &web::ApiResponse) -> Vec<String> {
    response
        .body_json()
        .unwrap()
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["studiendatum"].as_str().unwrap().to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

#[test]
fn batch_with_invalid_middle_file_reports_per_file() {
    let state = state_with(&config(200, None));
    let good = json!([study("01-02-2024", "CT")]).to_string();
    let bad = json!([study("2024-02-01", "MR")]).to_string();

    let response = upload(
        &state,
        &[
            ("eins.json", "application/json", good.clone()),
            ("zwei.json", "application/json", bad),
            ("drei.json", "application/json", good),
        ],
    );
    assert_eq!(response.status, 200);

    let report = response.body_json().unwrap();
    let succeeded: Vec<_> = report["success"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["filename"].as_str().unwrap())
        .collect();
    assert_eq!(succeeded, vec!["eins.json", "drei.json"]);

    let errors = report["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["filename"], "zwei.json");
    assert!(errors[0]["error"].as_str().unwrap().contains("date"));

    let rows = get(&state, "/api/studies?page=0").body_json().unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 2);
}

#[test]
fn upload_rejects_wrong_type_and_reports_record_count() {
    let state = state_with(&config(200, None));
    let two = json!([study("01-02-2024", "CT"), study("02-02-2024", "CT")]).to_string();

    let response = upload(
        &state,
        &[
            ("liste.txt", "text/plain", "[]".to_string()),
            ("studien.json", "application/json", two),
        ],
    );
    let report = response.body_json().unwrap();
    assert_eq!(report["success"][0]["records"], 2);
    assert_eq!(report["errors"][0]["filename"], "liste.txt");
    assert!(
        report["errors"][0]["error"]
            .as_str()
            .unwrap()
            .contains("application/json")
    );
}

#[test]
fn upload_without_files_is_bad_request() {
    let state = state_with(&config(200, None));
    let body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhallo\r\n--{BOUNDARY}--\r\n"
    );
    let response = web::handle(
        &state,
        &ApiRequest::post(
            "/api/upload",
            &format!("multipart/form-data; boundary={BOUNDARY}"),
            body.into_bytes(),
        ),
    );
    assert_eq!(response.status, 400);
    assert_eq!(response.body_json().unwrap()["error"], "no files uploaded");

    let response = web::handle(
        &state,
        &ApiRequest::post("/api/upload", "application/json", b"[]".to_vec()),
    );
    assert_eq!(response.status, 400);
}

#[test]
fn oversized_upload_body_is_refused_before_buffering() {
    let mut limited = config(200, None);
    limited.upload.max_request_bytes = 1024;
    let limit = limited.upload.max_request_bytes;
    let body = multipart(&[("gross.json", "application/json", "x".repeat(4096))]);

    // a declared length over the limit is refused without reading
    let mut unread: &[u8] = &body;
    let err = web::read_body(&mut unread, Some(body.len()), limit).unwrap_err();
    assert_eq!(unread.len(), body.len());
    let response = err.response();
    assert_eq!(response.status, 413);
    assert!(
        response.body_json().unwrap()["error"]
            .as_str()
            .unwrap()
            .contains("1024")
    );

    // without a declared length reading stops one byte past the limit
    let mut chunked: &[u8] = &body;
    let err = web::read_body(&mut chunked, None, limit).unwrap_err();
    assert!(matches!(err, BodyError::TooLarge { limit: 1024 }));
    assert_eq!(body.len() - chunked.len(), 1025);

    // a body within the limit reaches the upload handler
    let state = state_with(&limited);
    let small = multipart(&[(
        "klein.json",
        "application/json",
        json!([study("01-02-2024", "CT")]).to_string(),
    )]);
    let mut reader: &[u8] = &small;
    let read = web::read_body(&mut reader, Some(small.len()), limit).unwrap();
    let response = web::handle(
        &state,
        &ApiRequest::post(
            "/api/upload",
            &format!("multipart/form-data; boundary={BOUNDARY}"),
            read,
        ),
    );
    assert_eq!(response.status, 200);
    assert_eq!(response.body_json().unwrap()["success"][0]["records"], 1);
}

// ---------------------------------------------------------------------------
// Paging
// ---------------------------------------------------------------------------

#[test]
fn pages_are_limited_and_newest_first() {
    let state = state_with(&config(2, None));
    let batch = json!([
        study("01-02-2023", "CT"),
        study("15-06-2024 08:30", "MR"),
        study("03-01-2024", "CT"),
    ])
    .to_string();
    upload(&state, &[("a.json", "application/json", batch)]);

    assert_eq!(
        dates(&get(&state, "/api/studies?page=0")),
        vec!["15-06-2024 08:30", "03-01-2024"]
    );
    assert_eq!(dates(&get(&state, "/api/studies?page=1")), vec!["01-02-2023"]);
    assert!(dates(&get(&state, "/api/studies?page=2")).is_empty());
    // invalid page falls back to the first page
    assert_eq!(dates(&get(&state, "/api/studies?page=abc")).len(), 2);
}

#[test]
fn rows_are_keyed_by_column_identifier() {
    let state = state_with(&config(200, None));
    let batch = json!([study("01-02-2024", "CT")]).to_string();
    upload(&state, &[("a.json", "application/json", batch)]);

    let rows = get(&state, "/api/studies").body_json().unwrap();
    let row = rows[0].as_object().unwrap();
    let keys: Vec<_> = row.keys().map(String::as_str).collect();
    assert_eq!(keys[0], "modalitaet");
    assert!(keys.contains(&"ueberweiser"));
    assert_eq!(row["anfragename"], Value::Null);
}

// ---------------------------------------------------------------------------
// Response cache
// ---------------------------------------------------------------------------

#[test]
fn cache_hits_within_ttl_and_flushes_after_upload() {
    let state = state_with(&config(200, Some(3600)));

    let first = get(&state, "/api/studies?page=0");
    assert_eq!(first.cache, Some(CacheStatus::Miss));
    let second = get(&state, "/api/studies?page=0");
    assert_eq!(second.cache, Some(CacheStatus::Hit));
    assert_eq!(second.body, first.body);

    let batch = json!([study("01-02-2024", "CT")]).to_string();
    upload(&state, &[("a.json", "application/json", batch)]);

    let after = get(&state, "/api/studies?page=0");
    assert_eq!(after.cache, Some(CacheStatus::Miss));
    assert_eq!(after.body_json().unwrap().as_array().unwrap().len(), 1);
}

#[test]
fn cache_misses_after_expiry() {
    let state = state_with(&config(200, Some(0)));
    get(&state, "/api/studies?page=0");
    let again = get(&state, "/api/studies?page=0");
    assert_eq!(again.cache, Some(CacheStatus::Miss));
}

#[test]
fn health_is_never_cached() {
    let state = state_with(&config(200, Some(3600)));
    let health = get(&state, "/api/health");
    assert_eq!(health.cache, None);
    let body = health.body_json().unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["studies"], 0);
    assert!(body["cache"].is_object());
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[test]
fn base_path_prefixes_every_route() {
    let mut mounted = config(200, None);
    mounted.server.base_path = "/rad-analyse/".to_string();
    let state = state_with(&mounted);

    assert_eq!(get(&state, "/rad-analyse/api/studies").status, 200);
    assert_eq!(get(&state, "/api/studies").status, 404);

    let page = get(&state, "/rad-analyse/");
    assert_eq!(page.status, 200);
    assert!(page.content_type.starts_with("text/html"));
    assert!(String::from_utf8_lossy(&page.body).contains(r#"const BASE = "/rad-analyse";"#));
}

#[test]
fn unknown_route_is_not_found() {
    let state = state_with(&config(200, None));
    let response = get(&state, "/api/unbekannt");
    assert_eq!(response.status, 404);
}
