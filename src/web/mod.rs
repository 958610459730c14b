//! HTTP server for the study browser.
//!
//! A sync `tiny_http` server that serves:
//! - `GET  {base}/`             embedded browser page
//! - `GET  {base}/api/studies`  one page of studies (`?page=N`)
//! - `POST {base}/api/upload`   multipart JSON upload
//! - `GET  {base}/api/health`   row count and cache statistics
//!
//! Requests are handled by a fixed pool of worker threads that share the
//! store and the response cache.

mod api;
pub mod cache;
mod frontend;

use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use thiserror::Error;
use tiny_http::{Header, Request, Response, Server, StatusCode};

pub use api::{RejectedFile, UploadReport, UploadedFile, parse_page_param};
pub use tiny_http::Method;

use crate::config::RadConfig;
use crate::logging::requests::{RequestLog, RequestLogEntry};
use crate::store::StudyStore;
use cache::{CachedResponse, ResponseCache};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// State shared by all worker threads.
pub struct AppState {
    store: Mutex<StudyStore>,
    /// `None` when `[cache] enabled = false`.
    cache: Option<Mutex<ResponseCache>>,
    request_log: RequestLog,
    base_path: String,
    query_limit: u32,
    max_upload_bytes: u64,
    max_request_bytes: u64,
}

impl AppState {
    pub fn new(config: &RadConfig, store: StudyStore) -> Self {
        let request_log = if config.logging.request_log {
            RequestLog::new(&config.logging.resolved_dir())
        } else {
            RequestLog::disabled()
        };

        Self {
            store: Mutex::new(store),
            cache: config
                .cache
                .enabled
                .then(|| Mutex::new(ResponseCache::from_config(&config.cache))),
            request_log,
            base_path: config.server.normalized_base_path(),
            query_limit: config.database.query_limit.max(1),
            max_upload_bytes: config.upload.max_size_bytes,
            max_request_bytes: config.upload.max_request_bytes,
        }
    }

    /// Replace the request log (tests point it at a temp dir or disable it).
    pub fn with_request_log(mut self, log: RequestLog) -> Self {
        self.request_log = log;
        self
    }

    fn lock_store(&self) -> Result<MutexGuard<'_, StudyStore>> {
        self.store
            .lock()
            .map_err(|_| anyhow::anyhow!("study store lock poisoned"))
    }

    /// Snapshot of the response cache counters, `None` when disabled.
    pub fn cache_stats(&self) -> Option<cache::CacheStats> {
        self.cache.as_ref()?.lock().ok().map(|c| c.stats())
    }
}

// ---------------------------------------------------------------------------
// Transport-neutral request/response
// ---------------------------------------------------------------------------

/// An incoming request with its body already read.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path plus query string.
    pub url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl ApiRequest {
    pub fn get(url: &str) -> Self {
        Self {
            method: Method::Get,
            url: url.to_string(),
            content_type: None,
            body: Vec::new(),
        }
    }

    pub fn post(url: &str, content_type: &str, body: Vec<u8>) -> Self {
        Self {
            method: Method::Post,
            url: url.to_string(),
            content_type: Some(content_type.to_string()),
            body,
        }
    }
}

/// Cache outcome reported in the `X-Cache` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
        }
    }
}

/// A response before it is written to the socket.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    pub cache: Option<CacheStatus>,
}

const JSON: &str = "application/json; charset=utf-8";
const HTML: &str = "text/html; charset=utf-8";

impl ApiResponse {
    pub fn json<T: Serialize + ?Sized>(status: u16, data: &T) -> Result<Self> {
        let body = serde_json::to_vec(data).context("failed to serialize JSON response")?;
        Ok(Self {
            status,
            content_type: JSON,
            body,
            cache: None,
        })
    }

    pub fn error(status: u16, message: &str) -> Result<Self> {
        Self::json(status, &serde_json::json!({ "error": message }))
    }

    fn html(html: String) -> Self {
        Self {
            status: 200,
            content_type: HTML,
            body: html.into_bytes(),
            cache: None,
        }
    }

    /// Parse the body as JSON.
    pub fn body_json(&self) -> Result<serde_json::Value> {
        serde_json::from_slice(&self.body).context("response body is not JSON")
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Handle one request: base path, cache lookup, dispatch, error mapping.
///
/// Never fails; handler errors become `500 {"error": ...}`.
pub fn handle(state: &AppState, request: &ApiRequest) -> ApiResponse {
    let Some(url) = strip_base(&state.base_path, &request.url) else {
        return not_found();
    };
    let path = url.split('?').next().unwrap_or(url);

    let cacheable = request.method == Method::Get && path != "/api/health";
    if cacheable
        && let Some(cache) = &state.cache
        && let Ok(mut cache) = cache.lock()
        && let Some(hit) = cache.get(&request.url)
    {
        return ApiResponse {
            status: 200,
            content_type: hit.content_type,
            body: hit.body,
            cache: Some(CacheStatus::Hit),
        };
    }

    let mut response = match dispatch(state, request, path, url) {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(
                method = %request.method,
                url = %request.url,
                error = %format!("{e:#}"),
                "request failed"
            );
            internal_error(&e)
        }
    };

    if cacheable
        && let Some(cache) = &state.cache
        && let Ok(mut cache) = cache.lock()
    {
        if response.status == 200 {
            cache.insert(
                request.url.clone(),
                CachedResponse {
                    body: response.body.clone(),
                    content_type: response.content_type,
                },
            );
        }
        response.cache = Some(CacheStatus::Miss);
    }

    response
}

fn dispatch(state: &AppState, request: &ApiRequest, path: &str, url: &str) -> Result<ApiResponse> {
    match (&request.method, path) {
        (Method::Get, "/") | (Method::Get, "/index.html") => {
            Ok(ApiResponse::html(frontend::render(&state.base_path)))
        }
        (Method::Get, "/api/studies") => api::get_studies(state, url),
        (Method::Post, "/api/upload") => api::post_upload(state, request),
        (Method::Get, "/api/health") => api::get_health(state),
        _ => Ok(not_found()),
    }
}

/// Remove the base path prefix. Returns `None` for URLs outside the base.
fn strip_base<'a>(base: &str, url: &'a str) -> Option<&'a str> {
    if base.is_empty() {
        return Some(url);
    }
    let rest = url.strip_prefix(base)?;
    match rest.chars().next() {
        None => Some("/"),
        Some('/') => Some(rest),
        Some('?') => Some("/"),
        Some(_) => None,
    }
}

fn not_found() -> ApiResponse {
    ApiResponse {
        status: 404,
        content_type: JSON,
        body: br#"{"error":"not found"}"#.to_vec(),
        cache: None,
    }
}

fn plain_error(status: u16, message: &str) -> ApiResponse {
    let body = serde_json::json!({ "error": message }).to_string();
    ApiResponse {
        status,
        content_type: JSON,
        body: body.into_bytes(),
        cache: None,
    }
}

fn internal_error(e: &anyhow::Error) -> ApiResponse {
    let body = serde_json::json!({ "error": e.to_string() }).to_string();
    ApiResponse {
        status: 500,
        content_type: JSON,
        body: body.into_bytes(),
        cache: None,
    }
}

// ---------------------------------------------------------------------------
// Server entry point
// ---------------------------------------------------------------------------

/// Start the server and block until all workers exit.
pub fn serve(config: &RadConfig, store: StudyStore) -> Result<()> {
    let addr = config.server.bind_addr();
    let server = Server::http(&addr)
        .map_err(|e| anyhow::anyhow!("failed to start HTTP server on {addr}: {e}"))?;
    let server = Arc::new(server);
    let state = Arc::new(AppState::new(config, store));

    tracing::info!(
        addr = %addr,
        base_path = %state.base_path,
        workers = config.server.workers.max(1),
        cache = state.cache.is_some(),
        "rad-analyse server listening"
    );
    println!("rad-analyse running at http://{addr}{}/", state.base_path);

    if state.cache.is_some() {
        spawn_cache_maintenance(Arc::clone(&state), Duration::from_secs(600));
    }

    let workers: Vec<_> = (0..config.server.workers.max(1))
        .map(|id| {
            let server = Arc::clone(&server);
            let state = Arc::clone(&state);
            thread::Builder::new()
                .name(format!("http-worker-{id}"))
                .spawn(move || worker_loop(&server, &state))
                .context("failed to spawn HTTP worker")
        })
        .collect::<Result<_>>()?;

    for worker in workers {
        if worker.join().is_err() {
            tracing::error!("HTTP worker panicked");
        }
    }
    Ok(())
}

/// Why a request body was refused before dispatch.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("failed to read request body: {0}")]
    Unreadable(#[from] std::io::Error),
}

impl BodyError {
    /// `413` for an oversized body, `400` for one that could not be read.
    pub fn response(&self) -> ApiResponse {
        match self {
            Self::TooLarge { .. } => plain_error(413, &self.to_string()),
            Self::Unreadable(_) => plain_error(400, &self.to_string()),
        }
    }
}

/// Read a request body of at most `limit` bytes. A declared length above
/// the limit is refused without reading.
pub fn read_body(
    reader: &mut dyn Read,
    declared: Option<usize>,
    limit: u64,
) -> Result<Vec<u8>, BodyError> {
    if let Some(len) = declared
        && len as u64 > limit
    {
        return Err(BodyError::TooLarge { limit });
    }

    let mut body = Vec::new();
    reader.take(limit.saturating_add(1)).read_to_end(&mut body)?;
    if body.len() as u64 > limit {
        return Err(BodyError::TooLarge { limit });
    }
    Ok(body)
}

fn worker_loop(server: &Server, state: &AppState) {
    loop {
        match server.recv() {
            Ok(request) => serve_request(state, request),
            Err(e) => {
                tracing::error!(error = %e, "failed to accept request");
                break;
            }
        }
    }
}

fn serve_request(state: &AppState, mut request: Request) {
    let started = Instant::now();

    let content_type = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Content-Type"))
        .map(|h| h.value.as_str().to_string());

    let mut api_request = ApiRequest {
        method: request.method().clone(),
        url: request.url().to_string(),
        content_type,
        body: Vec::new(),
    };

    let declared = request.body_length();
    let body = if matches!(request.method(), Method::Post | Method::Put | Method::Patch) {
        read_body(request.as_reader(), declared, state.max_request_bytes)
    } else {
        Ok(Vec::new())
    };
    let response = match body {
        Ok(body) => {
            api_request.body = body;
            handle(state, &api_request)
        }
        Err(e) => {
            tracing::warn!(url = %api_request.url, error = %e, "rejected request body");
            e.response()
        }
    };

    let status = response.status;
    let cache = response.cache;
    let mut wire = Response::from_data(response.body).with_status_code(StatusCode(status));
    if let Ok(header) = Header::from_bytes("Content-Type", response.content_type) {
        wire = wire.with_header(header);
    }
    if let Some(cache) = cache
        && let Ok(header) = Header::from_bytes("X-Cache", cache.as_str())
    {
        wire = wire.with_header(header);
    }
    if let Err(e) = request.respond(wire) {
        tracing::debug!(error = %e, "client went away before response");
    }

    let duration_ms = started.elapsed().as_millis() as u64;
    tracing::info!(
        method = %api_request.method,
        url = %api_request.url,
        status,
        duration_ms,
        "request"
    );
    let mut entry = RequestLogEntry::new(
        api_request.method.as_str(),
        &api_request.url,
        status,
        duration_ms,
    );
    entry.cache = cache.map(|c| c.as_str().to_string());
    state.request_log.record(&entry);
}

/// Periodically drop expired cache entries and log the counters.
fn spawn_cache_maintenance(state: Arc<AppState>, every: Duration) {
    let spawned = thread::Builder::new()
        .name("cache-maintenance".to_string())
        .spawn(move || {
            while let Some(cache) = &state.cache {
                thread::sleep(every);
                if let Ok(mut cache) = cache.lock() {
                    let purged = cache.purge_expired();
                    tracing::debug!(purged, "purged expired cache entries");
                    cache.report();
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "cache maintenance thread not started");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_base_handles_prefixes() {
        assert_eq!(strip_base("", "/api/studies"), Some("/api/studies"));
        assert_eq!(strip_base("/rad", "/rad/api/studies?page=1"), Some("/api/studies?page=1"));
        assert_eq!(strip_base("/rad", "/rad"), Some("/"));
        assert_eq!(strip_base("/rad", "/rad?x=1"), Some("/"));
        assert_eq!(strip_base("/rad", "/radical/api"), None);
        assert_eq!(strip_base("/rad", "/api/studies"), None);
    }

    #[test]
    fn error_response_is_json() {
        let resp = ApiResponse::error(400, "no files uploaded").unwrap();
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body_json().unwrap()["error"], "no files uploaded");
    }

    #[test]
    fn body_within_limit_is_read_whole() {
        let mut reader: &[u8] = b"[1,2,3]";
        let body = read_body(&mut reader, Some(7), 7).unwrap();
        assert_eq!(body, b"[1,2,3]");
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
        }
    }

    #[test]
    fn unreadable_body_is_bad_request() {
        let err = read_body(&mut Broken, None, 1024).unwrap_err();
        assert!(matches!(err, BodyError::Unreadable(_)));
        assert_eq!(err.response().status, 400);
    }

    #[test]
    fn cache_status_labels() {
        assert_eq!(CacheStatus::Hit.as_str(), "HIT");
        assert_eq!(CacheStatus::Miss.as_str(), "MISS");
    }
}
