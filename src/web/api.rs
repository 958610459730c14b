//! JSON API handlers.
//!
//! Handlers take the shared [`AppState`] and return an [`ApiResponse`];
//! the tiny_http glue in the parent module turns it into a wire response.

use std::io::Read;

use anyhow::{Context, Result};
use multipart::server::Multipart;
use serde::{Deserialize, Serialize};

use crate::study::validation::{ALLOWED_CONTENT_TYPE, check_file};
use crate::study::{ValidationError, validate_batch};

use super::{ApiRequest, ApiResponse, AppState};

// ---------------------------------------------------------------------------
// JSON response types
// ---------------------------------------------------------------------------

/// Result of `POST /api/upload`. Files are reported independently.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadReport {
    pub success: Vec<UploadedFile>,
    pub errors: Vec<RejectedFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub filename: String,
    pub size: u64,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedFile {
    pub filename: String,
    pub error: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    studies: u64,
    cache: Option<crate::web::cache::CacheStats>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse the `?page=N` query parameter. Missing or invalid values yield 0.
pub fn parse_page_param(url: &str) -> u32 {
    url.split('?')
        .nth(1)
        .and_then(|query| {
            query.split('&').find_map(|pair| {
                let (k, v) = pair.split_once('=')?;
                if k == "page" { v.parse().ok() } else { None }
            })
        })
        .unwrap_or(0)
}

/// Extract the multipart boundary from a `Content-Type` header value.
fn multipart_boundary(content_type: &str) -> Option<&str> {
    let (essence, params) = content_type.split_once(';')?;
    if !essence.trim().eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params.split(';').find_map(|param| {
        let (k, v) = param.split_once('=')?;
        if k.trim().eq_ignore_ascii_case("boundary") {
            Some(v.trim().trim_matches('"')).filter(|b| !b.is_empty())
        } else {
            None
        }
    })
}

/// Declared type of an uploaded part. Parts without a type are accepted
/// when the file name ends in `.json`.
fn effective_content_type(declared: Option<String>, filename: &str) -> String {
    match declared {
        Some(ct) if !ct.trim().is_empty() && ct != "application/octet-stream" => ct,
        _ if filename.to_ascii_lowercase().ends_with(".json") => ALLOWED_CONTENT_TYPE.to_string(),
        other => other.unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// API Handlers
// ---------------------------------------------------------------------------

/// `GET /api/studies?page=N` - one page of studies, newest first.
pub fn get_studies(state: &AppState, url: &str) -> Result<ApiResponse> {
    let page = parse_page_param(url);
    let rows = {
        let store = state.lock_store()?;
        store.page(page, state.query_limit)?
    };
    tracing::debug!(page, rows = rows.len(), "served studies page");
    ApiResponse::json(200, &rows)
}

/// `POST /api/upload` - multipart upload, file fields named `files`.
///
/// Each file is checked, validated and inserted on its own; one bad file
/// never affects the others. Answers 400 when the request has no files.
pub fn post_upload(state: &AppState, request: &ApiRequest) -> Result<ApiResponse> {
    let Some(boundary) = request.content_type.as_deref().and_then(multipart_boundary) else {
        return ApiResponse::error(400, "expected multipart/form-data upload");
    };

    let mut multipart = Multipart::with_body(request.body.as_slice(), boundary);
    let mut report = UploadReport::default();
    let mut seen_files = 0usize;

    while let Some(mut field) = multipart
        .read_entry()
        .context("failed to read multipart entry")?
    {
        if &*field.headers.name != "files" {
            continue;
        }
        let Some(filename) = field.headers.filename.clone() else {
            continue;
        };
        seen_files += 1;

        let content_type = effective_content_type(
            field.headers.content_type.as_ref().map(ToString::to_string),
            &filename,
        );

        let mut data = Vec::new();
        field
            .data
            .by_ref()
            .take(state.max_upload_bytes + 1)
            .read_to_end(&mut data)
            .with_context(|| format!("failed to read upload '{filename}'"))?;

        match ingest_file(state, &content_type, &data) {
            Ok(records) => {
                tracing::info!(file = %filename, records, "upload stored");
                report.success.push(UploadedFile {
                    filename,
                    size: data.len() as u64,
                    records,
                });
            }
            Err(error) => {
                tracing::warn!(file = %filename, %error, "upload rejected");
                report.errors.push(RejectedFile { filename, error });
            }
        }
    }

    if seen_files == 0 {
        return ApiResponse::error(400, "no files uploaded");
    }

    if !report.success.is_empty()
        && let Some(cache) = &state.cache
        && let Ok(mut cache) = cache.lock()
    {
        cache.flush();
    }

    ApiResponse::json(200, &report)
}

/// Check, validate and store one file. Errors come back as the message
/// reported to the client.
fn ingest_file(state: &AppState, content_type: &str, data: &[u8]) -> Result<usize, String> {
    check_file(content_type, data.len() as u64, state.max_upload_bytes)
        .map_err(|e| e.to_string())?;
    let content = std::str::from_utf8(data)
        .map_err(|e| ValidationError::InvalidJson(e.to_string()).to_string())?;
    let records = validate_batch(content).map_err(|e| e.to_string())?;

    let mut store = state.lock_store().map_err(|e| e.to_string())?;
    store
        .insert_batch(&records)
        .map_err(|e| format!("database error: {e:#}"))
}

/// `GET /api/health` - liveness plus row count and cache statistics.
pub fn get_health(state: &AppState) -> Result<ApiResponse> {
    let studies = state.lock_store()?.count()?;
    let cache = match &state.cache {
        Some(cache) => cache.lock().ok().map(|c| c.stats()),
        None => None,
    };

    ApiResponse::json(
        200,
        &HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            studies,
            cache,
        },
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
