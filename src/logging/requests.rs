use std::fs::{self, OpenOptions, create_dir_all};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request log entry (JSONL)
// ---------------------------------------------------------------------------

/// File name of the request log inside `[logging] dir`.
pub const REQUEST_LOG_FILE: &str = "requests.jsonl";

/// One served HTTP request, as appended to `requests.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLogEntry {
    pub timestamp: String,
    pub method: String,
    /// Path plus query string as received.
    pub url: String,
    pub status: u16,
    pub duration_ms: u64,
    /// `"HIT"` or `"MISS"` for cacheable requests while the cache is enabled.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cache: Option<String>,
}

impl RequestLogEntry {
    pub fn new(method: &str, url: &str, status: u16, duration_ms: u64) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            method: method.to_string(),
            url: url.to_string(),
            status,
            duration_ms,
            cache: None,
        }
    }

    /// Path without the query string, used for grouping.
    pub fn route(&self) -> &str {
        self.url.split('?').next().unwrap_or(&self.url)
    }
}

// ---------------------------------------------------------------------------
// Log handle
// ---------------------------------------------------------------------------

/// Append-only JSONL request log.
///
/// A disabled log accepts entries and drops them.
#[derive(Debug, Clone)]
pub struct RequestLog {
    path: Option<PathBuf>,
}

impl RequestLog {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: Some(dir.join(REQUEST_LOG_FILE)),
        }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one entry. Write failures are reported through `tracing` and
    /// otherwise ignored; a broken log must not fail the request.
    pub fn record(&self, entry: &RequestLogEntry) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = append_entry(path, entry) {
            tracing::warn!(path = %path.display(), error = %e, "failed to append request log");
        }
    }
}

// ---------------------------------------------------------------------------
// Reading log entries
// ---------------------------------------------------------------------------

/// Read all entries of a request log.
///
/// Skips malformed lines. Returns an empty vec if the file does not exist.
pub fn read_all_entries(path: &Path) -> Vec<RequestLogEntry> {
    let Ok(file) = fs::File::open(path) else {
        return Vec::new();
    };

    BufReader::new(file)
        .lines()
        .map_while(Result::ok)
        .filter_map(|line| serde_json::from_str::<RequestLogEntry>(&line).ok())
        .collect()
}

/// Read entries from the last `days` days, or all of them for `None`.
pub fn read_entries_since_days(path: &Path, days: Option<u32>) -> Vec<RequestLogEntry> {
    let entries = read_all_entries(path);

    let Some(days) = days else {
        return entries;
    };

    let cutoff = (Utc::now() - chrono::Duration::days(i64::from(days))).to_rfc3339();
    entries
        .into_iter()
        .filter(|e| e.timestamp >= cutoff)
        .collect()
}

fn append_entry(path: &Path, entry: &RequestLogEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let json = serde_json::to_string(entry)?;
    writeln!(file, "{json}")?;

    Ok(())
}
