//! Request log aggregation for `rad-analyse stats`.
//!
//! Reads `requests.jsonl` and reports totals, per-route counts and latency,
//! the error count and the response cache hit ratio.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;

use super::requests::{self, RequestLogEntry};

// ---------------------------------------------------------------------------
// Aggregated stats
// ---------------------------------------------------------------------------

/// Summary statistics over the request log.
#[derive(Debug, Default, Serialize)]
pub struct RequestStats {
    pub total_requests: usize,
    /// Responses with status >= 400.
    pub error_count: usize,
    pub avg_duration_ms: f64,
    pub max_duration_ms: u64,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub routes: Vec<RouteStat>,
}

impl RequestStats {
    /// Cache hits as a percentage of logged cache lookups.
    pub fn cache_hit_pct(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / lookups as f64) * 100.0
        }
    }
}

/// Per-route aggregate. A route is `METHOD path` without the query string.
#[derive(Debug, Clone, Serialize)]
pub struct RouteStat {
    pub route: String,
    pub count: usize,
    pub errors: usize,
    pub avg_duration_ms: f64,
    pub max_duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Stats computation
// ---------------------------------------------------------------------------

/// Aggregate the request log at `path`, optionally limited to the last
/// `days` days.
pub fn compute_stats(path: &Path, days: Option<u32>) -> RequestStats {
    let entries = requests::read_entries_since_days(path, days);
    build_stats(&entries)
}

pub fn build_stats(entries: &[RequestLogEntry]) -> RequestStats {
    if entries.is_empty() {
        return RequestStats::default();
    }

    let total_requests = entries.len();
    let error_count = entries.iter().filter(|e| e.status >= 400).count();
    let total_ms: u64 = entries.iter().map(|e| e.duration_ms).sum();
    let max_duration_ms = entries.iter().map(|e| e.duration_ms).max().unwrap_or(0);

    let cache_hits = entries
        .iter()
        .filter(|e| e.cache.as_deref() == Some("HIT"))
        .count();
    let cache_misses = entries
        .iter()
        .filter(|e| e.cache.as_deref() == Some("MISS"))
        .count();

    RequestStats {
        total_requests,
        error_count,
        avg_duration_ms: total_ms as f64 / total_requests as f64,
        max_duration_ms,
        cache_hits,
        cache_misses,
        routes: compute_route_stats(entries),
    }
}

/// Group entries by route. Sorted by request count, busiest first.
fn compute_route_stats(entries: &[RequestLogEntry]) -> Vec<RouteStat> {
    let mut groups: HashMap<String, Vec<&RequestLogEntry>> = HashMap::new();
    for entry in entries {
        let route = format!("{} {}", entry.method, entry.route());
        groups.entry(route).or_default().push(entry);
    }

    let mut stats: Vec<RouteStat> = groups
        .into_iter()
        .map(|(route, group)| {
            let count = group.len();
            let total_ms: u64 = group.iter().map(|e| e.duration_ms).sum();
            RouteStat {
                route,
                count,
                errors: group.iter().filter(|e| e.status >= 400).count(),
                avg_duration_ms: total_ms as f64 / count as f64,
                max_duration_ms: group.iter().map(|e| e.duration_ms).max().unwrap_or(0),
            }
        })
        .collect();

    stats.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.route.cmp(&b.route)));
    stats
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
