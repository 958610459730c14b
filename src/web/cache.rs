//! In-memory TTL cache for GET response bodies.
//!
//! Keyed by the full request URL (path + query). Only successful responses
//! are stored. The upload handler flushes the cache so freshly imported rows
//! show up on the next page request.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::schema::CacheConfig;

/// A cached response body with its content type.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub body: Vec<u8>,
    pub content_type: &'static str,
}

struct CachedEntry {
    response: CachedResponse,
    cached_at: Instant,
}

/// Counters reported by `/api/health` and the periodic statistics log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub keys: usize,
}

impl CacheStats {
    /// Hits as a percentage of lookups, 0.0 before the first lookup.
    pub fn hit_ratio_pct(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            (self.hits as f64 / lookups as f64) * 100.0
        }
    }
}

/// TTL cache with a key limit. When full, the oldest entry is evicted.
pub struct ResponseCache {
    entries: HashMap<String, CachedEntry>,
    ttl: Duration,
    max_keys: usize,
    stats: CacheStats,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_keys: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_keys: max_keys.max(1),
            stats: CacheStats::default(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_secs), config.max_keys)
    }

    /// Look up a cached response. Expired entries count as a miss and are
    /// dropped.
    pub fn get(&mut self, key: &str) -> Option<CachedResponse> {
        let fresh = self
            .entries
            .get(key)
            .map(|entry| entry.cached_at.elapsed() < self.ttl);

        match fresh {
            Some(true) => {
                self.stats.hits += 1;
                self.entries.get(key).map(|entry| entry.response.clone())
            }
            Some(false) => {
                self.entries.remove(key);
                tracing::debug!(key, "cache entry expired");
                self.stats.misses += 1;
                None
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Store a response under `key`.
    pub fn insert(&mut self, key: String, response: CachedResponse) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_keys {
            self.evict_oldest();
        }
        self.stats.sets += 1;
        self.entries.insert(
            key,
            CachedEntry {
                response,
                cached_at: Instant::now(),
            },
        );
    }

    /// Drop every entry.
    pub fn flush(&mut self) {
        let dropped = self.entries.len();
        self.entries.clear();
        tracing::info!(dropped, "response cache flushed");
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn purge_expired(&mut self) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.cached_at.elapsed() < ttl);
        before - self.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            keys: self.entries.len(),
            ..self.stats
        }
    }

    /// Emit the statistics as one structured log line.
    pub fn report(&self) {
        let stats = self.stats();
        tracing::info!(
            hits = stats.hits,
            misses = stats.misses,
            sets = stats.sets,
            keys = stats.keys,
            hit_ratio = format!("{:.2}%", stats.hit_ratio_pct()),
            "cache statistics"
        );
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.cached_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}
