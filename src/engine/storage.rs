//! Client-local key/value storage for persisted filter state.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Key under which the active filter set is stored.
pub const FILTERS_KEY: &str = "tableFilters";

/// String key/value storage, the engine's equivalent of `localStorage`.
pub trait FilterStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Volatile store for tests and one-shot sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilterStore {
    entries: BTreeMap<String, String>,
}

impl MemoryFilterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(key: &str, value: &str) -> Self {
        let mut store = Self::default();
        store.entries.insert(key.to_string(), value.to_string());
        store
    }
}

impl FilterStore for MemoryFilterStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

/// Store backed by one JSON object file, by default
/// `~/.rad-analyse/client-state.json`.
///
/// The file is re-read on every access so separate CLI invocations see each
/// other's writes.
#[derive(Debug, Clone)]
pub struct FileFilterStore {
    path: PathBuf,
}

impl FileFilterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store in the rad-analyse data directory.
    pub fn default_location() -> Option<Self> {
        crate::config::data_dir().map(|dir| Self::new(dir.join("client-state.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> BTreeMap<String, String> {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(entries).context("failed to serialize state")?;
        fs::write(&self.path, json)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}

impl FilterStore for FileFilterStore {
    fn get(&self, key: &str) -> Option<String> {
        self.read_all().remove(key)
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        let mut entries = self.read_all();
        entries.insert(key.to_string(), value);
        self.write_all(&entries)
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        let mut entries = self.read_all();
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_roundtrip() {
        let mut store = MemoryFilterStore::new();
        store.set(FILTERS_KEY, "{}".to_string()).unwrap();
        assert_eq!(store.get(FILTERS_KEY).as_deref(), Some("{}"));
        store.remove(FILTERS_KEY).unwrap();
        assert_eq!(store.get(FILTERS_KEY), None);
    }

    #[test]
    fn file_store_persists_across_instances() {
        let path = std::env::temp_dir().join(format!(
            "rad-analyse-state-{}/client-state.json",
            std::process::id()
        ));
        let _ = fs::remove_file(&path);

        let mut first = FileFilterStore::new(&path);
        first
            .set(FILTERS_KEY, r#"{"modalitaet":["CT"]}"#.to_string())
            .unwrap();
        first.set("other", "x".to_string()).unwrap();

        let mut second = FileFilterStore::new(&path);
        assert_eq!(
            second.get(FILTERS_KEY).as_deref(),
            Some(r#"{"modalitaet":["CT"]}"#)
        );
        second.remove(FILTERS_KEY).unwrap();
        assert_eq!(first.get(FILTERS_KEY), None);
        assert_eq!(first.get("other").as_deref(), Some("x"));
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let dir = std::env::temp_dir().join(format!("rad-analyse-corrupt-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("client-state.json");
        fs::write(&path, "not json").unwrap();
        assert_eq!(FileFilterStore::new(&path).get(FILTERS_KEY), None);
    }
}
