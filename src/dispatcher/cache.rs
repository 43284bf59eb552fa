//! Operation cache persistence
//!
//! Records which operations each backend exposed the last time it connected.
//! The file outlives the process, so entries for backends that were not
//! reachable this run are kept as they were.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Error types for cache persistence operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// File I/O error
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization/deserialization error
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Cached view of one operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedOperation {
    /// Operation name
    pub name: String,
    /// Description reported by the backend
    pub description: String,
}

/// Cache record for one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendCacheRecord {
    /// Operations exposed at the last successful connection
    pub operations: Vec<CachedOperation>,
    /// When the backend last connected
    pub last_connected: DateTime<Utc>,
}

/// Backend id -> cache record, persisted as one JSON object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolCache {
    records: BTreeMap<String, BackendCacheRecord>,
}

impl ToolCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the cache from a JSON file
    ///
    /// A missing file yields an empty cache.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        if !path.as_ref().exists() {
            return Ok(Self::new());
        }
        let json = fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Save the cache to a JSON file, creating parent directories as needed
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CacheError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        Ok(())
    }

    /// Replace the record for a backend
    pub fn record(&mut self, backend_id: &str, operations: Vec<CachedOperation>) {
        self.records.insert(
            backend_id.to_string(),
            BackendCacheRecord {
                operations,
                last_connected: Utc::now(),
            },
        );
    }

    /// Get the record for a backend
    pub fn get(&self, backend_id: &str) -> Option<&BackendCacheRecord> {
        self.records.get(backend_id)
    }

    /// All records, ordered by backend id
    pub fn records(&self) -> &BTreeMap<String, BackendCacheRecord> {
        &self.records
    }

    /// Number of backends in the cache
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the cache has no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn op(name: &str) -> CachedOperation {
        CachedOperation {
            name: name.to_string(),
            description: format!("{} operation", name),
        }
    }

    #[test]
    fn test_save_and_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cache.json");

        let mut cache = ToolCache::new();
        cache.record("search", vec![op("search"), op("scrape")]);
        cache.record("mail", vec![op("send_email")]);
        cache.save_to_file(&path).unwrap();

        let loaded = ToolCache::load_from_file(&path).unwrap();
        assert_eq!(loaded, cache);
        assert_eq!(loaded.get("search").unwrap().operations.len(), 2);
    }

    #[test]
    fn test_file_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");

        let mut cache = ToolCache::new();
        cache.record("search", vec![op("search")]);
        cache.save_to_file(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["search"]["operations"][0]["name"], "search");
        assert!(value["search"]["last_connected"].is_string());
    }

    #[test]
    fn test_load_from_nonexistent_file() {
        let dir = TempDir::new().unwrap();
        let cache = ToolCache::load_from_file(dir.path().join("missing.json")).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ToolCache::load_from_file(&path),
            Err(CacheError::Json(_))
        ));
    }
}
