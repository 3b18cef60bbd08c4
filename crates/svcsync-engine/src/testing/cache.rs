//! Durable test result cache
//!
//! Maps a content-addressed key to the last verification result. The key
//! covers everything that can change an example's behavior, so a changed
//! template, binding or target simply misses.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::bindings::Bindings;
use crate::error::CacheError;
use crate::loader::CodeExample;
use crate::model::content_hash;

/// Outcome of one executed example.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    Pass,
    Fail,
    Error,
}

/// Cached verification result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub outcome: TestOutcome,
    /// SHA-256 of the captured status and body.
    pub output_digest: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CacheEntry {
    #[must_use]
    pub fn new(outcome: TestOutcome, output_digest: impl Into<String>) -> Self {
        Self {
            outcome,
            output_digest: output_digest.into(),
            timestamp: Utc::now(),
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Compute the cache key of an example under the given bindings.
#[must_use]
pub fn cache_key(example: &CodeExample, bindings: &Bindings) -> String {
    let resolved: serde_json::Map<String, Value> = bindings
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();
    let template = serde_json::to_value(&example.template).unwrap_or(Value::Null);
    content_hash(&json!({
        "template": template,
        "expect_status": example.expect_status,
        "expect_contains": example.expect_contains,
        "bindings": resolved,
        "offering": example.offering.to_string(),
    }))
}

/// Storage for test results.
pub trait TestCacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Store an entry. Last writer wins.
    fn put(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError>;

    /// Remove an entry, returning whether it existed.
    fn remove(&self, key: &str) -> Result<bool, CacheError>;

    /// All entries in key order.
    fn entries(&self) -> Result<Vec<(String, CacheEntry)>, CacheError>;

    /// Remove every entry, returning how many there were.
    fn clear(&self) -> Result<usize, CacheError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Single-file JSON cache.
///
/// The file is read on first use. A missing or unreadable file is an empty
/// cache; corrupted entries are skipped. Every `put` rewrites the file
/// through a temporary file and a rename.
pub struct FileTestCache {
    path: PathBuf,
    entries: Mutex<Option<BTreeMap<String, CacheEntry>>>,
}

impl FileTestCache {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> BTreeMap<String, CacheEntry> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to read test cache, starting empty"
                );
                return BTreeMap::new();
            }
        };

        let raw = match serde_json::from_str::<serde_json::Map<String, Value>>(&contents) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Test cache is corrupted, starting empty"
                );
                return BTreeMap::new();
            }
        };

        let mut entries = BTreeMap::new();
        for (key, value) in raw {
            match serde_json::from_value::<CacheEntry>(value) {
                Ok(entry) => {
                    entries.insert(key, entry);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping corrupted test cache entry");
                }
            }
        }
        debug!(path = %self.path.display(), entries = entries.len(), "Test cache loaded");
        entries
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut BTreeMap<String, CacheEntry>) -> R) -> R {
        let mut guard = lock(&self.entries);
        let entries = guard.get_or_insert_with(|| self.load());
        f(entries)
    }

    fn persist(&self, entries: &BTreeMap<String, CacheEntry>) -> Result<(), CacheError> {
        let io_err = |source| CacheError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let contents = serde_json::to_string_pretty(entries)?;
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "test-cache.json".to_string());
        let tmp = self
            .path
            .with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));
        fs::write(&tmp, contents).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

impl TestCacheStore for FileTestCache {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.with_entries(|entries| entries.get(key).cloned()))
    }

    fn put(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        let mut guard = lock(&self.entries);
        let entries = guard.get_or_insert_with(|| self.load());
        entries.insert(key.to_string(), entry);
        self.persist(entries)
    }

    fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let mut guard = lock(&self.entries);
        let entries = guard.get_or_insert_with(|| self.load());
        if entries.remove(key).is_none() {
            return Ok(false);
        }
        self.persist(entries)?;
        Ok(true)
    }

    fn entries(&self) -> Result<Vec<(String, CacheEntry)>, CacheError> {
        Ok(self.with_entries(|entries| {
            entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        }))
    }

    fn clear(&self) -> Result<usize, CacheError> {
        let mut guard = lock(&self.entries);
        let entries = guard.get_or_insert_with(|| self.load());
        let count = entries.len();
        entries.clear();
        self.persist(entries)?;
        Ok(count)
    }
}

/// In-memory cache for tests and dry runs.
#[derive(Default)]
pub struct MemoryTestCache {
    entries: Mutex<BTreeMap<String, CacheEntry>>,
}

impl MemoryTestCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TestCacheStore for MemoryTestCache {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn put(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        lock(&self.entries).insert(key.to_string(), entry);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, CacheError> {
        Ok(lock(&self.entries).remove(key).is_some())
    }

    fn entries(&self) -> Result<Vec<(String, CacheEntry)>, CacheError> {
        Ok(lock(&self.entries)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn clear(&self) -> Result<usize, CacheError> {
        let mut entries = lock(&self.entries);
        let count = entries.len();
        entries.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_cache_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let cache = FileTestCache::new(dir.path().join("cache.json"));
        assert!(cache.get("k").unwrap().is_none());
        assert!(cache.entries().unwrap().is_empty());
    }

    #[test]
    fn test_file_cache_put_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cache.json");
        let cache = FileTestCache::new(&path);
        cache
            .put("b", CacheEntry::new(TestOutcome::Fail, "d2"))
            .unwrap();
        cache
            .put("a", CacheEntry::new(TestOutcome::Pass, "d1"))
            .unwrap();

        let reopened = FileTestCache::new(&path);
        let entry = reopened.get("a").unwrap().unwrap();
        assert_eq!(entry.outcome, TestOutcome::Pass);
        assert_eq!(entry.output_digest, "d1");

        let keys: Vec<String> = reopened.entries().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.find("\"a\"").unwrap() < contents.find("\"b\"").unwrap());
    }

    #[test]
    fn test_file_cache_skips_corrupted_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(
            &path,
            r#"{
                "good": {"outcome": "pass", "output_digest": "x", "timestamp": "2024-01-01T00:00:00Z"},
                "bad": {"outcome": "maybe"},
                "worse": 42
            }"#,
        )
        .unwrap();

        let cache = FileTestCache::new(&path);
        assert!(cache.get("good").unwrap().is_some());
        assert!(cache.get("bad").unwrap().is_none());
        assert!(cache.get("worse").unwrap().is_none());
    }

    #[test]
    fn test_file_cache_unparseable_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{ not json").unwrap();

        let cache = FileTestCache::new(&path);
        assert!(cache.entries().unwrap().is_empty());
        cache.put("k", CacheEntry::new(TestOutcome::Pass, "d")).unwrap();
        assert!(FileTestCache::new(&path).get("k").unwrap().is_some());
    }

    #[test]
    fn test_file_cache_remove_and_clear() {
        let dir = TempDir::new().unwrap();
        let cache = FileTestCache::new(dir.path().join("cache.json"));
        cache.put("a", CacheEntry::new(TestOutcome::Pass, "1")).unwrap();
        cache.put("b", CacheEntry::new(TestOutcome::Error, "2")).unwrap();

        assert!(cache.remove("a").unwrap());
        assert!(!cache.remove("a").unwrap());
        assert_eq!(cache.clear().unwrap(), 1);
        assert!(cache.entries().unwrap().is_empty());
    }

    #[test]
    fn test_memory_cache() {
        let cache = MemoryTestCache::new();
        cache
            .put("k", CacheEntry::new(TestOutcome::Pass, "d").with_message("ok"))
            .unwrap();
        assert_eq!(cache.get("k").unwrap().unwrap().message.as_deref(), Some("ok"));
        assert_eq!(cache.clear().unwrap(), 1);
    }
}
