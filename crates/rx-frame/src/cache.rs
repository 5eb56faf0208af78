//! Content-addressed cache for split tables.
//!
//! A [`CacheKey`] is a SHA-256 digest over labeled text fields (input identity,
//! hadron, charge, configuration hash, ...). Stores are injected through the
//! [`CacheStore`] capability so pipelines never reach for a global cache directory.
//!
//! - **Atomicity**: [`ParquetCache`] writes to a unique temp file next to the target and
//!   renames it into place. Concurrent writers of the same key race harmlessly; the last
//!   rename wins and every reader sees a complete file.
//! - **Scope**: entries are immutable once written. There is no eviction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};

use rx_core::{Error, Result};

use crate::parquet_io::{read_table_parquet, write_table_parquet};
use crate::table::EventTable;

/// Hex-encoded SHA-256 of a string.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Key of a cached artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    label: String,
    digest: String,
}

impl CacheKey {
    /// Start a key under `label` (used as a sub-directory, e.g. `split`).
    pub fn builder(label: impl Into<String>) -> CacheKeyBuilder {
        CacheKeyBuilder { label: label.into(), hasher: Sha256::new() }
    }

    /// Grouping label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Hex digest.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.label, self.digest)
    }
}

/// Incremental [`CacheKey`] builder.
///
/// Field names and values are length-prefixed before hashing, so `("ab", "c")` and
/// `("a", "bc")` produce different keys.
pub struct CacheKeyBuilder {
    label: String,
    hasher: Sha256,
}

impl CacheKeyBuilder {
    /// Add a raw text field.
    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.absorb(name, value.as_bytes());
        self
    }

    /// Finalize the key.
    pub fn finish(self) -> CacheKey {
        CacheKey { label: self.label, digest: format!("{:x}", self.hasher.finalize()) }
    }

    fn absorb(&mut self, name: &str, bytes: &[u8]) {
        self.hasher.update((name.len() as u64).to_le_bytes());
        self.hasher.update(name.as_bytes());
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }
}

/// Cache capability injected into pipeline components.
pub trait CacheStore: Send + Sync {
    /// Fetch a cached table, `Ok(None)` on a miss.
    fn get(&self, key: &CacheKey) -> Result<Option<EventTable>>;

    /// Store a table. Overwrites any existing entry.
    fn put(&self, key: &CacheKey, table: &EventTable) -> Result<()>;
}

/// Hit / miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of stored entries.
    pub entries: usize,
    /// Total cache hits since creation.
    pub hits: u64,
    /// Total cache misses since creation.
    pub misses: u64,
}

// ---------------------------------------------------------------------------
// Parquet directory store
// ---------------------------------------------------------------------------

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Directory of Parquet artifacts laid out as `{root}/{label}/{digest}.parquet`.
#[derive(Debug, Clone)]
pub struct ParquetCache {
    root: PathBuf,
}

impl ParquetCache {
    /// Cache rooted at `root`. The directory is created lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Artifact path for `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.label()).join(format!("{}.parquet", key.digest()))
    }
}

impl CacheStore for ParquetCache {
    fn get(&self, key: &CacheKey) -> Result<Option<EventTable>> {
        let path = self.path_for(key);
        if !path.is_file() {
            tracing::debug!(key = %key, "cache miss");
            return Ok(None);
        }
        tracing::debug!(key = %key, path = %path.display(), "cache hit");
        read_table_parquet(&path).map(Some)
    }

    fn put(&self, key: &CacheKey, table: &EventTable) -> Result<()> {
        let path = self.path_for(key);
        let dir = path
            .parent()
            .ok_or_else(|| Error::Storage(format!("invalid cache path {}", path.display())))?;
        std::fs::create_dir_all(dir)?;

        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_path = dir.join(format!(".{}.{}.{n}.tmp", key.digest(), std::process::id()));
        if let Err(e) = write_table_parquet(table, &tmp_path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }
        std::fs::rename(&tmp_path, &path)?;
        tracing::debug!(key = %key, rows = table.n_rows(), path = %path.display(), "cached table");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-local store, mostly for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryCache {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    map: HashMap<CacheKey, EventTable>,
    hits: u64,
    misses: u64,
}

impl MemoryCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        match self.inner.lock() {
            Ok(inner) => {
                CacheStats { entries: inner.map.len(), hits: inner.hits, misses: inner.misses }
            }
            Err(_) => CacheStats::default(),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner.lock().map_err(|_| Error::Storage("memory cache lock poisoned".into()))
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &CacheKey) -> Result<Option<EventTable>> {
        let mut inner = self.lock()?;
        let found = inner.map.get(key).cloned();
        if found.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        Ok(found)
    }

    fn put(&self, key: &CacheKey, table: &EventTable) -> Result<()> {
        self.lock()?.map.insert(key.clone(), table.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Column, KIND_COLUMN};

    fn table() -> EventTable {
        EventTable::from_columns(vec![
            ("B_M".to_string(), Column::Float(vec![5200.0, 5300.0])),
            (KIND_COLUMN.to_string(), Column::Label(vec!["PassFail".into(), "FailFail".into()])),
        ])
        .unwrap()
    }

    #[test]
    fn test_key_is_deterministic_and_field_sensitive() {
        let a = CacheKey::builder("split").text("uid", "abc").text("hadron", "kaon").finish();
        let b = CacheKey::builder("split").text("uid", "abc").text("hadron", "kaon").finish();
        let c = CacheKey::builder("split").text("uid", "abc").text("hadron", "pion").finish();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn test_key_fields_are_length_prefixed() {
        let a = CacheKey::builder("split").text("x", "ab").text("y", "c").finish();
        let b = CacheKey::builder("split").text("x", "a").text("y", "bc").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn test_memory_cache_stats() {
        let cache = MemoryCache::new();
        let key = CacheKey::builder("split").text("uid", "1").finish();
        assert!(cache.get(&key).unwrap().is_none());
        cache.put(&key, &table()).unwrap();
        assert_eq!(cache.get(&key).unwrap().unwrap(), table());
        let stats = cache.stats();
        assert_eq!(stats, CacheStats { entries: 1, hits: 1, misses: 1 });
    }

    #[test]
    fn test_parquet_cache_writes_under_label() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        let key = CacheKey::builder("split").text("uid", "1").finish();
        assert!(cache.get(&key).unwrap().is_none());

        cache.put(&key, &table()).unwrap();
        let path = cache.path_for(&key);
        assert!(path.is_file());
        assert_eq!(path.parent().unwrap().file_name().unwrap(), "split");
        assert_eq!(cache.get(&key).unwrap().unwrap(), table());

        // No temp files left behind.
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_parquet_cache_overwrite_last_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        let key = CacheKey::builder("split").text("uid", "1").finish();
        cache.put(&key, &table()).unwrap();
        let smaller = table().filter(&[true, false]).unwrap();
        cache.put(&key, &smaller).unwrap();
        assert_eq!(cache.get(&key).unwrap().unwrap().n_rows(), 1);
    }
}
