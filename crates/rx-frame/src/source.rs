//! Table sources.
//!
//! A [`TableSource`] resolves an [`InputSelection`] to a table. `uid` must be cheap and
//! stable: it is hashed into cache keys and is expected to change whenever the rows would.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use sha2::{Digest, Sha256};

use rx_core::{Error, InputSelection, Result};

use crate::parquet_io::read_table_parquet;
use crate::table::{Column, EventTable};

/// Default file-name template for [`ParquetSource`].
pub const DEFAULT_TEMPLATE: &str = "{sample}_{trigger}.parquet";

/// Provider of raw event tables.
pub trait TableSource: Send + Sync {
    /// Stable identity of the selected table, computed without loading rows.
    fn uid(&self, input: &InputSelection) -> Result<String>;

    /// Materialize the selected table. The returned table carries `uid` as provenance.
    fn load(&self, input: &InputSelection) -> Result<EventTable>;
}

// ---------------------------------------------------------------------------
// Parquet files
// ---------------------------------------------------------------------------

/// One Parquet file per selection under a directory.
///
/// The template accepts `{sample}`, `{trigger}`, `{q2bin}` and `{project}` placeholders.
#[derive(Debug, Clone)]
pub struct ParquetSource {
    dir: PathBuf,
    template: String,
}

impl ParquetSource {
    /// Source over `dir` with [`DEFAULT_TEMPLATE`].
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), template: DEFAULT_TEMPLATE.to_string() }
    }

    /// Override the file-name template.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// Directory scanned by this source.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `input`.
    pub fn path_for(&self, input: &InputSelection) -> PathBuf {
        let name = self
            .template
            .replace("{sample}", &input.sample)
            .replace("{trigger}", &input.trigger)
            .replace("{q2bin}", &input.q2bin)
            .replace("{project}", &input.project);
        self.dir.join(name)
    }
}

impl TableSource for ParquetSource {
    fn uid(&self, input: &InputSelection) -> Result<String> {
        let path = self.path_for(input);
        let meta = std::fs::metadata(&path).map_err(|e| {
            Error::Storage(format!("cannot stat input {}: {e}", path.display()))
        })?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(meta.len().to_le_bytes());
        hasher.update(mtime.to_le_bytes());
        hasher.update(serde_json::to_vec(input)?);
        Ok(format!("{:x}", hasher.finalize()))
    }

    fn load(&self, input: &InputSelection) -> Result<EventTable> {
        let uid = self.uid(input)?;
        let path = self.path_for(input);
        tracing::info!(path = %path.display(), sample = %input.sample, "loading input table");
        Ok(read_table_parquet(&path)?.with_provenance(uid))
    }
}

// ---------------------------------------------------------------------------
// In-memory tables
// ---------------------------------------------------------------------------

/// Tables registered by `(sample, trigger)`, with a load counter.
#[derive(Debug, Default)]
pub struct InMemorySource {
    tables: HashMap<(String, String), (String, EventTable)>,
    loads: AtomicUsize,
}

impl InMemorySource {
    /// Empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table. Its identity is a fingerprint of the content.
    pub fn insert(
        &mut self,
        sample: impl Into<String>,
        trigger: impl Into<String>,
        table: EventTable,
    ) {
        let uid = fingerprint(&table);
        self.tables.insert((sample.into(), trigger.into()), (uid, table));
    }

    /// Builder-style [`InMemorySource::insert`].
    pub fn with_table(
        mut self,
        sample: impl Into<String>,
        trigger: impl Into<String>,
        table: EventTable,
    ) -> Self {
        self.insert(sample, trigger, table);
        self
    }

    /// How many times [`TableSource::load`] was called.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn entry(&self, input: &InputSelection) -> Result<&(String, EventTable)> {
        self.tables
            .get(&(input.sample.clone(), input.trigger.clone()))
            .ok_or_else(|| {
                Error::Storage(format!(
                    "no table registered for sample '{}' trigger '{}'",
                    input.sample, input.trigger
                ))
            })
    }
}

impl TableSource for InMemorySource {
    fn uid(&self, input: &InputSelection) -> Result<String> {
        let (uid, _) = self.entry(input)?;
        let mut hasher = Sha256::new();
        hasher.update(uid.as_bytes());
        hasher.update(serde_json::to_vec(input)?);
        Ok(format!("{:x}", hasher.finalize()))
    }

    fn load(&self, input: &InputSelection) -> Result<EventTable> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let uid = self.uid(input)?;
        let (_, table) = self.entry(input)?;
        Ok(table.clone().with_provenance(uid))
    }
}

/// Content hash of a table: column names, types and values.
pub fn fingerprint(table: &EventTable) -> String {
    let mut hasher = Sha256::new();
    hasher.update((table.n_rows() as u64).to_le_bytes());
    for name in table.column_names() {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        match table.column(name) {
            Some(Column::Float(v)) => {
                hasher.update([1u8]);
                for x in v {
                    hasher.update(x.to_bits().to_le_bytes());
                }
            }
            Some(Column::Label(v)) => {
                hasher.update([2u8]);
                for s in v {
                    hasher.update((s.len() as u64).to_le_bytes());
                    hasher.update(s.as_bytes());
                }
            }
            None => {}
        }
    }
    format!("{:x}", hasher.finalize())
}
