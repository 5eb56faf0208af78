//! Parquet / Arrow I/O for [`EventTable`].
//!
//! # Schema: `rx_event_table_v1`
//!
//! | Column       | Arrow Type | Description                                  |
//! |--------------|------------|----------------------------------------------|
//! | numeric      | `Float64`  | Kinematics, PID discriminants, `weight`, ... |
//! | categorical  | `Utf8`     | `kind`, `hadron`, `bmeson`, ...              |
//!
//! On read, integer and `Float32` columns are cast to `Float64`, `LargeUtf8` is read as
//! labels, and any other type is rejected. Nulls are rejected in every column.
//!
//! ## Parquet key-value metadata
//!
//! | Key                 | Value                                  |
//! |---------------------|----------------------------------------|
//! | `rx.schema_version` | `"rx_event_table_v1"`                  |
//! | `rx.provenance`     | source identity (only if the table has one) |

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, Float64Array, GenericStringArray, OffsetSizeTrait, StringArray,
};
use arrow::datatypes::{DataType, Field, Float64Type, Schema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use rx_core::{Error, Result};

use crate::table::{Column, EventTable};

/// Schema version string embedded in Parquet key-value metadata.
pub const EVENT_TABLE_SCHEMA_V1: &str = "rx_event_table_v1";

/// Parquet metadata key for the schema version.
pub const META_KEY_SCHEMA_VERSION: &str = "rx.schema_version";

/// Parquet metadata key for the table provenance.
pub const META_KEY_PROVENANCE: &str = "rx.provenance";

// ---------------------------------------------------------------------------
// Write
// ---------------------------------------------------------------------------

/// Build an Arrow [`RecordBatch`] from an [`EventTable`].
pub fn table_to_record_batch(table: &EventTable) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(table.column_names().len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.column_names().len());

    for name in table.column_names() {
        let col = table.column(name).ok_or_else(|| Error::MissingColumn(name.clone()))?;
        match col {
            Column::Float(v) => {
                fields.push(Field::new(name, DataType::Float64, false));
                arrays.push(Arc::new(Float64Array::from(v.clone())));
            }
            Column::Label(v) => {
                fields.push(Field::new(name, DataType::Utf8, false));
                arrays.push(Arc::new(StringArray::from_iter_values(v.iter())));
            }
        }
    }

    let mut metadata = HashMap::from([(
        META_KEY_SCHEMA_VERSION.to_string(),
        EVENT_TABLE_SCHEMA_V1.to_string(),
    )]);
    if let Some(uid) = table.provenance() {
        metadata.insert(META_KEY_PROVENANCE.to_string(), uid.to_string());
    }
    let schema = Arc::new(Schema::new(fields).with_metadata(metadata));

    let options = RecordBatchOptions::new().with_row_count(Some(table.n_rows()));
    RecordBatch::try_new_with_options(schema, arrays, &options)
        .map_err(|e| Error::Storage(format!("failed to build RecordBatch: {e}")))
}

/// Write an [`EventTable`] to a Parquet file.
pub fn write_table_parquet(table: &EventTable, path: &Path) -> Result<()> {
    let bytes = write_table_parquet_bytes(table)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Write an [`EventTable`] to Parquet bytes in memory.
fn write_table_parquet_bytes(table: &EventTable) -> Result<Vec<u8>> {
    let batch = table_to_record_batch(table)?;
    let props = WriterProperties::builder().set_compression(default_compression()).build();

    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), Some(props))
        .map_err(|e| Error::Storage(format!("failed to create Parquet writer: {e}")))?;
    writer.write(&batch).map_err(|e| Error::Storage(format!("failed to write Parquet: {e}")))?;
    writer.close().map_err(|e| Error::Storage(format!("failed to close Parquet writer: {e}")))?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// Build an [`EventTable`] from an Arrow [`RecordBatch`].
pub fn table_from_record_batch(batch: &RecordBatch) -> Result<EventTable> {
    let schema = batch.schema();
    let mut columns = Vec::with_capacity(batch.num_columns());

    for (field, arr) in schema.fields().iter().zip(batch.columns()) {
        let name = field.name();
        let col = match arr.data_type() {
            DataType::Utf8 => label_column(name, arr.as_string::<i32>())?,
            DataType::LargeUtf8 => label_column(name, arr.as_string::<i64>())?,
            dt if dt.is_numeric() || dt == &DataType::Boolean => {
                let cast = arrow::compute::cast(arr, &DataType::Float64).map_err(|e| {
                    Error::Storage(format!("column '{name}' cannot be read as Float64: {e}"))
                })?;
                let f = cast.as_primitive::<Float64Type>();
                if f.null_count() > 0 {
                    return Err(Error::Validation(format!("column '{name}' contains nulls")));
                }
                Column::Float(f.values().to_vec())
            }
            other => {
                return Err(Error::Storage(format!(
                    "column '{name}' has unsupported type {other:?}"
                )));
            }
        };
        columns.push((name.clone(), col));
    }

    let table = EventTable::from_columns(columns)?;
    Ok(match schema.metadata().get(META_KEY_PROVENANCE) {
        Some(uid) => table.with_provenance(uid.clone()),
        None => table,
    })
}

/// Read a Parquet file into an [`EventTable`].
pub fn read_table_parquet(path: &Path) -> Result<EventTable> {
    let file = std::fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| Error::Storage(format!("failed to read Parquet {}: {e}", path.display())))?;
    collect_table(builder)
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn label_column<O: OffsetSizeTrait>(name: &str, arr: &GenericStringArray<O>) -> Result<Column> {
    if arr.null_count() > 0 {
        return Err(Error::Validation(format!("column '{name}' contains nulls")));
    }
    Ok(Column::Label(arr.iter().map(|v| v.unwrap_or_default().to_string()).collect()))
}

fn collect_table<T>(builder: ParquetRecordBatchReaderBuilder<T>) -> Result<EventTable>
where
    T: parquet::file::reader::ChunkReader + 'static,
{
    // The footer schema carries the key-value metadata; batch schemas may not.
    let full_schema = builder.schema().clone();
    let reader = builder
        .build()
        .map_err(|e| Error::Storage(format!("failed to build Parquet reader: {e}")))?;

    let batches: std::result::Result<Vec<_>, _> = reader.collect();
    let batches =
        batches.map_err(|e| Error::Storage(format!("failed to read Parquet batches: {e}")))?;

    let merged = if batches.is_empty() {
        RecordBatch::new_empty(full_schema)
    } else {
        arrow::compute::concat_batches(&full_schema, &batches)
            .map_err(|e| Error::Storage(format!("failed to concat Parquet batches: {e}")))?
    };
    table_from_record_batch(&merged)
}

fn default_compression() -> Compression {
    #[cfg(feature = "parquet-zstd")]
    {
        Compression::ZSTD(Default::default())
    }
    #[cfg(not(feature = "parquet-zstd"))]
    {
        Compression::SNAPPY
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float32Array, Int32Array, LargeStringArray};
    use crate::table::{KIND_COLUMN, WEIGHT_COLUMN};

    fn make_table() -> EventTable {
        EventTable::from_columns(vec![
            ("B_M".to_string(), Column::Float(vec![5000.0, 5100.5, 6000.25])),
            (WEIGHT_COLUMN.to_string(), Column::Float(vec![0.5, -0.25, 1.0])),
            (
                KIND_COLUMN.to_string(),
                Column::Label(vec!["PassFail".into(), "FailFail".into(), "FailPass".into()]),
            ),
        ])
        .unwrap()
        .with_provenance("abc123")
    }

    #[test]
    fn test_record_batch_metadata() {
        let batch = table_to_record_batch(&make_table()).unwrap();
        assert_eq!(batch.num_rows(), 3);
        assert_eq!(batch.num_columns(), 3);
        let schema = batch.schema();
        assert_eq!(schema.metadata().get(META_KEY_SCHEMA_VERSION).unwrap(), EVENT_TABLE_SCHEMA_V1);
        assert_eq!(schema.metadata().get(META_KEY_PROVENANCE).unwrap(), "abc123");
    }

    #[test]
    fn test_parquet_file_keeps_labels_and_provenance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.parquet");
        let t = make_table();
        write_table_parquet(&t, &path).unwrap();
        let back = read_table_parquet(&path).unwrap();
        assert_eq!(back, t);
        assert_eq!(back.provenance(), Some("abc123"));
    }

    #[test]
    fn test_zero_row_table_keeps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.parquet");
        let t = make_table().filter(&[false, false, false]).unwrap();
        write_table_parquet(&t, &path).unwrap();
        let back = read_table_parquet(&path).unwrap();
        assert!(back.is_empty());
        assert_eq!(back.column_names(), t.column_names());
    }

    #[test]
    fn test_integer_columns_are_cast_to_float() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("block", DataType::Int32, false),
            Field::new("pt", DataType::Float32, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![1, 8])) as ArrayRef,
                Arc::new(Float32Array::from(vec![1500.0f32, 2500.0])) as ArrayRef,
            ],
        )
        .unwrap();
        let t = table_from_record_batch(&batch).unwrap();
        assert_eq!(t.float("block").unwrap(), &[1.0, 8.0]);
        assert_eq!(t.float("pt").unwrap(), &[1500.0, 2500.0]);
    }

    #[test]
    fn test_nulls_are_rejected_in_every_column() {
        let labels = Arc::new(Schema::new(vec![Field::new(KIND_COLUMN, DataType::Utf8, true)]));
        let batch = RecordBatch::try_new(
            labels,
            vec![Arc::new(StringArray::from(vec![Some("PassFail"), None])) as ArrayRef],
        )
        .unwrap();
        let err = table_from_record_batch(&batch).unwrap_err();
        assert!(matches!(&err, Error::Validation(msg) if msg.contains(KIND_COLUMN)), "{err}");

        let large = Arc::new(Schema::new(vec![Field::new("hadron", DataType::LargeUtf8, true)]));
        let batch = RecordBatch::try_new(
            large,
            vec![Arc::new(LargeStringArray::from(vec![None, Some("kaon")])) as ArrayRef],
        )
        .unwrap();
        assert!(matches!(table_from_record_batch(&batch), Err(Error::Validation(_))));

        let numeric = Arc::new(Schema::new(vec![Field::new("block", DataType::Int32, true)]));
        let batch = RecordBatch::try_new(
            numeric,
            vec![Arc::new(Int32Array::from(vec![Some(1), None])) as ArrayRef],
        )
        .unwrap();
        assert!(matches!(table_from_record_batch(&batch), Err(Error::Validation(_))));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.parquet");
        write_table_parquet(&make_table(), &path).unwrap();
        let back = read_table_parquet(&path).unwrap();
        assert_eq!(back.n_rows(), 3);
        assert_eq!(back.labels(KIND_COLUMN).unwrap()[1], "FailFail");
    }
}
