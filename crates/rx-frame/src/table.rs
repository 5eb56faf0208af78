//! Columnar event table.

use std::collections::{BTreeMap, HashMap};

use rx_core::{Error, Result};

/// Per-event weight column.
pub const WEIGHT_COLUMN: &str = "weight";

/// Tagging region label column.
pub const KIND_COLUMN: &str = "kind";

/// Misidentified species label column.
pub const HADRON_COLUMN: &str = "hadron";

/// A single column: numeric values or categorical labels.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// Numeric column.
    Float(Vec<f64>),
    /// Categorical column.
    Label(Vec<String>),
}

impl Column {
    /// Number of entries.
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Label(v) => v.len(),
        }
    }

    /// `true` if the column has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn empty_like(&self, capacity: usize) -> Column {
        match self {
            Column::Float(_) => Column::Float(Vec::with_capacity(capacity)),
            Column::Label(_) => Column::Label(Vec::with_capacity(capacity)),
        }
    }

    fn take(&self, idx: &[usize]) -> Column {
        match self {
            Column::Float(v) => Column::Float(idx.iter().map(|&i| v[i]).collect()),
            Column::Label(v) => Column::Label(idx.iter().map(|&i| v[i].clone()).collect()),
        }
    }

    fn extend_from(&mut self, other: &Column) -> bool {
        match (self, other) {
            (Column::Float(a), Column::Float(b)) => {
                a.extend_from_slice(b);
                true
            }
            (Column::Label(a), Column::Label(b)) => {
                a.extend(b.iter().cloned());
                true
            }
            _ => false,
        }
    }
}

impl From<Vec<f64>> for Column {
    fn from(v: Vec<f64>) -> Self {
        Column::Float(v)
    }
}

impl From<Vec<String>> for Column {
    fn from(v: Vec<String>) -> Self {
        Column::Label(v)
    }
}

/// Columnar event storage (Structure-of-Arrays).
///
/// Tables are values: filtering, selecting and re-weighting return new tables. The
/// optional provenance token is the stable identity assigned by the table source and is
/// not carried over to derived tables.
#[derive(Debug, Clone, Default)]
pub struct EventTable {
    n_rows: usize,
    column_names: Vec<String>,
    columns: Vec<Column>,
    name_to_index: HashMap<String, usize>,
    provenance: Option<String>,
}

impl PartialEq for EventTable {
    fn eq(&self, other: &Self) -> bool {
        self.n_rows == other.n_rows
            && self.column_names == other.column_names
            && self.columns == other.columns
    }
}

impl EventTable {
    /// Build a table from named columns (kept in the given order).
    pub fn from_columns(columns: impl IntoIterator<Item = (String, Column)>) -> Result<Self> {
        let mut table = Self::default();
        let mut first = true;
        for (name, col) in columns {
            if first {
                table.n_rows = col.len();
                first = false;
            }
            table.push_column(name, col)?;
        }
        Ok(table)
    }

    /// Attach the source identity.
    pub fn with_provenance(mut self, uid: impl Into<String>) -> Self {
        self.provenance = Some(uid.into());
        self
    }

    /// Source identity, if this table came straight from a source.
    pub fn provenance(&self) -> Option<&str> {
        self.provenance.as_deref()
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// `true` if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    /// Column names (stable order).
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// `true` if a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    /// Get a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.name_to_index.get(name).map(|&i| &self.columns[i])
    }

    /// Numeric column by name.
    pub fn float(&self, name: &str) -> Result<&[f64]> {
        match self.column(name) {
            Some(Column::Float(v)) => Ok(v),
            Some(Column::Label(_)) => {
                Err(Error::Validation(format!("column '{name}' holds labels, expected numbers")))
            }
            None => Err(Error::MissingColumn(name.to_string())),
        }
    }

    /// Label column by name.
    pub fn labels(&self, name: &str) -> Result<&[String]> {
        match self.column(name) {
            Some(Column::Label(v)) => Ok(v),
            Some(Column::Float(_)) => {
                Err(Error::Validation(format!("column '{name}' holds numbers, expected labels")))
            }
            None => Err(Error::MissingColumn(name.to_string())),
        }
    }

    /// Per-event weights; `1.0` for every row when the table has no weight column.
    pub fn weights(&self) -> Result<Vec<f64>> {
        if self.has_column(WEIGHT_COLUMN) {
            Ok(self.float(WEIGHT_COLUMN)?.to_vec())
        } else {
            Ok(vec![1.0; self.n_rows])
        }
    }

    /// Insert or replace a column.
    pub fn set_column(&mut self, name: impl Into<String>, col: Column) -> Result<()> {
        let name = name.into();
        if self.columns.is_empty() {
            self.n_rows = col.len();
        }
        if col.len() != self.n_rows {
            return Err(Error::Validation(format!(
                "column length mismatch for '{name}': expected {}, got {}",
                self.n_rows,
                col.len()
            )));
        }
        match self.name_to_index.get(&name) {
            Some(&i) => self.columns[i] = col,
            None => self.push_column(name, col)?,
        }
        Ok(())
    }

    /// Insert or replace a numeric column.
    pub fn set_float(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        self.set_column(name, Column::Float(values))
    }

    /// Insert or replace a label column holding the same label on every row.
    pub fn set_label(&mut self, name: impl Into<String>, label: &str) -> Result<()> {
        let n = self.n_rows;
        self.set_column(name, Column::Label(vec![label.to_string(); n]))
    }

    /// Rows where `mask` is `true`.
    pub fn filter(&self, mask: &[bool]) -> Result<Self> {
        if mask.len() != self.n_rows {
            return Err(Error::Validation(format!(
                "mask length mismatch: expected {}, got {}",
                self.n_rows,
                mask.len()
            )));
        }
        let idx: Vec<usize> = mask.iter().enumerate().filter(|(_, m)| **m).map(|(i, _)| i).collect();
        Ok(self.take(&idx))
    }

    /// Subset of columns, in the requested order.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Self> {
        let mut out = Self { n_rows: self.n_rows, ..Self::default() };
        for name in names {
            let name = name.as_ref();
            let col = self.column(name).ok_or_else(|| Error::MissingColumn(name.to_string()))?;
            if !out.has_column(name) {
                out.push_column(name.to_string(), col.clone())?;
            }
        }
        Ok(out)
    }

    /// Map a numeric column through `f`, returning a new table.
    pub fn map_float(&self, name: &str, f: impl Fn(f64) -> f64) -> Result<Self> {
        let values = self.float(name)?.iter().map(|&x| f(x)).collect();
        let mut out = self.derived();
        out.set_float(name, values)?;
        Ok(out)
    }

    /// Row-wise concatenation.
    ///
    /// Tables without columns are skipped; every other table must have the same column
    /// names and types (order follows the first such table).
    pub fn concat(tables: &[EventTable]) -> Result<Self> {
        let mut it = tables.iter().filter(|t| !t.column_names.is_empty());
        let Some(first) = it.next() else {
            return Ok(Self::default());
        };
        let total: usize = tables.iter().map(|t| t.n_rows).sum();
        let mut columns: Vec<Column> = first
            .columns
            .iter()
            .map(|c| {
                let mut e = c.empty_like(total);
                e.extend_from(c);
                e
            })
            .collect();

        for t in it {
            if t.column_names.len() != first.column_names.len() {
                return Err(Error::Validation(format!(
                    "cannot concatenate tables with columns {:?} and {:?}",
                    first.column_names, t.column_names
                )));
            }
            for (name, out) in first.column_names.iter().zip(columns.iter_mut()) {
                let col = t.column(name).ok_or_else(|| Error::MissingColumn(name.clone()))?;
                if !out.extend_from(col) {
                    return Err(Error::Validation(format!(
                        "column '{name}' changes type between concatenated tables"
                    )));
                }
            }
        }

        Self::from_columns(first.column_names.iter().cloned().zip(columns))
    }

    /// Split rows by the value of a label column.
    pub fn partition_by_label(&self, name: &str) -> Result<BTreeMap<String, EventTable>> {
        let labels = self.labels(name)?;
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, l) in labels.iter().enumerate() {
            groups.entry(l.clone()).or_default().push(i);
        }
        Ok(groups.into_iter().map(|(k, idx)| (k, self.take(&idx))).collect())
    }

    /// Empty table with the same schema.
    pub fn empty_like(&self) -> Self {
        self.take(&[])
    }

    fn take(&self, idx: &[usize]) -> Self {
        let mut out = Self { n_rows: idx.len(), ..Self::default() };
        for (name, col) in self.column_names.iter().zip(&self.columns) {
            out.name_to_index.insert(name.clone(), out.columns.len());
            out.column_names.push(name.clone());
            out.columns.push(col.take(idx));
        }
        out
    }

    fn derived(&self) -> Self {
        Self { provenance: None, ..self.clone() }
    }

    fn push_column(&mut self, name: String, col: Column) -> Result<()> {
        if self.name_to_index.contains_key(&name) {
            return Err(Error::Validation(format!("duplicate column '{name}'")));
        }
        if col.len() != self.n_rows {
            return Err(Error::Validation(format!(
                "column length mismatch for '{name}': expected {}, got {}",
                self.n_rows,
                col.len()
            )));
        }
        self.name_to_index.insert(name.clone(), self.columns.len());
        self.column_names.push(name);
        self.columns.push(col);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_table() -> EventTable {
        EventTable::from_columns(vec![
            ("mass".to_string(), Column::Float(vec![5000.0, 5100.0, 5200.0, 5300.0])),
            ("block".to_string(), Column::Float(vec![1.0, 0.0, 3.0, 4.0])),
            (
                KIND_COLUMN.to_string(),
                Column::Label(
                    ["PassFail", "FailFail", "PassFail", "FailPass"].map(String::from).to_vec(),
                ),
            ),
        ])
        .unwrap()
        .with_provenance("uid-1")
    }

    #[test]
    fn test_from_columns_rejects_length_mismatch() {
        let err = EventTable::from_columns(vec![
            ("a".to_string(), Column::Float(vec![1.0, 2.0])),
            ("b".to_string(), Column::Float(vec![1.0])),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_missing_column_error() {
        let t = make_table();
        assert!(matches!(t.float("B_ID"), Err(Error::MissingColumn(c)) if c == "B_ID"));
        assert!(matches!(t.float(KIND_COLUMN), Err(Error::Validation(_))));
    }

    #[test]
    fn test_default_weights_are_one() {
        let t = make_table();
        assert_eq!(t.weights().unwrap(), vec![1.0; 4]);
    }

    #[test]
    fn test_filter_and_provenance() {
        let t = make_table();
        assert_eq!(t.provenance(), Some("uid-1"));
        let f = t.filter(&[true, false, true, false]).unwrap();
        assert_eq!(f.n_rows(), 2);
        assert_eq!(f.float("mass").unwrap(), &[5000.0, 5200.0]);
        assert_eq!(f.provenance(), None);

        let none = t.filter(&[false; 4]).unwrap();
        assert!(none.is_empty());
        assert_eq!(none.column_names(), t.column_names());
    }

    #[test]
    fn test_select_keeps_requested_order() {
        let t = make_table();
        let s = t.select(&["block", "mass"]).unwrap();
        assert_eq!(s.column_names(), &["block".to_string(), "mass".to_string()]);
        assert!(matches!(t.select(&["nope"]), Err(Error::MissingColumn(_))));
    }

    #[test]
    fn test_concat_and_partition() {
        let t = make_table();
        let both = EventTable::concat(&[t.clone(), EventTable::default(), t.empty_like(), t.clone()])
            .unwrap();
        assert_eq!(both.n_rows(), 8);

        let parts = both.partition_by_label(KIND_COLUMN).unwrap();
        assert_eq!(parts["PassFail"].n_rows(), 4);
        assert_eq!(parts["FailFail"].n_rows(), 2);
        assert_eq!(parts["FailPass"].n_rows(), 2);
    }

    #[test]
    fn test_concat_rejects_schema_mismatch() {
        let t = make_table();
        let other = t.select(&["mass"]).unwrap();
        assert!(EventTable::concat(&[t, other]).is_err());
    }

    #[test]
    fn test_set_label_and_map_float() {
        let mut t = make_table();
        t.set_label(HADRON_COLUMN, "kaon").unwrap();
        assert_eq!(t.labels(HADRON_COLUMN).unwrap()[3], "kaon");

        let doubled = t.map_float("mass", |m| 2.0 * m).unwrap();
        assert_eq!(doubled.float("mass").unwrap()[0], 10000.0);
        assert_eq!(t.float("mass").unwrap()[0], 5000.0);
    }
}
