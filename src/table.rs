//! In-Memory Columnar Table
//!
//! The weighting core consumes a borrowed, read-only [`Dataset`]: an
//! insertion-ordered collection of equally sized, typed columns. Ingestion
//! (CSV, parquet, ...) lives outside this crate; hosts build a `Dataset`
//! from whatever they loaded and hand it to the engine.
//!
//! Missingness is explicit: `Int` and `Text` columns carry `Option`s, and
//! `Float` columns treat NaN as missing. Both read back as
//! [`Value::Missing`], which the validator rejects inside weighting
//! dimensions but tolerates anywhere else.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use indexmap::IndexMap;

/// Errors from dataset construction and column access.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("column {name:?} has {got} rows, dataset has {expected}")]
    LengthMismatch {
        name: String,
        got: usize,
        expected: usize,
    },
    #[error("column {0:?} not found in dataset")]
    MissingColumn(String),
}

/// A named column's storage. One variant per admissible type.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// Integer codes or counts; `None` marks a missing cell.
    Int(Vec<Option<i64>>),
    /// Real values; NaN marks a missing cell.
    Float(Vec<f64>),
    /// String categories; `None` marks a missing cell.
    Text(Vec<Option<String>>),
}

impl Column {
    /// Number of rows stored in this column.
    pub fn len(&self) -> usize {
        match self {
            Column::Int(v) => v.len(),
            Column::Float(v) => v.len(),
            Column::Text(v) => v.len(),
        }
    }

    /// True when the column holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read one cell. Out-of-range rows read as [`Value::Missing`].
    pub fn value(&self, row: usize) -> Value<'_> {
        match self {
            Column::Int(v) => match v.get(row) {
                Some(Some(x)) => Value::Int(*x),
                _ => Value::Missing,
            },
            Column::Float(v) => match v.get(row) {
                Some(x) if x.is_finite() => Value::Float(*x),
                _ => Value::Missing,
            },
            Column::Text(v) => match v.get(row) {
                Some(Some(s)) => Value::Text(s),
                _ => Value::Missing,
            },
        }
    }
}

impl From<Vec<i64>> for Column {
    fn from(v: Vec<i64>) -> Self {
        Column::Int(v.into_iter().map(Some).collect())
    }
}
impl From<Vec<Option<i64>>> for Column {
    fn from(v: Vec<Option<i64>>) -> Self {
        Column::Int(v)
    }
}
impl From<Vec<f64>> for Column {
    fn from(v: Vec<f64>) -> Self {
        Column::Float(v)
    }
}
impl From<Vec<&str>> for Column {
    fn from(v: Vec<&str>) -> Self {
        Column::Text(v.into_iter().map(|s| Some(s.to_owned())).collect())
    }
}
impl From<Vec<String>> for Column {
    fn from(v: Vec<String>) -> Self {
        Column::Text(v.into_iter().map(Some).collect())
    }
}
impl From<Vec<Option<String>>> for Column {
    fn from(v: Vec<Option<String>>) -> Self {
        Column::Text(v)
    }
}

/// A single cell, borrowed from its column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    Int(i64),
    Float(f64),
    Text(&'a str),
    /// Absent cell: `None` in `Int`/`Text` storage, NaN in `Float` storage.
    Missing,
}

impl Value<'_> {
    /// True for absent cells.
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// The cell as `f64`, when it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(x) => Some(*x as f64),
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }
}

/// An insertion-ordered table of named, equally sized columns.
///
/// The engine borrows a `Dataset` read-only; the only mutation the crate
/// ever performs is [`Dataset::with_column`], which copies the table to
/// attach the output weight column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: IndexMap<String, Column>,
}

impl Dataset {
    /// An empty dataset (zero columns, zero rows).
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dataset from `(name, column)` pairs, checking lengths.
    pub fn from_columns<I, N, C>(cols: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = (N, C)>,
        N: Into<String>,
        C: Into<Column>,
    {
        let mut df = Self::new();
        for (name, col) in cols {
            df.push_column(name.into(), col.into())?;
        }
        Ok(df)
    }

    /// Append a column. Fails unless its length matches the dataset's;
    /// replaces any existing column with the same name.
    pub fn push_column(&mut self, name: String, col: Column) -> Result<(), TableError> {
        if !self.columns.is_empty() && col.len() != self.n_rows() {
            return Err(TableError::LengthMismatch {
                name,
                got: col.len(),
                expected: self.n_rows(),
            });
        }
        self.columns.insert(name, col);
        Ok(())
    }

    /// Copy of this dataset with one column added or replaced.
    pub fn with_column(
        &self,
        name: impl Into<String>,
        col: impl Into<Column>,
    ) -> Result<Self, TableError> {
        let mut df = self.clone();
        df.push_column(name.into(), col.into())?;
        Ok(df)
    }

    /// Number of rows (length of every column).
    pub fn n_rows(&self) -> usize {
        self.columns.values().next().map_or(0, Column::len)
    }

    /// Number of columns.
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Look up a column by name, failing with [`TableError::MissingColumn`].
    pub fn column_r(&self, name: &str) -> Result<&Column, TableError> {
        self.columns
            .get(name)
            .ok_or_else(|| TableError::MissingColumn(name.to_owned()))
    }

    /// True when the dataset has a column with this name.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Read one cell; [`Value::Missing`] for unknown columns or rows.
    pub fn value(&self, column: &str, row: usize) -> Value<'_> {
        self.column(column).map_or(Value::Missing, |c| c.value(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        Dataset::from_columns([
            ("gender", Column::from(vec!["M", "M", "F", "F"])),
            ("age", Column::from(vec![25i64, 34, 25, 61])),
            ("income", Column::from(vec![1.0, f64::NAN, 3.5, 4.0])),
        ])
        .unwrap()
    }

    #[test]
    fn dimensions_and_lookup() {
        let df = sample();
        assert_eq!(df.n_rows(), 4);
        assert_eq!(df.n_columns(), 3);
        assert_eq!(df.value("gender", 2), Value::Text("F"));
        assert_eq!(df.value("age", 1), Value::Int(34));
        assert!(df.column("missing").is_none());
        assert!(df.column_r("missing").is_err());
    }

    #[test]
    fn nan_and_none_read_as_missing() {
        let df = Dataset::from_columns([
            ("f", Column::from(vec![1.0, f64::NAN])),
            ("t", Column::Text(vec![Some("a".into()), None])),
        ])
        .unwrap();
        assert!(df.value("f", 1).is_missing());
        assert!(df.value("t", 1).is_missing());
        assert!(!df.value("f", 0).is_missing());
        // Out-of-range rows read as missing rather than panicking.
        assert!(df.value("f", 99).is_missing());
    }

    #[test]
    fn length_mismatch_rejected() {
        let mut df = sample();
        let err = df.push_column("w".into(), Column::from(vec![1.0, 2.0]));
        assert!(matches!(
            err,
            Err(TableError::LengthMismatch { got: 2, expected: 4, .. })
        ));
    }

    #[test]
    fn with_column_copies_and_preserves_order() {
        let df = sample();
        let out = df.with_column("weights", vec![1.0, 1.0, 1.0, 1.0]).unwrap();
        assert_eq!(df.n_columns(), 3);
        assert_eq!(out.n_columns(), 4);
        let names: Vec<_> = out.column_names().collect();
        assert_eq!(names, vec!["gender", "age", "income", "weights"]);
    }
}
