//! Row Filters
//!
//! Groups select their rows through an opaque [`FilterDescriptor`] plus a
//! [`FilterEvaluator`] capability. The core never interprets descriptors
//! beyond constructing them; hosts may plug in their own evaluator (e.g.
//! backed by a query language) as long as it returns row index sets. The
//! built-in [`EqualityEvaluator`] covers the descriptors the scheme
//! builders emit: `column == value` with canonical-key matching, so a
//! numeric segment column matches a string segment key and vice versa.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

use crate::index::{canon_key, canon_value};
use crate::table::Dataset;

/// Declarative row predicate attached to a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterDescriptor {
    /// Rows where `column`'s canonical value equals `value` (canonical).
    ColumnEquals { column: String, value: String },
}

impl FilterDescriptor {
    /// Equality descriptor with the compared value canonicalized up front.
    pub fn column_equals(column: impl Into<String>, value: impl AsRef<str>) -> Self {
        FilterDescriptor::ColumnEquals {
            column: column.into(),
            value: canon_key(value.as_ref()),
        }
    }
}

impl std::fmt::Display for FilterDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterDescriptor::ColumnEquals { column, value } => {
                write!(f, "{column} == {value:?}")
            }
        }
    }
}

/// Errors an evaluator may raise for a descriptor.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("filter references column {column:?} not present in dataset")]
    MissingColumn { column: String },
    #[error("filter rejected by evaluator: {details}")]
    Unsupported { details: String },
}

/// Capability that turns a descriptor into a row index set.
///
/// Implementations must return indices in ascending order without
/// duplicates. Rows with a missing cell in the filtered column never match.
pub trait FilterEvaluator {
    fn apply(&self, filter: &FilterDescriptor, df: &Dataset) -> Result<Vec<usize>, FilterError>;
}

/// Default evaluator for the descriptors the scheme builders produce.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualityEvaluator;

impl FilterEvaluator for EqualityEvaluator {
    fn apply(&self, filter: &FilterDescriptor, df: &Dataset) -> Result<Vec<usize>, FilterError> {
        match filter {
            FilterDescriptor::ColumnEquals { column, value } => {
                let col = df.column(column).ok_or_else(|| FilterError::MissingColumn {
                    column: column.clone(),
                })?;
                let mut rows = Vec::new();
                for row in 0..col.len() {
                    if canon_value(&col.value(row)).as_deref() == Some(value.as_str()) {
                        rows.push(row);
                    }
                }
                Ok(rows)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    #[test]
    fn equality_matches_text_and_numeric_columns() {
        let df = Dataset::from_columns([
            ("region", Column::from(vec!["A", "B", "A"])),
            ("region_id", Column::from(vec![1i64, 2, 1])),
            ("region_f", Column::from(vec![1.0, 2.0, 1.0])),
        ])
        .unwrap();

        let eval = EqualityEvaluator;
        let f = FilterDescriptor::column_equals("region", "A");
        assert_eq!(eval.apply(&f, &df).unwrap(), vec![0, 2]);

        // A string key selects numeric columns through canonicalization.
        let f = FilterDescriptor::column_equals("region_id", "1");
        assert_eq!(eval.apply(&f, &df).unwrap(), vec![0, 2]);
        let f = FilterDescriptor::column_equals("region_f", "2");
        assert_eq!(eval.apply(&f, &df).unwrap(), vec![1]);
    }

    #[test]
    fn missing_cells_never_match() {
        let df = Dataset::from_columns([(
            "region",
            Column::Text(vec![Some("A".into()), None, Some("A".into())]),
        )])
        .unwrap();
        let f = FilterDescriptor::column_equals("region", "A");
        assert_eq!(EqualityEvaluator.apply(&f, &df).unwrap(), vec![0, 2]);
    }

    #[test]
    fn unknown_column_is_an_error() {
        let df = Dataset::from_columns([("a", Column::from(vec![1i64]))]).unwrap();
        let f = FilterDescriptor::column_equals("missing", "1");
        assert!(matches!(
            EqualityEvaluator.apply(&f, &df),
            Err(FilterError::MissingColumn { .. })
        ));
    }

    #[test]
    fn descriptor_serializes_round_trip() {
        let f = FilterDescriptor::column_equals("region_id", "2.0");
        // Canonicalized at construction: "2.0" stored as "2".
        let json = serde_json::to_string(&f).unwrap();
        let back: FilterDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, f);
        assert_eq!(f.to_string(), "region_id == \"2\"");
    }
}
