//! Canonical Keys & Categorical Index
//!
//! Scheme categories, segment keys, and filter values are compared as
//! strings after canonicalization, so a scheme key `"1"` matches a data
//! value `1` and a data value `1.0`. Canonicalization happens once at
//! construction; every runtime lookup is exact string equality.
//!
//! [`CategoricalIndex`] is the per-group, per-dimension construction step at
//! the start of a solve: it maps every selected row to a dense code
//! `0..K-1` in scheme-declared order and tracks unweighted counts per
//! category. The supplied list must cover every observed category (the
//! engine appends unreferenced data categories with a zero share before
//! indexing); rows whose value is missing, or whose category the list does
//! not cover, fail here rather than silently distorting the fit.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::collections::HashMap;

use crate::table::{Dataset, Value};

/// Largest integer magnitude exactly representable in an `f64`.
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0; // 2^53

/// Errors from categorical index construction.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("weighting column {dimension:?} not found in dataset")]
    MissingColumn { dimension: String },
    #[error("missing value in weighting column {dimension:?} at row {row}")]
    MissingValue { dimension: String, row: usize },
    #[error("category {category:?} in column {dimension:?} (row {row}) has no target")]
    UncoveredCategory {
        dimension: String,
        category: String,
        row: usize,
    },
}

/// Canonical form of a finite numeric key. `None` for NaN/infinities.
///
/// Integral values collapse to their integer rendering (`1.0` -> `"1"`);
/// everything else uses the shortest `Display` form.
pub fn canon_num(x: f64) -> Option<String> {
    if !x.is_finite() {
        return None;
    }
    if x == x.trunc() && x.abs() <= MAX_EXACT_INT {
        return Some(format!("{}", x as i64));
    }
    Some(format!("{x}"))
}

/// Canonical form of a raw string key.
///
/// Text that parses as a finite number canonicalizes numerically, so the
/// keys `"1"`, `"1.0"` and the values `1`, `1.0` all collide; any other
/// text is returned unchanged.
pub fn canon_key(raw: &str) -> String {
    match raw.parse::<f64>() {
        Ok(x) if x.is_finite() => canon_num(x).unwrap_or_else(|| raw.to_owned()),
        _ => raw.to_owned(),
    }
}

/// Canonical form of a table cell. `None` when the cell is missing.
pub fn canon_value(value: &Value<'_>) -> Option<String> {
    match value {
        Value::Int(x) => Some(format!("{x}")),
        Value::Float(x) => canon_num(*x),
        Value::Text(s) => Some(canon_key(s)),
        Value::Missing => None,
    }
}

/// Dense row-to-code mapping for one dimension of one group.
#[derive(Debug, Clone)]
pub struct CategoricalIndex {
    dimension: String,
    categories: Vec<String>,
    codes: Vec<usize>,
    counts: Vec<usize>,
}

impl CategoricalIndex {
    /// Index `rows` of `df[dimension]` against the scheme's category list.
    ///
    /// `categories` must already be canonical and in declared order; codes
    /// are positions into it. Fails on missing cells and on observed
    /// categories absent from the list.
    pub fn build(
        df: &Dataset,
        dimension: &str,
        rows: &[usize],
        categories: &[String],
    ) -> Result<Self, IndexError> {
        let column = df.column(dimension).ok_or_else(|| IndexError::MissingColumn {
            dimension: dimension.to_owned(),
        })?;

        let positions: HashMap<&str, usize> = categories
            .iter()
            .enumerate()
            .map(|(code, cat)| (cat.as_str(), code))
            .collect();

        let mut codes = Vec::with_capacity(rows.len());
        let mut counts = vec![0usize; categories.len()];
        for &row in rows {
            let key = canon_value(&column.value(row)).ok_or_else(|| IndexError::MissingValue {
                dimension: dimension.to_owned(),
                row,
            })?;
            let code = *positions
                .get(key.as_str())
                .ok_or_else(|| IndexError::UncoveredCategory {
                    dimension: dimension.to_owned(),
                    category: key.clone(),
                    row,
                })?;
            codes.push(code);
            counts[code] += 1;
        }

        Ok(Self {
            dimension: dimension.to_owned(),
            categories: categories.to_vec(),
            codes,
            counts,
        })
    }

    /// Dimension (column) name this index covers.
    pub fn dimension(&self) -> &str {
        &self.dimension
    }

    /// Number of categories `K`.
    pub fn k(&self) -> usize {
        self.categories.len()
    }

    /// Dense code per selected row, in the order rows were given.
    pub fn codes(&self) -> &[usize] {
        &self.codes
    }

    /// Unweighted observation count per code.
    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// Canonical category names, `code -> category`.
    pub fn categories(&self) -> &[String] {
        &self.categories
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    #[test]
    fn numeric_and_string_keys_collide() {
        assert_eq!(canon_key("1"), "1");
        assert_eq!(canon_key("1.0"), "1");
        assert_eq!(canon_num(1.0).as_deref(), Some("1"));
        assert_eq!(canon_num(1.5).as_deref(), Some("1.5"));
        assert_eq!(canon_value(&Value::Int(1)).as_deref(), Some("1"));
        assert_eq!(canon_value(&Value::Float(1.0)).as_deref(), Some("1"));
        assert_eq!(canon_value(&Value::Text("1.0")).as_deref(), Some("1"));
        // Non-numeric text passes through untouched.
        assert_eq!(canon_key("Male"), "Male");
        assert_eq!(canon_num(f64::NAN), None);
        assert_eq!(canon_value(&Value::Missing), None);
    }

    #[test]
    fn dense_codes_in_declared_order() {
        let df = Dataset::from_columns([("gender", Column::from(vec!["F", "M", "F", "M"]))])
            .unwrap();
        let cats = vec!["M".to_owned(), "F".to_owned()];
        let idx = CategoricalIndex::build(&df, "gender", &[0, 1, 2, 3], &cats).unwrap();
        assert_eq!(idx.k(), 2);
        // "M" was declared first, so it gets code 0 regardless of data order.
        assert_eq!(idx.codes(), &[1, 0, 1, 0]);
        assert_eq!(idx.counts(), &[2, 2]);
    }

    #[test]
    fn numeric_column_matches_string_categories() {
        let df = Dataset::from_columns([("region", Column::from(vec![1i64, 2, 1]))]).unwrap();
        let cats = vec!["1".to_owned(), "2".to_owned()];
        let idx = CategoricalIndex::build(&df, "region", &[0, 1, 2], &cats).unwrap();
        assert_eq!(idx.codes(), &[0, 1, 0]);
    }

    #[test]
    fn missing_and_uncovered_rows_fail() {
        let df = Dataset::from_columns([
            ("gender", Column::Text(vec![Some("M".into()), None])),
        ])
        .unwrap();
        let cats = vec!["M".to_owned()];
        let err = CategoricalIndex::build(&df, "gender", &[0, 1], &cats).unwrap_err();
        assert!(matches!(err, IndexError::MissingValue { row: 1, .. }));

        let df = Dataset::from_columns([("gender", Column::from(vec!["M", "X"]))]).unwrap();
        let err = CategoricalIndex::build(&df, "gender", &[0, 1], &cats).unwrap_err();
        match err {
            IndexError::UncoveredCategory { category, row, .. } => {
                assert_eq!(category, "X");
                assert_eq!(row, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
