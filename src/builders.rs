//! Scheme Builders
//!
//! Three equivalent ways to obtain a [`Scheme`]:
//!
//! - [`scheme_from_dict`]: directly from the dictionary exchange form;
//! - [`scheme_from_df`]: from microdata (one row per record plus a
//!   frequency column), aggregating frequencies per category;
//! - [`scheme_from_long_df`]: from a long/tidy aggregate table
//!   (`variable, category, value` plus an optional segment column).
//!
//! The table-driven builders go through a raw-count `SchemeDict`
//! intermediate (`scheme_dict_from_df` / `scheme_dict_from_long_df`), which
//! is public because hosts use it to inspect or persist census targets
//! before normalization. Normalization itself happens in
//! [`scheme_from_dict`] and never mutates its input.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use indexmap::IndexMap;
use rand::Rng;

use crate::index::canon_value;
use crate::scheme::{DistMap, RimParams, Scheme, SchemeDict, SchemeError};
use crate::table::{Dataset, TableError};
use crate::target::Target;

/// Errors from the table-driven builders.
#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Scheme(#[from] SchemeError),
    #[error("missing value in column {column:?} at row {row}")]
    MissingValue { column: String, row: usize },
    #[error("column {column:?} at row {row} is not numeric")]
    NotNumeric { column: String, row: usize },
    #[error(
        "segment {segment:?}: variable {variable:?} sums to {got}, expected {expected} (totals must agree within a segment)"
    )]
    SegmentTotalsDiffer {
        segment: String,
        variable: String,
        expected: f64,
        got: f64,
    },
}

/// Build a scheme from the dictionary form.
///
/// Distributions may be in any positive scale; they are normalized into
/// percent targets without touching the input. When `name` is `None` a
/// `generated######` name is drawn, matching schemes produced ad hoc.
pub fn scheme_from_dict(
    dict: &SchemeDict,
    name: Option<&str>,
    params: RimParams,
) -> Result<Scheme, SchemeError> {
    let name = name.map_or_else(generated_name, str::to_owned);
    match dict {
        SchemeDict::Flat(dists) => {
            let targets = normalize_all(dists)?;
            Scheme::flat(name, targets, params)
        }
        SchemeDict::Segmented {
            segment_by,
            segment_targets,
            segments,
        } => {
            let shares: Vec<(String, f64)> = segment_targets
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect();
            let mut groups = Vec::with_capacity(segments.len());
            for (key, dists) in segments {
                groups.push((key.clone(), normalize_all(dists)?));
            }
            Scheme::segmented(name, segment_by, shares, groups, params)
        }
    }
}

fn normalize_all(dists: &IndexMap<String, DistMap>) -> Result<Vec<Target>, SchemeError> {
    dists
        .iter()
        .map(|(dim, dist)| {
            Target::normalize(dim, dist.iter().map(|(k, v)| (k.as_str(), *v)))
                .map_err(SchemeError::from)
        })
        .collect()
}

fn generated_name() -> String {
    format!("generated{}", rand::thread_rng().gen_range(0..1_000_000))
}

/// Extract the raw-count dictionary form from microdata.
///
/// For every weighting column, frequencies are summed per observed
/// category; with `col_filter` set, the same aggregation runs per segment
/// and each segment's target is its total frequency.
pub fn scheme_dict_from_df(
    df: &Dataset,
    cols_weighting: &[&str],
    col_freq: &str,
    col_filter: Option<&str>,
) -> Result<SchemeDict, BuilderError> {
    df.column_r(col_freq)?;
    for col in cols_weighting {
        df.column_r(col)?;
    }

    match col_filter {
        None => {
            let rows: Vec<usize> = (0..df.n_rows()).collect();
            Ok(SchemeDict::Flat(aggregate_dists(
                df,
                cols_weighting,
                col_freq,
                &rows,
            )?))
        }
        Some(filter_col) => {
            df.column_r(filter_col)?;
            // Segment keys in order of first appearance.
            let mut segment_rows: IndexMap<String, Vec<usize>> = IndexMap::new();
            for row in 0..df.n_rows() {
                let key = canon_value(&df.value(filter_col, row)).ok_or_else(|| {
                    BuilderError::MissingValue {
                        column: filter_col.to_owned(),
                        row,
                    }
                })?;
                segment_rows.entry(key).or_default().push(row);
            }

            let mut segment_targets: IndexMap<String, f64> = IndexMap::new();
            let mut segments: IndexMap<String, IndexMap<String, DistMap>> = IndexMap::new();
            for (key, rows) in segment_rows {
                let total: f64 = rows
                    .iter()
                    .map(|&row| numeric_cell(df, col_freq, row))
                    .sum::<Result<f64, _>>()?;
                segments.insert(
                    key.clone(),
                    aggregate_dists(df, cols_weighting, col_freq, &rows)?,
                );
                segment_targets.insert(key, total);
            }
            Ok(SchemeDict::Segmented {
                segment_by: filter_col.to_owned(),
                segment_targets,
                segments,
            })
        }
    }
}

/// Microdata convenience: [`scheme_dict_from_df`] then [`scheme_from_dict`].
pub fn scheme_from_df(
    df: &Dataset,
    cols_weighting: &[&str],
    col_freq: &str,
    col_filter: Option<&str>,
    name: Option<&str>,
    params: RimParams,
) -> Result<Scheme, BuilderError> {
    let dict = scheme_dict_from_df(df, cols_weighting, col_freq, col_filter)?;
    Ok(scheme_from_dict(&dict, name, params)?)
}

/// Extract the raw-count dictionary form from a long/tidy table.
///
/// Rows are `(variable, category, value)` triples, optionally carrying a
/// segment column. Duplicate triples sum. Each segment's target is the
/// total of its first variable; every other variable in the segment must
/// sum to the same total, since one aggregate table describes one
/// population per segment.
pub fn scheme_dict_from_long_df(
    df: &Dataset,
    col_variable: &str,
    col_category: &str,
    col_value: &str,
    col_filter: Option<&str>,
) -> Result<SchemeDict, BuilderError> {
    df.column_r(col_variable)?;
    df.column_r(col_category)?;
    df.column_r(col_value)?;
    if let Some(c) = col_filter {
        df.column_r(c)?;
    }

    // segment -> variable -> category -> summed value. Flat input uses a
    // single synthetic segment.
    let mut nested: IndexMap<String, IndexMap<String, DistMap>> = IndexMap::new();
    for row in 0..df.n_rows() {
        let segment = match col_filter {
            None => String::new(),
            Some(col) => text_cell(df, col, row)?,
        };
        let variable = text_cell(df, col_variable, row)?;
        let category = text_cell(df, col_category, row)?;
        let value = numeric_cell(df, col_value, row)?;
        *nested
            .entry(segment)
            .or_default()
            .entry(variable)
            .or_default()
            .entry(category)
            .or_insert(0.0) += value;
    }

    match col_filter {
        None => {
            let (_, dists) = nested.into_iter().next().unwrap_or_default();
            Ok(SchemeDict::Flat(dists))
        }
        Some(filter_col) => {
            let mut segment_targets: IndexMap<String, f64> = IndexMap::new();
            for (segment, dists) in &nested {
                let mut total = None;
                for (variable, dist) in dists {
                    let sum: f64 = dist.values().sum();
                    match total {
                        None => total = Some(sum),
                        Some(expected) => {
                            let tol = expected.abs().max(1.0) * 1e-9;
                            if (sum - expected).abs() > tol {
                                return Err(BuilderError::SegmentTotalsDiffer {
                                    segment: segment.clone(),
                                    variable: variable.clone(),
                                    expected,
                                    got: sum,
                                });
                            }
                        }
                    }
                }
                segment_targets.insert(segment.clone(), total.unwrap_or(0.0));
            }
            Ok(SchemeDict::Segmented {
                segment_by: filter_col.to_owned(),
                segment_targets,
                segments: nested,
            })
        }
    }
}

/// Long-form convenience: [`scheme_dict_from_long_df`] then
/// [`scheme_from_dict`].
pub fn scheme_from_long_df(
    df: &Dataset,
    col_variable: &str,
    col_category: &str,
    col_value: &str,
    col_filter: Option<&str>,
    name: Option<&str>,
    params: RimParams,
) -> Result<Scheme, BuilderError> {
    let dict = scheme_dict_from_long_df(df, col_variable, col_category, col_value, col_filter)?;
    Ok(scheme_from_dict(&dict, name, params)?)
}

// Aggregate Σ freq per category for each weighting column over `rows`.
fn aggregate_dists(
    df: &Dataset,
    cols_weighting: &[&str],
    col_freq: &str,
    rows: &[usize],
) -> Result<IndexMap<String, DistMap>, BuilderError> {
    let mut dists: IndexMap<String, DistMap> = IndexMap::new();
    for &col in cols_weighting {
        let mut dist = DistMap::new();
        for &row in rows {
            let category =
                canon_value(&df.value(col, row)).ok_or_else(|| BuilderError::MissingValue {
                    column: col.to_owned(),
                    row,
                })?;
            let freq = numeric_cell(df, col_freq, row)?;
            *dist.entry(category).or_insert(0.0) += freq;
        }
        dists.insert(col.to_owned(), dist);
    }
    Ok(dists)
}

fn numeric_cell(df: &Dataset, column: &str, row: usize) -> Result<f64, BuilderError> {
    let value = df.value(column, row);
    if value.is_missing() {
        return Err(BuilderError::MissingValue {
            column: column.to_owned(),
            row,
        });
    }
    value.as_f64().ok_or_else(|| BuilderError::NotNumeric {
        column: column.to_owned(),
        row,
    })
}

fn text_cell(df: &Dataset, column: &str, row: usize) -> Result<String, BuilderError> {
    canon_value(&df.value(column, row)).ok_or_else(|| BuilderError::MissingValue {
        column: column.to_owned(),
        row,
    })
}
