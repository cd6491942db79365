//! Weight Engine
//!
//! Orchestrates a full weighting run: validate the scheme against the
//! dataset, assign rows to groups through the filter evaluator, rake each
//! group independently, then rescale the per-group weight vectors so the
//! final dataset reproduces the declared inter-group shares as well as each
//! group's internal marginals.
//!
//! Per-group rake magnitudes are arbitrary relative to each other (every
//! solve normalizes to its own row count); composition fixes that by
//! scaling group `g` to `share_g / Σ shares` of the assigned weight mass.
//! Rows no filter matches stay out of every solve and receive the
//! configured unassigned weight (1 by default); they are listed in the
//! outcome so callers can audit them.
//!
//! Groups are mutually independent: each solve allocates its own buffers
//! and the dataset is only ever read. A failed group does not abort the
//! others; the outcome records the failure and the convenience wrappers
//! [`weight`] / [`weight_dataframe`] refuse incomplete runs.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::diagnostics::{weighting_efficiency, EfficiencyError, WeightSummary};
use crate::filter::{EqualityEvaluator, FilterError, FilterEvaluator};
use crate::index::{canon_value, CategoricalIndex, IndexError};
use crate::scheme::Scheme;
use crate::solver::{rake, Convergence, RakeDimension, SolveError, StopFlag};
use crate::table::{Dataset, TableError};
use crate::validate::{validate_scheme_with, ValidationError};

/// Default name of the output weight column.
pub const DEFAULT_WEIGHT_COLUMN: &str = "weights";

/// Errors from a weighting run.
#[derive(Debug, thiserror::Error)]
pub enum WeightError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("group {group:?}: {source}")]
    Filter {
        group: String,
        #[source]
        source: FilterError,
    },
    #[error("group {group:?}: {source}")]
    Index {
        group: String,
        #[source]
        source: IndexError,
    },
    #[error("row {row} matched by groups {first:?} and {second:?}; groups must partition the rows")]
    OverlappingGroups {
        row: usize,
        first: String,
        second: String,
    },
    #[error("group {group:?}: {source}")]
    GroupSolve {
        group: String,
        #[source]
        source: SolveError,
    },
    #[error("solve incomplete, {} group(s) failed: {}", .failures.len(),
        .failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Incomplete { failures: Vec<GroupFailure> },
    #[error(transparent)]
    Efficiency(#[from] EfficiencyError),
    #[error(transparent)]
    Table(#[from] TableError),
}

/// A group whose solve failed; the rest of the run carried on.
#[derive(Debug, thiserror::Error)]
#[error("group {group:?}: {error}")]
pub struct GroupFailure {
    pub group: String,
    pub error: SolveError,
}

/// Per-group record in the outcome.
#[derive(Debug, Clone)]
pub struct GroupReport {
    pub name: String,
    /// Rows the group's filter matched.
    pub rows: usize,
    /// Declared percent share of the total population.
    pub share: f64,
    /// Composition factor applied on top of the group's rake solution.
    pub scale: f64,
    pub convergence: Convergence,
    /// Summary of the group's final (rescaled) weights.
    pub summary: WeightSummary,
}

/// Result of a full weighting run.
#[derive(Debug)]
pub struct WeightOutcome {
    /// Final weight per dataset row.
    pub weights: Vec<f64>,
    /// One report per solved group, in scheme order.
    pub groups: Vec<GroupReport>,
    /// Groups whose solve failed.
    pub failures: Vec<GroupFailure>,
    /// Rows no group's filter matched.
    pub unassigned: Vec<usize>,
    /// Kish efficiency of the final weight vector, in percent.
    pub efficiency: f64,
}

impl WeightOutcome {
    /// True when every group solved (converged or not).
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// True when every solved group converged and none failed.
    pub fn converged(&self) -> bool {
        self.is_complete() && self.groups.iter().all(|g| g.convergence.converged)
    }
}

/// Configurable weighting run over one borrowed dataset.
pub struct WeightEngine<'a> {
    df: &'a Dataset,
    evaluator: Box<dyn FilterEvaluator + 'a>,
    stop: StopFlag,
    unassigned_weight: f64,
}

impl<'a> WeightEngine<'a> {
    /// Engine with the default equality evaluator and unassigned weight 1.
    pub fn new(df: &'a Dataset) -> Self {
        Self {
            df,
            evaluator: Box::new(EqualityEvaluator),
            stop: StopFlag::new(),
            unassigned_weight: 1.0,
        }
    }

    /// Replace the filter evaluator (host-supplied predicate languages).
    pub fn with_evaluator(mut self, evaluator: impl FilterEvaluator + 'a) -> Self {
        self.evaluator = Box::new(evaluator);
        self
    }

    /// Attach a cancellation flag, checked between solver iterations.
    pub fn with_stop(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    /// Weight given to rows outside every group (default 1).
    pub fn with_unassigned_weight(mut self, weight: f64) -> Self {
        self.unassigned_weight = weight;
        self
    }

    /// Validate, solve every group, compose, and summarize.
    pub fn run(&self, scheme: &Scheme) -> Result<WeightOutcome, WeightError> {
        let df = self.df;
        let n_rows = df.n_rows();

        let report = validate_scheme_with(df, scheme, self.evaluator.as_ref());
        for issue in report.warnings() {
            warn!(scheme = scheme.name(), %issue, "validation warning");
        }
        let _ = report.into_result()?;

        // Assign rows to groups; groups must partition their union.
        let mut assigned: Vec<Option<usize>> = vec![None; n_rows];
        let mut group_rows: Vec<Vec<usize>> = Vec::with_capacity(scheme.groups().len());
        for (gi, group) in scheme.groups().iter().enumerate() {
            let rows = match group.filter() {
                None => (0..n_rows).collect(),
                Some(filter) => {
                    self.evaluator
                        .apply(filter, df)
                        .map_err(|source| WeightError::Filter {
                            group: group.name().to_owned(),
                            source,
                        })?
                }
            };
            for &row in &rows {
                if let Some(prev) = assigned[row] {
                    return Err(WeightError::OverlappingGroups {
                        row,
                        first: scheme.groups()[prev].name().to_owned(),
                        second: group.name().to_owned(),
                    });
                }
                assigned[row] = Some(gi);
            }
            if rows.is_empty() {
                warn!(
                    scheme = scheme.name(),
                    group = group.name(),
                    "group matches zero rows; its share is redistributed"
                );
            }
            group_rows.push(rows);
        }

        // Rake each non-empty group on its own buffers.
        let mut solved: Vec<(usize, Vec<f64>, Convergence)> = Vec::new();
        let mut failures: Vec<GroupFailure> = Vec::new();
        for (gi, group) in scheme.groups().iter().enumerate() {
            let rows = &group_rows[gi];
            if rows.is_empty() {
                continue;
            }
            match self.solve_group(scheme, gi, rows) {
                Ok((weights, convergence)) => solved.push((gi, weights, convergence)),
                Err(WeightError::GroupSolve { group, source }) => {
                    warn!(scheme = scheme.name(), group = %group, error = %source, "group solve failed");
                    failures.push(GroupFailure {
                        group,
                        error: source,
                    });
                }
                Err(other) => return Err(other),
            }
        }

        // Compose: scale each solved group to its share of the assigned
        // weight mass. Shares renormalize over the groups that actually
        // solved, so the assigned mass still sums to the assigned rows.
        let assigned_total: usize = solved.iter().map(|(gi, ..)| group_rows[*gi].len()).sum();
        let share_total: f64 = solved
            .iter()
            .map(|(gi, ..)| scheme.groups()[*gi].share())
            .sum();

        let mut weights = vec![self.unassigned_weight; n_rows];
        let mut reports = Vec::with_capacity(solved.len());
        for (gi, group_weights, convergence) in solved {
            let group = &scheme.groups()[gi];
            let rows = &group_rows[gi];
            let group_sum: f64 = group_weights.iter().sum();
            let scale = (group.share() / share_total) * assigned_total as f64 / group_sum;
            for (&row, &w) in rows.iter().zip(&group_weights) {
                weights[row] = w * scale;
            }
            let scaled: Vec<f64> = group_weights.iter().map(|w| w * scale).collect();
            let summary = WeightSummary::from_weights(&scaled)?;
            info!(
                scheme = scheme.name(),
                group = group.name(),
                rows = rows.len(),
                iterations = convergence.iterations,
                max_residual = convergence.max_residual,
                converged = convergence.converged,
                efficiency = summary.efficiency,
                "group solved"
            );
            reports.push(GroupReport {
                name: group.name().to_owned(),
                rows: rows.len(),
                share: group.share(),
                scale,
                convergence,
                summary,
            });
        }

        // Failed groups keep neutral weights so the vector stays usable.
        let mut unassigned = Vec::new();
        for (row, slot) in assigned.iter().enumerate() {
            match slot {
                None => unassigned.push(row),
                Some(gi) => {
                    if failures.iter().any(|f| f.group == scheme.groups()[*gi].name()) {
                        weights[row] = 1.0;
                    }
                }
            }
        }

        let efficiency = weighting_efficiency(&weights)?;
        Ok(WeightOutcome {
            weights,
            groups: reports,
            failures,
            unassigned,
            efficiency,
        })
    }

    fn solve_group(
        &self,
        scheme: &Scheme,
        gi: usize,
        rows: &[usize],
    ) -> Result<(Vec<f64>, Convergence), WeightError> {
        let group = &scheme.groups()[gi];
        let mut dims = Vec::with_capacity(group.targets().len());
        for target in group.targets() {
            // Observed canonical keys decide which zero-share categories
            // drop out of the constraint.
            let column = self.df.column_r(target.dimension()).map_err(|_| {
                WeightError::Index {
                    group: group.name().to_owned(),
                    source: IndexError::MissingColumn {
                        dimension: target.dimension().to_owned(),
                    },
                }
            })?;
            let mut observed: BTreeSet<String> = BTreeSet::new();
            for &row in rows {
                if let Some(key) = canon_value(&column.value(row)) {
                    observed.insert(key);
                }
            }
            let (mut categories, mut shares) = target.retain_observed(|c| observed.contains(c));
            // Data categories the scheme never references join with a zero
            // share; the solver leaves their rows unconstrained instead of
            // driving them to weight zero. The validator already warned.
            for key in &observed {
                if !categories.contains(key) {
                    categories.push(key.clone());
                    shares.push(0.0);
                }
            }

            let index = CategoricalIndex::build(self.df, target.dimension(), rows, &categories)
                .map_err(|source| WeightError::Index {
                    group: group.name().to_owned(),
                    source,
                })?;
            dims.push(RakeDimension {
                name: target.dimension().to_owned(),
                categories: index.categories().to_vec(),
                codes: index.codes().to_vec(),
                targets: shares,
            });
        }

        rake(&dims, rows.len(), scheme.params(), &self.stop).map_err(|source| {
            WeightError::GroupSolve {
                group: group.name().to_owned(),
                source,
            }
        })
    }
}

/// Solve and return the weight vector only.
///
/// Refuses incomplete runs: if any groups failed to solve, the error
/// carries every [`GroupFailure`], not just the first.
pub fn weight(df: &Dataset, scheme: &Scheme) -> Result<Vec<f64>, WeightError> {
    let outcome = WeightEngine::new(df).run(scheme)?;
    if !outcome.failures.is_empty() {
        return Err(WeightError::Incomplete {
            failures: outcome.failures,
        });
    }
    Ok(outcome.weights)
}

/// Solve and return a copy of the dataset with the weight column attached.
///
/// `weight_column` defaults to [`DEFAULT_WEIGHT_COLUMN`]; existing columns
/// are preserved (a clashing name is replaced).
pub fn weight_dataframe(
    df: &Dataset,
    scheme: &Scheme,
    weight_column: Option<&str>,
) -> Result<Dataset, WeightError> {
    let weights = weight(df, scheme)?;
    Ok(df.with_column(weight_column.unwrap_or(DEFAULT_WEIGHT_COLUMN), weights)?)
}
