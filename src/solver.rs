//! Raking Solver (IPF)
//!
//! Classic iterative proportional fitting over one group's rows. Each outer
//! iteration sweeps the dimensions in declared order, scaling every row's
//! weight by `desired / observed` for its category; the loop stops when the
//! largest relative marginal deviation falls under the convergence
//! threshold, the iteration cap is reached, or a [`StopFlag`] fires.
//!
//! For two or more cross-classifying dimensions no closed form exists in
//! general; IPF is the minimum-discrimination-information projection onto
//! the intersection of the marginal constraints and converges whenever a
//! feasible point exists, for any number of dimensions and any sweep order.
//!
//! Non-convergence within `max_iterations` is not fatal: best-effort
//! weights come back with `converged = false` and the final residual, and
//! the caller decides whether to accept them. An empty cell with a positive
//! target is a hard error instead, since iterating on it would push weights
//! to infinity. The opposite mismatch is survivable: an observed category
//! with a zero share leaves the constraint entirely, and its rows pass
//! through every sweep of that dimension with factor 1 rather than being
//! driven to weight zero.
//!
//! The solver owns its transient buffers (observed marginals, factors, the
//! weight vector) and reads nothing but the inputs; group solves are
//! mutually independent.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::scheme::{CategoryPolicy, RimParams};

/// Cooperative cancellation handle, checked between outer iterations.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// A fresh, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the solver stops before its next iteration.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// True once [`StopFlag::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One dimension of a rake problem, already indexed against the group.
#[derive(Debug, Clone)]
pub struct RakeDimension {
    /// Dimension (column) name, for diagnostics and errors.
    pub name: String,
    /// Canonical category names, `code -> category`.
    pub categories: Vec<String>,
    /// Dense category code per group row.
    pub codes: Vec<usize>,
    /// Percent target per category, summing to 100.
    pub targets: Vec<f64>,
}

/// Outcome record of one group solve.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Convergence {
    /// Outer iterations actually run.
    pub iterations: usize,
    /// Largest relative marginal deviation at termination.
    pub max_residual: f64,
    /// Whether the residual fell under the threshold.
    pub converged: bool,
}

/// Runtime solver errors. All are fatal for the affected group.
#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    #[error("dimension {dimension:?}: category {category:?} has a positive target but no observations")]
    EmptyCellWithNonzeroTarget { dimension: String, category: String },
    #[error("malformed rake inputs for {dimension:?}: {details}")]
    Shape { dimension: String, details: String },
    #[error("invalid solver parameters: {details}")]
    BadParams { details: String },
}

// Per-dimension working state derived once before iterating.
struct DimState {
    // Constraint membership per category; inactive categories pass through.
    active: Vec<bool>,
    // Targets renormalized to 100 over the active categories.
    targets: Vec<f64>,
}

/// Rake `n_rows` weights onto the marginal targets of `dims`.
///
/// Returns strictly positive weights summing to `n_rows` (within the
/// convergence threshold) and the convergence record. See the module docs
/// for the error and cancellation contract.
pub fn rake(
    dims: &[RakeDimension],
    n_rows: usize,
    params: &RimParams,
    stop: &StopFlag,
) -> Result<(Vec<f64>, Convergence), SolveError> {
    check_shapes(dims, n_rows)?;
    if let Some(cap) = params.weight_cap {
        if !cap.is_finite() || cap < 1.0 {
            return Err(SolveError::BadParams {
                details: format!("weight_cap must be >= 1 (got {cap})"),
            });
        }
    }

    let states = prepare_dimensions(dims, params)?;

    let mut weights = vec![1.0; n_rows];
    let mut observed: Vec<f64> = Vec::new();
    let mut factors: Vec<f64> = Vec::new();

    let mut iterations = 0;
    let mut max_residual = f64::INFINITY;
    let mut converged = false;

    while iterations < params.max_iterations {
        if stop.is_cancelled() {
            debug!(iterations, "rake cancelled via stop flag");
            break;
        }
        iterations += 1;

        for (dim, state) in dims.iter().zip(&states) {
            scale_dimension(dim, state, &mut weights, &mut observed, &mut factors);
        }

        if let Some(cap) = params.weight_cap {
            clip_and_rescale(&mut weights, cap, n_rows as f64);
        }

        max_residual = residual(dims, &states, &weights, &mut observed);
        debug!(iterations, max_residual, "rake iteration");
        if max_residual <= params.convergence_threshold {
            converged = true;
            break;
        }
    }

    if !converged {
        warn!(
            iterations,
            max_residual, "rake did not converge within the iteration cap"
        );
    }

    Ok((
        weights,
        Convergence {
            iterations,
            max_residual,
            converged,
        },
    ))
}

fn check_shapes(dims: &[RakeDimension], n_rows: usize) -> Result<(), SolveError> {
    if dims.is_empty() {
        return Err(SolveError::Shape {
            dimension: String::new(),
            details: "no dimensions".to_owned(),
        });
    }
    if n_rows == 0 {
        return Err(SolveError::Shape {
            dimension: dims[0].name.clone(),
            details: "no rows".to_owned(),
        });
    }
    for dim in dims {
        let k = dim.categories.len();
        if dim.targets.len() != k {
            return Err(SolveError::Shape {
                dimension: dim.name.clone(),
                details: format!("{} targets for {k} categories", dim.targets.len()),
            });
        }
        if dim.codes.len() != n_rows {
            return Err(SolveError::Shape {
                dimension: dim.name.clone(),
                details: format!("{} codes for {n_rows} rows", dim.codes.len()),
            });
        }
        if dim.codes.iter().any(|&c| c >= k) {
            return Err(SolveError::Shape {
                dimension: dim.name.clone(),
                details: format!("code out of range for K={k}"),
            });
        }
    }
    Ok(())
}

// Resolve sparse categories per the scheme policy and pre-check the
// feasibility conditions that iteration cannot repair.
fn prepare_dimensions(
    dims: &[RakeDimension],
    params: &RimParams,
) -> Result<Vec<DimState>, SolveError> {
    let mut states = Vec::with_capacity(dims.len());
    for dim in dims {
        let counts = unweighted_counts(&dim.codes, dim.categories.len());
        let mut active = vec![true; dim.categories.len()];
        let mut targets = dim.targets.clone();

        for (k, (&count, category)) in counts.iter().zip(&dim.categories).enumerate() {
            if count == 0 {
                if targets[k] > 0.0 {
                    return Err(SolveError::EmptyCellWithNonzeroTarget {
                        dimension: dim.name.clone(),
                        category: category.clone(),
                    });
                }
                // Zero target, zero observations: nothing to constrain.
                active[k] = false;
                continue;
            }
            if targets[k] == 0.0 {
                // Zero share (explicit, or a data category the scheme does
                // not reference): rows pass through unconstrained.
                warn!(
                    dimension = %dim.name,
                    category = %category,
                    count,
                    "category has no target share; its rows are unconstrained"
                );
                active[k] = false;
                continue;
            }
            if count < params.min_category_count {
                match params.category_policy {
                    CategoryPolicy::Warn => {
                        warn!(
                            dimension = %dim.name,
                            category = %category,
                            count,
                            min = params.min_category_count,
                            "category under min_category_count"
                        );
                    }
                    CategoryPolicy::DropAndRenormalize => {
                        warn!(
                            dimension = %dim.name,
                            category = %category,
                            count,
                            min = params.min_category_count,
                            "dropping sparse category from constraint"
                        );
                        active[k] = false;
                        targets[k] = 0.0;
                    }
                }
            }
        }

        let total: f64 = targets.iter().sum();
        if total <= 0.0 {
            return Err(SolveError::Shape {
                dimension: dim.name.clone(),
                details: "no active categories left to constrain".to_owned(),
            });
        }
        for t in &mut targets {
            *t = *t / total * 100.0;
        }

        states.push(DimState { active, targets });
    }
    Ok(states)
}

fn unweighted_counts(codes: &[usize], k: usize) -> Vec<usize> {
    let mut counts = vec![0usize; k];
    for &c in codes {
        counts[c] += 1;
    }
    counts
}

// One dimension sweep: multiply each constrained row by desired/observed
// for its category. Rows of inactive categories pass through unchanged.
fn scale_dimension(
    dim: &RakeDimension,
    state: &DimState,
    weights: &mut [f64],
    observed: &mut Vec<f64>,
    factors: &mut Vec<f64>,
) {
    let k = dim.categories.len();
    observed.clear();
    observed.resize(k, 0.0);
    let mut base = 0.0;
    for (&w, &code) in weights.iter().zip(&dim.codes) {
        if state.active[code] {
            observed[code] += w;
            base += w;
        }
    }

    factors.clear();
    factors.resize(k, 1.0);
    for code in 0..k {
        if state.active[code] {
            // observed > 0: the category has rows and weights stay positive.
            let desired = state.targets[code] * base / 100.0;
            factors[code] = desired / observed[code];
        }
    }

    for (w, &code) in weights.iter_mut().zip(&dim.codes) {
        *w *= factors[code];
    }
}

fn clip_and_rescale(weights: &mut [f64], cap: f64, total: f64) {
    let lo = 1.0 / cap;
    for w in weights.iter_mut() {
        *w = w.clamp(lo, cap);
    }
    let sum: f64 = weights.iter().sum();
    let scale = total / sum;
    for w in weights.iter_mut() {
        *w *= scale;
    }
}

// Largest relative deviation between observed and desired marginals, over
// every dimension and active category, at the current weights.
fn residual(
    dims: &[RakeDimension],
    states: &[DimState],
    weights: &[f64],
    observed: &mut Vec<f64>,
) -> f64 {
    let mut worst = 0.0f64;
    for (dim, state) in dims.iter().zip(states) {
        let k = dim.categories.len();
        observed.clear();
        observed.resize(k, 0.0);
        let mut base = 0.0;
        for (&w, &code) in weights.iter().zip(&dim.codes) {
            if state.active[code] {
                observed[code] += w;
                base += w;
            }
        }
        for code in 0..k {
            if state.active[code] {
                let desired = state.targets[code] * base / 100.0;
                worst = worst.max((observed[code] - desired).abs() / desired);
            }
        }
    }
    worst
}
