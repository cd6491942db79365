//! Crate root: public surface and engine-wide invariants
//!
//! This module is the single canonical entry-point for downstream users of
//! the library. `rimrake` takes an in-memory columnar dataset plus a
//! declarative weighting scheme and produces a non-negative per-row weight
//! vector whose empirical marginals match the scheme's targets within a
//! configurable tolerance (RIM weighting / raking / iterative proportional
//! fitting).
//!
//! ## Invariants (engine-wide)
//!
//! - **Targets are percent.** Every normalized target sums to exactly 100;
//!   inputs of any positive scale are rescaled once at construction and
//!   never mutated in place.
//! - **Keys are canonical.** Scheme categories, segment keys, and filter
//!   values are canonicalized to strings at construction (`1`, `1.0` and
//!   `"1"` collide), so runtime lookups are exact string equality.
//! - **Groups partition their rows.** A row belongs to zero or one group;
//!   overlap is an error, and unassigned rows receive weight 1 and are
//!   flagged in the outcome.
//! - **Weights stay positive.** Structural infeasibilities (a positive
//!   target with no observations, an observed category with no target) are
//!   eager errors; the solver never drives a weight to zero or infinity.
//! - **Solves are independent.** The dataset is borrowed read-only and each
//!   group solve owns its buffers; failures are per-group and precise.
//!
//! ## Typical use
//!
//! ```ignore
//! use rimrake::{scheme_from_dict, weight_dataframe, SchemeDict, RimParams};
//!
//! let dict = SchemeDict::from_json(r#"{"gender": {"M": 50, "F": 50}}"#)?;
//! let scheme = scheme_from_dict(&dict, Some("gender_rim"), RimParams::default())?;
//! let weighted = weight_dataframe(&df, &scheme, None)?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// Columnar dataset consumed by the engine (typed columns, explicit missing).
pub mod table;
/// Canonical key normalization and the per-solve categorical index.
pub mod index;
/// Normalized marginal targets (one per dimension per group).
pub mod target;
/// Scheme model: groups, parameters, and the dictionary exchange form.
pub mod scheme;
/// Scheme construction from mappings, microdata, and long-form tables.
pub mod builders;
/// Filter descriptors and the evaluator capability.
pub mod filter;
/// The raking (IPF) solver.
pub mod solver;
/// Orchestration: validation gate, per-group solves, composition.
pub mod engine;
/// Pre-solve validation reports.
pub mod validate;
/// Weighting efficiency and weight summaries.
pub mod diagnostics;

// ============================================================================
// Canonical re-exports (centralization)
// ============================================================================

pub use crate::builders::{
    scheme_dict_from_df, scheme_dict_from_long_df, scheme_from_df, scheme_from_dict,
    scheme_from_long_df, BuilderError,
};
pub use crate::diagnostics::{weighting_efficiency, EfficiencyError, WeightSummary};
pub use crate::engine::{
    weight, weight_dataframe, GroupFailure, GroupReport, WeightEngine, WeightError,
    WeightOutcome, DEFAULT_WEIGHT_COLUMN,
};
pub use crate::filter::{EqualityEvaluator, FilterDescriptor, FilterError, FilterEvaluator};
pub use crate::index::{CategoricalIndex, IndexError};
pub use crate::scheme::{
    CategoryPolicy, Group, RimParams, Scheme, SchemeDict, SchemeError, GLOBAL_GROUP,
};
pub use crate::solver::{rake, Convergence, RakeDimension, SolveError, StopFlag};
pub use crate::table::{Column, Dataset, TableError, Value};
pub use crate::target::{marginal_counts, Target, TargetError};
pub use crate::validate::{
    validate_scheme, validate_scheme_dict, validate_scheme_strict, validate_scheme_with, Issue,
    IssueType, Severity, ValidationError, ValidationReport,
};
