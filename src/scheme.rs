//! Weighting Schemes
//!
//! A [`Scheme`] is the full declarative object the engine consumes: one or
//! more [`Group`]s (each a filter, a target per weighting dimension, and a
//! share of the total population) plus the solver parameters. Flat schemes
//! have a single all-rows group named `global_group` with share 100;
//! segmented schemes carry one group per segment key with shares
//! normalized to a 100 total.
//!
//! The dictionary form ([`SchemeDict`]) is the canonical exchange format:
//!
//! ```text
//! { segment_by: "<column>",
//!   segment_targets: { <seg_key>: <number>, ... },
//!   segments: { <seg_key>: { <dim>: { <cat>: <number>, ... }, ... }, ... } }
//! ```
//!
//! with the flat form placing `{ <dim>: { <cat>: <number> } }` at the top
//! level. Keys are canonicalized at construction (see [`crate::index`]), so
//! JSON string keys match numeric data columns exactly.
//!
//! ## Invariants
//!
//! - every target passes normalization (shares sum to 100);
//! - every group references the same dimension list;
//! - group names are unique; segment shares are non-negative and sum to a
//!   positive total;
//! - a `Scheme` is immutable after construction.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::filter::FilterDescriptor;
use crate::index::canon_key;
use crate::target::{Target, TargetError};

/// Name given to the single group of a flat scheme.
pub const GLOBAL_GROUP: &str = "global_group";

/// Per-scheme solver configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RimParams {
    /// Hard cap on outer IPF iterations.
    pub max_iterations: usize,
    /// Max relative marginal deviation required to declare convergence.
    pub convergence_threshold: f64,
    /// Optional clip of weights to `[1/cap, cap]` after each iteration.
    pub weight_cap: Option<f64>,
    /// Unweighted count below which a category triggers `category_policy`.
    pub min_category_count: usize,
    /// What to do when a category falls under `min_category_count`.
    pub category_policy: CategoryPolicy,
}

impl Default for RimParams {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            convergence_threshold: 1e-4,
            weight_cap: None,
            min_category_count: 0,
            category_policy: CategoryPolicy::Warn,
        }
    }
}

impl RimParams {
    /// Copy with a different iteration cap.
    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    /// Copy with a different convergence threshold.
    pub fn with_convergence_threshold(mut self, eps: f64) -> Self {
        self.convergence_threshold = eps;
        self
    }

    /// Copy with weights clipped to `[1/cap, cap]` each iteration.
    pub fn with_weight_cap(mut self, cap: f64) -> Self {
        self.weight_cap = Some(cap);
        self
    }

    /// Copy with a sparse-category threshold and policy.
    pub fn with_min_category_count(mut self, count: usize, policy: CategoryPolicy) -> Self {
        self.min_category_count = count;
        self.category_policy = policy;
        self
    }
}

/// Policy for categories observed fewer than `min_category_count` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CategoryPolicy {
    /// Log a warning and keep the category constrained.
    #[default]
    Warn,
    /// Remove the category from the constraint and renormalize survivors.
    DropAndRenormalize,
}

/// Errors from scheme construction.
#[derive(Debug, thiserror::Error)]
pub enum SchemeError {
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error("scheme has no weighting dimensions")]
    NoDimensions,
    #[error("segmented scheme has no segments")]
    NoSegments,
    #[error("dimension {dimension:?} listed twice in group {group:?}")]
    DuplicateDimension { group: String, dimension: String },
    #[error("group name {name:?} is not unique (keys collide after canonicalization)")]
    DuplicateGroup { name: String },
    #[error("segment targets for {segment_by:?} sum to zero")]
    ZeroSegmentTotal { segment_by: String },
    #[error("segment {segment:?} has negative share {share}")]
    NegativeSegmentShare { segment: String, share: f64 },
    #[error("segment {segment:?} does not match the scheme layout: {details}")]
    SegmentMismatch { segment: String, details: String },
}

/// A subset of rows with its own targets and global share.
#[derive(Debug, Clone)]
pub struct Group {
    name: String,
    filter: Option<FilterDescriptor>,
    targets: Vec<Target>,
    share: f64,
}

impl Group {
    /// Group name (`global_group`, or the canonical segment key).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Row predicate; `None` means the group spans all rows.
    pub fn filter(&self) -> Option<&FilterDescriptor> {
        self.filter.as_ref()
    }

    /// One target per weighting dimension, in scheme dimension order.
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Target for one dimension, if the group constrains it.
    pub fn target(&self, dimension: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.dimension() == dimension)
    }

    /// This group's percent share of the total population.
    pub fn share(&self) -> f64 {
        self.share
    }
}

/// Immutable weighting scheme: named groups over a fixed dimension list.
#[derive(Debug, Clone)]
pub struct Scheme {
    name: String,
    groups: Vec<Group>,
    dimensions: Vec<String>,
    segment_by: Option<String>,
    params: RimParams,
}

impl Scheme {
    /// Flat scheme: one unfiltered group spanning all rows, share 100.
    pub fn flat(
        name: impl Into<String>,
        targets: Vec<Target>,
        params: RimParams,
    ) -> Result<Self, SchemeError> {
        let dimensions = dimension_list(GLOBAL_GROUP, &targets)?;
        let group = Group {
            name: GLOBAL_GROUP.to_owned(),
            filter: None,
            targets,
            share: 100.0,
        };
        Ok(Self {
            name: name.into(),
            groups: vec![group],
            dimensions,
            segment_by: None,
            params,
        })
    }

    /// Segmented scheme: one group per `(segment key, targets)` entry, with
    /// the group filter `segment_by == key` and shares normalized to 100.
    ///
    /// Every segment must constrain the same dimensions (the first
    /// segment's order becomes the scheme order) and must appear in
    /// `shares`.
    pub fn segmented(
        name: impl Into<String>,
        segment_by: impl Into<String>,
        shares: Vec<(String, f64)>,
        segments: Vec<(String, Vec<Target>)>,
        params: RimParams,
    ) -> Result<Self, SchemeError> {
        let segment_by = segment_by.into();
        if segments.is_empty() {
            return Err(SchemeError::NoSegments);
        }

        // Canonicalize and normalize the inter-segment shares.
        let mut share_map: IndexMap<String, f64> = IndexMap::new();
        for (key, share) in &shares {
            let key = canon_key(key);
            if !share.is_finite() || *share < 0.0 {
                return Err(SchemeError::NegativeSegmentShare {
                    segment: key,
                    share: *share,
                });
            }
            share_map.insert(key, *share);
        }
        let total: f64 = share_map.values().sum();
        if total <= 0.0 {
            return Err(SchemeError::ZeroSegmentTotal { segment_by });
        }

        let mut dimensions: Vec<String> = Vec::new();
        let mut groups: Vec<Group> = Vec::new();
        for (key, targets) in segments {
            let key = canon_key(&key);
            if groups.iter().any(|g| g.name == key) {
                return Err(SchemeError::DuplicateGroup { name: key });
            }
            let dims = dimension_list(&key, &targets)?;
            if dimensions.is_empty() {
                dimensions = dims;
            } else if !same_set(&dimensions, &dims) {
                return Err(SchemeError::SegmentMismatch {
                    segment: key,
                    details: format!(
                        "dimensions [{}] differ from the first segment's [{}]",
                        dims.join(", "),
                        dimensions.join(", ")
                    ),
                });
            }
            let share = match share_map.get(&key) {
                Some(s) => s / total * 100.0,
                None => {
                    return Err(SchemeError::SegmentMismatch {
                        segment: key,
                        details: "segment has no entry in segment_targets".to_owned(),
                    })
                }
            };
            groups.push(Group {
                filter: Some(FilterDescriptor::column_equals(segment_by.clone(), &key)),
                name: key,
                targets,
                share,
            });
        }

        // Shares for segments without a distribution cannot be honored.
        for key in share_map.keys() {
            if !groups.iter().any(|g| &g.name == key) {
                return Err(SchemeError::SegmentMismatch {
                    segment: key.clone(),
                    details: "segment_targets entry has no segment distribution".to_owned(),
                });
            }
        }

        Ok(Self {
            name: name.into(),
            groups,
            dimensions,
            segment_by: Some(segment_by),
            params,
        })
    }

    /// Scheme name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All groups, in declaration order.
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Weighting dimensions shared by every group.
    pub fn dimensions(&self) -> &[String] {
        &self.dimensions
    }

    /// Segment column for segmented schemes, `None` for flat ones.
    pub fn segment_by(&self) -> Option<&str> {
        self.segment_by.as_deref()
    }

    /// True for single-group, unfiltered schemes.
    pub fn is_flat(&self) -> bool {
        self.segment_by.is_none()
    }

    /// Solver parameters carried by this scheme.
    pub fn params(&self) -> &RimParams {
        &self.params
    }

    /// Export the canonical dictionary form (normalized shares).
    pub fn to_dict(&self) -> SchemeDict {
        let target_map = |targets: &[Target]| -> IndexMap<String, IndexMap<String, f64>> {
            targets
                .iter()
                .map(|t| {
                    (
                        t.dimension().to_owned(),
                        t.iter().map(|(c, s)| (c.to_owned(), s)).collect(),
                    )
                })
                .collect()
        };
        match &self.segment_by {
            None => SchemeDict::Flat(target_map(self.groups[0].targets())),
            Some(by) => SchemeDict::Segmented {
                segment_by: by.clone(),
                segment_targets: self
                    .groups
                    .iter()
                    .map(|g| (g.name.clone(), g.share))
                    .collect(),
                segments: self
                    .groups
                    .iter()
                    .map(|g| (g.name.clone(), target_map(g.targets())))
                    .collect(),
            },
        }
    }
}

fn dimension_list(group: &str, targets: &[Target]) -> Result<Vec<String>, SchemeError> {
    if targets.is_empty() {
        return Err(SchemeError::NoDimensions);
    }
    let mut dims = Vec::with_capacity(targets.len());
    for t in targets {
        if dims.iter().any(|d| d == t.dimension()) {
            return Err(SchemeError::DuplicateDimension {
                group: group.to_owned(),
                dimension: t.dimension().to_owned(),
            });
        }
        dims.push(t.dimension().to_owned());
    }
    Ok(dims)
}

fn same_set(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().all(|d| b.contains(d))
}

// ===========================================================================
// Dictionary exchange form
// ===========================================================================

/// Raw distribution over one dimension: `category -> value`, any scale.
pub type DistMap = IndexMap<String, f64>;

/// The canonical exchange format for schemes (see module docs).
///
/// `Flat` maps each dimension to its distribution; `Segmented` nests one
/// such mapping per segment key. Values are raw (any positive scale);
/// normalization happens in [`crate::builders::scheme_from_dict`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemeDict {
    /// Segment-conditional targets plus an inter-segment distribution.
    Segmented {
        segment_by: String,
        segment_targets: IndexMap<String, f64>,
        segments: IndexMap<String, IndexMap<String, DistMap>>,
    },
    /// Marginal targets at the top level, no segmentation.
    Flat(IndexMap<String, DistMap>),
}

impl SchemeDict {
    /// Parse the dictionary form from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize the dictionary form to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gender() -> Target {
        Target::normalize("gender", [("M", 50.0), ("F", 50.0)]).unwrap()
    }

    fn age() -> Target {
        Target::normalize("age", [("18-24", 30.0), ("25+", 70.0)]).unwrap()
    }

    #[test]
    fn flat_scheme_has_one_global_group() {
        let s = Scheme::flat("s", vec![gender(), age()], RimParams::default()).unwrap();
        assert!(s.is_flat());
        assert_eq!(s.groups().len(), 1);
        let g = &s.groups()[0];
        assert_eq!(g.name(), GLOBAL_GROUP);
        assert!(g.filter().is_none());
        assert_eq!(g.share(), 100.0);
        assert_eq!(s.dimensions(), &["gender".to_owned(), "age".to_owned()]);
    }

    #[test]
    fn segmented_scheme_normalizes_shares_and_builds_filters() {
        let s = Scheme::segmented(
            "s",
            "region",
            vec![("A".to_owned(), 1.0), ("B".to_owned(), 3.0)],
            vec![
                ("A".to_owned(), vec![gender()]),
                ("B".to_owned(), vec![gender()]),
            ],
            RimParams::default(),
        )
        .unwrap();
        assert_eq!(s.segment_by(), Some("region"));
        assert_eq!(s.groups()[0].share(), 25.0);
        assert_eq!(s.groups()[1].share(), 75.0);
        assert_eq!(
            s.groups()[0].filter(),
            Some(&FilterDescriptor::column_equals("region", "A"))
        );
    }

    #[test]
    fn segment_dimension_mismatch_rejected() {
        let err = Scheme::segmented(
            "s",
            "region",
            vec![("A".to_owned(), 50.0), ("B".to_owned(), 50.0)],
            vec![
                ("A".to_owned(), vec![gender()]),
                ("B".to_owned(), vec![age()]),
            ],
            RimParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SchemeError::SegmentMismatch { .. }));
    }

    #[test]
    fn share_and_segment_key_sets_must_agree() {
        // Share without a distribution.
        let err = Scheme::segmented(
            "s",
            "region",
            vec![("A".to_owned(), 50.0), ("B".to_owned(), 50.0)],
            vec![("A".to_owned(), vec![gender()])],
            RimParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SchemeError::SegmentMismatch { .. }));

        // Distribution without a share.
        let err = Scheme::segmented(
            "s",
            "region",
            vec![("A".to_owned(), 100.0)],
            vec![
                ("A".to_owned(), vec![gender()]),
                ("B".to_owned(), vec![gender()]),
            ],
            RimParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SchemeError::SegmentMismatch { .. }));
    }

    #[test]
    fn zero_segment_total_rejected() {
        let err = Scheme::segmented(
            "s",
            "region",
            vec![("A".to_owned(), 0.0)],
            vec![("A".to_owned(), vec![gender()])],
            RimParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SchemeError::ZeroSegmentTotal { .. }));
    }

    #[test]
    fn numeric_segment_keys_canonicalize() {
        let s = Scheme::segmented(
            "s",
            "region_id",
            vec![("1.0".to_owned(), 50.0), ("2".to_owned(), 50.0)],
            vec![
                ("1".to_owned(), vec![gender()]),
                ("2.0".to_owned(), vec![gender()]),
            ],
            RimParams::default(),
        )
        .unwrap();
        let names: Vec<_> = s.groups().iter().map(Group::name).collect();
        assert_eq!(names, vec!["1", "2"]);
    }

    #[test]
    fn dict_json_round_trip_both_shapes() {
        let flat = SchemeDict::Flat(
            [(
                "gender".to_owned(),
                [("M".to_owned(), 50.0), ("F".to_owned(), 50.0)]
                    .into_iter()
                    .collect(),
            )]
            .into_iter()
            .collect(),
        );
        let back = SchemeDict::from_json(&flat.to_json().unwrap()).unwrap();
        assert_eq!(back, flat);

        let json = r#"{
            "segment_by": "region",
            "segment_targets": {"A": 50.0, "B": 50.0},
            "segments": {
                "A": {"gender": {"M": 50.0, "F": 50.0}},
                "B": {"gender": {"M": 20.0, "F": 80.0}}
            }
        }"#;
        match SchemeDict::from_json(json).unwrap() {
            SchemeDict::Segmented { segment_by, segment_targets, segments } => {
                assert_eq!(segment_by, "region");
                assert_eq!(segment_targets["B"], 50.0);
                assert_eq!(segments["B"]["gender"]["F"], 80.0);
            }
            other => panic!("parsed as flat: {other:?}"),
        }
    }

    #[test]
    fn to_dict_exports_normalized_shares() {
        let s = Scheme::segmented(
            "s",
            "region",
            vec![("A".to_owned(), 10.0), ("B".to_owned(), 90.0)],
            vec![
                ("A".to_owned(), vec![gender()]),
                ("B".to_owned(), vec![gender()]),
            ],
            RimParams::default(),
        )
        .unwrap();
        match s.to_dict() {
            SchemeDict::Segmented { segment_targets, .. } => {
                assert_eq!(segment_targets["A"], 10.0);
                assert_eq!(segment_targets["B"], 90.0);
            }
            other => panic!("expected segmented dict: {other:?}"),
        }
    }
}
