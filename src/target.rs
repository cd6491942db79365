//! Marginal Targets
//!
//! A [`Target`] is the desired distribution over one dimension's categories
//! inside one group. Inputs of any positive scale are accepted (counts,
//! proportions, percentages) and rescaled once at construction so that the
//! shares sum to exactly 100; zero-share entries are kept here and only
//! dropped at solve preparation when the data has no such observations.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use crate::index::canon_key;

/// Errors from target construction.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("target for {dimension:?} sums to zero")]
    ZeroTotal { dimension: String },
    #[error("target for {dimension:?} has negative share {share} at {category:?}")]
    NegativeShare {
        dimension: String,
        category: String,
        share: f64,
    },
    #[error("target for {dimension:?} has non-finite share at {category:?}")]
    NonFiniteShare { dimension: String, category: String },
    #[error("target for {dimension:?} lists {category:?} twice (keys collide after canonicalization)")]
    DuplicateCategory { dimension: String, category: String },
}

/// Normalized marginal target for a single dimension.
///
/// Categories are canonical strings in declared order; shares are percent
/// and sum to 100. The pair of parallel vectors doubles as the dense code
/// assignment: code `k` is `categories[k]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    dimension: String,
    categories: Vec<String>,
    shares: Vec<f64>,
}

impl Target {
    /// Canonicalize keys, validate shares, and rescale to a 100 total.
    ///
    /// The input is read, never mutated; callers keep their raw mapping.
    pub fn normalize<K, I>(dimension: impl Into<String>, raw: I) -> Result<Self, TargetError>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, f64)>,
    {
        let dimension = dimension.into();
        let mut categories: Vec<String> = Vec::new();
        let mut shares: Vec<f64> = Vec::new();

        for (key, share) in raw {
            let category = canon_key(key.as_ref());
            if !share.is_finite() {
                return Err(TargetError::NonFiniteShare { dimension, category });
            }
            if share < 0.0 {
                return Err(TargetError::NegativeShare {
                    dimension,
                    category,
                    share,
                });
            }
            if categories.contains(&category) {
                return Err(TargetError::DuplicateCategory { dimension, category });
            }
            categories.push(category);
            shares.push(share);
        }

        let total: f64 = shares.iter().sum();
        if total <= 0.0 {
            return Err(TargetError::ZeroTotal { dimension });
        }
        for share in &mut shares {
            *share = *share / total * 100.0;
        }

        Ok(Self {
            dimension,
            categories,
            shares,
        })
    }

    /// Dimension (column) name this target constrains.
    pub fn dimension(&self) -> &str {
        &self.dimension
    }

    /// Number of categories, including zero-share entries.
    pub fn k(&self) -> usize {
        self.categories.len()
    }

    /// Canonical category names in declared order.
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// Percent shares, parallel to [`Target::categories`], summing to 100.
    pub fn shares(&self) -> &[f64] {
        &self.shares
    }

    /// Share for a canonical key, if present.
    pub fn share(&self, category: &str) -> Option<f64> {
        self.categories
            .iter()
            .position(|c| c == category)
            .map(|i| self.shares[i])
    }

    /// Iterate `(category, share)` pairs in declared order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.categories
            .iter()
            .map(String::as_str)
            .zip(self.shares.iter().copied())
    }

    /// Solve-time view: keep every category that is observed or has a
    /// positive share, dropping zero-share entries the data never shows.
    /// Dropping zeros leaves the 100 total intact.
    pub fn retain_observed<F>(&self, observed: F) -> (Vec<String>, Vec<f64>)
    where
        F: Fn(&str) -> bool,
    {
        let mut categories = Vec::with_capacity(self.categories.len());
        let mut shares = Vec::with_capacity(self.shares.len());
        for (cat, share) in self.iter() {
            if share > 0.0 || observed(cat) {
                categories.push(cat.to_owned());
                shares.push(share);
            }
        }
        (categories, shares)
    }
}

/// Sum of `weights[i]` bucketed by `codes[i]` into `k` cells.
pub fn marginal_counts(weights: &[f64], codes: &[usize], k: usize) -> Vec<f64> {
    debug_assert_eq!(weights.len(), codes.len());
    let mut out = vec![0.0; k];
    for (&w, &code) in weights.iter().zip(codes) {
        out[code] += w;
    }
    out
}
