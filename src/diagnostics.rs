//! Weighting Diagnostics
//!
//! Kish-style weighting efficiency: the effective-sample-size ratio
//! `(Σw)^2 / (N · Σw^2) · 100`, in `(0, 100]`, equal to 100 exactly when
//! all weights are equal. Computed on the final weight vector, and per
//! group through [`WeightSummary`].

#![forbid(unsafe_code)]
#![allow(missing_docs)]

/// Errors from efficiency computation.
#[derive(Debug, thiserror::Error)]
pub enum EfficiencyError {
    #[error("cannot compute weighting efficiency of an empty weight vector")]
    Empty,
    #[error("weight at row {row} is not finite")]
    NonFinite { row: usize },
    #[error("weight at row {row} is negative ({weight})")]
    Negative { row: usize, weight: f64 },
    #[error("all weights are zero")]
    ZeroSum,
}

/// Kish weighting efficiency of a weight vector, in percent.
pub fn weighting_efficiency(weights: &[f64]) -> Result<f64, EfficiencyError> {
    if weights.is_empty() {
        return Err(EfficiencyError::Empty);
    }
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for (row, &w) in weights.iter().enumerate() {
        if !w.is_finite() {
            return Err(EfficiencyError::NonFinite { row });
        }
        if w < 0.0 {
            return Err(EfficiencyError::Negative { row, weight: w });
        }
        sum += w;
        sum_sq += w * w;
    }
    if sum == 0.0 {
        return Err(EfficiencyError::ZeroSum);
    }
    Ok(sum * sum / (weights.len() as f64 * sum_sq) * 100.0)
}

/// Compact per-vector summary used in group reports.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct WeightSummary {
    /// Number of weights summarized.
    pub n: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Kish efficiency of this vector, in percent.
    pub efficiency: f64,
}

impl WeightSummary {
    /// Summarize a non-empty weight vector.
    pub fn from_weights(weights: &[f64]) -> Result<Self, EfficiencyError> {
        let efficiency = weighting_efficiency(weights)?;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for &w in weights {
            min = min.min(w);
            max = max.max(w);
            sum += w;
        }
        Ok(Self {
            n: weights.len(),
            min,
            max,
            mean: sum / weights.len() as f64,
            efficiency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_weights_are_fully_efficient() {
        assert_eq!(weighting_efficiency(&[1.0; 8]).unwrap(), 100.0);
        assert_eq!(weighting_efficiency(&[2.5; 3]).unwrap(), 100.0);
    }

    #[test]
    fn known_unequal_vector() {
        // w = (2/3, 2/3, 2/3, 2): (Σw)^2 = 16, Σw^2 = 3·4/9 + 4 = 16/3,
        // so efficiency = 16 / (4 · 16/3) · 100 = 75.
        let w = [2.0 / 3.0, 2.0 / 3.0, 2.0 / 3.0, 2.0];
        assert!((weighting_efficiency(&w).unwrap() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_inputs_rejected() {
        assert!(matches!(weighting_efficiency(&[]), Err(EfficiencyError::Empty)));
        assert!(matches!(
            weighting_efficiency(&[1.0, f64::NAN]),
            Err(EfficiencyError::NonFinite { row: 1 })
        ));
        assert!(matches!(
            weighting_efficiency(&[1.0, -0.5]),
            Err(EfficiencyError::Negative { row: 1, .. })
        ));
        assert!(matches!(
            weighting_efficiency(&[0.0, 0.0]),
            Err(EfficiencyError::ZeroSum)
        ));
    }

    #[test]
    fn summary_reports_bounds_and_mean() {
        let s = WeightSummary::from_weights(&[0.5, 1.0, 1.5]).unwrap();
        assert_eq!(s.n, 3);
        assert_eq!(s.min, 0.5);
        assert_eq!(s.max, 1.5);
        assert!((s.mean - 1.0).abs() < 1e-12);
        assert!(s.efficiency < 100.0);
    }
}
