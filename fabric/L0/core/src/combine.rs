//! Metric-weighted combination of leaf contributions.
//!
//! Given leaf pairs `(M_i, h_i)` the combined fabric is
//!
//! ```text
//! M = Σ M_i
//! h = M⁺ · Σ M_i h_i
//! ```
//!
//! where `M⁺` is the Moore–Penrose pseudo-inverse. Each metric weights its
//! leaf's forcing by direction and strength, so `h` is the metric-weighted
//! least-squares blend of the leaf forcings. A leaf that only constrains a
//! subspace (rank-deficient `M_i`) contributes only along that subspace, and
//! directions no leaf constrains receive zero forcing.
//!
//! # Example
//!
//! ```
//! use fabric_core::combine::MetricAccumulator;
//! use fabric_core::leaf::LeafContribution;
//! use nalgebra::{DMatrix, DVector};
//!
//! let mut acc = MetricAccumulator::new(2);
//! acc.add(&LeafContribution::new(DMatrix::identity(2, 2), DVector::from_vec(vec![1.0, 0.0])), 0)
//!     .unwrap();
//! acc.add(&LeafContribution::zeros(2), 1).unwrap();
//!
//! let combined = acc.finish(1e-15);
//! assert_eq!(combined.forcing.as_slice(), &[1.0, 0.0]);
//! ```

use fabric_types::Result;
use nalgebra::{DMatrix, DVector};

use crate::leaf::LeafContribution;

/// Combined metric and forcing of all leaves at one state.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedDynamics {
    /// Summed metric `Σ M_i`.
    pub metric: DMatrix<f64>,
    /// Metric-weighted forcing `M⁺ Σ M_i h_i`.
    pub forcing: DVector<f64>,
}

/// Running sums `Σ M_i` and `Σ M_i h_i` for one evaluation.
///
/// Created fresh per evaluation; never shared between calls.
#[derive(Debug, Clone)]
pub struct MetricAccumulator {
    metric: DMatrix<f64>,
    weighted: DVector<f64>,
}

impl MetricAccumulator {
    /// Zero sums for an `n`-dimensional configuration space.
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self {
            metric: DMatrix::zeros(n, n),
            weighted: DVector::zeros(n),
        }
    }

    /// Add one leaf. `index` identifies the leaf in dimension errors.
    pub fn add(&mut self, contribution: &LeafContribution, index: usize) -> Result<()> {
        contribution.check_dimension(self.weighted.len(), index)?;
        self.metric += &contribution.metric;
        self.weighted
            .gemv(1.0, &contribution.metric, &contribution.forcing, 1.0);
        Ok(())
    }

    /// Resolve the combined forcing with singular-value cutoff `rcond · σ_max`.
    #[must_use]
    pub fn finish(self, rcond: f64) -> CombinedDynamics {
        let forcing = pseudo_inverse_solve(&self.metric, &self.weighted, rcond);
        CombinedDynamics {
            metric: self.metric,
            forcing,
        }
    }
}

/// Combine a sequence of contributions in order.
pub fn combine<'a>(
    contributions: impl IntoIterator<Item = &'a LeafContribution>,
    n: usize,
    rcond: f64,
) -> Result<CombinedDynamics> {
    let mut acc = MetricAccumulator::new(n);
    for (index, contribution) in contributions.into_iter().enumerate() {
        acc.add(contribution, index)?;
    }
    Ok(acc.finish(rcond))
}

/// Minimum-norm least-squares solution `M⁺ b`.
///
/// Singular values at or below `rcond · σ_max` are treated as zero. An
/// all-zero `metric` yields exactly the zero vector. Non-finite input,
/// including a non-finite or negative `rcond`, is not repaired: the result is
/// filled with `NaN` so the caller sees it.
#[must_use]
pub fn pseudo_inverse_solve(metric: &DMatrix<f64>, b: &DVector<f64>, rcond: f64) -> DVector<f64> {
    let n = b.len();
    if !rcond.is_finite() || rcond < 0.0 {
        return DVector::from_element(n, f64::NAN);
    }
    if metric.iter().all(|&m| m == 0.0) {
        return DVector::zeros(n);
    }
    if !metric.iter().chain(b.iter()).all(|v| v.is_finite()) {
        return DVector::from_element(n, f64::NAN);
    }

    let svd = metric.clone().svd(true, true);
    let cutoff = rcond * svd.singular_values.max();

    svd.solve(b, cutoff)
        .unwrap_or_else(|_| DVector::from_element(n, f64::NAN))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn contribution(metric: DMatrix<f64>, forcing: &[f64]) -> LeafContribution {
        LeafContribution::new(metric, DVector::from_column_slice(forcing))
    }

    #[test]
    fn test_single_active_leaf_passes_through() {
        let metric = DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.5, 1.0]);
        let leaves = [
            LeafContribution::zeros(2),
            contribution(metric, &[0.3, -1.2]),
            LeafContribution::zeros(2),
        ];

        let combined = combine(&leaves, 2, 1e-15).unwrap();
        assert_relative_eq!(combined.forcing[0], 0.3, epsilon = 1e-12);
        assert_relative_eq!(combined.forcing[1], -1.2, epsilon = 1e-12);
    }

    #[test]
    fn test_identity_total_metric_sums_forcings() {
        let mut m1 = DMatrix::zeros(2, 2);
        m1[(0, 0)] = 0.25;
        m1[(1, 1)] = 0.75;
        let m2 = DMatrix::identity(2, 2) - &m1;

        // Diagonal metrics summing to I: h = M1 h1 + M2 h2.
        let leaves = [contribution(m1, &[4.0, 0.0]), contribution(m2, &[0.0, 4.0])];
        let combined = combine(&leaves, 2, 1e-15).unwrap();

        assert_relative_eq!(combined.metric, DMatrix::identity(2, 2), epsilon = 1e-15);
        assert_relative_eq!(combined.forcing[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(combined.forcing[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_metrics_give_zero_forcing() {
        let leaves = [
            contribution(DMatrix::zeros(3, 3), &[5.0, 5.0, 5.0]),
            contribution(DMatrix::zeros(3, 3), &[-1.0, 2.0, f64::MAX]),
        ];
        let combined = combine(&leaves, 3, 1e-15).unwrap();
        assert_eq!(combined.forcing, DVector::zeros(3));
    }

    #[test]
    fn test_rank_deficient_metric_only_acts_in_its_range() {
        // Obstacle-like leaf constraining only the first axis.
        let mut metric = DMatrix::zeros(2, 2);
        metric[(0, 0)] = 3.0;
        let leaves = [contribution(metric, &[2.0, 7.0])];

        let combined = combine(&leaves, 2, 1e-15).unwrap();
        assert_relative_eq!(combined.forcing[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(combined.forcing[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rank_one_oblique_metric() {
        // M = 0.5 u uᵀ with u off the coordinate axes; h has a component
        // outside the range of M.
        let metric = DMatrix::from_row_slice(
            2,
            2,
            &[
                0.313_627_273_070_271_55,
                -0.241_767_595_267_937_23,
                -0.241_767_595_267_937_23,
                0.186_372_726_929_728_48,
            ],
        );
        let h = DVector::from_vec(vec![0.0, 6.571_166_338_941_047_5]);
        let leaves = [LeafContribution::new(metric.clone(), h.clone())];

        // The second singular value is rounding noise around 1e-17.
        let combined = combine(&leaves, 2, 1e-12).unwrap();

        // M h_total reproduces Σ M_i h_i ≈ [-1.5887, 1.2247].
        let b = &metric * &h;
        assert_relative_eq!(&metric * &combined.forcing, b, epsilon = 1e-10);
        assert_relative_eq!(b[0], -1.5887, epsilon = 1e-4);
        assert_relative_eq!(b[1], 1.2247, epsilon = 1e-4);

        // The leaf passes through along u: h_total = u uᵀ h = 2 M h.
        assert_relative_eq!(combined.forcing, &b * 2.0, epsilon = 1e-10);

        // A second copy of the same leaf changes nothing.
        let doubled = [leaves[0].clone(), leaves[0].clone()];
        let combined_twice = combine(&doubled, 2, 1e-12).unwrap();
        assert_relative_eq!(combined_twice.forcing, combined.forcing, epsilon = 1e-10);
    }

    #[test]
    fn test_invalid_rcond_is_not_coerced_to_zero() {
        let metric = DMatrix::identity(2, 2);
        let b = DVector::from_vec(vec![1.0, -2.0]);
        for rcond in [f64::NAN, f64::INFINITY, -1.0] {
            let h = pseudo_inverse_solve(&metric, &b, rcond);
            assert!(h.iter().all(|v| v.is_nan()), "rcond = {rcond}");
        }
    }

    #[test]
    fn test_dimension_mismatch_is_reported_with_index() {
        let leaves = [
            LeafContribution::zeros(2),
            LeafContribution::zeros(3),
        ];
        let err = combine(&leaves, 2, 1e-15).unwrap_err();
        assert!(err.is_dimension_mismatch());
        assert!(err.to_string().contains("leaf 1"));
    }

    #[test]
    fn test_non_finite_metric_propagates() {
        let mut metric = DMatrix::identity(2, 2);
        metric[(1, 1)] = f64::NAN;
        let h = pseudo_inverse_solve(&metric, &DVector::from_vec(vec![1.0, 1.0]), 1e-15);
        assert!(h.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_rcond_cuts_tiny_singular_values() {
        let metric = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 1e-12]));
        let b = DVector::from_vec(vec![1.0, 1e-12]);

        let kept = pseudo_inverse_solve(&metric, &b, 1e-15);
        assert_relative_eq!(kept[1], 1.0, epsilon = 1e-9);

        let cut = pseudo_inverse_solve(&metric, &b, 1e-6);
        assert_eq!(cut[1], 0.0);
    }
}
