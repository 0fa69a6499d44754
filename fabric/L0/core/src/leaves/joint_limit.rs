//! Per-joint position limits.

use fabric_types::{FabricError, Result};
use nalgebra::{DMatrix, DVector};

use crate::leaf::{LeafContribution, TimeInvariantLeaf};

/// Barrier against joint position limits.
///
/// Each joint is checked independently. A joint at distance `x` from the limit
/// it is moving toward, with approach speed `v > 0`, asks for the braking
/// acceleration `k v² / x²` with importance `λ / x`:
///
/// ```text
/// lower limit, qdot < 0:  h_i = −k v² / x²,  M_ii = λ / x,  x = q_i − lower_i
/// upper limit, qdot > 0:  h_i = +k v² / x²,  M_ii = λ / x,  x = upper_i − q_i
/// otherwise:              h_i = 0,           M_ii = 0
/// ```
///
/// Joints moving away from both limits leave their direction unconstrained,
/// so the metric is rank deficient in general. Distances are floored at
/// `min_distance`, which bounds the barrier once a limit is reached.
#[derive(Debug, Clone, PartialEq)]
pub struct JointLimitLeaf {
    lower: DVector<f64>,
    upper: DVector<f64>,
    /// Barrier gain `k`.
    pub gain: f64,
    /// Metric scale `λ`.
    pub lambda: f64,
    /// Smallest distance used in the barrier terms.
    pub min_distance: f64,
}

impl JointLimitLeaf {
    /// Limits `lower ≤ q ≤ upper` with unit gain and metric scale.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if the bounds differ in length; a configuration
    /// error if any `lower_i >= upper_i` or a bound is not finite.
    pub fn new(lower: DVector<f64>, upper: DVector<f64>) -> Result<Self> {
        if lower.len() != upper.len() {
            return Err(FabricError::dimension_mismatch(
                "joint limits",
                (lower.len(), 1),
                (upper.len(), 1),
            ));
        }
        if lower.iter().chain(upper.iter()).any(|v| !v.is_finite()) {
            return Err(FabricError::invalid_config("joint limits must be finite"));
        }
        if let Some(i) = (0..lower.len()).find(|&i| lower[i] >= upper[i]) {
            return Err(FabricError::invalid_config(format!(
                "joint {i}: lower limit {} is not below upper limit {}",
                lower[i], upper[i]
            )));
        }
        Ok(Self {
            lower,
            upper,
            gain: 1.0,
            lambda: 1.0,
            min_distance: 1e-3,
        })
    }

    /// Set the barrier gain and metric scale.
    #[must_use]
    pub fn barrier(mut self, gain: f64, lambda: f64) -> Self {
        self.gain = gain;
        self.lambda = lambda;
        self
    }

    /// Set the distance floor.
    #[must_use]
    pub fn min_distance(mut self, min_distance: f64) -> Self {
        self.min_distance = min_distance;
        self
    }

    /// Lower bounds.
    #[must_use]
    pub fn lower(&self) -> &DVector<f64> {
        &self.lower
    }

    /// Upper bounds.
    #[must_use]
    pub fn upper(&self) -> &DVector<f64> {
        &self.upper
    }
}

impl TimeInvariantLeaf for JointLimitLeaf {
    fn pull(&self, q: &DVector<f64>, qdot: &DVector<f64>) -> LeafContribution {
        let n = self.lower.len();
        if q.len() != n || qdot.len() != n {
            return LeafContribution::zeros(n);
        }

        let mut metric = DMatrix::zeros(n, n);
        let mut forcing = DVector::zeros(n);
        for i in 0..n {
            let (distance, sign) = if qdot[i] < 0.0 {
                (q[i] - self.lower[i], -1.0)
            } else if qdot[i] > 0.0 {
                (self.upper[i] - q[i], 1.0)
            } else {
                continue;
            };
            let x = distance.max(self.min_distance);
            let v = qdot[i];

            metric[(i, i)] = self.lambda / x;
            forcing[i] = sign * self.gain * v * v / (x * x);
        }
        LeafContribution::new(metric, forcing)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn limits() -> JointLimitLeaf {
        JointLimitLeaf::new(
            DVector::from_vec(vec![-1.0, -1.0]),
            DVector::from_vec(vec![1.0, 1.0]),
        )
        .unwrap()
        .barrier(2.0, 0.5)
    }

    #[test]
    fn test_rejects_bad_bounds() {
        assert!(
            JointLimitLeaf::new(DVector::zeros(2), DVector::zeros(3))
                .unwrap_err()
                .is_dimension_mismatch()
        );
        assert!(
            JointLimitLeaf::new(DVector::from_element(1, 1.0), DVector::from_element(1, 0.0))
                .unwrap_err()
                .is_config_error()
        );
    }

    #[test]
    fn test_approaching_upper_limit_brakes() {
        let leaf = limits();
        let q = DVector::from_vec(vec![0.5, 0.0]);
        let qdot = DVector::from_vec(vec![1.0, 0.0]);
        let c = leaf.pull(&q, &qdot);

        // x = 0.5: h = 2 · 1 / 0.25, applied as −h.
        assert_relative_eq!(c.forcing[0], 8.0, epsilon = 1e-12);
        assert_relative_eq!(c.metric[(0, 0)], 1.0, epsilon = 1e-12);
        // Joint 1 is at rest and unconstrained.
        assert_eq!(c.metric[(1, 1)], 0.0);
        assert_eq!(c.forcing[1], 0.0);
    }

    #[test]
    fn test_approaching_lower_limit_pushes_up() {
        let leaf = limits();
        let c = leaf.pull(
            &DVector::from_vec(vec![0.0, -0.5]),
            &DVector::from_vec(vec![0.0, -1.0]),
        );
        assert!(c.forcing[1] < 0.0);
        assert!(c.metric[(1, 1)] > 0.0);
    }

    #[test]
    fn test_distance_is_floored() {
        let leaf = limits().min_distance(0.1);
        let c = leaf.pull(
            &DVector::from_vec(vec![1.5, 0.0]),
            &DVector::from_vec(vec![1.0, 0.0]),
        );
        assert!(c.forcing[0].is_finite());
        assert_relative_eq!(c.metric[(0, 0)], 5.0, epsilon = 1e-12);
    }
}
