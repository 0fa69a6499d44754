//! Smooth goal attraction.

use nalgebra::{DMatrix, DVector};

use crate::leaf::{LeafContribution, TimeInvariantLeaf};

/// Pulls the configuration toward a fixed goal.
///
/// With `x = q − goal` and `r = |x|` the leaf follows the gradient of the
/// soft-norm potential `ψ(r) = k (r + ln(1 + e^(−2ar)) / (2a))`:
///
/// ```text
/// h = ∇ψ = k · tanh(a r) / r · x      (→ k a x as r → 0)
/// M = w · I
/// ```
///
/// Far from the goal the pull has constant magnitude `k`; close to it the
/// leaf behaves like a spring with stiffness `k a`, so the combined
/// acceleration `−h` stays bounded and smooth through the goal.
#[derive(Debug, Clone, PartialEq)]
pub struct AttractorLeaf {
    goal: DVector<f64>,
    /// Pull magnitude far from the goal.
    pub gain: f64,
    /// Sharpness `a` of the transition to spring-like behavior.
    pub sharpness: f64,
    /// Metric weight `w`.
    pub weight: f64,
}

impl AttractorLeaf {
    /// Default transition sharpness.
    pub const DEFAULT_SHARPNESS: f64 = 10.0;

    /// Attractor toward `goal` with unit gain and weight.
    #[must_use]
    pub fn new(goal: DVector<f64>) -> Self {
        Self {
            goal,
            gain: 1.0,
            sharpness: Self::DEFAULT_SHARPNESS,
            weight: 1.0,
        }
    }

    /// Set the pull magnitude.
    #[must_use]
    pub fn gain(mut self, gain: f64) -> Self {
        self.gain = gain;
        self
    }

    /// Set the transition sharpness.
    #[must_use]
    pub fn sharpness(mut self, sharpness: f64) -> Self {
        self.sharpness = sharpness;
        self
    }

    /// Set the metric weight.
    #[must_use]
    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// The configuration-space goal.
    #[must_use]
    pub fn goal(&self) -> &DVector<f64> {
        &self.goal
    }

    /// Scale applied to `x`: `k · tanh(a r) / r`.
    fn scale(&self, r: f64) -> f64 {
        let ar = self.sharpness * r;
        if ar < 1e-8 {
            // tanh(ar) / r → a
            self.gain * self.sharpness
        } else {
            self.gain * ar.tanh() / r
        }
    }
}

impl TimeInvariantLeaf for AttractorLeaf {
    fn pull(&self, q: &DVector<f64>, _qdot: &DVector<f64>) -> LeafContribution {
        let n = self.goal.len();
        // A goal of the wrong size is reported by the engine's shape check.
        if q.len() != n {
            return LeafContribution::zeros(n);
        }

        let x = q - &self.goal;
        let forcing = &x * self.scale(x.norm());
        LeafContribution::new(DMatrix::identity(n, n) * self.weight, forcing)
    }
}
