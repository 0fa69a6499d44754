//! Spring toward a moving target.

use nalgebra::{DMatrix, DVector};

use crate::leaf::{LeafContribution, TimeVariantLeaf};

type Target = Box<dyn Fn(f64) -> DVector<f64> + Send + Sync>;

/// Time-variant spring `h = k (q − g(t))` with metric `w · I`.
pub struct TrackingLeaf {
    target: Target,
    n: usize,
    /// Spring stiffness `k`.
    pub stiffness: f64,
    /// Metric weight `w`.
    pub weight: f64,
}

impl TrackingLeaf {
    /// Track `target(t)`, an `n`-vector for every `t`.
    pub fn new<F>(n: usize, target: F) -> Self
    where
        F: Fn(f64) -> DVector<f64> + Send + Sync + 'static,
    {
        Self {
            target: Box::new(target),
            n,
            stiffness: 1.0,
            weight: 1.0,
        }
    }

    /// Set the spring stiffness.
    #[must_use]
    pub fn stiffness(mut self, stiffness: f64) -> Self {
        self.stiffness = stiffness;
        self
    }

    /// Set the metric weight.
    #[must_use]
    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Target position at time `t`.
    #[must_use]
    pub fn target_at(&self, t: f64) -> DVector<f64> {
        (self.target)(t)
    }
}

impl TimeVariantLeaf for TrackingLeaf {
    fn pull(&self, q: &DVector<f64>, _qdot: &DVector<f64>, t: f64) -> LeafContribution {
        // Wrong sizes yield a contribution the engine's shape check rejects.
        if q.len() != self.n {
            return LeafContribution::zeros(self.n);
        }
        let goal = (self.target)(t);
        if goal.len() != self.n {
            return LeafContribution::zeros(goal.len());
        }
        LeafContribution::new(
            DMatrix::identity(self.n, self.n) * self.weight,
            (q - goal) * self.stiffness,
        )
    }
}

impl std::fmt::Debug for TrackingLeaf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingLeaf")
            .field("n", &self.n)
            .field("stiffness", &self.stiffness)
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}
