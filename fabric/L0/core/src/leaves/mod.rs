//! Reference leaves expressed directly in configuration space.
//!
//! Real task geometries are built and pulled back elsewhere; these leaves
//! cover the common shapes (constant pull, goal attraction, joint limits,
//! moving targets) well enough to drive the engine in tests, benchmarks and
//! small demos.
//!
//! | Leaf | Call shape | Metric |
//! |------|------------|--------|
//! | [`ConstantLeaf`] | time-invariant | fixed |
//! | [`AttractorLeaf`] | time-invariant | `w · I` |
//! | [`JointLimitLeaf`] | time-invariant | diagonal, rank deficient |
//! | [`TrackingLeaf`] | time-variant | `w · I` |

mod attractor;
mod joint_limit;
mod tracking;

pub use attractor::AttractorLeaf;
pub use joint_limit::JointLimitLeaf;
pub use tracking::TrackingLeaf;

use nalgebra::{DMatrix, DVector};

use crate::leaf::{LeafContribution, TimeInvariantLeaf};

/// A leaf that returns the same metric and forcing everywhere.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantLeaf {
    contribution: LeafContribution,
}

impl ConstantLeaf {
    /// Leaf with fixed `metric` and `forcing`.
    #[must_use]
    pub fn new(metric: DMatrix<f64>, forcing: DVector<f64>) -> Self {
        Self {
            contribution: LeafContribution::new(metric, forcing),
        }
    }

    /// The fixed contribution.
    #[must_use]
    pub fn contribution(&self) -> &LeafContribution {
        &self.contribution
    }
}

impl TimeInvariantLeaf for ConstantLeaf {
    fn pull(&self, _q: &DVector<f64>, _qdot: &DVector<f64>) -> LeafContribution {
        self.contribution.clone()
    }
}
