//! Configuration-space phase state.

use nalgebra::DVector;

use crate::{FabricError, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Joint positions and velocities of an `n`-dimensional configuration space.
///
/// The augmented form used by integrators is `z = [q; qdot]` of length `2n`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PhaseState {
    /// Joint positions.
    pub q: DVector<f64>,
    /// Joint velocities.
    pub qdot: DVector<f64>,
}

impl PhaseState {
    /// Create a phase state, checking that `q` and `qdot` have equal length.
    pub fn new(q: DVector<f64>, qdot: DVector<f64>) -> Result<Self> {
        if q.len() != qdot.len() {
            return Err(FabricError::dimension_mismatch(
                "qdot",
                (q.len(), 1),
                (qdot.len(), 1),
            ));
        }
        Ok(Self { q, qdot })
    }

    /// A state at rest at the origin.
    #[must_use]
    pub fn zeros(n: usize) -> Self {
        Self {
            q: DVector::zeros(n),
            qdot: DVector::zeros(n),
        }
    }

    /// Split an augmented vector `[q; qdot]` into positions and velocities.
    pub fn from_augmented(z: &DVector<f64>) -> Result<Self> {
        if z.len() % 2 != 0 {
            return Err(FabricError::invalid_config(format!(
                "augmented state must have even length, got {}",
                z.len()
            )));
        }
        let n = z.len() / 2;
        Ok(Self {
            q: z.rows(0, n).into_owned(),
            qdot: z.rows(n, n).into_owned(),
        })
    }

    /// Concatenate into `[q; qdot]`.
    #[must_use]
    pub fn to_augmented(&self) -> DVector<f64> {
        let n = self.q.len();
        let mut z = DVector::zeros(2 * n);
        z.rows_mut(0, n).copy_from(&self.q);
        z.rows_mut(n, n).copy_from(&self.qdot);
        z
    }

    /// Configuration-space dimension `n`.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.q.len()
    }

    /// Whether every component is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.q.iter().chain(self.qdot.iter()).all(|v| v.is_finite())
    }
}
