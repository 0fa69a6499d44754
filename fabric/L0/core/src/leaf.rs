//! Leaf geometries consumed by the root engine.
//!
//! A leaf is one task objective (goal, obstacle, joint limit) that has
//! already been pulled back into configuration space. Each evaluation it
//! returns a [`LeafContribution`]: a metric `M` (n×n, symmetric positive
//! semi-definite, possibly rank deficient) and a forcing `h` (n).
//!
//! Two call shapes exist. [`TimeInvariantLeaf`] depends only on `(q, qdot)`;
//! [`TimeVariantLeaf`] additionally receives the current time. The
//! [`Leaf`] enum records which shape a leaf has when it is registered, so the
//! engine never inspects types while integrating.
//!
//! # Example
//!
//! ```
//! use fabric_core::leaf::{FnLeaf, Leaf, LeafContribution};
//! use nalgebra::{DMatrix, DVector};
//!
//! // Pull the first coordinate toward zero with unit importance.
//! let leaf = Leaf::time_invariant(FnLeaf::new(|q: &DVector<f64>, _qdot: &DVector<f64>| {
//!     let mut metric = DMatrix::zeros(2, 2);
//!     metric[(0, 0)] = 1.0;
//!     LeafContribution::new(metric, DVector::from_vec(vec![q[0], 0.0]))
//! }));
//!
//! assert!(!leaf.is_time_variant());
//! ```

use fabric_types::{FabricError, Result};
use nalgebra::{DMatrix, DVector};

/// Metric and forcing returned by one leaf for one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafContribution {
    /// Configuration-space metric `M` (n×n).
    pub metric: DMatrix<f64>,
    /// Configuration-space forcing `h` (n).
    pub forcing: DVector<f64>,
}

impl LeafContribution {
    /// Create a contribution from a metric and a forcing.
    #[must_use]
    pub fn new(metric: DMatrix<f64>, forcing: DVector<f64>) -> Self {
        Self { metric, forcing }
    }

    /// A leaf that does not constrain any direction.
    #[must_use]
    pub fn zeros(n: usize) -> Self {
        Self {
            metric: DMatrix::zeros(n, n),
            forcing: DVector::zeros(n),
        }
    }

    /// Whether every metric entry is exactly zero.
    #[must_use]
    pub fn has_zero_metric(&self) -> bool {
        self.metric.iter().all(|&m| m == 0.0)
    }

    /// Check both shapes against dimension `n`.
    ///
    /// `index` identifies the leaf in error messages.
    pub fn check_dimension(&self, n: usize, index: usize) -> Result<()> {
        let metric_shape = self.metric.shape();
        if metric_shape != (n, n) {
            return Err(FabricError::dimension_mismatch(
                format!("leaf {index} metric"),
                (n, n),
                metric_shape,
            ));
        }
        if self.forcing.len() != n {
            return Err(FabricError::dimension_mismatch(
                format!("leaf {index} forcing"),
                (n, 1),
                (self.forcing.len(), 1),
            ));
        }
        Ok(())
    }
}

/// A leaf whose geometry depends only on the current state.
pub trait TimeInvariantLeaf: Send + Sync {
    /// Pull the leaf into configuration space at `(q, qdot)`.
    fn pull(&self, q: &DVector<f64>, qdot: &DVector<f64>) -> LeafContribution;
}

/// A leaf whose geometry also depends on time (e.g. a moving goal).
pub trait TimeVariantLeaf: Send + Sync {
    /// Pull the leaf into configuration space at `(q, qdot)` and time `t`.
    fn pull(&self, q: &DVector<f64>, qdot: &DVector<f64>, t: f64) -> LeafContribution;
}

/// A registered leaf, tagged by call shape.
pub enum Leaf {
    /// Called as `pull(q, qdot)`.
    TimeInvariant(Box<dyn TimeInvariantLeaf>),
    /// Called as `pull(q, qdot, t)`.
    TimeVariant(Box<dyn TimeVariantLeaf>),
}

impl Leaf {
    /// Register a time-invariant leaf.
    pub fn time_invariant(leaf: impl TimeInvariantLeaf + 'static) -> Self {
        Self::TimeInvariant(Box::new(leaf))
    }

    /// Register a time-variant leaf.
    pub fn time_variant(leaf: impl TimeVariantLeaf + 'static) -> Self {
        Self::TimeVariant(Box::new(leaf))
    }

    /// Whether the leaf needs the current time.
    #[must_use]
    pub fn is_time_variant(&self) -> bool {
        matches!(self, Self::TimeVariant(_))
    }

    /// Dispatch to the right call shape.
    ///
    /// Time-variant leaves require `t`; calling one without a time is a
    /// configuration error.
    pub fn pull(
        &self,
        q: &DVector<f64>,
        qdot: &DVector<f64>,
        t: Option<f64>,
    ) -> Result<LeafContribution> {
        match self {
            Self::TimeInvariant(leaf) => Ok(leaf.pull(q, qdot)),
            Self::TimeVariant(leaf) => t.map(|t| leaf.pull(q, qdot, t)).ok_or_else(|| {
                FabricError::invalid_config("time-variant leaf evaluated without a time")
            }),
        }
    }
}

impl std::fmt::Debug for Leaf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimeInvariant(_) => f.write_str("Leaf::TimeInvariant"),
            Self::TimeVariant(_) => f.write_str("Leaf::TimeVariant"),
        }
    }
}

/// Time-invariant leaf backed by a closure.
pub struct FnLeaf<F> {
    f: F,
}

impl<F> FnLeaf<F>
where
    F: Fn(&DVector<f64>, &DVector<f64>) -> LeafContribution + Send + Sync,
{
    /// Wrap a closure `(q, qdot) -> (M, h)`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> TimeInvariantLeaf for FnLeaf<F>
where
    F: Fn(&DVector<f64>, &DVector<f64>) -> LeafContribution + Send + Sync,
{
    fn pull(&self, q: &DVector<f64>, qdot: &DVector<f64>) -> LeafContribution {
        (self.f)(q, qdot)
    }
}

/// Time-variant leaf backed by a closure.
pub struct FnTimeLeaf<F> {
    f: F,
}

impl<F> FnTimeLeaf<F>
where
    F: Fn(&DVector<f64>, &DVector<f64>, f64) -> LeafContribution + Send + Sync,
{
    /// Wrap a closure `(q, qdot, t) -> (M, h)`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> TimeVariantLeaf for FnTimeLeaf<F>
where
    F: Fn(&DVector<f64>, &DVector<f64>, f64) -> LeafContribution + Send + Sync,
{
    fn pull(&self, q: &DVector<f64>, qdot: &DVector<f64>, t: f64) -> LeafContribution {
        (self.f)(q, qdot, t)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_by_tag() {
        let invariant = Leaf::time_invariant(FnLeaf::new(|q: &DVector<f64>, _: &DVector<f64>| {
            LeafContribution::new(DMatrix::identity(1, 1), q.clone())
        }));
        let variant = Leaf::time_variant(FnTimeLeaf::new(
            |_: &DVector<f64>, _: &DVector<f64>, t: f64| {
                LeafContribution::new(DMatrix::identity(1, 1), DVector::from_element(1, t))
            },
        ));

        let q = DVector::from_element(1, 3.0);
        let qdot = DVector::zeros(1);

        assert!(!invariant.is_time_variant());
        assert!(variant.is_time_variant());

        // Time is ignored by invariant leaves and may be absent.
        assert_eq!(invariant.pull(&q, &qdot, None).unwrap().forcing[0], 3.0);
        assert_eq!(invariant.pull(&q, &qdot, Some(9.0)).unwrap().forcing[0], 3.0);

        assert_eq!(variant.pull(&q, &qdot, Some(0.7)).unwrap().forcing[0], 0.7);
        assert!(variant.pull(&q, &qdot, None).unwrap_err().is_config_error());
    }

    #[test]
    fn test_check_dimension() {
        assert!(LeafContribution::zeros(3).check_dimension(3, 0).is_ok());

        let err = LeafContribution::zeros(3).check_dimension(2, 4).unwrap_err();
        match err {
            FabricError::DimensionMismatch {
                context,
                expected,
                actual,
            } => {
                assert_eq!(context, "leaf 4 metric");
                assert_eq!(expected, (2, 2));
                assert_eq!(actual, (3, 3));
            }
            other => panic!("unexpected error: {other}"),
        }

        let bad_forcing = LeafContribution::new(DMatrix::zeros(2, 2), DVector::zeros(1));
        let err = bad_forcing.check_dimension(2, 0).unwrap_err();
        assert!(err.to_string().contains("forcing"));
    }

    #[test]
    fn test_zero_metric() {
        assert!(LeafContribution::zeros(2).has_zero_metric());
        let c = LeafContribution::new(DMatrix::identity(2, 2), DVector::zeros(2));
        assert!(!c.has_zero_metric());
    }
}
