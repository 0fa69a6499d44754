//! The root geometry: combination, damping and integration of leaves.
//!
//! [`RootGeometry`] owns a fixed, ordered set of [`Leaf`]s, the configuration
//! dimension `n` and an optional [`Damper`]. One evaluation runs
//!
//! ```text
//! (q, qdot, t) → pull every leaf → combine → damp → rhs = −h + d → zdot = [qdot; rhs]
//! ```
//!
//! and holds no state between calls: accumulators are built per call, so a
//! single engine can be evaluated from several threads at once.
//!
//! # Example
//!
//! ```
//! use fabric_core::{ConstantLeaf, Leaf, RootGeometry};
//! use nalgebra::{DMatrix, DVector};
//!
//! let leaf = ConstantLeaf::new(DMatrix::identity(2, 2), DVector::from_vec(vec![1.0, 0.0]));
//! let root = RootGeometry::new(vec![Leaf::time_invariant(leaf)], 2, None).unwrap();
//!
//! let path = root.compute_path(&DVector::zeros(4), 0.1, 0.3).unwrap();
//! assert_eq!(path.len(), 3);
//! ```

use fabric_types::{FabricError, Result, SolverConfig, Trajectory};
use nalgebra::DVector;
use tracing::debug;

use crate::combine::{CombinedDynamics, MetricAccumulator};
use crate::damper::Damper;
use crate::integrate::{self, OdeSystem};
use crate::leaf::Leaf;

/// Combines leaf geometries into one joint-space dynamics and integrates it.
pub struct RootGeometry {
    leaves: Vec<Leaf>,
    n: usize,
    damper: Option<Box<dyn Damper>>,
    solver: SolverConfig,
}

impl RootGeometry {
    /// Largest reporting grid [`Self::compute_path`] will allocate.
    pub const MAX_SAMPLES: usize = 10_000_000;

    /// Create an engine over `leaves` in an `n`-dimensional configuration
    /// space. `damper = None` means no damping.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty leaf set or `n == 0`.
    pub fn new(leaves: Vec<Leaf>, n: usize, damper: Option<Box<dyn Damper>>) -> Result<Self> {
        if leaves.is_empty() {
            return Err(FabricError::invalid_config("root geometry needs at least one leaf"));
        }
        if n == 0 {
            return Err(FabricError::invalid_config(
                "configuration dimension must be positive",
            ));
        }
        Ok(Self {
            leaves,
            n,
            damper,
            solver: SolverConfig::default(),
        })
    }

    /// Replace the solver configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `solver` fails
    /// [`SolverConfig::validate`], so a bad `pinv_rcond` is caught before
    /// the first `evaluate`.
    pub fn with_solver(mut self, solver: SolverConfig) -> Result<Self> {
        solver.validate()?;
        self.solver = solver;
        Ok(self)
    }

    /// Configuration dimension `n`.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.n
    }

    /// Number of registered leaves.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Whether any leaf needs the current time.
    #[must_use]
    pub fn has_time_variant_leaves(&self) -> bool {
        self.leaves.iter().any(Leaf::is_time_variant)
    }

    /// Solver configuration used by [`Self::compute_path`].
    #[must_use]
    pub fn solver(&self) -> &SolverConfig {
        &self.solver
    }

    /// Pull every leaf at `(q, qdot, t)` and combine them.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if `q`, `qdot` or any leaf output disagrees with
    /// `n`; a configuration error if a time-variant leaf is pulled with
    /// `t = None`.
    pub fn combine(
        &self,
        q: &DVector<f64>,
        qdot: &DVector<f64>,
        t: Option<f64>,
    ) -> Result<CombinedDynamics> {
        self.check_state(q, qdot)?;

        let mut acc = MetricAccumulator::new(self.n);
        for (index, leaf) in self.leaves.iter().enumerate() {
            let contribution = leaf.pull(q, qdot, t)?;
            acc.add(&contribution, index)?;
        }
        Ok(acc.finish(self.solver.pinv_rcond))
    }

    /// The damping term `d = (alpha − beta) · qdot` for the combined forcing
    /// `h`, or zero without a damper.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if a per-joint coefficient has the wrong length.
    pub fn damping_term(
        &self,
        q: &DVector<f64>,
        qdot: &DVector<f64>,
        h: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        match &self.damper {
            Some(damper) => damper.damp(q, qdot, h).damping_term(qdot),
            None => Ok(DVector::zeros(qdot.len())),
        }
    }

    /// Augmented derivative `zdot = [qdot; −h + d]` (length `2n`).
    ///
    /// # Errors
    ///
    /// See [`Self::combine`] and [`Self::damping_term`].
    pub fn evaluate(
        &self,
        q: &DVector<f64>,
        qdot: &DVector<f64>,
        t: Option<f64>,
    ) -> Result<DVector<f64>> {
        let combined = self.combine(q, qdot, t)?;
        let d = self.damping_term(q, qdot, &combined.forcing)?;
        let rhs = d - combined.forcing;

        let mut zdot = DVector::zeros(2 * self.n);
        zdot.rows_mut(0, self.n).copy_from(qdot);
        zdot.rows_mut(self.n, self.n).copy_from(&rhs);
        Ok(zdot)
    }

    /// [`Self::evaluate`] on an augmented state `z = [q; qdot]`.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if `z` does not have length `2n`, otherwise as
    /// [`Self::evaluate`].
    pub fn evaluate_state(&self, z: &DVector<f64>, t: Option<f64>) -> Result<DVector<f64>> {
        self.check_augmented(z)?;
        let q = z.rows(0, self.n).into_owned();
        let qdot = z.rows(self.n, self.n).into_owned();
        self.evaluate(&q, &qdot, t)
    }

    /// Integrate from `z0` and sample at `0, dt, 2dt, …` strictly below
    /// `horizon`.
    ///
    /// The sample count is `ceil(horizon / dt)`. The derivative is evaluated
    /// once at `(z0, 0)` before any step is taken, so misconfigured leaves
    /// surface as `DimensionMismatch` before integration starts.
    ///
    /// # Errors
    ///
    /// - `InvalidTimestep` / `InvalidHorizon` for non-positive or non-finite
    ///   `dt` / `horizon`.
    /// - A configuration error if the grid would exceed
    ///   [`Self::MAX_SAMPLES`] samples.
    /// - `DimensionMismatch` for a wrongly sized `z0` or leaf output.
    /// - `IntegrationFailure` with the samples computed so far if the solver
    ///   cannot produce finite values.
    pub fn compute_path(&self, z0: &DVector<f64>, dt: f64, horizon: f64) -> Result<Trajectory> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(FabricError::InvalidTimestep(dt));
        }
        if !(horizon.is_finite() && horizon > 0.0) {
            return Err(FabricError::InvalidHorizon(horizon));
        }
        let times = sample_times(dt, horizon)?;
        self.check_augmented(z0)?;

        self.evaluate_state(z0, Some(0.0))?;

        debug!(
            n = self.n,
            leaves = self.leaves.len(),
            samples = times.len(),
            dt,
            horizon,
            method = %self.solver.method,
            "computing path"
        );

        let trajectory = integrate::solve(self, z0, &times, &self.solver)?;

        let stats = trajectory.stats();
        debug!(
            samples = trajectory.len(),
            accepted = stats.accepted_steps,
            rejected = stats.rejected_steps,
            evaluations = stats.derivative_evaluations,
            warnings = stats.warnings.len(),
            "path computed"
        );
        Ok(trajectory)
    }

    fn check_state(&self, q: &DVector<f64>, qdot: &DVector<f64>) -> Result<()> {
        if q.len() != self.n {
            return Err(FabricError::dimension_mismatch(
                "joint positions",
                (self.n, 1),
                (q.len(), 1),
            ));
        }
        if qdot.len() != self.n {
            return Err(FabricError::dimension_mismatch(
                "joint velocities",
                (self.n, 1),
                (qdot.len(), 1),
            ));
        }
        Ok(())
    }

    fn check_augmented(&self, z: &DVector<f64>) -> Result<()> {
        if z.len() == 2 * self.n {
            Ok(())
        } else {
            Err(FabricError::dimension_mismatch(
                "augmented state",
                (2 * self.n, 1),
                (z.len(), 1),
            ))
        }
    }
}

impl OdeSystem for RootGeometry {
    fn dimension(&self) -> usize {
        2 * self.n
    }

    fn derivative(&self, t: f64, y: &DVector<f64>) -> Result<DVector<f64>> {
        self.evaluate_state(y, Some(t))
    }
}

impl std::fmt::Debug for RootGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootGeometry")
            .field("n", &self.n)
            .field("leaves", &self.leaves)
            .field("damped", &self.damper.is_some())
            .field("solver", &self.solver)
            .finish()
    }
}

/// Reporting grid `i · dt` for `i < ceil(horizon / dt)`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn sample_times(dt: f64, horizon: f64) -> Result<Vec<f64>> {
    let count = (horizon / dt).ceil();
    if !count.is_finite() || count > RootGeometry::MAX_SAMPLES as f64 {
        return Err(FabricError::invalid_config(format!(
            "dt = {dt:e} over horizon {horizon} needs {count:e} samples, more than {}",
            RootGeometry::MAX_SAMPLES
        )));
    }
    let count = (count as usize).max(1);
    Ok((0..count).map(|i| i as f64 * dt).collect())
}
