//! Integrated trajectories and solver diagnostics.

use nalgebra::{DVector, DVectorView};

use crate::config::OdeMethod;
use crate::state::PhaseState;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Augmented phase states sampled on a fixed reporting grid.
///
/// Each state is `[q; qdot]`. A trajectory is produced once per
/// integration run and is not modified afterwards.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Trajectory {
    times: Vec<f64>,
    states: Vec<DVector<f64>>,
    stats: SolverStats,
}

impl Trajectory {
    /// Assemble a trajectory from sample times and matching augmented states.
    ///
    /// # Panics
    ///
    /// Panics if `times` and `states` differ in length.
    #[must_use]
    pub fn new(times: Vec<f64>, states: Vec<DVector<f64>>, stats: SolverStats) -> Self {
        assert_eq!(
            times.len(),
            states.len(),
            "trajectory needs one state per sample time"
        );
        Self {
            times,
            states,
            stats,
        }
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether the trajectory has no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Sample times.
    #[must_use]
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Augmented states, one per sample time.
    #[must_use]
    pub fn states(&self) -> &[DVector<f64>] {
        &self.states
    }

    /// Augmented state at sample `i`.
    #[must_use]
    pub fn state(&self, i: usize) -> Option<&DVector<f64>> {
        self.states.get(i)
    }

    /// Configuration-space dimension `n` (half the augmented length).
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.states.first().map_or(0, |z| z.len() / 2)
    }

    /// Joint positions at sample `i`.
    #[must_use]
    pub fn position(&self, i: usize) -> Option<DVectorView<'_, f64>> {
        let n = self.dimension();
        self.states.get(i).map(|z| z.rows(0, n))
    }

    /// Joint velocities at sample `i`.
    #[must_use]
    pub fn velocity(&self, i: usize) -> Option<DVectorView<'_, f64>> {
        let n = self.dimension();
        self.states.get(i).map(|z| z.rows(n, n))
    }

    /// Phase state at sample `i`.
    #[must_use]
    pub fn phase_state(&self, i: usize) -> Option<PhaseState> {
        self.states
            .get(i)
            .and_then(|z| PhaseState::from_augmented(z).ok())
    }

    /// Last sample, if any.
    #[must_use]
    pub fn final_state(&self) -> Option<&DVector<f64>> {
        self.states.last()
    }

    /// Iterate over `(time, state)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (f64, &DVector<f64>)> {
        self.times.iter().copied().zip(self.states.iter())
    }

    /// Solver diagnostics for the run that produced this trajectory.
    #[must_use]
    pub fn stats(&self) -> &SolverStats {
        &self.stats
    }
}

/// Counters and warnings collected during one integration run.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolverStats {
    /// Accepted internal steps.
    pub accepted_steps: usize,
    /// Rejected internal steps.
    pub rejected_steps: usize,
    /// Right-hand side evaluations (including Jacobian columns).
    pub derivative_evaluations: usize,
    /// Finite-difference Jacobian evaluations.
    pub jacobian_evaluations: usize,
    /// LU decompositions of the iteration matrix.
    pub lu_decompositions: usize,
    /// Number of method switches in `Auto` mode.
    pub method_switches: usize,
    /// Method in use when the run ended.
    pub final_method: Option<OdeMethod>,
    /// Warnings raised during the run. Reported, never acted on.
    pub warnings: Vec<SolverWarning>,
}

impl SolverStats {
    /// Total internal steps attempted.
    #[must_use]
    pub fn total_steps(&self) -> usize {
        self.accepted_steps + self.rejected_steps
    }

    /// Whether stiffness was detected at any point.
    #[must_use]
    pub fn stiffness_detected(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, SolverWarning::StiffnessDetected { .. }))
    }
}

/// Non-fatal conditions reported by the solver.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SolverWarning {
    /// The explicit method saw repeated steps limited by stability, not accuracy.
    StiffnessDetected {
        /// Time at which stiffness was detected.
        time: f64,
    },
    /// The solver changed method.
    MethodSwitched {
        /// Time of the switch.
        time: f64,
        /// Previous method.
        from: OdeMethod,
        /// New method.
        to: OdeMethod,
    },
    /// The proposed step was clamped to `min_step`.
    StepSizeClamped {
        /// Time of the clamped step.
        time: f64,
        /// Step size after clamping.
        step: f64,
    },
}

impl std::fmt::Display for SolverWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StiffnessDetected { time } => write!(f, "stiffness detected at t = {time}"),
            Self::MethodSwitched { time, from, to } => {
                write!(f, "switched from {from} to {to} at t = {time}")
            }
            Self::StepSizeClamped { time, step } => {
                write!(f, "step clamped to {step} at t = {time}")
            }
        }
    }
}
