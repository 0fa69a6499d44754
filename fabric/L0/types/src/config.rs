//! Configuration types for fabric integration.
//!
//! [`SolverConfig`] controls how a trajectory is integrated: which ODE
//! method is used, the local error tolerances, step-size bounds and the
//! cutoff used by the pseudo-inverse during metric combination.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default relative and absolute tolerance (`sqrt(f64::EPSILON)`, rounded).
pub const DEFAULT_TOLERANCE: f64 = 1.49012e-8;

/// Configuration for the adaptive ODE solver.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolverConfig {
    /// Integration method.
    pub method: OdeMethod,
    /// Relative local error tolerance.
    pub rtol: f64,
    /// Absolute local error tolerance.
    pub atol: f64,
    /// Maximum number of internal steps (accepted or rejected) between two
    /// consecutive sample times.
    pub max_steps_per_sample: usize,
    /// First internal step size. Chosen automatically when `None`.
    pub initial_step: Option<f64>,
    /// Smallest internal step the solver may take before giving up.
    pub min_step: f64,
    /// Largest internal step (None for unbounded).
    pub max_step: Option<f64>,
    /// Number of consecutive stiff-looking steps before stiffness is reported.
    pub stiffness_threshold: usize,
    /// Relative singular-value cutoff for the metric pseudo-inverse.
    pub pinv_rcond: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            method: OdeMethod::Auto,
            rtol: DEFAULT_TOLERANCE,
            atol: DEFAULT_TOLERANCE,
            max_steps_per_sample: 500,
            initial_step: None,
            min_step: 0.0,
            max_step: None,
            stiffness_threshold: 15,
            pinv_rcond: 1e-15,
        }
    }
}

impl SolverConfig {
    /// Create a configuration using the given method and default tolerances.
    #[must_use]
    pub fn with_method(method: OdeMethod) -> Self {
        Self {
            method,
            ..Default::default()
        }
    }

    /// Tight tolerances for reference trajectories.
    #[must_use]
    pub fn high_accuracy() -> Self {
        Self {
            rtol: 1e-11,
            atol: 1e-12,
            max_steps_per_sample: 5000,
            ..Default::default()
        }
    }

    /// Loose tolerances for quick previews.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            method: OdeMethod::DormandPrince,
            rtol: 1e-4,
            atol: 1e-6,
            ..Default::default()
        }
    }

    /// Start directly with the linearly implicit method.
    #[must_use]
    pub fn stiff() -> Self {
        Self {
            method: OdeMethod::Rosenbrock,
            rtol: 1e-6,
            atol: 1e-8,
            ..Default::default()
        }
    }

    /// Set the integration method.
    #[must_use]
    pub fn method(mut self, method: OdeMethod) -> Self {
        self.method = method;
        self
    }

    /// Set the relative and absolute tolerances.
    #[must_use]
    pub fn tolerances(mut self, rtol: f64, atol: f64) -> Self {
        self.rtol = rtol;
        self.atol = atol;
        self
    }

    /// Set the internal step budget per sample interval.
    #[must_use]
    pub fn max_steps_per_sample(mut self, steps: usize) -> Self {
        self.max_steps_per_sample = steps;
        self
    }

    /// Set the first internal step size.
    #[must_use]
    pub fn initial_step(mut self, step: f64) -> Self {
        self.initial_step = Some(step);
        self
    }

    /// Set the internal step-size bounds.
    #[must_use]
    pub fn step_bounds(mut self, min_step: f64, max_step: Option<f64>) -> Self {
        self.min_step = min_step;
        self.max_step = max_step;
        self
    }

    /// Set the pseudo-inverse singular-value cutoff.
    #[must_use]
    pub fn pinv_rcond(mut self, rcond: f64) -> Self {
        self.pinv_rcond = rcond;
        self
    }

    /// Validate the solver configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.rtol.is_finite() || self.rtol < 0.0 {
            return Err(crate::FabricError::invalid_config(
                "rtol must be finite and non-negative",
            ));
        }

        if !self.atol.is_finite() || self.atol < 0.0 {
            return Err(crate::FabricError::invalid_config(
                "atol must be finite and non-negative",
            ));
        }

        if self.rtol == 0.0 && self.atol == 0.0 {
            return Err(crate::FabricError::invalid_config(
                "rtol and atol cannot both be zero",
            ));
        }

        if self.max_steps_per_sample == 0 {
            return Err(crate::FabricError::invalid_config(
                "max_steps_per_sample must be at least 1",
            ));
        }

        if let Some(h0) = self.initial_step {
            if !h0.is_finite() || h0 <= 0.0 {
                return Err(crate::FabricError::invalid_config(
                    "initial_step must be positive and finite",
                ));
            }
        }

        if !self.min_step.is_finite() || self.min_step < 0.0 {
            return Err(crate::FabricError::invalid_config(
                "min_step must be finite and non-negative",
            ));
        }

        if let Some(h_max) = self.max_step {
            if h_max.is_nan() || h_max <= 0.0 || h_max < self.min_step {
                return Err(crate::FabricError::invalid_config(
                    "max_step must be positive and at least min_step",
                ));
            }
        }

        if self.stiffness_threshold == 0 {
            return Err(crate::FabricError::invalid_config(
                "stiffness_threshold must be at least 1",
            ));
        }

        if !self.pinv_rcond.is_finite() || self.pinv_rcond < 0.0 {
            return Err(crate::FabricError::invalid_config(
                "pinv_rcond must be finite and non-negative",
            ));
        }

        Ok(())
    }
}

/// ODE integration method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OdeMethod {
    /// Explicit Dormand–Prince 5(4). Cheap per step, struggles on stiff fabrics.
    DormandPrince,
    /// Linearly implicit Rosenbrock 2(3). Needs a Jacobian, stable on stiff fabrics.
    Rosenbrock,
    /// Start with Dormand–Prince and switch to Rosenbrock once stiffness is detected.
    #[default]
    Auto,
}

impl OdeMethod {
    /// Order of the propagated solution.
    ///
    /// `Auto` reports the order of the method it starts with.
    #[must_use]
    pub const fn order(self) -> usize {
        match self {
            Self::DormandPrince | Self::Auto => 5,
            Self::Rosenbrock => 2,
        }
    }

    /// Whether the method is stable on stiff problems.
    #[must_use]
    pub const fn is_stiff_capable(self) -> bool {
        matches!(self, Self::Rosenbrock | Self::Auto)
    }
}

impl std::fmt::Display for OdeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DormandPrince => write!(f, "Dormand-Prince 5(4)"),
            Self::Rosenbrock => write!(f, "Rosenbrock 2(3)"),
            Self::Auto => write!(f, "Auto"),
        }
    }
}
