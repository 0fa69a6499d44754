//! Error types for fabric evaluation and integration.

use thiserror::Error;

use crate::trajectory::Trajectory;

/// Errors that can occur while evaluating or integrating a fabric.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FabricError {
    /// A vector or matrix does not have the shape the engine expects.
    ///
    /// Shapes are reported as `(rows, cols)`; vectors use `cols == 1`.
    #[error("dimension mismatch in {context}: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        /// What was being checked (e.g. `"leaf 2 metric"`).
        context: String,
        /// Expected shape.
        expected: (usize, usize),
        /// Actual shape.
        actual: (usize, usize),
    },

    /// Invalid sample step.
    #[error("invalid sample step: {0} (must be positive and finite)")]
    InvalidTimestep(f64),

    /// Invalid integration horizon.
    #[error("invalid horizon: {0} (must be positive and finite)")]
    InvalidHorizon(f64),

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// The ODE solver could not produce a finite state at a sample time.
    #[error(
        "integration failed at t = {time_reached} after {samples} valid samples: {reason}"
    )]
    IntegrationFailure {
        /// Time of the last sample that was produced successfully.
        time_reached: f64,
        /// Number of valid samples in `partial`.
        samples: usize,
        /// Description of what went wrong.
        reason: String,
        /// Samples produced before the failure.
        partial: Box<Trajectory>,
    },
}

impl FabricError {
    /// Create a dimension mismatch error.
    #[must_use]
    pub fn dimension_mismatch(
        context: impl Into<String>,
        expected: (usize, usize),
        actual: (usize, usize),
    ) -> Self {
        Self::DimensionMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create an integration failure carrying the samples produced so far.
    #[must_use]
    pub fn integration_failure(reason: impl Into<String>, partial: Trajectory) -> Self {
        Self::IntegrationFailure {
            time_reached: partial.times().last().copied().unwrap_or(f64::NAN),
            samples: partial.len(),
            reason: reason.into(),
            partial: Box::new(partial),
        }
    }

    /// Check if this is a dimension mismatch.
    #[must_use]
    pub fn is_dimension_mismatch(&self) -> bool {
        matches!(self, Self::DimensionMismatch { .. })
    }

    /// Check if this is a configuration error (including invalid `dt`/`T`).
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. } | Self::InvalidTimestep(_) | Self::InvalidHorizon(_)
        )
    }

    /// Check if this is an integration failure.
    #[must_use]
    pub fn is_integration_failure(&self) -> bool {
        matches!(self, Self::IntegrationFailure { .. })
    }

    /// The trajectory produced before an integration failure, if any.
    #[must_use]
    pub fn partial_trajectory(&self) -> Option<&Trajectory> {
        match self {
            Self::IntegrationFailure { partial, .. } => Some(partial),
            _ => None,
        }
    }
}
