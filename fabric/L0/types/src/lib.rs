//! Core types for geometric-fabric motion generation.
//!
//! This crate provides the data shared by everything that builds, evaluates
//! or consumes a fabric:
//!
//! - [`PhaseState`] - Joint positions and velocities, and their augmented form
//! - [`Trajectory`] - Sampled augmented states produced by an integration run
//! - [`SolverStats`] / [`SolverWarning`] - Diagnostics surfaced by the solver
//! - [`SolverConfig`] / [`OdeMethod`] - Tolerances, step bounds, method choice
//! - [`FabricError`] - Every failure the engine can report
//!
//! # Design Philosophy
//!
//! These types are **pure data**. They carry no combination logic and no
//! integrator; `fabric-core` owns the behavior.
//!
//! # Layer 0
//!
//! No rendering, no physics engine, no kinematics. Usable from planners,
//! offline analysis and tests alike.
//!
//! # Example
//!
//! ```
//! use fabric_types::PhaseState;
//! use nalgebra::DVector;
//!
//! let state = PhaseState::new(
//!     DVector::from_vec(vec![0.0, 0.0]),
//!     DVector::from_vec(vec![1.0, 0.0]),
//! )
//! .unwrap();
//!
//! let z = state.to_augmented();
//! assert_eq!(z.len(), 4);
//! assert_eq!(z[2], 1.0);
//! ```

#![doc(html_root_url = "https://docs.rs/fabric-types/0.3.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,     // Many methods can't be const due to nalgebra
    clippy::module_name_repetitions,  // FabricError in fabric-types reads fine
    clippy::missing_errors_doc,       // Error docs added where non-obvious
)]

mod config;
mod error;
mod state;
mod trajectory;

pub use config::{DEFAULT_TOLERANCE, OdeMethod, SolverConfig};
pub use error::FabricError;
pub use state::PhaseState;
pub use trajectory::{SolverStats, SolverWarning, Trajectory};

pub use nalgebra::{DMatrix, DVector};

/// Result type for fabric operations.
pub type Result<T> = std::result::Result<T, FabricError>;
