//! Root geometry engine for geometric fabrics.
//!
//! A geometric fabric produces a robot's joint acceleration by blending many
//! independently specified task geometries ("leaves") into one second-order
//! system. This crate is the core of that pipeline: it combines leaves that
//! were already pulled back into configuration space, optionally damps the
//! result, and integrates the augmented first-order system into a trajectory.
//! It builds on [`fabric_types`] for errors, configuration and results.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       RootGeometry                           │
//! │  Owns: leaves, dimension n, optional damper, solver config   │
//! │  evaluate(q, qdot, t) → zdot     compute_path(z0, dt, T)     │
//! └─────────────┬──────────────────────────────┬────────────────┘
//!               │                              │
//!               ▼                              ▼
//! ┌──────────────────────────────┐ ┌────────────────────────────┐
//! │ Leaf pull → combine → damp   │ │         integrate          │
//! │ M = Σ M_i, h = M⁺ Σ M_i h_i  │ │ Dormand–Prince 5(4)        │
//! │ d = (alpha − beta) · qdot    │ │ Rosenbrock 2(3), Auto      │
//! └──────────────────────────────┘ └────────────────────────────┘
//! ```
//!
//! # Layer 0 Crate
//!
//! No rendering, kinematics or scene dependencies. Leaves and dampers are
//! plain traits, so the engine runs equally in planners, controllers and
//! offline analysis.
//!
//! # Quick Start
//!
//! ```
//! use fabric_core::{AttractorLeaf, Leaf, RootGeometry, SwitchingDamper};
//! use nalgebra::DVector;
//!
//! let goal = DVector::from_vec(vec![1.0, -0.5]);
//! let root = RootGeometry::new(
//!     vec![Leaf::time_invariant(AttractorLeaf::new(goal.clone()).gain(2.0))],
//!     2,
//!     Some(Box::new(SwitchingDamper::new(goal))),
//! )
//! .unwrap();
//!
//! // z0 = [q0; qdot0]
//! let path = root.compute_path(&DVector::zeros(4), 0.05, 2.0).unwrap();
//! assert_eq!(path.len(), 40);
//! println!("final position: {}", path.position(path.len() - 1).unwrap());
//! ```
//!
//! # Combination
//!
//! Metrics carry both the directions a leaf cares about and how strongly.
//! Summing them and applying the Moore–Penrose pseudo-inverse gives the
//! metric-weighted least-squares blend of the leaf forcings, which stays
//! well defined when individual metrics (or their sum) are singular:
//!
//! | Situation | Combined forcing |
//! |-----------|------------------|
//! | One active leaf | that leaf's forcing |
//! | `Σ M_i = I` | `Σ M_i h_i` |
//! | All metrics zero | zero |
//! | Rank-deficient sum | minimum-norm solution in the metric's range |
//!
//! # Integration Methods
//!
//! | Method | Order | Stiff | Cost | Best For |
//! |--------|-------|-------|------|----------|
//! | Dormand–Prince | 5(4) | No | Low | Smooth fabrics |
//! | Rosenbrock | 2(3) | Yes | Jacobian + LU | Stiff barriers |
//! | Auto (default) | switches | Yes | Adaptive | General purpose |

#![doc(html_root_url = "https://docs.rs/fabric-core/0.3.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,     // Many methods can't be const due to nalgebra
    clippy::suboptimal_flops,          // mul_add style changes aren't always clearer
    clippy::cast_precision_loss,       // usize step counts as f64
    clippy::module_name_repetitions,
)]

pub mod combine;
pub mod damper;
pub mod integrate;
pub mod leaf;
pub mod leaves;
mod root;

pub use combine::{CombinedDynamics, MetricAccumulator, combine, pseudo_inverse_solve};
pub use damper::{
    Coefficient, ConstantDamper, Damper, DampingCoefficients, FnDamper, SwitchingDamper,
};
pub use integrate::{OdeSystem, StepController, StiffnessDetector, solve};
pub use leaf::{FnLeaf, FnTimeLeaf, Leaf, LeafContribution, TimeInvariantLeaf, TimeVariantLeaf};
pub use leaves::{AttractorLeaf, ConstantLeaf, JointLimitLeaf, TrackingLeaf};
pub use root::RootGeometry;

// Re-export key types from fabric-types for convenience
pub use fabric_types::{
    DEFAULT_TOLERANCE, FabricError, OdeMethod, PhaseState, Result, SolverConfig, SolverStats,
    SolverWarning, Trajectory,
};

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::similar_names,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_lossless
)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{DMatrix, DVector};

    #[test]
    fn test_attractor_reaches_goal() {
        let goal = DVector::from_vec(vec![0.5, -0.25]);
        let root = RootGeometry::new(
            vec![Leaf::time_invariant(AttractorLeaf::new(goal.clone()).gain(4.0))],
            2,
            Some(Box::new(ConstantDamper::dissipative(4.0))),
        )
        .unwrap();

        let path = root.compute_path(&DVector::zeros(4), 0.1, 10.0).unwrap();
        let last = path.len() - 1;
        let q = path.position(last).unwrap();
        let qdot = path.velocity(last).unwrap();

        assert_relative_eq!(q[0], goal[0], epsilon = 1e-3);
        assert_relative_eq!(q[1], goal[1], epsilon = 1e-3);
        assert!(qdot.norm() < 1e-3);
    }

    #[test]
    fn test_joint_limit_keeps_joint_inside() {
        // Constant push toward +q against an upper limit at 1.0.
        let push = ConstantLeaf::new(DMatrix::identity(1, 1) * 0.1, DVector::from_element(1, -1.0));
        let limit = JointLimitLeaf::new(DVector::from_element(1, -1.0), DVector::from_element(1, 1.0))
            .unwrap()
            .barrier(1.0, 1.0);
        let root = RootGeometry::new(
            vec![Leaf::time_invariant(push), Leaf::time_invariant(limit)],
            1,
            Some(Box::new(ConstantDamper::dissipative(0.5))),
        )
        .unwrap();

        let path = root.compute_path(&DVector::zeros(2), 0.1, 5.0).unwrap();
        assert!(path.states().iter().all(|z| z[0] < 1.0));
        assert!(path.final_state().unwrap()[0] > 0.0);
    }

    #[test]
    fn test_tracking_follows_target() {
        let target = |t: f64| DVector::from_element(1, t);
        let root = RootGeometry::new(
            vec![Leaf::time_variant(TrackingLeaf::new(1, target).stiffness(25.0))],
            1,
            Some(Box::new(ConstantDamper::dissipative(10.0))),
        )
        .unwrap();

        // Start on the target, moving with it.
        let path = root
            .compute_path(&DVector::from_vec(vec![0.0, 1.0]), 0.1, 2.0)
            .unwrap();
        for (t, z) in path.iter() {
            // Steady-state lag of a critically damped spring is c / k · v.
            assert!((z[0] - t).abs() < 0.5);
        }
    }

    #[test]
    fn test_re_exports() {
        let config = SolverConfig::stiff();
        assert!(config.method.is_stiff_capable());
        assert_eq!(DEFAULT_TOLERANCE, SolverConfig::default().rtol);
        let state = PhaseState::zeros(3);
        assert_eq!(state.to_augmented().len(), 6);
    }
}
