//! End-to-end tests for the root geometry engine.
//!
//! Run with: cargo test -p fabric-core --test root_geometry

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::cast_precision_loss
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use approx::assert_relative_eq;
use fabric_core::{
    AttractorLeaf, ConstantDamper, ConstantLeaf, FabricError, FnLeaf, Leaf, LeafContribution,
    OdeMethod, RootGeometry, SolverConfig, SolverWarning, SwitchingDamper,
};
use nalgebra::{DMatrix, DVector};

fn vector(values: &[f64]) -> DVector<f64> {
    DVector::from_column_slice(values)
}

fn zero_leaf(n: usize) -> Leaf {
    Leaf::time_invariant(ConstantLeaf::new(DMatrix::zeros(n, n), DVector::zeros(n)))
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn straight_line_motion_without_active_leaves() {
    let root = RootGeometry::new(vec![zero_leaf(2), zero_leaf(2), zero_leaf(2)], 2, None).unwrap();
    let path = root.compute_path(&vector(&[0.0, 0.0, 1.0, 0.0]), 0.1, 0.5).unwrap();

    assert_eq!(path.len(), 5);
    assert_eq!(path.dimension(), 2);
    for i in 0..path.len() {
        let q = path.position(i).unwrap();
        let qdot = path.velocity(i).unwrap();
        assert_relative_eq!(q[0], 0.1 * i as f64, epsilon = 1e-9);
        assert_relative_eq!(q[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(qdot[0], 1.0, epsilon = 1e-12);
    }
}

#[test]
fn constant_pull_follows_closed_form() {
    let leaf = ConstantLeaf::new(DMatrix::identity(2, 2), vector(&[1.0, 0.0]));
    let root = RootGeometry::new(vec![Leaf::time_invariant(leaf)], 2, None).unwrap();

    let path = root.compute_path(&DVector::zeros(4), 0.1, 0.3).unwrap();
    assert_eq!(path.times().len(), 3);
    for (i, (t, _)) in path.iter().enumerate() {
        let state = path.phase_state(i).unwrap();
        assert_relative_eq!(state.q[0], -0.5 * t * t, epsilon = 1e-8);
        assert_relative_eq!(state.q[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(state.qdot[0], -t, epsilon = 1e-8);
    }
}

#[test]
fn oversized_leaf_is_rejected_before_integration() {
    let pulls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&pulls);
    let leaf = FnLeaf::new(move |_q: &DVector<f64>, _qdot: &DVector<f64>| {
        counter.fetch_add(1, Ordering::SeqCst);
        LeafContribution::new(DMatrix::identity(3, 3), DVector::zeros(3))
    });
    let root = RootGeometry::new(vec![Leaf::time_invariant(leaf)], 2, None).unwrap();

    let err = root.compute_path(&DVector::zeros(4), 0.1, 1.0).unwrap_err();
    match err {
        FabricError::DimensionMismatch {
            expected, actual, ..
        } => {
            assert_eq!(expected, (2, 2));
            assert_eq!(actual, (3, 3));
        }
        other => panic!("expected a dimension mismatch, got {other}"),
    }
    // Only the check evaluation at t = 0 ran.
    assert_eq!(pulls.load(Ordering::SeqCst), 1);
}

#[test]
fn damped_attractor_settles_on_goal() {
    let goal = vector(&[0.8, -0.3, 0.1]);
    let root = RootGeometry::new(
        vec![
            Leaf::time_invariant(AttractorLeaf::new(goal.clone()).gain(3.0)),
            zero_leaf(3),
        ],
        3,
        Some(Box::new(SwitchingDamper::new(goal.clone()))),
    )
    .unwrap();

    let path = root.compute_path(&DVector::zeros(6), 0.1, 15.0).unwrap();
    let last = path.phase_state(path.len() - 1).unwrap();
    assert!((&last.q - &goal).norm() < 1e-2);
    assert!(last.qdot.norm() < 1e-2);
    assert!(path.states().iter().all(|z| z.iter().all(|v| v.is_finite())));
}

#[test]
fn identical_runs_produce_identical_trajectories() {
    let goal = vector(&[1.0, 1.0]);
    let build = || {
        RootGeometry::new(
            vec![Leaf::time_invariant(AttractorLeaf::new(goal.clone()))],
            2,
            Some(Box::new(ConstantDamper::new(0.1, 1.5))),
        )
        .unwrap()
        .with_solver(SolverConfig::fast())
        .unwrap()
    };
    let z0 = vector(&[0.0, 0.5, -0.2, 0.0]);

    let a = build().compute_path(&z0, 0.05, 2.0).unwrap();
    let b = build().compute_path(&z0, 0.05, 2.0).unwrap();
    assert_eq!(a, b);
}

// =============================================================================
// Solver behavior
// =============================================================================

/// Attractor with heavy dissipation: the velocity relaxes on a ~1/2000 time
/// scale while the position moves on a ~1 time scale.
fn stiff_fabric(method: OdeMethod) -> RootGeometry {
    RootGeometry::new(
        vec![Leaf::time_invariant(AttractorLeaf::new(vector(&[0.5])).gain(5.0))],
        1,
        Some(Box::new(ConstantDamper::dissipative(2000.0))),
    )
    .unwrap()
    .with_solver(SolverConfig::with_method(method).tolerances(1e-6, 1e-9))
    .unwrap()
}

#[test]
fn auto_switches_to_rosenbrock_on_stiff_fabric() {
    let z0 = DVector::zeros(2);
    let auto = stiff_fabric(OdeMethod::Auto)
        .compute_path(&z0, 0.1, 1.0)
        .unwrap();
    let explicit = stiff_fabric(OdeMethod::DormandPrince)
        .compute_path(&z0, 0.1, 1.0)
        .unwrap();

    let stats = auto.stats();
    assert!(stats.stiffness_detected());
    assert_eq!(stats.final_method, Some(OdeMethod::Rosenbrock));
    assert!(stats.warnings.iter().any(|w| matches!(w, SolverWarning::MethodSwitched { .. })));
    assert!(stats.jacobian_evaluations > 0);

    assert_eq!(explicit.stats().final_method, Some(OdeMethod::DormandPrince));
    assert_eq!(explicit.stats().method_switches, 0);

    for (a, b) in auto.states().iter().zip(explicit.states()) {
        assert!((a[0] - b[0]).abs() < 1e-4);
    }
}

#[test]
fn rosenbrock_matches_closed_form() {
    let leaf = ConstantLeaf::new(DMatrix::identity(1, 1), vector(&[2.0]));
    let root = RootGeometry::new(vec![Leaf::time_invariant(leaf)], 1, None)
        .unwrap()
        .with_solver(SolverConfig::stiff())
        .unwrap();

    let path = root.compute_path(&vector(&[1.0, 0.0]), 0.25, 1.0).unwrap();
    for (t, z) in path.iter() {
        assert_relative_eq!(z[0], 1.0 - t * t, epsilon = 1e-6);
    }
}

#[test]
fn non_finite_forcing_surfaces_partial_trajectory() {
    let leaf = FnLeaf::new(|q: &DVector<f64>, _qdot: &DVector<f64>| {
        let h = if q[0] > 0.45 { f64::INFINITY } else { 0.0 };
        LeafContribution::new(DMatrix::identity(1, 1), DVector::from_element(1, h))
    });
    let root = RootGeometry::new(vec![Leaf::time_invariant(leaf)], 1, None).unwrap();

    let err = root.compute_path(&vector(&[0.0, 1.0]), 0.1, 1.0).unwrap_err();
    let FabricError::IntegrationFailure {
        time_reached,
        samples,
        ref partial,
        ..
    } = err
    else {
        panic!("expected an integration failure, got {err}");
    };

    assert_eq!(samples, partial.len());
    assert!(samples >= 4);
    assert!(time_reached < 0.5);
    assert_eq!(partial.times().last().copied(), Some(time_reached));
    for (t, z) in partial.iter() {
        assert_relative_eq!(z[0], t, epsilon = 1e-9);
    }
}

#[test]
fn tight_step_budget_fails() {
    let root = RootGeometry::new(
        vec![Leaf::time_invariant(AttractorLeaf::new(vector(&[1.0])))],
        1,
        None,
    )
    .unwrap()
    .with_solver(
        SolverConfig::default()
            .step_bounds(0.0, Some(1e-4))
            .max_steps_per_sample(5),
    )
    .unwrap();

    let err = root.compute_path(&DVector::zeros(2), 0.1, 1.0).unwrap_err();
    assert!(err.is_integration_failure());
    assert_eq!(err.partial_trajectory().unwrap().len(), 1);
}

#[test]
fn invalid_solver_config_is_a_config_error() {
    let root = RootGeometry::new(vec![zero_leaf(1)], 1, None).unwrap();
    let err = root
        .with_solver(SolverConfig::default().tolerances(-1.0, 1e-8))
        .unwrap_err();
    assert!(err.is_config_error());

    // A NaN cutoff would silently zero every forcing.
    let root = RootGeometry::new(vec![zero_leaf(1)], 1, None).unwrap();
    let err = root
        .with_solver(SolverConfig::default().pinv_rcond(f64::NAN))
        .unwrap_err();
    assert!(err.is_config_error());
}
