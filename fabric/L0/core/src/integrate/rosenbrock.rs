//! Linearly implicit Rosenbrock 2(3) step for stiff fabrics.
//!
//! Modified Rosenbrock triple (L-stable second-order solution with a
//! third-order error estimate). Each step solves three linear systems with
//! the iteration matrix `W = I − h·d·J`, where `J` is a forward-difference
//! Jacobian of the right-hand side and `T = ∂f/∂t` its time derivative.
//!
//! ```text
//! k1 = W⁻¹ (f0 + h d T)
//! f1 = f(t + h/2, y + h/2 k1)
//! k2 = W⁻¹ (f1 − k1) + k1
//! y⁺ = y + h k2
//! f2 = f(t + h, y⁺)
//! k3 = W⁻¹ (f2 − e32 (k2 − f1) − 2 (k1 − f0) + h d T)
//! err = h/6 (k1 − 2 k2 + k3)
//! ```

use fabric_types::{Result, SolverStats};
use nalgebra::{DMatrix, DVector};

use super::{OdeSystem, Rhs, Trial, error_norm};

/// Order of the error estimate, for step control.
pub const ERROR_ORDER: usize = 2;

/// `d = 1 / (2 + √2)`.
const D: f64 = 1.0 / (2.0 + std::f64::consts::SQRT_2);
/// `e32 = 6 + √2`.
const E32: f64 = 6.0 + std::f64::consts::SQRT_2;

/// Jacobian and time derivative at one point, reused across rejected steps.
#[derive(Debug, Clone)]
struct Linearization {
    t: f64,
    jacobian: DMatrix<f64>,
    time_derivative: DVector<f64>,
}

/// Rosenbrock stepper. Holds the linearization of the current point.
#[derive(Debug, Clone, Default)]
pub(crate) struct RosenbrockStepper {
    linearization: Option<Linearization>,
}

impl RosenbrockStepper {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Drop the cached linearization after the solution moved.
    pub(crate) fn invalidate(&mut self) {
        self.linearization = None;
    }

    /// Attempt one step. `Ok(None)` means the iteration matrix was singular.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn attempt<S: OdeSystem + ?Sized>(
        &mut self,
        rhs: &mut Rhs<'_, S>,
        t: f64,
        y: &DVector<f64>,
        f0: &DVector<f64>,
        h: f64,
        rtol: f64,
        atol: f64,
        stats: &mut SolverStats,
    ) -> Result<Option<Trial>> {
        let lin = match self.linearization.take() {
            Some(lin) if lin.t == t => lin,
            _ => {
                stats.jacobian_evaluations += 1;
                linearize(rhs, t, y, f0)?
            }
        };

        let n = y.len();
        let w = DMatrix::identity(n, n) - &lin.jacobian * (h * D);
        let lu = w.lu();
        stats.lu_decompositions += 1;

        let hdt = &lin.time_derivative * (h * D);

        let Some(k1) = lu.solve(&(f0 + &hdt)) else {
            self.linearization = Some(lin);
            return Ok(None);
        };

        let f1 = rhs.eval(t + 0.5 * h, &(y + &k1 * (0.5 * h)))?;
        let Some(w_k2) = lu.solve(&(&f1 - &k1)) else {
            self.linearization = Some(lin);
            return Ok(None);
        };
        let k2 = w_k2 + &k1;

        let y_new = y + &k2 * h;
        let f2 = rhs.eval(t + h, &y_new)?;

        let k3_rhs = &f2 - (&k2 - &f1) * E32 - (&k1 - f0) * 2.0 + &hdt;
        let Some(k3) = lu.solve(&k3_rhs) else {
            self.linearization = Some(lin);
            return Ok(None);
        };

        let error_vec = (&k1 - &k2 * 2.0 + &k3) * (h / 6.0);
        let error = error_norm(&error_vec, y, &y_new, rtol, atol);

        self.linearization = Some(lin);
        Ok(Some(Trial {
            y_new,
            f_new: f2,
            error,
            stiffness: None,
        }))
    }
}

/// Forward-difference Jacobian `∂f/∂y` and time derivative `∂f/∂t` at `(t, y)`.
fn linearize<S: OdeSystem + ?Sized>(
    rhs: &mut Rhs<'_, S>,
    t: f64,
    y: &DVector<f64>,
    f0: &DVector<f64>,
) -> Result<Linearization> {
    let sqrt_eps = f64::EPSILON.sqrt();
    let n = y.len();

    let mut jacobian = DMatrix::zeros(n, n);
    let mut shifted = y.clone();
    for j in 0..n {
        let delta = sqrt_eps * y[j].abs().max(1.0);
        shifted[j] = y[j] + delta;
        // Use the representable increment to keep the quotient exact.
        let step = shifted[j] - y[j];
        let fj = rhs.eval(t, &shifted)?;
        jacobian.set_column(j, &((fj - f0) / step));
        shifted[j] = y[j];
    }

    let dt = sqrt_eps * t.abs().max(1.0);
    let t_shifted = t + dt;
    let ft = rhs.eval(t_shifted, y)?;
    let time_derivative = (ft - f0) / (t_shifted - t);

    Ok(Linearization {
        t,
        jacobian,
        time_derivative,
    })
}
