//! Dormand–Prince 5(4) explicit Runge–Kutta step.
//!
//! Seven stages, first-same-as-last: the derivative at the new point is the
//! last stage and is reused as the first stage of the next step. The
//! embedded fourth-order solution provides the local error estimate, and the
//! last two stages give the stability product used for stiffness detection.

use fabric_types::Result;
use nalgebra::DVector;

use super::{OdeSystem, Rhs, Trial, error_norm};

const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 4.0 / 5.0;
const C5: f64 = 8.0 / 9.0;

const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;
const A71: f64 = 35.0 / 384.0;
const A73: f64 = 500.0 / 1113.0;
const A74: f64 = 125.0 / 192.0;
const A75: f64 = -2187.0 / 6784.0;
const A76: f64 = 11.0 / 84.0;

// Difference between the fifth- and fourth-order weights.
const E1: f64 = 71.0 / 57600.0;
const E3: f64 = -71.0 / 16695.0;
const E4: f64 = 71.0 / 1920.0;
const E5: f64 = -17253.0 / 339_200.0;
const E6: f64 = 22.0 / 525.0;
const E7: f64 = -1.0 / 40.0;

/// Order of the error estimate, for step control.
pub const ERROR_ORDER: usize = 4;

/// Linear combination `y + h Σ a_i k_i`.
fn stage(y: &DVector<f64>, h: f64, terms: &[(f64, &DVector<f64>)]) -> DVector<f64> {
    let mut out = y.clone();
    for &(a, k) in terms {
        if a != 0.0 {
            out.axpy(h * a, k, 1.0);
        }
    }
    out
}

/// Attempt one step of size `h` from `(t, y)` with `f0 = f(t, y)`.
pub(crate) fn attempt<S: OdeSystem + ?Sized>(
    rhs: &mut Rhs<'_, S>,
    t: f64,
    y: &DVector<f64>,
    f0: &DVector<f64>,
    h: f64,
    rtol: f64,
    atol: f64,
) -> Result<Trial> {
    let k1 = f0;
    let k2 = rhs.eval(t + C2 * h, &stage(y, h, &[(A21, k1)]))?;
    let k3 = rhs.eval(t + C3 * h, &stage(y, h, &[(A31, k1), (A32, &k2)]))?;
    let k4 = rhs.eval(
        t + C4 * h,
        &stage(y, h, &[(A41, k1), (A42, &k2), (A43, &k3)]),
    )?;
    let k5 = rhs.eval(
        t + C5 * h,
        &stage(y, h, &[(A51, k1), (A52, &k2), (A53, &k3), (A54, &k4)]),
    )?;
    let y_stiff = stage(
        y,
        h,
        &[(A61, k1), (A62, &k2), (A63, &k3), (A64, &k4), (A65, &k5)],
    );
    let k6 = rhs.eval(t + h, &y_stiff)?;
    let y_new = stage(
        y,
        h,
        &[(A71, k1), (A73, &k3), (A74, &k4), (A75, &k5), (A76, &k6)],
    );
    let k7 = rhs.eval(t + h, &y_new)?;

    let error_vec = stage(
        &DVector::zeros(y.len()),
        h,
        &[
            (E1, k1),
            (E3, &k3),
            (E4, &k4),
            (E5, &k5),
            (E6, &k6),
            (E7, &k7),
        ],
    );
    let error = error_norm(&error_vec, y, &y_new, rtol, atol);

    let stiff_den = (&y_new - &y_stiff).norm_squared();
    let stiffness = (stiff_den > 0.0).then(|| h * ((&k7 - &k6).norm_squared() / stiff_den).sqrt());

    Ok(Trial {
        y_new,
        f_new: k7,
        error,
        stiffness,
    })
}
