//! Velocity-dependent damping of the combined fabric.
//!
//! A [`Damper`] maps the current state and the already-combined forcing to
//! two coefficients `(alpha, beta)`. The root engine turns them into the
//! damping term `d = (alpha − beta) · qdot`, so `alpha` energizes motion along
//! the current velocity and `beta` dissipates it.

use fabric_types::{FabricError, Result};
use nalgebra::DVector;

/// A damping coefficient, either shared by all joints or given per joint.
#[derive(Debug, Clone, PartialEq)]
pub enum Coefficient {
    /// The same value for every joint.
    Uniform(f64),
    /// One value per joint.
    PerJoint(DVector<f64>),
}

impl Coefficient {
    /// Value for joint `i`.
    ///
    /// Callers must check the length first (see [`Self::check_dimension`]).
    #[must_use]
    pub fn at(&self, i: usize) -> f64 {
        match self {
            Self::Uniform(v) => *v,
            Self::PerJoint(values) => values[i],
        }
    }

    /// Check that a per-joint coefficient has length `n`.
    pub fn check_dimension(&self, n: usize, context: &str) -> Result<()> {
        match self {
            Self::Uniform(_) => Ok(()),
            Self::PerJoint(values) if values.len() == n => Ok(()),
            Self::PerJoint(values) => Err(FabricError::dimension_mismatch(
                context,
                (n, 1),
                (values.len(), 1),
            )),
        }
    }
}

impl From<f64> for Coefficient {
    fn from(value: f64) -> Self {
        Self::Uniform(value)
    }
}

impl From<DVector<f64>> for Coefficient {
    fn from(values: DVector<f64>) -> Self {
        Self::PerJoint(values)
    }
}

/// Energizing (`alpha`) and dissipating (`beta`) coefficients.
#[derive(Debug, Clone, PartialEq)]
pub struct DampingCoefficients {
    /// Energization coefficient.
    pub alpha: Coefficient,
    /// Dissipation coefficient.
    pub beta: Coefficient,
}

impl DampingCoefficients {
    /// Create a pair of coefficients.
    pub fn new(alpha: impl Into<Coefficient>, beta: impl Into<Coefficient>) -> Self {
        Self {
            alpha: alpha.into(),
            beta: beta.into(),
        }
    }

    /// The damping term `(alpha − beta) · qdot`, elementwise.
    pub fn damping_term(&self, qdot: &DVector<f64>) -> Result<DVector<f64>> {
        let n = qdot.len();
        self.alpha.check_dimension(n, "damper alpha")?;
        self.beta.check_dimension(n, "damper beta")?;
        Ok(DVector::from_fn(n, |i, _| {
            (self.alpha.at(i) - self.beta.at(i)) * qdot[i]
        }))
    }
}

/// Produces damping coefficients from the state and the combined forcing.
pub trait Damper: Send + Sync {
    /// Coefficients at `(q, qdot)` given the combined forcing `h`.
    fn damp(&self, q: &DVector<f64>, qdot: &DVector<f64>, h: &DVector<f64>)
    -> DampingCoefficients;
}

/// Fixed coefficients, independent of the state.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantDamper {
    coefficients: DampingCoefficients,
}

impl ConstantDamper {
    /// Uniform `alpha` and `beta`.
    #[must_use]
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self {
            coefficients: DampingCoefficients::new(alpha, beta),
        }
    }

    /// Pure dissipation `d = −beta · qdot`.
    #[must_use]
    pub fn dissipative(beta: f64) -> Self {
        Self::new(0.0, beta)
    }

    /// Per-joint `alpha` and `beta`.
    #[must_use]
    pub fn per_joint(alpha: DVector<f64>, beta: DVector<f64>) -> Self {
        Self {
            coefficients: DampingCoefficients::new(alpha, beta),
        }
    }
}

impl Damper for ConstantDamper {
    fn damp(&self, _q: &DVector<f64>, _qdot: &DVector<f64>, _h: &DVector<f64>) -> DampingCoefficients {
        self.coefficients.clone()
    }
}

/// Damper backed by a closure.
pub struct FnDamper<F> {
    f: F,
}

impl<F> FnDamper<F>
where
    F: Fn(&DVector<f64>, &DVector<f64>, &DVector<f64>) -> DampingCoefficients + Send + Sync,
{
    /// Wrap a closure `(q, qdot, h) -> (alpha, beta)`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Damper for FnDamper<F>
where
    F: Fn(&DVector<f64>, &DVector<f64>, &DVector<f64>) -> DampingCoefficients + Send + Sync,
{
    fn damp(&self, q: &DVector<f64>, qdot: &DVector<f64>, h: &DVector<f64>) -> DampingCoefficients {
        (self.f)(q, qdot, h)
    }
}

/// Energy-regulating damper that brakes close to a goal.
///
/// ```text
/// beta  = beta_distant + beta_close · ½(tanh(−alpha_b (|q − goal| − radius_shift)) + 1)
/// eta   = ½(tanh(−alpha_eta (½|qdot|² − alpha_shift)) + 1)
/// alpha = eta · qdotᵀh / (|qdot|² + ε)
/// ```
///
/// With `eta = 1`, `alpha` cancels the power the combined forcing injects
/// along the velocity, so kinetic energy changes only through `beta`.
/// `eta` fades the energization out once the system moves fast.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchingDamper {
    goal: DVector<f64>,
    /// Sharpness of the distance switch for `beta`.
    pub alpha_b: f64,
    /// Sharpness of the energy switch for `alpha`.
    pub alpha_eta: f64,
    /// Kinetic energy at which energization is halved.
    pub alpha_shift: f64,
    /// Dissipation far from the goal.
    pub beta_distant: f64,
    /// Additional dissipation near the goal.
    pub beta_close: f64,
    /// Distance to the goal at which the extra dissipation is halved.
    pub radius_shift: f64,
    /// Regularization of the velocity norm.
    pub epsilon: f64,
}

impl SwitchingDamper {
    /// Damper for the configuration-space `goal` with default parameters.
    #[must_use]
    pub fn new(goal: DVector<f64>) -> Self {
        Self {
            goal,
            alpha_b: 0.5,
            alpha_eta: 0.5,
            alpha_shift: 0.5,
            beta_distant: 0.01,
            beta_close: 6.5,
            radius_shift: 0.1,
            epsilon: 1e-6,
        }
    }

    /// Set the `beta` parameters.
    #[must_use]
    pub fn beta(mut self, distant: f64, close: f64, alpha_b: f64, radius_shift: f64) -> Self {
        self.beta_distant = distant;
        self.beta_close = close;
        self.alpha_b = alpha_b;
        self.radius_shift = radius_shift;
        self
    }

    /// Set the energization switch parameters.
    #[must_use]
    pub fn energization(mut self, alpha_eta: f64, alpha_shift: f64) -> Self {
        self.alpha_eta = alpha_eta;
        self.alpha_shift = alpha_shift;
        self
    }

    /// The configuration-space goal.
    #[must_use]
    pub fn goal(&self) -> &DVector<f64> {
        &self.goal
    }

    fn switch(sharpness: f64, value: f64, shift: f64) -> f64 {
        0.5 * ((-sharpness * (value - shift)).tanh() + 1.0)
    }
}

impl Damper for SwitchingDamper {
    fn damp(&self, q: &DVector<f64>, qdot: &DVector<f64>, h: &DVector<f64>) -> DampingCoefficients {
        // A goal of the wrong size yields goal-sized coefficients, which the
        // engine rejects as a dimension mismatch.
        if self.goal.len() != q.len() {
            let beta = DVector::from_element(self.goal.len(), self.beta_distant);
            return DampingCoefficients::new(0.0, beta);
        }

        let distance = (q - &self.goal).norm();
        let beta = self.beta_close.mul_add(
            Self::switch(self.alpha_b, distance, self.radius_shift),
            self.beta_distant,
        );

        let speed_sq = qdot.norm_squared();
        let eta = Self::switch(self.alpha_eta, 0.5 * speed_sq, self.alpha_shift);
        let alpha = eta * qdot.dot(h) / (speed_sq + self.epsilon);

        DampingCoefficients::new(alpha, beta)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_damping_term_sign() {
        let qdot = DVector::from_vec(vec![2.0, -1.0]);
        let d = DampingCoefficients::new(0.0, 1.0).damping_term(&qdot).unwrap();
        assert_eq!(d, -qdot);
    }

    #[test]
    fn test_per_joint_coefficients() {
        let qdot = DVector::from_vec(vec![1.0, 1.0, 1.0]);
        let coeffs = DampingCoefficients::new(
            DVector::from_vec(vec![1.0, 0.0, 0.5]),
            DVector::from_vec(vec![0.0, 2.0, 0.5]),
        );
        let d = coeffs.damping_term(&qdot).unwrap();
        assert_eq!(d.as_slice(), &[1.0, -2.0, 0.0]);

        let mixed = DampingCoefficients::new(0.5, DVector::from_vec(vec![1.0, 2.0, 3.0]));
        let d = mixed.damping_term(&qdot).unwrap();
        assert_eq!(d.as_slice(), &[-0.5, -1.5, -2.5]);
    }

    #[test]
    fn test_per_joint_length_mismatch() {
        let qdot = DVector::zeros(3);
        let coeffs = DampingCoefficients::new(0.0, DVector::from_vec(vec![1.0, 2.0]));
        let err = coeffs.damping_term(&qdot).unwrap_err();
        assert!(err.is_dimension_mismatch());
        assert!(err.to_string().contains("beta"));
    }

    #[test]
    fn test_constant_damper() {
        let damper = ConstantDamper::dissipative(3.0);
        let zero = DVector::zeros(2);
        let coeffs = damper.damp(&zero, &zero, &zero);
        assert_eq!(coeffs.alpha, Coefficient::Uniform(0.0));
        assert_eq!(coeffs.beta, Coefficient::Uniform(3.0));
    }

    #[test]
    fn test_fn_damper() {
        let damper = FnDamper::new(|_q: &DVector<f64>, qdot: &DVector<f64>, _h: &DVector<f64>| {
            DampingCoefficients::new(0.0, qdot.norm())
        });
        let qdot = DVector::from_vec(vec![3.0, 4.0]);
        let coeffs = damper.damp(&DVector::zeros(2), &qdot, &DVector::zeros(2));
        assert_eq!(coeffs.beta, Coefficient::Uniform(5.0));
    }

    #[test]
    fn test_switching_damper_beta_grows_near_goal() {
        let damper = SwitchingDamper::new(DVector::zeros(2)).beta(0.01, 6.5, 10.0, 0.1);
        let qdot = DVector::from_vec(vec![0.1, 0.0]);
        let h = DVector::zeros(2);

        let near = damper.damp(&DVector::zeros(2), &qdot, &h);
        let far = damper.damp(&DVector::from_vec(vec![5.0, 0.0]), &qdot, &h);

        let beta_near = near.beta.at(0);
        let beta_far = far.beta.at(0);
        assert!(beta_near > 5.0);
        assert_relative_eq!(beta_far, 0.01, epsilon = 1e-6);
    }

    #[test]
    fn test_switching_damper_conserves_power_when_slow() {
        // Slow motion keeps eta close to one, so alpha cancels the forcing's
        // power along qdot: qdot · (−h + alpha·qdot) ≈ 0.
        let damper = SwitchingDamper::new(DVector::zeros(2)).energization(50.0, 1.0);
        let qdot = DVector::from_vec(vec![0.3, -0.2]);
        let h = DVector::from_vec(vec![1.0, 2.0]);
        let coeffs = damper.damp(&DVector::from_vec(vec![1.0, 1.0]), &qdot, &h);

        let alpha = coeffs.alpha.at(0);
        let power = qdot.dot(&(-&h + &qdot * alpha));
        assert_relative_eq!(power, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_switching_damper_wrong_goal_size_is_rejected() {
        let damper = SwitchingDamper::new(DVector::zeros(3));
        let qdot = DVector::from_vec(vec![1.0, 0.0]);
        let coeffs = damper.damp(&DVector::zeros(2), &qdot, &DVector::zeros(2));

        let err = coeffs.damping_term(&qdot).unwrap_err();
        assert!(err.is_dimension_mismatch());
    }
}
