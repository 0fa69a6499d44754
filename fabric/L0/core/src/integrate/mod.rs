//! Adaptive integration of first-order systems onto a reporting grid.
//!
//! The solver advances `y' = f(t, y)` with an adaptive internal step and
//! records the state at each requested sample time. Internal steps are
//! shortened so every sample time is hit exactly; between samples the step
//! size is chosen by local error control alone.
//!
//! # Methods
//!
//! | Method | Kind | Error order | Evaluations per step |
//! |--------|------|-------------|----------------------|
//! | Dormand–Prince 5(4) | explicit | 4 | 6 (FSAL) |
//! | Rosenbrock 2(3) | linearly implicit | 2 | 2 + Jacobian (n + 1) |
//!
//! [`OdeMethod::Auto`] starts with Dormand–Prince and switches to
//! Rosenbrock the first time stiffness is detected.
//!
//! # Failures
//!
//! A derivative that returns an error aborts the run with that error. Step
//! size underflow, an exhausted step budget, a persistently singular
//! iteration matrix or persistently non-finite trial states produce
//! [`FabricError::IntegrationFailure`] carrying every sample computed so far.

mod controller;
mod dopri;
mod rosenbrock;

pub use controller::{StepController, StiffnessDetector};

use fabric_types::{
    FabricError, OdeMethod, Result, SolverConfig, SolverStats, SolverWarning, Trajectory,
};
use nalgebra::DVector;
use tracing::{debug, trace, warn};

use rosenbrock::RosenbrockStepper;

/// A first-order system `y' = f(t, y)`.
pub trait OdeSystem {
    /// Length of the state vector.
    fn dimension(&self) -> usize;

    /// Evaluate `f(t, y)`.
    fn derivative(&self, t: f64, y: &DVector<f64>) -> Result<DVector<f64>>;
}

/// Right-hand side wrapper that counts evaluations.
pub(crate) struct Rhs<'a, S: ?Sized> {
    system: &'a S,
    evaluations: usize,
}

impl<'a, S: OdeSystem + ?Sized> Rhs<'a, S> {
    pub(crate) fn new(system: &'a S) -> Self {
        Self {
            system,
            evaluations: 0,
        }
    }

    pub(crate) fn eval(&mut self, t: f64, y: &DVector<f64>) -> Result<DVector<f64>> {
        self.evaluations += 1;
        self.system.derivative(t, y)
    }

    pub(crate) fn evaluations(&self) -> usize {
        self.evaluations
    }
}

/// Outcome of one step attempt.
#[derive(Debug, Clone)]
pub(crate) struct Trial {
    pub(crate) y_new: DVector<f64>,
    pub(crate) f_new: DVector<f64>,
    /// Weighted RMS error; `<= 1` means within tolerance.
    pub(crate) error: f64,
    /// Estimate of `h·|λ|` for stiffness detection (explicit method only).
    pub(crate) stiffness: Option<f64>,
}

impl Trial {
    fn is_finite(&self) -> bool {
        self.error.is_finite()
            && self.y_new.iter().all(|v| v.is_finite())
            && self.f_new.iter().all(|v| v.is_finite())
    }
}

/// Weighted RMS norm of a local error estimate.
pub(crate) fn error_norm(
    error: &DVector<f64>,
    y: &DVector<f64>,
    y_new: &DVector<f64>,
    rtol: f64,
    atol: f64,
) -> f64 {
    if error.is_empty() {
        return 0.0;
    }
    let sum: f64 = error
        .iter()
        .zip(y.iter().zip(y_new.iter()))
        .map(|(e, (a, b))| {
            let scale = rtol.mul_add(a.abs().max(b.abs()), atol);
            (e / scale).powi(2)
        })
        .sum();
    (sum / error.len() as f64).sqrt()
}

/// Why the last attempt was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    Error,
    NonFinite,
    Singular,
}

impl Rejection {
    const fn describe(self) -> &'static str {
        match self {
            Self::Error => "local error could not be brought within tolerance",
            Self::NonFinite => "solver produced non-finite values",
            Self::Singular => "iteration matrix is singular",
        }
    }
}

/// Method currently stepping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Active {
    DormandPrince,
    Rosenbrock,
}

impl Active {
    const fn as_method(self) -> OdeMethod {
        match self {
            Self::DormandPrince => OdeMethod::DormandPrince,
            Self::Rosenbrock => OdeMethod::Rosenbrock,
        }
    }

    const fn error_order(self) -> usize {
        match self {
            Self::DormandPrince => dopri::ERROR_ORDER,
            Self::Rosenbrock => rosenbrock::ERROR_ORDER,
        }
    }
}

/// Check that sample times are finite and strictly increasing.
fn validate_times(times: &[f64]) -> Result<()> {
    if times.is_empty() {
        return Err(FabricError::invalid_config("no sample times requested"));
    }
    if times.iter().any(|t| !t.is_finite()) {
        return Err(FabricError::invalid_config("sample times must be finite"));
    }
    if times.windows(2).any(|w| w[1] <= w[0]) {
        return Err(FabricError::invalid_config(
            "sample times must be strictly increasing",
        ));
    }
    Ok(())
}

/// Automatic first step (Hairer, Nørsett & Wanner, II.4).
fn initial_step<S: OdeSystem + ?Sized>(
    rhs: &mut Rhs<'_, S>,
    t0: f64,
    y0: &DVector<f64>,
    f0: &DVector<f64>,
    order: usize,
    h_max: f64,
    config: &SolverConfig,
) -> Result<f64> {
    let zeros = DVector::zeros(y0.len());
    let d0 = error_norm(y0, y0, y0, config.rtol, config.atol);
    let d1 = error_norm(f0, y0, y0, config.rtol, config.atol);

    let mut h0 = if d0 < 1e-5 || d1 < 1e-5 {
        1e-6
    } else {
        0.01 * d0 / d1
    };
    h0 = h0.min(h_max);

    let y1 = y0 + f0 * h0;
    let f1 = rhs.eval(t0 + h0, &y1)?;
    if f1.iter().any(|v| !v.is_finite()) {
        return Ok(h0);
    }
    let d2 = error_norm(&(f1 - f0), &zeros, &zeros, config.rtol, config.atol) / h0;

    let d_max = d1.max(d2);
    let h1 = if d_max <= 1e-15 {
        (h0 * 1e-3).max(1e-6)
    } else {
        (0.01 / d_max).powf(1.0 / (order + 1) as f64)
    };

    Ok((100.0 * h0).min(h1).min(h_max))
}

/// Integrate `system` from `y0` at `times[0]` and sample at every entry of `times`.
///
/// The first sample is `y0` itself.
pub fn solve<S: OdeSystem + ?Sized>(
    system: &S,
    y0: &DVector<f64>,
    times: &[f64],
    config: &SolverConfig,
) -> Result<Trajectory> {
    config.validate()?;
    validate_times(times)?;
    if y0.len() != system.dimension() {
        return Err(FabricError::dimension_mismatch(
            "initial state",
            (system.dimension(), 1),
            (y0.len(), 1),
        ));
    }
    if y0.iter().any(|v| !v.is_finite()) {
        return Err(FabricError::invalid_config("initial state must be finite"));
    }

    Solver::new(system, config).run(y0, times)
}

/// State of one integration run.
struct Solver<'a, S: ?Sized> {
    rhs: Rhs<'a, S>,
    config: &'a SolverConfig,
    stats: SolverStats,
    active: Active,
    controller: StepController,
    stiffness: StiffnessDetector,
    rosenbrock: RosenbrockStepper,
    out_times: Vec<f64>,
    out_states: Vec<DVector<f64>>,
}

impl<'a, S: OdeSystem + ?Sized> Solver<'a, S> {
    fn new(system: &'a S, config: &'a SolverConfig) -> Self {
        let active = match config.method {
            OdeMethod::Rosenbrock => Active::Rosenbrock,
            OdeMethod::DormandPrince | OdeMethod::Auto => Active::DormandPrince,
        };
        Self {
            rhs: Rhs::new(system),
            config,
            stats: SolverStats::default(),
            active,
            controller: StepController::for_order(active.error_order()),
            stiffness: StiffnessDetector::new(config.stiffness_threshold),
            rosenbrock: RosenbrockStepper::new(),
            out_times: Vec::new(),
            out_states: Vec::new(),
        }
    }

    fn run(mut self, y0: &DVector<f64>, times: &[f64]) -> Result<Trajectory> {
        let h_max = self.config.max_step.unwrap_or(f64::INFINITY);
        let mut t = times[0];
        let mut y = y0.clone();

        self.out_times.push(t);
        self.out_states.push(y.clone());

        let mut f = self.rhs.eval(t, &y)?;
        if f.iter().any(|v| !v.is_finite()) {
            return Err(self.fail(t, "non-finite derivative at the initial state"));
        }

        let span = times[times.len() - 1] - t;
        let mut h = match self.config.initial_step {
            Some(h0) => h0,
            None => initial_step(
                &mut self.rhs,
                t,
                &y,
                &f,
                self.active.error_order(),
                h_max.min(span.max(f64::MIN_POSITIVE)),
                self.config,
            )?,
        };

        for &t_sample in &times[1..] {
            let mut steps = 0;
            while t < t_sample {
                if steps >= self.config.max_steps_per_sample {
                    let reason = format!(
                        "exceeded {} internal steps before t = {t_sample}",
                        self.config.max_steps_per_sample
                    );
                    return Err(self.fail(t, &reason));
                }
                steps += 1;

                let mut h_try = h.min(h_max);
                if h_try < self.config.min_step {
                    h_try = self.config.min_step;
                    self.stats.warnings.push(SolverWarning::StepSizeClamped {
                        time: t,
                        step: h_try,
                    });
                }

                let remaining = t_sample - t;
                let last = h_try * 1.01 >= remaining;
                if last {
                    h_try = remaining;
                }

                if h_try <= 16.0 * f64::EPSILON * t.abs().max(1.0) {
                    let reason = format!("step size {h_try:e} underflowed at t = {t}");
                    return Err(self.fail(t, &reason));
                }

                match self.attempt(t, &y, &f, h_try)? {
                    Some(trial) if trial.is_finite() && trial.error <= 1.0 => {
                        self.stats.accepted_steps += 1;
                        t = if last { t_sample } else { t + h_try };
                        trace!(t, h = h_try, error = trial.error, "accepted step");

                        let proposal = self.controller.accept(h_try, trial.error);
                        h = if last { proposal.max(h) } else { proposal };

                        let stiffness = trial.stiffness;
                        y = trial.y_new;
                        f = trial.f_new;
                        self.rosenbrock.invalidate();

                        if let Some(h_lambda) = stiffness {
                            if self.stiffness.observe(h_lambda) {
                                self.on_stiffness(t);
                            }
                        }
                    }
                    rejected => {
                        let (rejection, error) = match &rejected {
                            None => (Rejection::Singular, f64::NAN),
                            Some(trial) if !trial.is_finite() => (Rejection::NonFinite, f64::NAN),
                            Some(trial) => (Rejection::Error, trial.error),
                        };
                        self.stats.rejected_steps += 1;
                        h = self.controller.reject(h_try, error);

                        if self.config.min_step > 0.0 && h_try <= self.config.min_step {
                            let reason = format!(
                                "{} at the minimum step size {} (t = {t})",
                                rejection.describe(),
                                self.config.min_step
                            );
                            return Err(self.fail(t, &reason));
                        }
                        if h <= 16.0 * f64::EPSILON * t.abs().max(1.0) {
                            let reason = format!("{} (t = {t})", rejection.describe());
                            return Err(self.fail(t, &reason));
                        }
                    }
                }
            }

            self.out_times.push(t_sample);
            self.out_states.push(y.clone());
        }

        self.stats.derivative_evaluations = self.rhs.evaluations();
        self.stats.final_method = Some(self.active.as_method());
        debug!(
            samples = self.out_states.len(),
            accepted = self.stats.accepted_steps,
            rejected = self.stats.rejected_steps,
            evaluations = self.stats.derivative_evaluations,
            method = %self.active.as_method(),
            "integration finished"
        );

        Ok(Trajectory::new(self.out_times, self.out_states, self.stats))
    }

    fn attempt(
        &mut self,
        t: f64,
        y: &DVector<f64>,
        f: &DVector<f64>,
        h: f64,
    ) -> Result<Option<Trial>> {
        let (rtol, atol) = (self.config.rtol, self.config.atol);
        match self.active {
            Active::DormandPrince => {
                dopri::attempt(&mut self.rhs, t, y, f, h, rtol, atol).map(Some)
            }
            Active::Rosenbrock => self.rosenbrock.attempt(
                &mut self.rhs,
                t,
                y,
                f,
                h,
                rtol,
                atol,
                &mut self.stats,
            ),
        }
    }

    fn on_stiffness(&mut self, t: f64) {
        self.stats
            .warnings
            .push(SolverWarning::StiffnessDetected { time: t });

        if self.config.method == OdeMethod::Auto && self.active == Active::DormandPrince {
            let from = self.active.as_method();
            self.active = Active::Rosenbrock;
            self.controller = StepController::for_order(self.active.error_order());
            self.stats.method_switches += 1;
            self.stats.warnings.push(SolverWarning::MethodSwitched {
                time: t,
                from,
                to: self.active.as_method(),
            });
            warn!(t, %from, to = %self.active.as_method(), "stiffness detected, switching method");
        } else {
            warn!(t, method = %self.active.as_method(), "stiffness detected");
        }
    }

    /// Build the failure for the current run, keeping every completed sample.
    fn fail(&mut self, t: f64, reason: &str) -> FabricError {
        self.stats.derivative_evaluations = self.rhs.evaluations();
        self.stats.final_method = Some(self.active.as_method());
        warn!(t, reason, samples = self.out_states.len(), "integration failed");

        let partial = Trajectory::new(
            std::mem::take(&mut self.out_times),
            std::mem::take(&mut self.out_states),
            std::mem::take(&mut self.stats),
        );
        FabricError::integration_failure(reason, partial)
    }
}
