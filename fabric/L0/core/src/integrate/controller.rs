//! Step-size control and stiffness detection.

/// PI controller for adaptive step sizes.
///
/// Errors are normalized so that `1.0` is exactly at tolerance. After an
/// accepted step:
///
/// ```text
/// h_new = h · safety · err^(−alpha) · err_prev^(beta)
/// ```
///
/// with `alpha = 0.7 / k`, `beta = 0.4 / k` and `k = order + 1`.
#[derive(Debug, Clone)]
pub struct StepController {
    /// Exponent on the current error.
    pub alpha: f64,
    /// Exponent on the previous accepted error.
    pub beta: f64,
    /// Safety factor applied to every proposal.
    pub safety: f64,
    /// Smallest allowed ratio `h_new / h`.
    pub min_factor: f64,
    /// Largest allowed ratio `h_new / h`.
    pub max_factor: f64,
    order: usize,
    prev_error: f64,
}

impl StepController {
    /// Controller tuned for a method whose error estimate has order `order`.
    #[must_use]
    pub fn for_order(order: usize) -> Self {
        let k = (order + 1) as f64;
        Self {
            alpha: 0.7 / k,
            beta: 0.4 / k,
            safety: 0.9,
            min_factor: 0.2,
            max_factor: 10.0,
            order,
            prev_error: 1e-4,
        }
    }

    /// Order the controller was tuned for.
    #[must_use]
    pub fn order(&self) -> usize {
        self.order
    }

    /// Next step size after an accepted step of size `h` with error `error`.
    pub fn accept(&mut self, h: f64, error: f64) -> f64 {
        let error = error.max(1e-10);
        let factor = self.safety * error.powf(-self.alpha) * self.prev_error.powf(self.beta);
        self.prev_error = error;
        h * factor.clamp(self.min_factor, self.max_factor)
    }

    /// Retry size after a rejected step of size `h` with error `error`.
    ///
    /// A non-finite error shrinks by the minimum factor.
    #[must_use]
    pub fn reject(&self, h: f64, error: f64) -> f64 {
        if !error.is_finite() {
            return h * self.min_factor;
        }
        let k = (self.order + 1) as f64;
        let factor = self.safety * error.powf(-1.0 / k);
        h * factor.clamp(self.min_factor, 1.0)
    }
}

/// Counts accepted steps whose size was limited by stability rather than
/// accuracy.
///
/// Fed with the estimate `h·|λ|` of the explicit method's stability
/// product. The Dormand–Prince stability region ends near `3.3` on the
/// negative real axis, but on stiff problems the controller above settles
/// around `h·|λ| ≈ 2`: the error of the decaying stiff component caps the
/// step before the boundary does. Steps above [`Self::STIFF_PRODUCT`]
/// therefore count as stiff.
#[derive(Debug, Clone)]
pub struct StiffnessDetector {
    threshold: usize,
    stiff_steps: usize,
    non_stiff_steps: usize,
}

impl StiffnessDetector {
    /// Stability product above which a step counts as stiff.
    pub const STIFF_PRODUCT: f64 = 1.6;
    /// Consecutive non-stiff steps that clear the stiff count.
    pub const CLEAR_AFTER: usize = 6;

    /// Report stiffness after `threshold` stiff steps.
    #[must_use]
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            stiff_steps: 0,
            non_stiff_steps: 0,
        }
    }

    /// Record one accepted step. Returns `true` when stiffness is detected;
    /// the counters restart afterwards.
    pub fn observe(&mut self, h_lambda: f64) -> bool {
        if h_lambda > Self::STIFF_PRODUCT {
            self.non_stiff_steps = 0;
            self.stiff_steps += 1;
            if self.stiff_steps >= self.threshold {
                self.stiff_steps = 0;
                return true;
            }
        } else {
            self.non_stiff_steps += 1;
            if self.non_stiff_steps >= Self::CLEAR_AFTER {
                self.stiff_steps = 0;
            }
        }
        false
    }
}
