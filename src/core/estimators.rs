//! This module contains everything related to estimators.
use num_traits::Float;
use serde::{Deserialize, Serialize};
use std::ops::Add;

/// Floor used to keep variances positive against rounding.
pub(crate) const VARIANCE_FLOOR: f64 = 1e-30;

/// Basic estimators, like the mean, variance, and the standard deviation.
pub trait BasicEstimators<T: Float> {
    /// Returns the mean value.
    fn mean(&self) -> T;

    /// Returns the variance, $V$.
    fn var(&self) -> T;

    /// Returns the standard deviation, $\sigma = \sqrt{V}$.
    fn std(&self) -> T {
        self.var().sqrt()
    }
}

/// More estimators.
pub trait Estimators<T: Float>: BasicEstimators<T> {
    /// Returns the number of times $N$, the integrand has been called.
    fn calls(&self) -> usize;

    /// Returns the number of times, $N_\mathrm{nf}$, the integrand has been called
    /// and its return value was non-finite.
    fn non_finite_calls(&self) -> usize;

    /// Returns the number of times, $N_\mathrm{nz}$, the integrand has been called
    /// and its return value was non-zero.
    fn non_zero_calls(&self) -> usize;
}

/// Raw sums collected during a single iteration.
///
/// Stores $\sum f$ and $\sum f^2$ of the importance-weighted integrand
/// values together with the call counters. The local integral and variance
/// estimates are derived quantities, recomputed on demand.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct IterationEstimators {
    sum: f64,
    sumsq: f64,
    calls: usize,
    non_finite_calls: usize,
    non_zero_calls: usize,
}

impl Add for IterationEstimators {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            sum: self.sum + other.sum,
            sumsq: self.sumsq + other.sumsq,
            calls: self.calls + other.calls,
            non_finite_calls: self.non_finite_calls + other.non_finite_calls,
            non_zero_calls: self.non_zero_calls + other.non_zero_calls,
        }
    }
}

impl IterationEstimators {
    /// Record one importance-weighted integrand value.
    ///
    /// Non-finite values are filtered out: the value is treated as zero so a
    /// single pathological call does not destroy the iteration, and the
    /// non-finite counter is increased instead.
    pub fn record(&mut self, value: f64) {
        self.calls += 1;

        if value != 0.0 {
            self.non_zero_calls += 1;

            if value.is_finite() {
                self.sum += value;
                self.sumsq += value * value;
            } else {
                self.non_finite_calls += 1;
            }
        }
    }

    /// Local variance estimate of the mean,
    /// $V = \max(\langle f^2 \rangle - \langle f \rangle^2, \epsilon) / N$.
    pub fn variance(&self) -> f64 {
        let calls = self.calls as f64;
        let mean = self.sum / calls;
        let w = (self.sumsq / calls).sqrt();
        let mut var = (w - mean) * (w + mean);

        if var <= 0.0 {
            var = VARIANCE_FLOOR;
        }

        var / calls
    }
}

impl BasicEstimators<f64> for IterationEstimators {
    fn mean(&self) -> f64 {
        self.sum / self.calls as f64
    }

    fn var(&self) -> f64 {
        self.variance()
    }
}

impl Estimators<f64> for IterationEstimators {
    fn calls(&self) -> usize {
        self.calls
    }

    fn non_finite_calls(&self) -> usize {
        self.non_finite_calls
    }

    fn non_zero_calls(&self) -> usize {
        self.non_zero_calls
    }
}

/// Inverse-variance-weighted combination of iteration estimates.
///
/// Each folded iteration contributes its local estimate $I_k$ with weight
/// $\alpha_k = 1/V_k$. The combined value is
/// $\sum_k \alpha_k I_k / \sum_k \alpha_k$ with standard error
/// $(\sum_k \alpha_k)^{-1/2}$, and the chi-square statistic measures whether
/// the $I_k$ are mutually consistent.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct GlobalAccumulator {
    weighted_sum: f64,
    chi_sum: f64,
    weight_sum: f64,
    iterations: usize,
}

impl GlobalAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard all folded iterations.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Fold one finished iteration into the global estimate.
    pub fn fold(&mut self, iteration: &IterationEstimators) {
        let value = iteration.mean();
        let alpha = 1.0 / iteration.variance();

        self.weighted_sum += alpha * value;
        self.chi_sum += alpha * value * value;
        self.weight_sum += alpha;
        self.iterations += 1;
    }

    /// Number of iterations folded so far.
    pub const fn iterations(&self) -> usize {
        self.iterations
    }

    /// Current integral estimate.
    pub fn value(&self) -> f64 {
        self.weighted_sum / self.weight_sum
    }

    /// Standard error of the integral estimate.
    pub fn error(&self) -> f64 {
        (1.0 / self.weight_sum).sqrt()
    }

    /// Relative error of the integral estimate.
    pub fn rel_error(&self) -> f64 {
        self.error() / self.value().abs()
    }

    /// Chi-square consistency statistic of the folded iterations. Only
    /// meaningful once at least one iteration has been folded.
    pub fn chi_sq(&self) -> f64 {
        let dof = (self.iterations as f64 - 1.0) + 1e-5;
        let chi = (self.chi_sum - self.weighted_sum * self.weighted_sum / self.weight_sum) / dof;

        chi.max(0.0)
    }

    /// Whether both convergence targets are met.
    pub fn converged(&self, chi2max: f64, precision: f64) -> bool {
        self.chi_sq() <= chi2max && self.rel_error() <= precision
    }
}

impl BasicEstimators<f64> for GlobalAccumulator {
    fn mean(&self) -> f64 {
        self.value()
    }

    fn var(&self) -> f64 {
        1.0 / self.weight_sum
    }
}
