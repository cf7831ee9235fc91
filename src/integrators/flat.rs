//! Uniform sampling integrator and event generator.
//!
//! [`Flat`] samples the region uniformly with a constant Jacobian equal to
//! the region volume. It shares the statistics and event emission contracts
//! of the adaptive integrator but runs a single evaluation stream and needs
//! no grid, which makes it a useful cross-check of the adaptive results.

use crate::core::config::FlatParams;
use crate::core::estimators::{BasicEstimators, Estimators, IterationEstimators};
use crate::core::{Integrand, IntegrationResult, RunStatistics};
use crate::error::Error;
use crate::events::{EventSampler, EventSink};

use rand::Rng;
use std::sync::Mutex;

/// A finite estimate below this magnitude is indistinguishable from an
/// integrand that is zero almost everywhere.
const VALUE_FLOOR: f64 = 1e-60;

/// The uniform sampler.
pub struct Flat<'a, I, R> {
    integrand: &'a I,
    params: FlatParams,
    lower: Vec<f64>,
    length: Vec<f64>,
    volume: f64,
    rng: R,
    estimators: IterationEstimators,
    statistics: Mutex<RunStatistics>,
    integrated: bool,
}

impl<'a, I, R> Flat<'a, I, R>
where
    I: Integrand,
    R: Rng,
{
    /// Create a uniform sampler for `integrand` over the region spanned by
    /// `lower` and `upper`. A reversed bound pair keeps its direction as a
    /// signed length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the parameters fail validation or
    /// the region is degenerate or does not match the integrand.
    pub fn new(
        integrand: &'a I,
        lower: &[f64],
        upper: &[f64],
        params: FlatParams,
        rng: R,
    ) -> Result<Self, Error> {
        params.validate()?;

        if lower.is_empty() || lower.len() != upper.len() {
            return Err(Error::Configuration(format!(
                "integration region needs matching, non-empty bounds (got {} and {})",
                lower.len(),
                upper.len()
            )));
        }

        if lower.len() != integrand.dim() {
            return Err(Error::Configuration(format!(
                "integrand has {} dimensions but the region has {}",
                integrand.dim(),
                lower.len()
            )));
        }

        let mut length = Vec::with_capacity(lower.len());
        let mut volume = 1.0;

        for (dim, (&lo, &hi)) in lower.iter().zip(upper.iter()).enumerate() {
            let len = hi - lo;

            if !len.is_finite() || len == 0.0 {
                return Err(Error::Configuration(format!(
                    "degenerate integration region in dimension {}: [{}, {}]",
                    dim, lo, hi
                )));
            }

            length.push(len);
            volume *= len;
        }

        Ok(Self {
            integrand,
            params,
            lower: lower.to_vec(),
            length,
            volume,
            rng,
            estimators: IterationEstimators::default(),
            statistics: Mutex::new(RunStatistics::default()),
            integrated: false,
        })
    }

    /// Snapshot of the run bookkeeping.
    pub fn statistics(&self) -> RunStatistics {
        self.statistics.lock().unwrap().clone()
    }

    fn sample_point(&mut self, x: &mut [f64]) {
        for (dim, value) in x.iter_mut().enumerate() {
            *value = self.lower[dim] + self.rng.gen::<f64>() * self.length[dim];
        }
    }

    /// Integrate, evaluating until the relative error of the running
    /// estimate drops below the configured precision and at least the
    /// configured minimum number of evaluations was spent.
    ///
    /// # Errors
    ///
    /// [`Error::WorkerFault`] on an integrand fault,
    /// [`Error::NumericalDivergence`] if the estimate is still
    /// indistinguishable from zero once the minimum evaluations are spent.
    pub fn integrate(&mut self) -> Result<IntegrationResult, Error> {
        let mut x = vec![0.0; self.integrand.dim()];

        loop {
            self.sample_point(&mut x);

            let result = self.integrand.call(&x, self.volume)?;
            let value = result.weight;

            self.estimators.record(value);

            {
                let mut statistics = self.statistics.lock().unwrap();
                statistics.accumulate(&result.diagnostics);

                if value.is_finite() && value != 0.0 {
                    statistics.max_sampling_weight = statistics.max_sampling_weight.max(value);
                    statistics.max_weight = statistics.max_weight.max(value / self.volume);
                }
            }

            if self.estimators.calls() as u64 >= self.params.min_events {
                let mean = self.estimators.mean();

                if !mean.is_finite() || mean.abs() < VALUE_FLOOR {
                    return Err(Error::NumericalDivergence(format!(
                        "estimate {} after {} evaluations",
                        mean,
                        self.estimators.calls()
                    )));
                }

                if self.estimators.std() / mean.abs() < self.params.precision {
                    break;
                }
            }
        }

        self.integrated = true;

        log::info!(
            "flat integration finished: N = {}, value = {:.6e} \u{b1} {:.6e}",
            self.estimators.calls(),
            self.estimators.mean(),
            self.estimators.std()
        );

        Ok(IntegrationResult {
            value: self.estimators.mean(),
            error: self.estimators.std(),
            chi_sq: 0.0,
            iterations: 1,
            statistics: self.statistics(),
        })
    }

    /// Generate `target` events into `sink` by hit-or-miss against the
    /// maximum weight seen during integration.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] without a preceding [`Flat::integrate`],
    /// [`Error::WorkerFault`] on an integrand fault, [`Error::OutputFault`]
    /// on a sink fault.
    pub fn generate<S>(
        &mut self,
        weighted: bool,
        target: u64,
        sink: &Mutex<S>,
    ) -> Result<RunStatistics, Error>
    where
        S: EventSink,
    {
        if !self.integrated || self.statistics.lock().unwrap().max_sampling_weight <= 0.0 {
            return Err(Error::Configuration(
                "generation requires a completed integration on this instance".to_string(),
            ));
        }

        let mut x = vec![0.0; self.integrand.dim()];

        let integrand = self.integrand;
        let volume = self.volume;
        let lower = &self.lower;
        let length = &self.length;
        let statistics = &self.statistics;
        let sampler = EventSampler::new(weighted, target, statistics, sink);

        while !sampler.complete() {
            for (dim, value) in x.iter_mut().enumerate() {
                *value = lower[dim] + self.rng.gen::<f64>() * length[dim];
            }
            let u = self.rng.gen::<f64>();

            let result = integrand.call(&x, volume)?;
            let value = result.weight;

            {
                let mut statistics = statistics.lock().unwrap();
                statistics.accumulate(&result.diagnostics);
            }

            if !value.is_finite() || value == 0.0 {
                continue;
            }

            sampler.offer(&x, value, result.diagnostics, u)?;

            let mut statistics = statistics.lock().unwrap();
            statistics.max_sampling_weight = statistics.max_sampling_weight.max(value);
            statistics.max_weight = statistics.max_weight.max(value / volume);
        }

        Ok(self.statistics())
    }
}
