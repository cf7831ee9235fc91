//! Adaptive importance sampling integrator and event generator.
//!
//! [`Vegas`] owns an [`AdaptiveGrid`] over the integration region and drives
//! it through a fixed protocol: a short burn-in that lets the grid adapt, an
//! optional call-budget calibration against the wall clock, a production run
//! whose iterations are combined into the final inverse-variance-weighted
//! estimate, and, on request, an event generation run against the frozen
//! grid. Every iteration is a fork-join over a fixed number of cores with
//! the per-core random streams derived deterministically from the iteration
//! rng, so results are independent of the core count.

use crate::callbacks::Callback;
use crate::core::config::VegasParams;
use crate::core::estimators::{Estimators, GlobalAccumulator, IterationEstimators};
use crate::core::*;
use crate::error::Error;
use crate::events::{EventSampler, EventSink};
use crate::grid::{AdaptiveGrid, GridInit};

use rand::Rng;
use std::sync::Mutex;
use std::time::Instant;

use crossbeam as cb;

/// Grid-adaptation iterations before production starts. Doubled on every
/// call-budget escalation.
const BURN_IN_ITERATIONS: usize = 3;

/// Global chi-square per degree of freedom above which a production run is
/// abandoned and restarted with a larger call budget.
const SOFT_FAIL_CHI2: f64 = 50.0;

/// Number of call-budget escalations after which the integration gives up
/// with [`Error::ConvergenceStall`].
const MAX_ESCALATIONS: usize = 5;

/// A finite estimate below this magnitude is indistinguishable from an
/// integrand that is zero almost everywhere.
const VALUE_FLOOR: f64 = 1e-60;

/// Call-budget multiplier for event generation relative to integration.
const GENERATION_CALL_FACTOR: usize = 10;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Phase {
    BurnIn,
    Production,
}

impl Phase {
    const fn label(self) -> &'static str {
        match self {
            Self::BurnIn => "burn-in",
            Self::Production => "production",
        }
    }
}

enum PhaseOutcome {
    Converged,
    /// Chi-square exceeded [`SOFT_FAIL_CHI2`], the phase has to be rerun
    /// with a larger call budget.
    SoftFailure,
}

/// Per-worker accumulation buffers, merged by the scheduler after all
/// workers of an iteration have been joined.
struct WorkerOutput {
    estimators: IterationEstimators,
    weight: Vec<Vec<f64>>,
    weight_sq: Vec<Vec<f64>>,
    max_weight: f64,
    max_sampling_weight: f64,
    amplitude_ok: u64,
    kinematics_ok: u64,
    fiducial_ok: u64,
    veto_ok: u64,
}

impl WorkerOutput {
    fn new(dim: usize, bins: usize) -> Self {
        Self {
            estimators: IterationEstimators::default(),
            weight: vec![vec![0.0; bins]; dim],
            weight_sq: vec![vec![0.0; bins]; dim],
            max_weight: 0.0,
            max_sampling_weight: 0.0,
            amplitude_ok: 0,
            kinematics_ok: 0,
            fiducial_ok: 0,
            veto_ok: 0,
        }
    }

    fn tally(&mut self, diagnostics: &AuxDiagnostics) {
        self.amplitude_ok += u64::from(diagnostics.amplitude_ok);
        self.kinematics_ok += u64::from(diagnostics.kinematics_ok);
        self.fiducial_ok += u64::from(diagnostics.fiducial_ok);
        self.veto_ok += u64::from(diagnostics.veto_ok);
    }
}

/// Evaluate this core's share of one integration iteration.
fn integration_contribution_from_core<I, R>(
    integrand: &I,
    grid: &AdaptiveGrid,
    mut rng: R,
    calls: usize,
    core: usize,
    n_cores: usize,
) -> Result<WorkerOutput, Error>
where
    I: Integrand,
    R: Rng,
{
    let dim = grid.dim();

    // determine how many draws of the random number generator to skip
    let skip = compute_call_offset_for_core(core, n_cores, calls) * dim;

    // initialize the random number generator on the given core
    for _ in 0..skip {
        let _ = rng.gen::<f64>();
    }

    // the last core might get fewer calls
    let actual_calls = compute_calls_for_core(core, n_cores, calls);

    // buffers for the sampled point such that we do not need to allocate
    // vectors in every call
    let mut ys = vec![0.0; dim];
    let mut x = vec![0.0; dim];
    let mut bins = vec![0; dim];

    let mut output = WorkerOutput::new(dim, grid.bins());

    for _ in 0..actual_calls {
        ys.iter_mut().for_each(|y| *y = rng.gen());
        let jacobian = grid.sample(&ys, &mut x, &mut bins);

        let result = integrand.call(&x, jacobian)?;
        let value = result.weight;

        output.estimators.record(value);
        output.tally(&result.diagnostics);

        if value.is_finite() && value != 0.0 {
            for (dim, &bin) in bins.iter().enumerate() {
                output.weight[dim][bin] += value;
                output.weight_sq[dim][bin] += value * value;
            }

            output.max_sampling_weight = output.max_sampling_weight.max(value);
            output.max_weight = output.max_weight.max(value / jacobian);
        }
    }

    Ok(output)
}

/// Evaluate this core's share of one generation iteration, offering every
/// sample to the shared event sampler.
#[allow(clippy::too_many_arguments)]
fn generation_contribution_from_core<I, R, S>(
    integrand: &I,
    grid: &AdaptiveGrid,
    sampler: &EventSampler<'_, S>,
    statistics: &Mutex<RunStatistics>,
    mut rng: R,
    calls: usize,
    core: usize,
    n_cores: usize,
) -> Result<(), Error>
where
    I: Integrand,
    R: Rng,
    S: EventSink,
{
    let dim = grid.dim();

    // one extra draw per call for the acceptance test, taken
    // unconditionally to keep the per-call stride fixed
    let stride = dim + 1;
    let skip = compute_call_offset_for_core(core, n_cores, calls) * stride;

    for _ in 0..skip {
        let _ = rng.gen::<f64>();
    }

    let actual_calls = compute_calls_for_core(core, n_cores, calls);

    let mut ys = vec![0.0; dim];
    let mut x = vec![0.0; dim];
    let mut bins = vec![0; dim];

    for _ in 0..actual_calls {
        if sampler.complete() {
            break;
        }

        ys.iter_mut().for_each(|y| *y = rng.gen());
        let u = rng.gen::<f64>();

        let jacobian = grid.sample(&ys, &mut x, &mut bins);
        let result = integrand.call(&x, jacobian)?;
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
        statistics.max_weight = statistics.max_weight.max(value / jacobian);
    }

    Ok(())
}

/// The adaptive integrator.
///
/// An instance is created over a fixed integrand and region, integrated
/// once, and afterwards optionally used to generate events from the adapted
/// grid. The instance keeps its random number generator between the two
/// runs, so a full integrate-then-generate session is reproducible from the
/// initial seed alone.
pub struct Vegas<'a, I, R> {
    integrand: &'a I,
    params: VegasParams,
    rng: R,
    grid: AdaptiveGrid,
    accumulator: GlobalAccumulator,
    statistics: Mutex<RunStatistics>,
    /// Calls per iteration, updated by calibration and escalation.
    ncall: usize,
    integrated: bool,
}

impl<'a, I, R> Vegas<'a, I, R>
where
    I: Integrand,
    R: Clone + Rng + Send + Sync,
{
    /// Create an integrator for `integrand` over the region spanned by
    /// `lower` and `upper`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the parameters fail validation,
    /// the region is degenerate, or the region dimension does not match the
    /// integrand.
    pub fn new(
        integrand: &'a I,
        lower: &[f64],
        upper: &[f64],
        params: VegasParams,
        rng: R,
    ) -> Result<Self, Error> {
        params.validate()?;

        if lower.len() != integrand.dim() {
            return Err(Error::Configuration(format!(
                "integrand has {} dimensions but the region has {}",
                integrand.dim(),
                lower.len()
            )));
        }

        let grid = AdaptiveGrid::new(lower, upper, params.bins)?;
        let ncall = params.ncall;

        Ok(Self {
            integrand,
            params,
            rng,
            grid,
            accumulator: GlobalAccumulator::new(),
            statistics: Mutex::new(RunStatistics::default()),
            ncall,
            integrated: false,
        })
    }

    /// The adapted grid.
    pub fn grid(&self) -> &AdaptiveGrid {
        &self.grid
    }

    /// Snapshot of the run bookkeeping.
    pub fn statistics(&self) -> RunStatistics {
        self.statistics.lock().unwrap().clone()
    }

    /// The random number generator in its current state.
    pub fn rng(&self) -> &R {
        &self.rng
    }

    /// Integrate on `n_cores` cores.
    ///
    /// `init` selects how the grid enters the run: [`GridInit::Cold`] for a
    /// fresh uniform grid, [`GridInit::Warm`] to keep the adaptation of a
    /// previous run on the same instance.
    ///
    /// The run performs three grid-adaptation burn-in iterations, calibrates
    /// the call budget against the configured minimum iteration wall time,
    /// and then accumulates the configured number of production iterations,
    /// extending by one iteration at a time while the combined estimate
    /// misses the requested chi-square and precision targets. A production
    /// run whose chi-square exceeds 50 is abandoned and restarted from a
    /// cold grid with ten times the calls and twice the burn-in, at most
    /// five times.
    ///
    /// # Errors
    ///
    /// [`Error::WorkerFault`] on the first integrand fault,
    /// [`Error::NumericalDivergence`] if the combined estimate turns
    /// non-finite or vanishes, [`Error::ConvergenceStall`] when the
    /// escalations are exhausted.
    pub fn integrate(
        &mut self,
        n_cores: usize,
        init: GridInit,
        callback: &impl Callback,
    ) -> Result<IntegrationResult, Error> {
        if n_cores == 0 {
            return Err(Error::Configuration(
                "integration needs at least one core".to_string(),
            ));
        }

        self.grid.init(init);

        let mut burn_in = BURN_IN_ITERATIONS;
        let mut escalations = 0;
        let mut calibrate = self.params.min_iteration_time.as_secs_f64() > 0.0;

        loop {
            self.accumulator.reset();
            let start = Instant::now();
            self.run_phase(Phase::BurnIn, burn_in, n_cores, callback)?;
            let mean_time = start.elapsed().as_secs_f64() / burn_in as f64;

            // scale the call budget up until an iteration takes at least the
            // configured minimum wall time, so that the fork-join overhead
            // stays negligible
            if calibrate {
                calibrate = false;
                let minimum = self.params.min_iteration_time.as_secs_f64();

                if mean_time > 0.0 && mean_time < minimum {
                    let scaled = (self.ncall as f64 * minimum / mean_time).ceil() as usize;
                    log::info!(
                        "calibration: iterations took {:.3} s on average, raising NCALL from {} to {}",
                        mean_time,
                        self.ncall,
                        scaled
                    );
                    self.ncall = scaled;

                    self.grid.init(GridInit::Warm);
                    self.accumulator.reset();
                    self.run_phase(Phase::BurnIn, burn_in, n_cores, callback)?;
                }
            }

            // burn-in estimates are discarded
            self.accumulator.reset();

            match self.run_phase(Phase::Production, self.params.iterations, n_cores, callback)? {
                PhaseOutcome::Converged => break,
                PhaseOutcome::SoftFailure => {
                    escalations += 1;

                    if escalations > MAX_ESCALATIONS {
                        return Err(Error::ConvergenceStall {
                            chi_sq: self.accumulator.chi_sq(),
                            limit: SOFT_FAIL_CHI2,
                            escalations: escalations - 1,
                        });
                    }

                    log::info!(
                        "chi2/dof = {:.3} after {} iterations, restarting with NCALL = {}",
                        self.accumulator.chi_sq(),
                        self.accumulator.iterations(),
                        self.ncall * 10
                    );

                    self.ncall *= 10;
                    burn_in *= 2;
                    self.grid.init(GridInit::Cold);
                }
            }
        }

        self.integrated = true;

        Ok(IntegrationResult {
            value: self.accumulator.value(),
            error: self.accumulator.error(),
            chi_sq: self.accumulator.chi_sq(),
            iterations: self.accumulator.iterations(),
            statistics: self.statistics(),
        })
    }

    /// Generate `target` events into `sink` on `n_cores` cores.
    ///
    /// Requires a completed [`Vegas::integrate`] on the same instance, which
    /// provides the adapted grid and the maximum sampling weight the
    /// hit-or-miss acceptance tests against. The grid is frozen, the call
    /// budget is ten times the integration budget and
    /// iterations continue until the sink has accepted `target` events. In
    /// unweighted mode accepted events carry unit weight; in weighted mode
    /// every valid sample is accepted with its weight.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] without a preceding integration,
    /// [`Error::WorkerFault`] on an integrand fault, [`Error::OutputFault`]
    /// on a sink fault.
    pub fn generate<S>(
        &mut self,
        n_cores: usize,
        weighted: bool,
        target: u64,
        sink: &Mutex<S>,
    ) -> Result<RunStatistics, Error>
    where
        S: EventSink,
    {
        if n_cores == 0 {
            return Err(Error::Configuration(
                "generation needs at least one core".to_string(),
            ));
        }

        if !self.integrated || self.statistics.lock().unwrap().max_sampling_weight <= 0.0 {
            return Err(Error::Configuration(
                "generation requires a completed integration on this instance".to_string(),
            ));
        }

        self.grid.init(GridInit::Frozen);

        let calls = self.ncall * GENERATION_CALL_FACTOR;
        let stride = self.grid.dim() + 1;

        let sampler = EventSampler::new(weighted, target, &self.statistics, sink);

        let integrand = self.integrand;
        let grid = &self.grid;
        let statistics = &self.statistics;

        while !sampler.complete() {
            let rng_iteration = self.rng.clone();
            let sampler = &sampler;

            let outcomes = cb::thread::scope(|s| {
                let mut handles = Vec::with_capacity(n_cores);

                for core in 0..n_cores {
                    // Needs to be defined before spawning the thread
                    let rng_local = rng_iteration.clone();

                    handles.push(s.spawn(move |_| {
                        generation_contribution_from_core(
                            integrand,
                            grid,
                            sampler,
                            statistics,
                            rng_local,
                            calls,
                            core,
                            n_cores,
                        )
                    }));
                }

                // wait for the threads to finish
                handles
                    .into_iter()
                    .map(|handle| handle.join().unwrap())
                    .collect::<Vec<_>>()
            })
            .unwrap();

            for outcome in outcomes {
                outcome?;
            }

            // synchronize the random number generation
            for _ in 0..calls * stride {
                let _ = self.rng.gen::<f64>();
            }

            if self.params.debug >= 0 {
                let statistics = self.statistics.lock().unwrap();
                log::info!(
                    "generated {} / {} events ({} trials, {} overflow)",
                    statistics.generated,
                    target,
                    statistics.trials,
                    statistics.overflow
                );
            }
        }

        Ok(self.statistics())
    }

    /// Run one integration phase, refining the grid after every iteration.
    fn run_phase(
        &mut self,
        phase: Phase,
        iterations: usize,
        n_cores: usize,
        callback: &impl Callback,
    ) -> Result<PhaseOutcome, Error> {
        let production = phase == Phase::Production;
        let mut records = Vec::with_capacity(iterations);
        let mut allotted = iterations;
        let mut index = 0;

        while index < allotted {
            self.grid.clear_importance();

            let estimators = self.run_iteration(n_cores, production)?;
            self.accumulator.fold(&estimators);
            self.grid.refine(self.params.lambda);

            records.push(estimators);

            if self.params.debug >= 0 {
                log::info!(
                    "{} iteration {}: N = {}, value = {:.6e} \u{b1} {:.6e}, chi2/dof = {:.3}",
                    phase.label(),
                    index,
                    records[index].calls(),
                    self.accumulator.value(),
                    self.accumulator.error(),
                    self.accumulator.chi_sq()
                );
            }
            if self.params.debug == 1 {
                for dim in 0..self.grid.dim() {
                    for bin in 0..self.grid.bins() {
                        let (sum, sumsq) = self.grid.importance(dim, bin);
                        log::debug!("dim {} bin {}: sum = {:e}, sumsq = {:e}", dim, bin, sum, sumsq);
                    }
                }
            }

            callback.print(&records, &self.accumulator);

            if production && records.len() > 1 {
                let value = self.accumulator.value();

                if !value.is_finite() || value.abs() < VALUE_FLOOR {
                    return Err(Error::NumericalDivergence(format!(
                        "combined estimate {} after {} iterations",
                        value,
                        records.len()
                    )));
                }

                if self.accumulator.chi_sq() > SOFT_FAIL_CHI2 {
                    return Ok(PhaseOutcome::SoftFailure);
                }
            }

            // keep going one iteration at a time until the combined estimate
            // meets the chi-square and precision targets
            if production
                && index == allotted - 1
                && !self
                    .accumulator
                    .converged(self.params.chi2max, self.params.precision)
            {
                allotted += 1;
            }

            index += 1;
        }

        Ok(PhaseOutcome::Converged)
    }

    /// Perform a single fork-join iteration and merge the worker outputs.
    fn run_iteration(
        &mut self,
        n_cores: usize,
        track_maxima: bool,
    ) -> Result<IterationEstimators, Error> {
        let calls = self.ncall;

        let integrand = self.integrand;
        let grid = &self.grid;
        let rng_iteration = self.rng.clone();

        // distribute the workload evenly across the cores
        let outputs = cb::thread::scope(|s| {
            let mut handles = Vec::with_capacity(n_cores);

            for core in 0..n_cores {
                // Needs to be defined before spawning the thread
                let rng_local = rng_iteration.clone();

                handles.push(s.spawn(move |_| {
                    integration_contribution_from_core(
                        integrand,
                        grid,
                        rng_local,
                        calls,
                        core,
                        n_cores,
                    )
                }));
            }

            // wait for the threads to finish
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect::<Vec<_>>()
        })
        .unwrap();

        // synchronize the random number generation
        for _ in 0..calls * self.grid.dim() {
            let _ = self.rng.gen::<f64>();
        }

        // merge the worker outputs in spawn order, so that the result does
        // not depend on which worker finished first
        let mut estimators = IterationEstimators::default();
        let mut statistics = self.statistics.lock().unwrap();

        for output in outputs {
            let output = output?;

            self.grid.merge_importance(&output.weight, &output.weight_sq);
            statistics.evaluations += output.estimators.calls() as u64;
            statistics.amplitude_ok += output.amplitude_ok;
            statistics.kinematics_ok += output.kinematics_ok;
            statistics.fiducial_ok += output.fiducial_ok;
            statistics.veto_ok += output.veto_ok;

            if track_maxima {
                statistics.max_weight = statistics.max_weight.max(output.max_weight);
                statistics.max_sampling_weight =
                    statistics.max_sampling_weight.max(output.max_sampling_weight);
            }

            estimators = estimators + output.estimators;
        }

        Ok(estimators)
    }
}
