//! The core module
pub mod config;
pub mod estimators;

use crate::error::IntegrandFault;
use serde::{Deserialize, Serialize};

/// Per-evaluation diagnostics reported by the integrand.
///
/// The integrator treats these flags as opaque apart from accumulating them
/// into [`RunStatistics`] and consulting [`AuxDiagnostics::valid`] and
/// `forced_accept` during event emission.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct AuxDiagnostics {
    /// The amplitude evaluation succeeded.
    pub amplitude_ok: bool,
    /// The kinematics construction succeeded.
    pub kinematics_ok: bool,
    /// The point passed the fiducial cuts.
    pub fiducial_ok: bool,
    /// The point passed the veto cuts.
    pub veto_ok: bool,
    /// Bypass hit-or-miss entirely. Used for integrand-internal consistency
    /// samples.
    pub forced_accept: bool,
}

impl Default for AuxDiagnostics {
    /// All stages passing, no forced accept.
    fn default() -> Self {
        Self {
            amplitude_ok: true,
            kinematics_ok: true,
            fiducial_ok: true,
            veto_ok: true,
            forced_accept: false,
        }
    }
}

impl AuxDiagnostics {
    /// An evaluation is valid if every stage passed.
    pub const fn valid(&self) -> bool {
        self.amplitude_ok && self.kinematics_ok && self.fiducial_ok && self.veto_ok
    }
}

/// The result of a call to an integrand: the raw weight of the sampled point
/// together with the diagnostics of the evaluation.
#[derive(Clone, Debug)]
pub struct CallResult {
    /// The raw, non-negative integrand weight.
    pub weight: f64,
    /// Diagnostics of this evaluation.
    pub diagnostics: AuxDiagnostics,
}

impl CallResult {
    /// Constructor.
    pub const fn new(weight: f64, diagnostics: AuxDiagnostics) -> Self {
        Self {
            weight,
            diagnostics,
        }
    }
}

/// Trait which every integrand must implement.
///
/// The integrand must be safe to call concurrently from multiple threads and
/// pure with respect to the point, apart from the returned diagnostics.
pub trait Integrand: Send + Sync {
    /// Evaluate the integrand at the region point `x`. The importance weight
    /// of the sample (the accumulated Jacobian of the grid mapping) is passed
    /// along and must be folded into the returned weight, which the
    /// integrator uses as the full contribution of the sample.
    ///
    /// # Errors
    ///
    /// A returned [`IntegrandFault`] aborts the run after the current
    /// iteration has been joined.
    fn call(&self, x: &[f64], importance_weight: f64) -> Result<CallResult, IntegrandFault>;

    /// The dimension of the integrand.
    fn dim(&self) -> usize;
}

/// Process-wide counters of a single integration or generation run.
///
/// Mutated under a single coordination lock from any worker; read by the
/// controller between iterations and by the event sampler per sample. Lives
/// for the lifetime of the integrator instance and accumulates across the
/// integration and generation runs performed on it.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RunStatistics {
    /// Number of integrand evaluations.
    pub evaluations: u64,
    /// Number of event emission trials.
    pub trials: u64,
    /// Number of accepted (emitted) events.
    pub generated: u64,
    /// Maximum observed raw integrand weight.
    pub max_weight: f64,
    /// Maximum observed importance-adjusted weight (integrand weight times
    /// sampling Jacobian). This is the hit-or-miss reference.
    pub max_sampling_weight: f64,
    /// Number of unweighted-mode samples whose weight exceeded the running
    /// maximum.
    pub overflow: u64,
    /// Evaluations whose amplitude stage passed.
    pub amplitude_ok: u64,
    /// Evaluations whose kinematics stage passed.
    pub kinematics_ok: u64,
    /// Evaluations that passed the fiducial cuts.
    pub fiducial_ok: u64,
    /// Evaluations that passed the veto cuts.
    pub veto_ok: u64,
}

impl RunStatistics {
    /// Fold the diagnostics of one evaluation into the stage counters.
    pub fn accumulate(&mut self, diagnostics: &AuxDiagnostics) {
        self.evaluations += 1;
        self.amplitude_ok += u64::from(diagnostics.amplitude_ok);
        self.kinematics_ok += u64::from(diagnostics.kinematics_ok);
        self.fiducial_ok += u64::from(diagnostics.fiducial_ok);
        self.veto_ok += u64::from(diagnostics.veto_ok);
    }

    /// Fraction of emission trials that produced an accepted event. Zero
    /// before any emission trial was made.
    pub fn efficiency(&self) -> f64 {
        if self.trials == 0 {
            return 0.0;
        }

        self.generated as f64 / self.trials as f64
    }

    /// Fraction of emission trials that overflowed the running maximum. Zero
    /// before any emission trial was made.
    pub fn overflow_fraction(&self) -> f64 {
        if self.trials == 0 {
            return 0.0;
        }

        self.overflow as f64 / self.trials as f64
    }
}

/// Final result of an integration run.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct IntegrationResult {
    /// The integral estimate.
    pub value: f64,
    /// Standard error of the integral estimate.
    pub error: f64,
    /// Chi-square consistency statistic of the production iterations.
    pub chi_sq: f64,
    /// Number of production iterations performed.
    pub iterations: usize,
    /// Counters accumulated over the whole run.
    pub statistics: RunStatistics,
}

/// Compute the number of calls on a given core, given the total number of cores
/// `n_cores`, the index `core` (zero-based) of the current thread as well as the
/// total number of calls `total_calls` to perform combined on all cores.
///
/// The calls are split as evenly as possible, with the remainder going to the
/// first cores. With more cores than calls the surplus cores get zero calls.
pub(crate) fn compute_calls_for_core(core: usize, n_cores: usize, total_calls: usize) -> usize {
    // make sure passed data is valid
    debug_assert!(core < n_cores);

    let calls_per_core = total_calls / n_cores;
    let remainder = total_calls % n_cores;

    calls_per_core + usize::from(core < remainder)
}

/// Compute the number of calls performed by all cores before the given one.
/// This is the per-call offset of this core into the iteration's random
/// stream.
pub(crate) fn compute_call_offset_for_core(core: usize, n_cores: usize, total_calls: usize) -> usize {
    debug_assert!(core < n_cores);

    let calls_per_core = total_calls / n_cores;
    let remainder = total_calls % n_cores;

    calls_per_core * core + core.min(remainder)
}
