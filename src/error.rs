//! Error types shared by all integrators.

use thiserror::Error;

/// A failure reported by an integrand evaluation.
///
/// Integrand faults are assumed to be non-transient: the worker that observes
/// one stops evaluating, and the fault is surfaced as [`Error::WorkerFault`]
/// once all workers of the iteration have been joined.
#[derive(Clone, Debug, Error)]
#[error("{0}")]
pub struct IntegrandFault(pub String);

/// A persistent failure reported by an event sink.
#[derive(Clone, Debug, Error)]
#[error("{0}")]
pub struct SinkFault(pub String);

/// Everything that can go wrong during integration or event generation.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed integration region or out-of-range steering parameter.
    /// Rejected before any integrand evaluation.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The integral estimate became non-finite or collapsed below the
    /// numerical floor. Retrying cannot help; the integrand or its cuts need
    /// fixing.
    #[error("integral estimate diverged: {0}")]
    NumericalDivergence(String),

    /// The chi-square consistency statistic stayed above the hard limit even
    /// after the maximum number of call-budget escalations.
    #[error(
        "no convergence: chi2 = {chi_sq:.1} still above {limit:.1} after {escalations} \
         call-budget escalations"
    )]
    ConvergenceStall {
        /// Last observed chi-square statistic.
        chi_sq: f64,
        /// The hard chi-square limit that was exceeded.
        limit: f64,
        /// How often the call budget was escalated before giving up.
        escalations: usize,
    },

    /// An integrand fault escaped a worker. Propagated after all workers of
    /// the iteration have been joined.
    #[error("worker fault: {0}")]
    WorkerFault(String),

    /// The event sink reported a persistent failure; generation halts.
    #[error("event sink failure: {0}")]
    OutputFault(String),
}

impl From<IntegrandFault> for Error {
    fn from(fault: IntegrandFault) -> Self {
        Self::WorkerFault(fault.0)
    }
}

impl From<SinkFault> for Error {
    fn from(fault: SinkFault) -> Self {
        Self::OutputFault(fault.0)
    }
}
