use mcvegas::callbacks::SinkCallback;
use mcvegas::core::config::VegasParams;
use mcvegas::core::{AuxDiagnostics, CallResult, Integrand};
use mcvegas::error::{Error, IntegrandFault};
use mcvegas::events::VecSink;
use mcvegas::grid::GridInit;
use mcvegas::integrators::vegas::Vegas;

use rand::Rng;
use rand_pcg::Pcg64;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;

use assert_approx_eq::assert_approx_eq;

fn assert_eq_rng<R>(lhs: &R, rhs: &R)
where
    R: Rng + Serialize,
{
    assert_eq!(
        serde_json::to_string(lhs).unwrap(),
        serde_json::to_string(rhs).unwrap()
    );
}

fn rng() -> Pcg64 {
    Pcg64::new(0xcafef00dd15ea5e5, 0xa02bdbf7bb3c0a7ac28fa16a64abf96)
}

/// Parameters small enough for tests, with the wall-time calibration
/// disabled so that runs are deterministic.
fn params() -> VegasParams {
    VegasParams {
        bins: 10,
        ncall: 1000,
        iterations: 5,
        min_iteration_time: Duration::new(0, 0),
        ..VegasParams::default()
    }
}

struct ConstantIntegrand {}

impl Integrand for ConstantIntegrand {
    fn call(&self, _: &[f64], importance_weight: f64) -> Result<CallResult, IntegrandFault> {
        Ok(CallResult::new(importance_weight, AuxDiagnostics::default()))
    }

    fn dim(&self) -> usize {
        1
    }
}

struct LinearIntegrand {}

impl Integrand for LinearIntegrand {
    fn call(&self, x: &[f64], importance_weight: f64) -> Result<CallResult, IntegrandFault> {
        Ok(CallResult::new(
            2.0 * x[0] * importance_weight,
            AuxDiagnostics::default(),
        ))
    }

    fn dim(&self) -> usize {
        1
    }
}

/// Separable product with unit integral over the unit square.
struct SeparableIntegrand {}

impl Integrand for SeparableIntegrand {
    fn call(&self, x: &[f64], importance_weight: f64) -> Result<CallResult, IntegrandFault> {
        Ok(CallResult::new(
            4.0 * x[0] * x[1] * importance_weight,
            AuxDiagnostics::default(),
        ))
    }

    fn dim(&self) -> usize {
        2
    }
}

#[test]
fn constant_integrand_converges_to_the_exact_result() {
    let integrand = ConstantIntegrand {};
    let mut vegas = Vegas::new(&integrand, &[0.0], &[1.0], params(), rng()).unwrap();

    let result = vegas
        .integrate(1, GridInit::Cold, &SinkCallback {})
        .unwrap();

    assert_approx_eq!(result.value, 1.0, 0.05);
    assert!(result.error < 0.05);
    assert!(result.chi_sq < 5.0);
    assert_eq!(result.iterations, 5);
    // 3 burn-in + 5 production iterations of 1000 calls each
    assert_eq!(result.statistics.evaluations, 8000);
}

#[test]
fn linear_integrand_converges_to_the_exact_result() {
    let integrand = LinearIntegrand {};
    let mut vegas = Vegas::new(
        &integrand,
        &[0.0],
        &[1.0],
        VegasParams {
            ncall: 10_000,
            iterations: 10,
            min_iteration_time: Duration::new(0, 0),
            ..VegasParams::default()
        },
        rng(),
    )
    .unwrap();

    let result = vegas
        .integrate(2, GridInit::Cold, &SinkCallback {})
        .unwrap();

    assert_approx_eq!(result.value, 1.0, 0.05);
    assert!(result.chi_sq < 5.0);
}

#[test]
fn separable_integrand_converges_in_two_dimensions() {
    let integrand = SeparableIntegrand {};
    let mut vegas = Vegas::new(
        &integrand,
        &[0.0, 0.0],
        &[1.0, 1.0],
        VegasParams {
            ncall: 10_000,
            iterations: 10,
            min_iteration_time: Duration::new(0, 0),
            ..VegasParams::default()
        },
        rng(),
    )
    .unwrap();

    let result = vegas
        .integrate(2, GridInit::Cold, &SinkCallback {})
        .unwrap();

    assert_approx_eq!(result.value, 1.0, 0.05);
}

#[test]
fn results_are_reproducible_and_independent_of_the_core_count() {
    let integrand = LinearIntegrand {};

    // targets loose enough that every run converges in the allotted
    // iterations, so all three runs consume the same random stream
    let params = VegasParams {
        chi2max: 100.0,
        precision: 0.5,
        ..params()
    };

    let mut first = Vegas::new(&integrand, &[0.0], &[1.0], params.clone(), rng()).unwrap();
    let mut second = Vegas::new(&integrand, &[0.0], &[1.0], params.clone(), rng()).unwrap();
    let mut third = Vegas::new(&integrand, &[0.0], &[1.0], params, rng()).unwrap();

    let result_one_core = first.integrate(1, GridInit::Cold, &SinkCallback {}).unwrap();
    let result_same = second.integrate(1, GridInit::Cold, &SinkCallback {}).unwrap();
    let result_three_cores = third.integrate(3, GridInit::Cold, &SinkCallback {}).unwrap();

    // identical runs are bit-identical
    assert_eq!(result_one_core.value, result_same.value);
    assert_eq!(result_one_core.error, result_same.error);
    assert_eq_rng(first.rng(), second.rng());

    // the same random stream is consumed regardless of the core count
    assert_eq_rng(first.rng(), third.rng());
    assert_approx_eq!(result_one_core.value, result_three_cores.value, 1e-10);
    assert_approx_eq!(result_one_core.error, result_three_cores.error, 1e-10);
}

#[test]
fn more_cores_than_calls_leaves_surplus_cores_idle() {
    let integrand = ConstantIntegrand {};
    let mut vegas = Vegas::new(
        &integrand,
        &[0.0],
        &[1.0],
        VegasParams {
            ncall: 50,
            iterations: 2,
            // targets loose enough that the run converges in the allotted
            // iterations, so the evaluation count stays exact
            chi2max: 100.0,
            precision: 0.5,
            ..params()
        },
        rng(),
    )
    .unwrap();

    let result = vegas
        .integrate(64, GridInit::Cold, &SinkCallback {})
        .unwrap();

    assert_approx_eq!(result.value, 1.0, 0.05);
    // 3 burn-in + 2 production iterations of exactly 50 calls each
    assert_eq!(result.statistics.evaluations, 250);
}

struct FaultyIntegrand {}

impl Integrand for FaultyIntegrand {
    fn call(&self, x: &[f64], importance_weight: f64) -> Result<CallResult, IntegrandFault> {
        if x[0] > 0.9 {
            return Err(IntegrandFault("amplitude table lookup failed".to_string()));
        }

        Ok(CallResult::new(importance_weight, AuxDiagnostics::default()))
    }

    fn dim(&self) -> usize {
        1
    }
}

#[test]
fn integrand_faults_are_propagated_from_the_workers() {
    let integrand = FaultyIntegrand {};
    let mut vegas = Vegas::new(&integrand, &[0.0], &[1.0], params(), rng()).unwrap();

    let result = vegas.integrate(3, GridInit::Cold, &SinkCallback {});

    match result {
        Err(Error::WorkerFault(message)) => {
            assert!(message.contains("amplitude table lookup failed"))
        }
        _ => panic!("expected a worker fault"),
    }
}

struct ZeroIntegrand {}

impl Integrand for ZeroIntegrand {
    fn call(&self, _: &[f64], _: f64) -> Result<CallResult, IntegrandFault> {
        Ok(CallResult::new(0.0, AuxDiagnostics::default()))
    }

    fn dim(&self) -> usize {
        1
    }
}

#[test]
fn vanishing_integrand_is_reported_as_divergence() {
    let integrand = ZeroIntegrand {};
    let mut vegas = Vegas::new(&integrand, &[0.0], &[1.0], params(), rng()).unwrap();

    let result = vegas.integrate(1, GridInit::Cold, &SinkCallback {});

    assert!(matches!(result, Err(Error::NumericalDivergence(_))));
}

#[test]
fn odd_bin_count_is_rejected() {
    let integrand = ConstantIntegrand {};
    let result = Vegas::new(
        &integrand,
        &[0.0],
        &[1.0],
        VegasParams {
            bins: 7,
            ..params()
        },
        rng(),
    );

    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[test]
fn mismatched_region_dimension_is_rejected() {
    let integrand = ConstantIntegrand {};
    let result = Vegas::new(&integrand, &[0.0, 0.0], &[1.0, 1.0], params(), rng());

    assert!(matches!(result, Err(Error::Configuration(_))));
}

struct SlopeIntegrand {}

impl Integrand for SlopeIntegrand {
    fn call(&self, x: &[f64], importance_weight: f64) -> Result<CallResult, IntegrandFault> {
        Ok(CallResult::new(
            (1.5 - x[0]) * importance_weight,
            AuxDiagnostics::default(),
        ))
    }

    fn dim(&self) -> usize {
        1
    }
}

#[test]
fn generation_produces_exactly_the_requested_unweighted_events() {
    let integrand = SlopeIntegrand {};
    let mut vegas = Vegas::new(&integrand, &[0.0], &[1.0], params(), rng()).unwrap();

    vegas
        .integrate(2, GridInit::Cold, &SinkCallback {})
        .unwrap();

    let sink = Mutex::new(VecSink::new());
    let statistics = vegas.generate(2, false, 1000, &sink).unwrap();

    let events = sink.into_inner().unwrap().into_events();

    assert_eq!(events.len(), 1000);
    assert_eq!(statistics.generated, 1000);
    assert!(statistics.trials >= 1000);
    assert!(statistics.overflow_fraction() < 0.05);
    assert!(statistics.efficiency() > 0.0 && statistics.efficiency() <= 1.0);

    for event in &events {
        assert_eq!(event.weight, 1.0);
        assert!(event.x[0] >= 0.0 && event.x[0] < 1.0);
    }
}

#[test]
fn weighted_generation_accepts_every_valid_sample() {
    let integrand = SlopeIntegrand {};
    let mut vegas = Vegas::new(&integrand, &[0.0], &[1.0], params(), rng()).unwrap();

    vegas
        .integrate(1, GridInit::Cold, &SinkCallback {})
        .unwrap();

    let sink = Mutex::new(VecSink::new());
    let statistics = vegas.generate(1, true, 200, &sink).unwrap();

    assert_eq!(statistics.generated, 200);
    assert_eq!(statistics.trials, 200);
    assert_eq!(statistics.overflow, 0);

    for event in sink.into_inner().unwrap().events() {
        assert!(event.weight > 0.0);
    }
}

#[test]
fn generation_requires_a_preceding_integration() {
    let integrand = SlopeIntegrand {};
    let mut vegas = Vegas::new(&integrand, &[0.0], &[1.0], params(), rng()).unwrap();

    let sink = Mutex::new(VecSink::new());
    let result = vegas.generate(1, false, 10, &sink);

    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[test]
fn warm_start_reuses_the_adapted_grid() {
    let integrand = LinearIntegrand {};
    let mut vegas = Vegas::new(&integrand, &[0.0], &[1.0], params(), rng()).unwrap();

    vegas
        .integrate(1, GridInit::Cold, &SinkCallback {})
        .unwrap();
    let result = vegas
        .integrate(1, GridInit::Warm, &SinkCallback {})
        .unwrap();

    assert_approx_eq!(result.value, 1.0, 0.05);
    assert!(result.chi_sq < 5.0);
}
