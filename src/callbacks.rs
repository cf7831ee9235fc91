//! Implementation of different callback functions.

use crate::core::estimators::{BasicEstimators, Estimators, GlobalAccumulator, IterationEstimators};

/// Trait for implementing callbacks for iterative MC algorithms.
pub trait Callback {
    /// This method is called after each successfully finished iteration and may print information
    /// about it. `iterations` holds the per-iteration estimators of the current phase, `global`
    /// the cumulative combination over them.
    fn print(&self, iterations: &[IterationEstimators], global: &GlobalAccumulator);
}

/// A callback function that does nothing.
pub struct SinkCallback {}

impl Callback for SinkCallback {
    fn print(&self, _: &[IterationEstimators], _: &GlobalAccumulator) {}
}

/// A callback function that prints the result of each individual iteration.
pub struct SimpleCallback {}

impl Callback for SimpleCallback {
    fn print(&self, iterations: &[IterationEstimators], _: &GlobalAccumulator) {
        let iteration = iterations.len();
        // Make sure that there is at least one iteration
        // otherwise do nothing.
        if let Some(estimators) = iterations.last() {
            println!("iteration {} finished.", iteration - 1);
            println!(
                "this iteration: N={} E={} \u{b1} {}",
                estimators.calls(),
                estimators.mean(),
                estimators.std()
            );
        }
    }
}

/// Cumulative callback that shows the result of the individual iteration
/// together with the weighted combination over all previous iterations.
pub struct SimpleCumulativeCallback {}

impl Callback for SimpleCumulativeCallback {
    fn print(&self, iterations: &[IterationEstimators], global: &GlobalAccumulator) {
        let iteration = iterations.len();

        if iteration == 0 {
            return;
        }

        let estimators = &iterations[iteration - 1];

        println!(
            "[iteration {}: N={} E={} \u{b1} {}] [Cumulative: E={} \u{b1} {}, chi2/dof={}]",
            iteration - 1,
            estimators.calls(),
            estimators.mean(),
            estimators.std(),
            global.value(),
            global.error(),
            global.chi_sq()
        );
    }
}
