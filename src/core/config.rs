//! Steering parameters consumed by the integrators.
//!
//! Loading these from a steering card or command line is the job of the
//! caller; this module only defines the values and their valid ranges.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn assert_range<T: Copy + PartialOrd + std::fmt::Display>(
    value: T,
    min: T,
    max: T,
    name: &str,
) -> Result<(), Error> {
    if value < min || value > max {
        return Err(Error::Configuration(format!(
            "{} = {} outside allowed range [{}, {}]",
            name, value, min, max
        )));
    }

    Ok(())
}

// for parameters whose lower bound would disable the stop condition
fn assert_range_exclusive_min<T: Copy + PartialOrd + std::fmt::Display>(
    value: T,
    min: T,
    max: T,
    name: &str,
) -> Result<(), Error> {
    if value <= min || value > max {
        return Err(Error::Configuration(format!(
            "{} = {} outside allowed range ({}, {}]",
            name, value, min, max
        )));
    }

    Ok(())
}

/// Steering parameters of the VEGAS integrator.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct VegasParams {
    /// Number of grid bins per dimension. Must be even and positive.
    pub bins: usize,
    /// Grid refinement damping strength. Larger values adapt the grid more
    /// aggressively per iteration. Allowed range $[1, 10]$.
    pub lambda: f64,
    /// Number of integrand evaluations per iteration.
    pub ncall: usize,
    /// Minimum number of production iterations.
    pub iterations: usize,
    /// Convergence ceiling for the chi-square consistency statistic.
    pub chi2max: f64,
    /// Target relative error of the integral estimate.
    pub precision: f64,
    /// Verbosity: `-1` quiet, `0` per-iteration estimates, `1` additionally
    /// dumps the per-bin grid data after each iteration.
    pub debug: i32,
    /// Minimum wall time per iteration. If a burn-in iteration finishes
    /// faster, the call budget is scaled up proportionally to amortize the
    /// thread-launch overhead. `Duration::new(0, 0)` disables the
    /// calibration, which keeps runs fully deterministic.
    pub min_iteration_time: Duration,
}

impl Default for VegasParams {
    fn default() -> Self {
        Self {
            bins: 128,
            lambda: 1.5,
            ncall: 20_000,
            iterations: 15,
            chi2max: 5.0,
            precision: 0.01,
            debug: -1,
            min_iteration_time: Duration::from_millis(100),
        }
    }
}

impl VegasParams {
    /// Check all parameters against their allowed ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the offending parameter.
    pub fn validate(&self) -> Result<(), Error> {
        if self.bins == 0 || self.bins % 2 != 0 {
            return Err(Error::Configuration(format!(
                "BINS = {} must be an even positive number",
                self.bins
            )));
        }

        assert_range(self.lambda, 1.0, 10.0, "LAMBDA")?;
        assert_range(self.ncall, 50, 1_000_000_000, "NCALL")?;
        assert_range(self.iterations, 1, 1_000_000_000, "ITER")?;
        assert_range_exclusive_min(self.chi2max, 0.0, 1e3, "CHI2MAX")?;
        assert_range_exclusive_min(self.precision, 0.0, 1.0, "PRECISION")?;

        if ![-1, 0, 1].contains(&self.debug) {
            return Err(Error::Configuration(format!(
                "DEBUG = {} must be one of -1, 0, 1",
                self.debug
            )));
        }

        Ok(())
    }
}

/// Steering parameters of the flat (non-adaptive) sampler.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FlatParams {
    /// Target relative error of the integral estimate.
    pub precision: f64,
    /// Minimum number of integrand evaluations before the precision
    /// condition is checked.
    pub min_events: u64,
}

impl Default for FlatParams {
    fn default() -> Self {
        Self {
            precision: 0.01,
            min_events: 100_000,
        }
    }
}

impl FlatParams {
    /// Check all parameters against their allowed ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the offending parameter.
    pub fn validate(&self) -> Result<(), Error> {
        assert_range_exclusive_min(self.precision, 0.0, 1.0, "FLAT::PRECISION")?;
        assert_range(self.min_events, 10, 1_000_000_000, "FLAT::MIN_EVENTS")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_are_valid() {
        assert!(VegasParams::default().validate().is_ok());
        assert!(FlatParams::default().validate().is_ok());
    }

    #[test]
    fn odd_bin_count_is_rejected() {
        let params = VegasParams {
            bins: 127,
            ..VegasParams::default()
        };

        let message = params.validate().unwrap_err().to_string();
        assert!(message.contains("BINS"));
    }

    #[test]
    fn out_of_range_lambda_is_rejected() {
        let params = VegasParams {
            lambda: 0.5,
            ..VegasParams::default()
        };

        let message = params.validate().unwrap_err().to_string();
        assert!(message.contains("LAMBDA"));
    }

    #[test]
    fn zero_precision_is_rejected() {
        // precision 0 can never be reached and would extend the run forever
        let params = VegasParams {
            precision: 0.0,
            ..VegasParams::default()
        };
        let message = params.validate().unwrap_err().to_string();
        assert!(message.contains("PRECISION"));

        let params = FlatParams {
            precision: 0.0,
            ..FlatParams::default()
        };
        let message = params.validate().unwrap_err().to_string();
        assert!(message.contains("PRECISION"));
    }

    #[test]
    fn zero_chi2max_is_rejected() {
        let params = VegasParams {
            chi2max: 0.0,
            ..VegasParams::default()
        };

        let message = params.validate().unwrap_err().to_string();
        assert!(message.contains("CHI2MAX"));
    }

    #[test]
    fn tiny_flat_sample_is_rejected() {
        let params = FlatParams {
            min_events: 5,
            ..FlatParams::default()
        };

        assert!(params.validate().is_err());
    }
}
