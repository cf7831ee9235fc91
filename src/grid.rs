//! The adaptive importance sampling grid.
//!
//! Each dimension of the integration region is partitioned into the same
//! number of bins. Sampling draws a uniform fraction per dimension, picks the
//! corresponding bin and maps the in-bin fraction linearly onto the bin,
//! which samples the region with a density inversely proportional to the bin
//! widths. Dividing by the returned Jacobian removes the resulting bias from
//! a weighted contribution. Between iterations the accumulated per-bin
//! importance statistics drive a rebinning step that narrows bins where the
//! integrand contributes most.

use crate::error::Error;
use serde::{Deserialize, Serialize};

/// Floor given to bins without accumulated importance before the damping
/// step, to avoid dividing by zero during rebinning.
const IMPORTANCE_FLOOR: f64 = 1e-30;

/// How the grid is prepared at the start of an integration phase.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum GridInit {
    /// Reset all bin edges to uniform widths and clear the importance data.
    Cold,
    /// Keep the adapted bin edges, clear only the importance data.
    Warm,
    /// Keep the adapted bin edges and mark the grid read-only for event
    /// generation. Subsequent [`AdaptiveGrid::refine`] calls are no-ops.
    Frozen,
}

/// One coordinate produced by the unit-to-region mapping.
#[derive(Clone, Copy, Debug)]
pub struct MappedCoordinate {
    /// The bin the sample fell into.
    pub bin: usize,
    /// The region coordinate.
    pub x: f64,
    /// The local Jacobian of the mapping, bin width times bin count.
    pub jacobian: f64,
}

/// Per-dimension bin edges with accumulated importance statistics.
///
/// Invariants: edges within a dimension are strictly increasing in the unit
/// coordinate, the bin count is identical across dimensions, and the grid
/// persists across iterations unless explicitly re-initialized.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AdaptiveGrid {
    bins: usize,
    lower: Vec<f64>,
    /// Signed region length per dimension.
    length: Vec<f64>,
    /// Bin edges in unit coordinates, `bins + 1` entries per dimension.
    edges: Vec<Vec<f64>>,
    /// Accumulated per-(dimension, bin) sums of the importance-weighted
    /// integrand values.
    weight: Vec<Vec<f64>>,
    /// Accumulated per-(dimension, bin) sums of the squared values. This is
    /// the statistic the rebinning acts on.
    weight_sq: Vec<Vec<f64>>,
    frozen: bool,
}

impl AdaptiveGrid {
    /// Create a uniform grid over the axis-aligned region spanned by
    /// `lower` and `upper`. A reversed bound pair keeps its direction as a
    /// signed length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the dimension count is zero, the
    /// bin count is odd or zero, or any bound pair is degenerate or
    /// non-finite.
    pub fn new(lower: &[f64], upper: &[f64], bins: usize) -> Result<Self, Error> {
        if lower.is_empty() || lower.len() != upper.len() {
            return Err(Error::Configuration(format!(
                "integration region needs matching, non-empty bounds (got {} and {})",
                lower.len(),
                upper.len()
            )));
        }

        if bins == 0 || bins % 2 != 0 {
            return Err(Error::Configuration(format!(
                "BINS = {} must be an even positive number",
                bins
            )));
        }

        let mut length = Vec::with_capacity(lower.len());

        for (dim, (&lo, &hi)) in lower.iter().zip(upper.iter()).enumerate() {
            let len = hi - lo;

            if !len.is_finite() || len == 0.0 {
                return Err(Error::Configuration(format!(
                    "degenerate integration region in dimension {}: [{}, {}]",
                    dim, lo, hi
                )));
            }

            length.push(len);
        }

        let dim = lower.len();
        let mut grid = Self {
            bins,
            lower: lower.to_vec(),
            length,
            edges: vec![Vec::new(); dim],
            weight: vec![vec![0.0; bins]; dim],
            weight_sq: vec![vec![0.0; bins]; dim],
            frozen: false,
        };
        grid.reset_edges();

        Ok(grid)
    }

    /// The dimension of the integration region.
    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    /// The number of bins per dimension.
    pub const fn bins(&self) -> usize {
        self.bins
    }

    /// Prepare the grid for a new integration phase.
    pub fn init(&mut self, mode: GridInit) {
        match mode {
            GridInit::Cold => {
                self.reset_edges();
                self.clear_importance();
                self.frozen = false;
            }
            GridInit::Warm => {
                self.clear_importance();
                self.frozen = false;
            }
            GridInit::Frozen => {
                self.frozen = true;
            }
        }
    }

    fn reset_edges(&mut self) {
        let bins = self.bins;

        for edges in &mut self.edges {
            *edges = (0..=bins).map(|i| i as f64 / bins as f64).collect();
        }
    }

    /// Zero the per-bin accumulators for the next iteration.
    pub fn clear_importance(&mut self) {
        for dim in 0..self.dim() {
            for bin in 0..self.bins {
                self.weight[dim][bin] = 0.0;
                self.weight_sq[dim][bin] = 0.0;
            }
        }
    }

    /// Map a uniform fraction `y` in $[0, 1)$ onto the region coordinate of
    /// dimension `dim`. The Jacobian is the inverse sampling density of this
    /// dimension: bin width times bin count, in region units.
    pub fn map_unit(&self, dim: usize, y: f64) -> MappedCoordinate {
        let scaled = y * self.bins as f64;
        let bin = (scaled as usize).min(self.bins - 1);
        let frac = scaled - bin as f64;

        let left = self.edges[dim][bin];
        let width = self.edges[dim][bin + 1] - left;

        let unit = left + frac * width;

        MappedCoordinate {
            bin,
            x: self.lower[dim] + unit * self.length[dim],
            jacobian: width * self.bins as f64 * self.length[dim],
        }
    }

    /// Map a whole point. The unit fractions in `ys` are mapped dimension by
    /// dimension into `point` and `bins`, and the product of the
    /// per-dimension Jacobians is returned as the total importance weight of
    /// the sample.
    pub fn sample(&self, ys: &[f64], point: &mut [f64], bins: &mut [usize]) -> f64 {
        debug_assert_eq!(ys.len(), self.dim());

        let mut jacobian = 1.0;

        for (dim, &y) in ys.iter().enumerate() {
            let mapped = self.map_unit(dim, y);
            point[dim] = mapped.x;
            bins[dim] = mapped.bin;
            jacobian *= mapped.jacobian;
        }

        jacobian
    }

    /// Merge the per-bin buffers of one worker into the grid accumulators.
    /// Called by the scheduler after all workers of an iteration have been
    /// joined.
    pub fn merge_importance(&mut self, weight: &[Vec<f64>], weight_sq: &[Vec<f64>]) {
        debug_assert_eq!(weight.len(), self.dim());

        for dim in 0..self.dim() {
            for bin in 0..self.bins {
                self.weight[dim][bin] += weight[dim][bin];
                self.weight_sq[dim][bin] += weight_sq[dim][bin];
            }
        }
    }

    /// Accumulated `(sum, sum of squares)` of a single bin.
    pub fn importance(&self, dim: usize, bin: usize) -> (f64, f64) {
        (self.weight[dim][bin], self.weight_sq[dim][bin])
    }

    /// Rebin every dimension according to the accumulated importance
    /// statistics. No-op on a frozen grid.
    ///
    /// For each dimension the accumulated $\sum f^2$ profile is smoothed with
    /// a three-point moving average, damped with the exponent `lambda`, and
    /// the bin edges are redistributed so that each new bin captures an equal
    /// share of the damped importance mass.
    pub fn refine(&mut self, lambda: f64) {
        if self.frozen {
            return;
        }

        for dim in 0..self.dim() {
            let damped = damp_profile(&self.weight_sq[dim], lambda);
            redistribute_edges(&mut self.edges[dim], &damped);
        }
    }
}

/// Smooth the raw importance profile and compress its dynamic range.
fn damp_profile(raw: &[f64], lambda: f64) -> Vec<f64> {
    let n = raw.len();
    let mut smoothed = raw.to_vec();

    if n > 2 {
        smoothed[0] = (7.0 * raw[0] + raw[1]) / 8.0;
        smoothed[n - 1] = (raw[n - 2] + 7.0 * raw[n - 1]) / 8.0;
        for i in 1..n - 1 {
            smoothed[i] = (raw[i - 1] + 6.0 * raw[i] + raw[i + 1]) / 8.0;
        }
    }

    let average = smoothed.iter().sum::<f64>() / n as f64;

    smoothed
        .iter()
        .map(|&d| {
            // empty bins get a floor instead of a division by zero
            let r = d.max(IMPORTANCE_FLOOR) / average.max(IMPORTANCE_FLOOR);

            if (r - 1.0).abs() < 1e-12 {
                1.0
            } else {
                ((r - 1.0) / r.ln()).powf(lambda)
            }
        })
        .collect()
}

/// Place new bin edges so that each bin captures an equal share of the
/// damped importance mass, interpolating linearly within the old bins.
fn redistribute_edges(edges: &mut Vec<f64>, damped: &[f64]) {
    let bins = damped.len();
    let total: f64 = damped.iter().sum();

    if !(total > 0.0) || !total.is_finite() {
        return;
    }

    let per_bin = total / bins as f64;
    let mut new_edges = edges.clone();

    let mut accumulated = 0.0;
    let mut old_bin = 0;

    for (i, new_edge) in new_edges.iter_mut().enumerate().take(bins).skip(1) {
        let target = i as f64 * per_bin;

        while old_bin < bins - 1 && accumulated + damped[old_bin] < target {
            accumulated += damped[old_bin];
            old_bin += 1;
        }

        let frac = ((target - accumulated) / damped[old_bin]).min(1.0);
        *new_edge = edges[old_bin] + frac * (edges[old_bin + 1] - edges[old_bin]);
    }

    *edges = new_edges;
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    const TOLERANCE: f64 = 1e-12;

    fn unit_grid(dim: usize, bins: usize) -> AdaptiveGrid {
        AdaptiveGrid::new(&vec![0.0; dim], &vec![1.0; dim], bins).unwrap()
    }

    #[test]
    fn rejects_bad_regions() {
        assert!(AdaptiveGrid::new(&[], &[], 10).is_err());
        assert!(AdaptiveGrid::new(&[0.0], &[0.0], 10).is_err());
        assert!(AdaptiveGrid::new(&[0.0], &[f64::INFINITY], 10).is_err());
        assert!(AdaptiveGrid::new(&[0.0, 0.0], &[1.0], 10).is_err());
    }

    #[test]
    fn rejects_odd_bin_count() {
        assert!(AdaptiveGrid::new(&[0.0], &[1.0], 9).is_err());
        assert!(AdaptiveGrid::new(&[0.0], &[1.0], 0).is_err());
    }

    #[test]
    fn uniform_grid_maps_linearly() {
        let grid = unit_grid(1, 10);

        let mapped = grid.map_unit(0, 0.25);
        assert_eq!(mapped.bin, 2);
        assert_approx_eq!(mapped.x, 0.25, TOLERANCE);
        assert_approx_eq!(mapped.jacobian, 1.0, TOLERANCE);

        // the upper edge of the unit interval stays in the last bin
        let mapped = grid.map_unit(0, 1.0 - 1e-16);
        assert_eq!(mapped.bin, 9);
    }

    #[test]
    fn jacobian_product_equals_region_volume_on_a_uniform_grid() {
        let grid = AdaptiveGrid::new(&[0.0, -1.0], &[2.0, 1.0], 4).unwrap();
        let mut point = [0.0; 2];
        let mut bins = [0; 2];

        let jacobian = grid.sample(&[0.3, 0.7], &mut point, &mut bins);

        assert_approx_eq!(jacobian, 4.0, TOLERANCE);
        assert_approx_eq!(point[0], 0.6, TOLERANCE);
        assert_approx_eq!(point[1], 0.4, TOLERANCE);
    }

    #[test]
    fn refinement_is_idempotent_on_a_matched_profile() {
        let mut grid = unit_grid(1, 8);

        // equal importance mass per bin: the grid is already matched
        let weight_sq = vec![vec![1.0; 8]];
        let weight = vec![vec![1.0; 8]];
        grid.merge_importance(&weight, &weight_sq);

        let before = grid.edges[0].clone();
        grid.refine(1.5);

        for (a, b) in before.iter().zip(grid.edges[0].iter()) {
            assert_approx_eq!(a, b, 1e-10);
        }
    }

    #[test]
    fn refinement_narrows_bins_under_a_peak() {
        let mut grid = unit_grid(1, 8);

        // all importance mass in the first bin
        let mut weight_sq = vec![vec![0.0; 8]];
        weight_sq[0][0] = 1.0;
        grid.merge_importance(&weight_sq.clone(), &weight_sq);

        grid.refine(1.5);

        let edges = &grid.edges[0];
        let first = edges[1] - edges[0];
        let last = edges[8] - edges[7];

        assert!(first < 1.0 / 8.0);
        assert!(last > first);

        // edges stay strictly increasing
        for pair in edges.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn empty_bins_do_not_produce_non_finite_edges() {
        let mut grid = unit_grid(1, 4);
        grid.refine(2.0);

        for &edge in &grid.edges[0] {
            assert!(edge.is_finite());
        }
    }

    #[test]
    fn frozen_grid_is_not_refined() {
        let mut grid = unit_grid(1, 4);
        let mut weight_sq = vec![vec![0.0; 4]];
        weight_sq[0][0] = 1.0;
        grid.merge_importance(&weight_sq.clone(), &weight_sq);

        grid.init(GridInit::Frozen);
        let before = grid.edges[0].clone();
        grid.refine(1.5);

        assert_eq!(before, grid.edges[0]);
    }

    #[test]
    fn cold_init_resets_the_edges() {
        let mut grid = unit_grid(1, 4);
        let mut weight_sq = vec![vec![0.0; 4]];
        weight_sq[0][0] = 1.0;
        grid.merge_importance(&weight_sq.clone(), &weight_sq);
        grid.refine(1.5);

        grid.init(GridInit::Cold);

        for (i, &edge) in grid.edges[0].iter().enumerate() {
            assert_approx_eq!(edge, i as f64 / 4.0, TOLERANCE);
        }
        assert_eq!(grid.importance(0, 0), (0.0, 0.0));
    }
}
