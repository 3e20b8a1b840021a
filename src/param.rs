// Copyright 2016-2020 Patrick K. Albers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The immutable parameter block, grounded on
//! `examples/original_source/src/age/Age.cpp`'s `Param` constructor.

use derive_builder::Builder;

use crate::errors::EstimateError;
use crate::grid::Grid;

/// The selection caps a run can be tuned with, split out from `Parameters`
/// so callers (the CLI, or a future config file) can override a subset
/// without repeating the defaults for the rest.
#[derive(Debug, Clone, Copy, Builder)]
pub struct Tuning {
    #[builder(default = "100")]
    pub limit_sharers: usize,
    #[builder(default = "100")]
    pub outgroup_size: usize,
    #[builder(default = "1000")]
    pub breakpt_range: usize,
    #[builder(default = "5000")]
    pub nearest_range: usize,
}

impl Default for Tuning {
    fn default() -> Self {
        Tuning {
            limit_sharers: 100,
            outgroup_size: 100,
            breakpt_range: 1000,
            nearest_range: 5000,
        }
    }
}

/// Sample/marker counts, per-marker precomputed vectors, the discretised
/// coalescent time grid, and the selection caps shared across a whole run.
/// Immutable after construction.
pub struct Parameters {
    pub ng: usize,
    pub nh: usize,
    pub nm: usize,
    pub ne: f64,
    pub mutation_rate: f64,
    pub theta: f64,
    theta_manual: bool,
    theta_estimated: bool,

    pub boundary_first: usize,
    pub boundary_last: usize,

    pub position: Vec<f64>,
    /// Genetic distance rescaled by `4*Ne/100`.
    pub distance: Vec<f64>,
    pub frequency: Vec<f64>,
    pub log_het: Vec<f64>,
    pub log_hom: Vec<f64>,
    pub cum_log_hom: Vec<f64>,

    /// The discretised coalescent time grid (log-spaced by default).
    pub time_grid: Vec<f64>,
    pub log_time_grid: Vec<f64>,

    pub limit_sharers: usize,
    pub outgroup_size: usize,
    pub breakpt_range: usize,
    pub nearest_range: usize,
}

const MIN_GRID_TIME: f64 = 1e-8;

impl Parameters {
    pub fn build(grid: &Grid, ne: f64, mutation_rate: f64, n_times: usize, max_time: f64, log_scale: bool) -> Self {
        Self::build_with_tuning(grid, ne, mutation_rate, n_times, max_time, log_scale, Tuning::default())
    }

    pub fn build_with_tuning(grid: &Grid, ne: f64, mutation_rate: f64, n_times: usize, max_time: f64, log_scale: bool, tuning: Tuning) -> Self {
        let nm = grid.marker_count();
        let ng = grid.sample_count();
        let nh = ng * 2;
        let four_ne_100 = (4.0 * ne) / 100.0;

        let markers = grid.markers();
        let mut position = vec![0.0; nm];
        let mut distance = vec![0.0; nm];
        let mut frequency = vec![0.0; nm];
        let mut log_het = vec![0.0; nm];
        let mut log_hom = vec![0.0; nm];
        let mut cum_log_hom = vec![0.0; nm];

        for (i, marker) in markers.iter().enumerate() {
            position[i] = marker.position as f64;
            distance[i] = marker.dist_cm * four_ne_100;
            let f = marker.haplotype_counts.alt_count as f64 / nh as f64;
            frequency[i] = f;
            log_het[i] = (2.0 * f * (1.0 - f)).ln();
            log_hom[i] = (f.powi(2) + (1.0 - f).powi(2)).ln();
        }
        if nm > 0 {
            cum_log_hom[0] = log_hom[0];
            for i in 1..nm {
                cum_log_hom[i] = cum_log_hom[i - 1] + log_hom[i];
            }
        }

        let (time_grid, log_time_grid) = build_time_grid(n_times, max_time, log_scale);

        Parameters {
            ng,
            nh,
            nm,
            ne,
            mutation_rate,
            theta: 4.0 * ne * mutation_rate,
            theta_manual: false,
            theta_estimated: false,
            boundary_first: 0,
            boundary_last: nm.saturating_sub(1),
            position,
            distance,
            frequency,
            log_het,
            log_hom,
            cum_log_hom,
            time_grid,
            log_time_grid,
            limit_sharers: tuning.limit_sharers,
            outgroup_size: tuning.outgroup_size,
            breakpt_range: tuning.breakpt_range,
            nearest_range: tuning.nearest_range,
        }
    }

    /// Override theta manually (e.g. from a `--mut`/`--Ne` pair of explicit
    /// values). Fatal if theta was already estimated.
    pub fn set_theta(&mut self, theta: f64) -> Result<(), EstimateError> {
        if self.theta_estimated {
            return Err(EstimateError::ConflictingTheta);
        }
        self.theta = theta;
        self.theta_manual = true;
        Ok(())
    }

    /// Watterson estimator of theta from the observed marker density.
    pub fn estimate_theta(&mut self) -> Result<(), EstimateError> {
        if self.theta_manual {
            return Err(EstimateError::ConflictingTheta);
        }
        let range = (self.position[self.boundary_last] - self.position[self.boundary_first]).abs();
        let alpha: f64 = (1..self.nh).map(|i| 1.0 / i as f64).sum();
        self.theta = self.nm as f64 / (alpha * range);
        self.theta_estimated = true;
        Ok(())
    }
}

#[cfg(test)]
impl Parameters {
    /// Construct a minimal `Parameters` around an explicit time grid, for
    /// tests in other modules that only exercise posterior summarisation.
    pub(crate) fn for_time_grid(time_grid: Vec<f64>) -> Self {
        let log_time_grid = time_grid.iter().map(|t| t.ln()).collect();
        Parameters {
            ng: 0,
            nh: 0,
            nm: 0,
            ne: 0.0,
            mutation_rate: 0.0,
            theta: 0.0,
            theta_manual: false,
            theta_estimated: false,
            boundary_first: 0,
            boundary_last: 0,
            position: vec![],
            distance: vec![],
            frequency: vec![],
            log_het: vec![],
            log_hom: vec![],
            cum_log_hom: vec![],
            time_grid,
            log_time_grid,
            limit_sharers: 100,
            outgroup_size: 100,
            breakpt_range: 1000,
            nearest_range: 5000,
        }
    }
}

fn build_time_grid(n_times: usize, max_time: f64, log_scale: bool) -> (Vec<f64>, Vec<f64>) {
    let mut times = vec![0.0; n_times];
    if log_scale {
        let gen0 = MIN_GRID_TIME.ln();
        let step = (max_time.ln() - gen0) / (n_times - 1) as f64;
        times[0] = MIN_GRID_TIME;
        for i in 1..n_times {
            times[i] = (times[i - 1].ln() + step).exp();
        }
    } else {
        let step = max_time / (n_times - 1) as f64;
        for i in 1..n_times {
            times[i] = times[i - 1] + step;
        }
        times[0] = step / 2.0;
    }
    let log_times = times.iter().map(|t| t.ln()).collect();
    (times, log_times)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuning_builder_overrides_only_the_requested_field() {
        let tuning = TuningBuilder::default().limit_sharers(10).build().unwrap();
        assert_eq!(tuning.limit_sharers, 10);
        assert_eq!(tuning.outgroup_size, 100);
    }

    #[test]
    fn time_grid_is_monotone_and_spans_range() {
        let (times, _) = build_time_grid(1024, 40.0, true);
        assert_eq!(times.len(), 1024);
        assert!(times.windows(2).all(|w| w[1] > w[0]));
        assert!((times[0] - MIN_GRID_TIME).abs() < 1e-12);
        assert!((times[1023] - 40.0).abs() < 1e-6);
    }
}
