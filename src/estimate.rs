// Copyright 2016-2020 Patrick K. Albers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The composite likelihood estimator: aggregates every pair's CCF at a
//! focal site into a posterior over the time grid, summarises it, and runs
//! a filtering pass that marks outlier pairs `pass=false` before the
//! adjusted estimate is recomputed over the survivors.
//!
//! Grounded on `examples/original_source/src/age/AgeEstimate.cpp`'s
//! `Estimate::include` / `Estimate::estimate`, and
//! `examples/original_source/src/age/AgeInfer.cpp`'s `Site::estimate` /
//! `Site::filter` (the raw-then-filter-then-adjusted two-pass driver and the
//! `ncon(t)/ndis(t)/wsum(t)` threshold search).

use crate::param::Parameters;

/// One pair's contribution to a site under one clock: its CCF (already
/// flipped to `1 - CDF` for discordant pairs, per `ccf::Ccf`), whether it is
/// concordant, its three quantile times, and the `good`/`pass` flags that
/// gate inclusion.
#[derive(Debug, Clone)]
pub struct PairContribution {
    pub cdf: Vec<f64>,
    pub concordant: bool,
    pub q25: f64,
    pub q50: f64,
    pub q75: f64,
    pub good: bool,
    pub pass: bool,
}

/// Discard contributions whose quantiles have drifted to (or past) the edge
/// of the time grid: a `q25`/`q75` sitting at the grid's upper/lower bound,
/// or a `q50` sitting outside the open interval, means the pair's CCF is
/// uninformative at this grid resolution rather than genuinely concordant or
/// discordant with the rest of the site, so it is marked not `good` and
/// excluded from every downstream pass (raw and adjusted alike).
pub fn validate_quantile_range(contributions: &mut [PairContribution], time_grid: &[f64]) {
    let (Some(&min_t), Some(&max_t)) = (time_grid.first(), time_grid.last()) else {
        return;
    };
    for c in contributions.iter_mut() {
        if !c.good {
            continue;
        }
        if c.q25 >= max_t || c.q50 <= min_t || c.q50 >= max_t || c.q75 <= min_t {
            c.good = false;
        }
    }
}

/// Central tendency and spread of a posterior over the time grid.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Summary {
    pub mode: f64,
    pub median: f64,
    pub mean: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub good: bool,
}

/// Linear interpolation of `y` at `x`, given two bracketing points
/// `(x0, y0)`/`(x1, y1)`. Falls back to the midpoint of `y0`/`y1` when `x0`
/// and `x1` coincide (division-by-zero guard).
fn interpolate(x: f64, x0: f64, x1: f64, y0: f64, y1: f64) -> f64 {
    let den = x1 - x0;
    if den.abs() < f64::EPSILON {
        return (y0 + y1) / 2.0;
    }
    y0 + (y1 - y0) * ((x - x0) / den)
}

/// Combine every eligible contribution's CCF into a log-sum profile over the
/// time grid, normalise it to a posterior, and summarise mode/median/mean/CI.
/// `only_passing` selects the raw pass (every good contribution) versus the
/// adjusted pass (only `good && pass` contributions).
pub fn summarize(contributions: &[PairContribution], params: &Parameters, only_passing: bool) -> Summary {
    let n_times = params.time_grid.len();
    let mut logsum = vec![0.0f64; n_times];
    let mut n_con = 0usize;
    let mut n_dis = 0usize;

    for c in contributions {
        if !c.good || (only_passing && !c.pass) {
            continue;
        }
        for (i, &v) in c.cdf.iter().enumerate() {
            logsum[i] += v.max(f64::MIN_POSITIVE).ln();
        }
        if c.concordant {
            n_con += 1;
        } else {
            n_dis += 1;
        }
    }

    if n_con == 0 || n_dis == 0 {
        return Summary::default();
    }

    let (arg_log_max, log_max) = logsum
        .iter()
        .enumerate()
        .fold((0usize, f64::NEG_INFINITY), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });

    // A peak sitting on the first or last grid point means the true age
    // estimate likely lies outside the grid's range; bail rather than report
    // a boundary artefact.
    if arg_log_max == 0 || arg_log_max >= n_times - 1 {
        return Summary::default();
    }

    let mut seq = vec![0.0f64; n_times];
    let mut seqsum = 0.0f64;
    for i in 0..n_times {
        seq[i] = (logsum[i] - log_max).exp();
        seqsum += seq[i];
    }
    for v in seq.iter_mut() {
        *v /= seqsum;
    }

    let mut cumsum = vec![0.0f64; n_times];
    cumsum[0] = seq[0];
    let mut argmax = 0usize;
    let mut max_seq = seq[0];
    for i in 1..n_times {
        cumsum[i] = cumsum[i - 1] + seq[i];
        if seq[i] > max_seq {
            max_seq = seq[i];
            argmax = i;
        }
    }

    let mean: f64 = params.time_grid.iter().zip(seq.iter()).map(|(t, p)| t * p).sum();
    let mode = params.time_grid[argmax];

    let mut argmin = 0usize;
    let mut min_dist = (cumsum[0] - 0.5).abs();
    for i in 1..n_times {
        let dist = (cumsum[i] - 0.5).abs();
        if dist < min_dist {
            min_dist = dist;
            argmin = i;
        }
    }
    let median = params.time_grid[argmin];

    let (l0, l1) = bracket(&cumsum, 0.025);
    let (u0, u1) = bracket(&cumsum, 0.975);
    let ci_lower = interpolate(0.025, cumsum[l0], cumsum[l1], params.time_grid[l0], params.time_grid[l1]);
    let ci_upper = interpolate(0.975, cumsum[u0], cumsum[u1], params.time_grid[u0], params.time_grid[u1]);

    Summary {
        mode,
        median,
        mean,
        ci_lower,
        ci_upper,
        good: true,
    }
}

/// Find the pair of adjacent indices bracketing the first crossing of
/// `threshold` in a monotone non-decreasing `cumsum`.
fn bracket(cumsum: &[f64], threshold: f64) -> (usize, usize) {
    let mut below = 0usize;
    for (i, &v) in cumsum.iter().enumerate() {
        if v < threshold {
            below = i;
        } else {
            return (below, i);
        }
    }
    (cumsum.len() - 1, cumsum.len() - 1)
}

/// Geometric-mean robust estimate: `lower`/`upper` are the geometric means
/// of concordant/discordant `q50`s; the point estimate is their midpoint in
/// log space, exponentiated.
pub fn geometric_estimate(contributions: &[PairContribution], only_passing: bool) -> f64 {
    let mut log_con_sum = 0.0f64;
    let mut n_con = 0usize;
    let mut log_dis_sum = 0.0f64;
    let mut n_dis = 0usize;

    for c in contributions {
        if !c.good || (only_passing && !c.pass) {
            continue;
        }
        if c.concordant {
            log_con_sum += c.q50.max(1e-12).ln();
            n_con += 1;
        } else {
            log_dis_sum += c.q50.max(1e-12).ln();
            n_dis += 1;
        }
    }

    if n_con == 0 || n_dis == 0 {
        return 0.0;
    }

    let mean_log_con = log_con_sum / n_con as f64;
    let mean_log_dis = log_dis_sum / n_dis as f64;
    ((mean_log_con + mean_log_dis) / 2.0).exp()
}

/// Mark outlier pairs `pass=false` in place. For each grid time `t`,
/// `ncon(t) = |{good concordant with q50 > t}|`, `ndis(t) = |{good
/// discordant with q50 < t}|`, `wsum(t) = ncon(t)/ncon_total +
/// ndis(t)/ndis_total`; `t* = argmin wsum(t)`. Among concordant pairs with
/// `q50 > t*`, the highest-`q50` `floor(ncon_total/2)` of them are failed
/// (all of them, if there are fewer candidates than that quota);
/// symmetrically for discordants below `t*` with the lowest `q50` first.
pub fn filter_pairs(contributions: &mut [PairContribution], time_grid: &[f64]) {
    let n_con = contributions.iter().filter(|c| c.good && c.concordant).count();
    let n_dis = contributions.iter().filter(|c| c.good && !c.concordant).count();
    if n_con == 0 || n_dis == 0 || time_grid.is_empty() {
        return;
    }

    let mut best_wsum = f64::MAX;
    let mut t_star = time_grid[0];
    for &t in time_grid {
        let ncon_t = contributions.iter().filter(|c| c.good && c.concordant && c.q50 > t).count();
        let ndis_t = contributions.iter().filter(|c| c.good && !c.concordant && c.q50 < t).count();
        let wsum = ncon_t as f64 / n_con as f64 + ndis_t as f64 / n_dis as f64;
        if wsum < best_wsum {
            best_wsum = wsum;
            t_star = t;
        }
    }

    let mut tcon: Vec<usize> = contributions
        .iter()
        .enumerate()
        .filter(|(_, c)| c.good && c.concordant && c.q50 > t_star)
        .map(|(i, _)| i)
        .collect();
    if n_con > 1 && !tcon.is_empty() {
        let max = (n_con as f64 * 0.5).floor() as usize;
        if max > tcon.len() {
            for &i in &tcon {
                contributions[i].pass = false;
            }
        } else {
            tcon.sort_by(|&a, &b| contributions[b].q50.partial_cmp(&contributions[a].q50).unwrap());
            for &i in tcon.iter().take(max) {
                contributions[i].pass = false;
            }
        }
    }

    let mut tdis: Vec<usize> = contributions
        .iter()
        .enumerate()
        .filter(|(_, c)| c.good && !c.concordant && c.q50 < t_star)
        .map(|(i, _)| i)
        .collect();
    if n_dis > 1 && !tdis.is_empty() {
        let max = (n_dis as f64 * 0.5).floor() as usize;
        if max > tdis.len() {
            for &i in &tdis {
                contributions[i].pass = false;
            }
        } else {
            tdis.sort_by(|&a, &b| contributions[a].q50.partial_cmp(&contributions[b].q50).unwrap());
            for &i in tdis.iter().take(max) {
                contributions[i].pass = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_params(n: usize) -> Parameters {
        let time_grid: Vec<f64> = (0..n).map(|i| (i + 1) as f64).collect();
        Parameters::for_time_grid(time_grid)
    }

    fn contribution(concordant: bool, q50: f64, peak_index: usize, n_times: usize) -> PairContribution {
        let mut cdf = vec![0.1; n_times];
        cdf[peak_index] = 0.9;
        PairContribution {
            cdf,
            concordant,
            q25: q50 * 0.5,
            q50,
            q75: q50 * 1.5,
            good: true,
            pass: true,
        }
    }

    #[test]
    fn geometric_estimate_of_equal_q50s_is_that_value() {
        let contributions = vec![
            contribution(true, 10.0, 2, 5),
            contribution(false, 10.0, 2, 5),
        ];
        let g = geometric_estimate(&contributions, false);
        assert!((g - 10.0).abs() < 1e-9);
    }

    #[test]
    fn summarize_needs_both_classes_present() {
        let params = flat_params(5);
        let contributions = vec![contribution(true, 2.0, 2, 5), contribution(true, 2.0, 2, 5)];
        let summary = summarize(&contributions, &params, false);
        assert!(!summary.good);
    }

    #[test]
    fn filter_marks_the_single_outlier_pass_false() {
        // 10 concordant pairs with q50 in {1 (x9), 100}; 10 discordant with q50=10.
        let time_grid: Vec<f64> = (0..200).map(|i| 0.1 + i as f64 * 0.5).collect();
        let mut contributions: Vec<PairContribution> = (0..9).map(|_| contribution(true, 1.0, 0, 1)).collect();
        contributions.push(contribution(true, 100.0, 0, 1));
        for _ in 0..10 {
            contributions.push(contribution(false, 10.0, 0, 1));
        }

        filter_pairs(&mut contributions, &time_grid);

        let failed_con = contributions.iter().filter(|c| c.concordant && !c.pass).count();
        let failed_dis = contributions.iter().filter(|c| !c.concordant && !c.pass).count();
        assert_eq!(failed_con, 1);
        assert_eq!(failed_dis, 0);
    }

    #[test]
    fn filter_is_a_no_op_without_both_classes() {
        let time_grid = vec![1.0, 2.0, 3.0];
        let mut contributions = vec![contribution(true, 1.0, 0, 1), contribution(true, 2.0, 0, 1)];
        filter_pairs(&mut contributions, &time_grid);
        assert!(contributions.iter().all(|c| c.pass));
    }

    #[test]
    fn validate_drops_contributions_whose_median_sits_at_the_grid_edge() {
        let time_grid = vec![1.0, 5.0, 10.0, 40.0];
        let mut contributions = vec![contribution(true, 1.0, 0, 1), contribution(false, 40.0, 0, 1)];
        validate_quantile_range(&mut contributions, &time_grid);
        assert!(contributions.iter().all(|c| !c.good));
    }

    #[test]
    fn validate_keeps_contributions_comfortably_inside_the_grid() {
        let time_grid = vec![1.0, 5.0, 10.0, 40.0];
        let mut contributions = vec![contribution(true, 5.0, 0, 1)];
        validate_quantile_range(&mut contributions, &time_grid);
        assert!(contributions[0].good);
    }
}
