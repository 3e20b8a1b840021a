// Copyright 2016-2020 Patrick K. Albers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! HMM model parameters: per-marker initial/emission probabilities
//! and per-interval transition matrices.
//!
//! Grounded on `examples/original_source/src/load/LoadHMM.cpp` (expected
//! initial/emission generation) and `src/ibd/IBD_HMM.cpp`'s
//! `calc_expected_age` / `calc_trans_matrix` (transition formula).

use std::collections::HashMap;
use std::sync::Mutex;

use crate::errors::HmmError;
use crate::model::MarkerId;

pub const N_STATES: usize = 2;
pub const NON: usize = 0;
pub const IBD: usize = 1;

/// Observed haplotype pair at a site, collapsed since the HMM treats (ref,
/// alt) and (alt, ref) identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    RefRef,
    RefAlt,
    AltAlt,
    Missing,
}

/// Smallest representable probability; rows are bumped off zero by this
/// amount after normalisation (teacher idiom: keep probabilities in a safe
/// numeric range rather than allowing hard zeros to propagate).
pub const EPSILON: f64 = 1e-8;

/// Leak probability assigned to the heterozygous (mismatching) observation
/// under the IBD state in the "expected" emission rule.
pub const IBD_LEAK: f64 = 0.0001;

fn normalize_and_bump(row: &mut [f64; N_STATES]) {
    let sum: f64 = row.iter().sum();
    if sum > 0.0 {
        for v in row.iter_mut() {
            *v /= sum;
        }
    }
    for v in row.iter_mut() {
        if *v < EPSILON {
            *v = EPSILON;
        }
    }
    let sum: f64 = row.iter().sum();
    for v in row.iter_mut() {
        *v /= sum;
    }
}

/// Per-marker initial probabilities, distinguished by whether the pair is
/// concordant or discordant at the focal site.
pub struct InitialTable {
    pub concordant: Vec<[f64; N_STATES]>,
    pub discordant: Vec<[f64; N_STATES]>,
}

impl InitialTable {
    /// Build the "expected" rule: IBD=1, NON=0 for every interior
    /// carrier count, row-normalised and epsilon-bumped; pinned at the
    /// endpoints 0 and Nh to the same interior value, since a focal site at
    /// either extreme never legitimately arises (fk >= 2 is enforced
    /// upstream by the share index).
    pub fn expected(markers_alt_counts: &[usize]) -> Self {
        let row = |_k: usize| -> [f64; N_STATES] {
            let mut r = [0.0, 1.0];
            normalize_and_bump(&mut r);
            r
        };
        let concordant = markers_alt_counts.iter().map(|&k| row(k)).collect();
        let discordant = markers_alt_counts.iter().map(|&k| row(k)).collect();
        InitialTable { concordant, discordant }
    }

    /// Build from per-carrier-count rows linearly interpolated to every
    /// integer carrier count, as loaded from an HMM initial-probability
    /// file (see `crate::io::hmm_io`).
    pub fn from_interpolated(
        markers_alt_counts: &[usize],
        con_by_count: &HashMap<usize, [f64; N_STATES]>,
        dis_by_count: &HashMap<usize, [f64; N_STATES]>,
    ) -> Self {
        let mut concordant = Vec::with_capacity(markers_alt_counts.len());
        let mut discordant = Vec::with_capacity(markers_alt_counts.len());
        for &k in markers_alt_counts {
            let mut c = *con_by_count.get(&k).unwrap_or(&[0.0, 1.0]);
            let mut d = *dis_by_count.get(&k).unwrap_or(&[0.0, 1.0]);
            normalize_and_bump(&mut c);
            normalize_and_bump(&mut d);
            concordant.push(c);
            discordant.push(d);
        }
        InitialTable { concordant, discordant }
    }
}

/// Per-marker emission probabilities: `[state][observation]`, where
/// observation order is {00, 01, 11}; `Missing` is handled specially by the
/// decoder (contributes 1 to both states).
pub struct EmissionTable {
    rows: Vec<[[f64; 3]; N_STATES]>,
}

impl EmissionTable {
    pub fn expected(alt_frequencies: &[f64]) -> Self {
        let rows = alt_frequencies
            .iter()
            .map(|&q| {
                let p = 1.0 - q;
                let non = [p * p, 2.0 * p * q, q * q];
                let sum = p + q + 2.0 * p * q * IBD_LEAK;
                let ibd = [p / sum, (2.0 * p * q * IBD_LEAK) / sum, q / sum];
                [non, ibd]
            })
            .collect();
        EmissionTable { rows }
    }

    pub fn from_rows(rows: Vec<[[f64; 3]; N_STATES]>) -> Self {
        EmissionTable { rows }
    }

    pub fn probability(&self, marker: MarkerId, state: usize, obs: Observation) -> f64 {
        match obs {
            Observation::Missing => 1.0,
            Observation::RefRef => self.rows[marker][state][0],
            Observation::RefAlt => self.rows[marker][state][1],
            Observation::AltAlt => self.rows[marker][state][2],
        }
    }
}

pub type Transition = [[f64; N_STATES]; N_STATES];

/// `-2f/(1-f) * ln(f)` where `f = fk/Nh`, bounded at the extremes.
fn expected_age(fk: usize, nh: usize) -> f64 {
    if fk <= 1 {
        return 1e-8;
    }
    if fk >= nh {
        return 2.0;
    }
    let f = fk as f64 / nh as f64;
    (-2.0 * f / (1.0 - f)) * f.ln()
}

/// Compute the 2x2 transition matrix for one interval given the genetic
/// distance `d` (cM) and the focal allele count `fk`.
pub fn compute_transition(fk: usize, ne: f64, nh: usize, dist_cm: f64) -> Result<Transition, HmmError> {
    let xage = if fk == 0 { 1.0 } else { expected_age(fk, nh) };
    let p = (xage * (-4.0 * ne) * dist_cm / 100.0).exp();
    if !(0.0..=1.0).contains(&p) {
        return Err(HmmError::TransitionOutOfRange { value: p, fk });
    }
    Ok([[1.0, 0.0], [1.0 - p, p]])
}

/// Per-interval genetic distances (cM), bumped off zero, and a lazily built,
/// mutex-cached table of transition matrices keyed by focal allele count.
pub struct HmmModel {
    pub initial: InitialTable,
    pub emission: EmissionTable,
    /// `dists[i]` is the genetic distance between marker `i` and `i+1`.
    dists: Vec<f64>,
    ne: f64,
    nh: usize,
    transition_cache: Mutex<HashMap<usize, Vec<Transition>>>,
}

impl HmmModel {
    pub fn new(initial: InitialTable, emission: EmissionTable, dists: Vec<f64>, ne: f64, nh: usize) -> Self {
        HmmModel {
            initial,
            emission,
            dists,
            ne,
            nh,
            transition_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn n_intervals(&self) -> usize {
        self.dists.len()
    }

    /// Transition tables for `fk` are built lazily under a mutex and cached,
    /// since building all of them up front for every possible carrier count
    /// would be wasted work for runs that only ever see a handful of `fk`
    /// values.
    pub fn transition_for(&self, fk: usize) -> Result<Vec<Transition>, HmmError> {
        {
            let guard = self.transition_cache.lock().unwrap();
            if let Some(t) = guard.get(&fk) {
                return Ok(t.clone());
            }
        }
        let mut built = Vec::with_capacity(self.dists.len());
        for &d in &self.dists {
            built.push(compute_transition(fk, self.ne, self.nh, d)?);
        }
        let mut guard = self.transition_cache.lock().unwrap();
        guard.entry(fk).or_insert_with(|| built.clone());
        Ok(built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_initial_rows_sum_to_one_and_clear_epsilon() {
        let table = InitialTable::expected(&[3, 3, 3]);
        for row in table.concordant.iter().chain(table.discordant.iter()) {
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9);
            assert!(row.iter().all(|&v| v >= EPSILON));
        }
    }

    #[test]
    fn non_row_of_transition_is_exact() {
        let t = compute_transition(10, 10_000.0, 200, 0.01).unwrap();
        assert_eq!(t[NON], [1.0, 0.0]);
        let sum: f64 = t[IBD].iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_transition_is_fatal() {
        // An absurdly large Ne*distance product pushes p below zero only if
        // xage is negative, which cannot happen; instead verify the
        // boundary fk cases stay within range.
        assert!(compute_transition(0, 10_000.0, 200, 1000.0).is_ok());
        assert!(compute_transition(200, 10_000.0, 200, 1000.0).is_ok());
    }

    #[test]
    fn transition_cache_is_consistent_across_calls() {
        let model = HmmModel::new(
            InitialTable::expected(&[3]),
            EmissionTable::expected(&[0.05]),
            vec![0.01, 0.02],
            10_000.0,
            200,
        );
        let a = model.transition_for(5).unwrap();
        let b = model.transition_for(5).unwrap();
        assert_eq!(a, b);
    }
}
