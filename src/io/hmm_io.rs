// Copyright 2016-2020 Patrick K. Albers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! HMM initial/emission parameter file loader, grounded on
//! `examples/original_source/src/load/LoadHMM.cpp`: whitespace-separated
//! text with a header, rows at arbitrary frequencies in (0,1), linearly
//! interpolated to every integer carrier count; endpoint rows (0 and Nh)
//! are implicit.

use std::collections::HashMap;
use std::io::BufRead;

use crate::errors::HmmError;
use crate::hmm::model::N_STATES;

const INITIAL_HEADER: [&str; 5] = ["Frequency", "CON_NON", "CON_IBD", "DIS_NON", "DIS_IBD"];
const EMISSION_HEADER: [&str; 7] = ["Frequency", "NON_00", "NON_01", "NON_11", "IBD_00", "IBD_01", "IBD_11"];

struct Row {
    frequency: f64,
    values: Vec<f64>,
}

fn parse_rows<R: BufRead>(r: R, expected_header: &[&str]) -> Result<Vec<Row>, HmmError> {
    let mut lines = r.lines();
    let header_line = lines.next().transpose()?;
    let header_line = header_line.unwrap_or_default();
    let found: Vec<&str> = header_line.split_whitespace().collect();
    if found != expected_header {
        return Err(HmmError::HeaderMismatch {
            path: std::path::PathBuf::new(),
        });
    }

    let mut rows = Vec::new();
    for line in lines {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<f64> = line
            .split_whitespace()
            .map(|f| f.parse::<f64>().unwrap_or(f64::NAN))
            .collect();
        rows.push(Row {
            frequency: fields[0],
            values: fields[1..].to_vec(),
        });
    }
    rows.sort_by(|a, b| a.frequency.partial_cmp(&b.frequency).unwrap());
    Ok(rows)
}

/// Linearly interpolate a set of (frequency, values) rows to every integer
/// carrier count `0..=nh`, holding the nearest endpoint constant outside the
/// rows' frequency range.
fn interpolate(rows: &[Row], nh: usize, n_values: usize) -> Vec<Vec<f64>> {
    let mut out = vec![vec![0.0; n_values]; nh + 1];
    for k in 0..=nh {
        let f = k as f64 / nh as f64;
        out[k] = interpolate_one(rows, f, n_values);
    }
    out
}

fn interpolate_one(rows: &[Row], f: f64, n_values: usize) -> Vec<f64> {
    if rows.is_empty() {
        return vec![0.0; n_values];
    }
    if f <= rows[0].frequency {
        return rows[0].values.clone();
    }
    if f >= rows[rows.len() - 1].frequency {
        return rows[rows.len() - 1].values.clone();
    }
    for w in rows.windows(2) {
        let (lo, hi) = (&w[0], &w[1]);
        if f >= lo.frequency && f <= hi.frequency {
            let span = hi.frequency - lo.frequency;
            let t = if span > 0.0 { (f - lo.frequency) / span } else { 0.0 };
            return lo.values.iter().zip(hi.values.iter()).map(|(a, b)| a + t * (b - a)).collect();
        }
    }
    rows[rows.len() - 1].values.clone()
}

/// Load an initial-probability file, producing per-carrier-count rows keyed
/// by integer carrier count for both the concordant and discordant tables.
pub fn load_initial<R: BufRead>(r: R, nh: usize) -> Result<(HashMap<usize, [f64; N_STATES]>, HashMap<usize, [f64; N_STATES]>), HmmError> {
    let rows = parse_rows(r, &INITIAL_HEADER)?;
    let interpolated = interpolate(&rows, nh, 4);
    let mut con = HashMap::with_capacity(nh + 1);
    let mut dis = HashMap::with_capacity(nh + 1);
    for (k, values) in interpolated.into_iter().enumerate() {
        con.insert(k, [values[0], values[1]]);
        dis.insert(k, [values[2], values[3]]);
    }
    Ok((con, dis))
}

/// Load an emission file, producing one `[state][observation]` row per
/// integer carrier count.
pub fn load_emission<R: BufRead>(r: R, nh: usize) -> Result<Vec<[[f64; 3]; N_STATES]>, HmmError> {
    let rows = parse_rows(r, &EMISSION_HEADER)?;
    let interpolated = interpolate(&rows, nh, 6);
    Ok(interpolated
        .into_iter()
        .map(|v| {
            let non = [v[0], v[1], v[2]];
            let ibd = [v[3], v[4], v[5]];
            [non, ibd]
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_between_two_rows() {
        let initial = "Frequency CON_NON CON_IBD DIS_NON DIS_IBD\n0.1 0.9 0.1 0.95 0.05\n0.5 0.5 0.5 0.6 0.4\n";
        let (con, dis) = load_initial(initial.as_bytes(), 10).unwrap();
        // k=5 -> f=0.5, matches the second row exactly.
        assert!((con[&5][1] - 0.5).abs() < 1e-9);
        assert!((dis[&5][1] - 0.4).abs() < 1e-9);
    }

    #[test]
    fn header_mismatch_is_fatal() {
        let bad = "Wrong Header Here\n0.1 0.9 0.1 0.95 0.05\n";
        assert!(load_initial(bad.as_bytes(), 10).is_err());
    }
}
