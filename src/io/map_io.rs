// Copyright 2016-2020 Patrick K. Albers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Trivial genetic-map loader (position -> cM), used only to populate
//! `Marker::dist_cm` in test fixtures and the `dump-ibd` CLI mode. Grounded
//! on `examples/original_source/src/load/LoadMap.cpp`, which is itself a
//! thin two-column reader; no smoothing or extrapolation is performed here,
//! matching the original.

use std::io::BufRead;

use crate::errors::GridError;

/// One row of a genetic map: physical position (bp) and its genetic
/// position (cM).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapEntry {
    pub position: u32,
    pub cm: f64,
}

/// Parse a whitespace-separated two-column file (`position cm`), one entry
/// per line, sorted by position on return.
pub fn load_map<R: BufRead>(r: R) -> Result<Vec<MapEntry>, GridError> {
    let mut entries = Vec::new();
    for line in r.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let position: u32 = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);
        let cm: f64 = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0.0);
        entries.push(MapEntry { position, cm });
    }
    entries.sort_by_key(|e| e.position);
    Ok(entries)
}

/// Assign a genetic-distance value to `position` by linear interpolation
/// between the two nearest map entries, holding the nearest endpoint
/// constant outside the map's range.
pub fn interpolate_cm(map: &[MapEntry], position: u32) -> f64 {
    if map.is_empty() {
        return 0.0;
    }
    if position <= map[0].position {
        return map[0].cm;
    }
    if position >= map[map.len() - 1].position {
        return map[map.len() - 1].cm;
    }
    for w in map.windows(2) {
        let (lo, hi) = (w[0], w[1]);
        if position >= lo.position && position <= hi.position {
            let span = (hi.position - lo.position) as f64;
            let t = if span > 0.0 { (position - lo.position) as f64 / span } else { 0.0 };
            return lo.cm + t * (hi.cm - lo.cm);
        }
    }
    map[map.len() - 1].cm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_linearly_between_entries() {
        let map = vec![MapEntry { position: 0, cm: 0.0 }, MapEntry { position: 100, cm: 1.0 }];
        assert!((interpolate_cm(&map, 50) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn clamps_outside_range() {
        let map = vec![MapEntry { position: 10, cm: 0.1 }, MapEntry { position: 20, cm: 0.2 }];
        assert_eq!(interpolate_cm(&map, 0), 0.1);
        assert_eq!(interpolate_cm(&map, 1000), 0.2);
    }
}
