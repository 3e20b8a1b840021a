// Copyright 2016-2020 Patrick K. Albers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The shared-site index, grounded on
//! `examples/original_source/src/gen/GenShare.cpp`.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use rand::seq::SliceRandom;

use crate::errors::ShareIndexError;
use crate::grid::Grid;
use crate::model::{GenotypeIndex, MarkerId, SampleId};

pub const MIN_FK: usize = 2;

/// Unordered pair of sample ids, normalised so `(a, b)` and `(b, a)` collide.
pub type SamplePair = (SampleId, SampleId);

fn normalize_pair(a: SampleId, b: SampleId) -> SamplePair {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Mapping from focal-allele-count class `fk` to its site/pair sub-index.
#[derive(Default)]
pub struct ShareIndex {
    pub fk: usize,
    /// marker id -> list of carrier sample ids (duplicated for homozygous
    /// carriers, matching the alt-haplotype count at that site).
    pub sites: BTreeMap<MarkerId, Vec<SampleId>>,
    /// unordered sample pair -> set of marker ids shared between them.
    pub pairs: BTreeMap<SamplePair, BTreeSet<MarkerId>>,
}

impl ShareIndex {
    fn new(fk: usize) -> Self {
        ShareIndex {
            fk,
            sites: BTreeMap::new(),
            pairs: BTreeMap::new(),
        }
    }

    /// Build indices for every requested `fk` class by a single scan of the
    /// grid's markers, followed by a single pass over samples.
    pub fn detect(targets: &BTreeSet<usize>, grid: &Grid) -> Result<BTreeMap<usize, ShareIndex>, ShareIndexError> {
        for &fk in targets {
            if fk < MIN_FK {
                return Err(ShareIndexError::FkTooSmall { fk });
            }
        }

        let mut table: BTreeMap<usize, ShareIndex> = targets.iter().map(|&fk| (fk, ShareIndex::new(fk))).collect();

        // Allocate a slot (with correct reserved capacity) for every site
        // whose alt-haplotype count matches a requested target and whose
        // carriers are all heterozygous: a site with a hom-alt carrier has
        // het count < alt count, so it is rejected rather than silently
        // admitted (matches GenShare.cpp's combined allele/genotype check).
        for marker in grid.markers() {
            let alt = marker.haplotype_counts.alt_count as usize;
            if marker.genotype_counts.het as usize != alt {
                continue;
            }
            if let Some(index) = table.get_mut(&alt) {
                index.sites.insert(marker.id, Vec::with_capacity(alt));
            }
        }

        // Fill slots: heterozygous carriers contribute once, homozygous-alt
        // carriers contribute twice (they carry two copies of the allele).
        for sample in grid.samples() {
            let vector = grid.get(sample.id).map_err(|_| ShareIndexError::PositionNotFound { position: 0 })?;
            for index in table.values_mut() {
                for (&marker_id, carriers) in index.sites.iter_mut() {
                    match vector.genotype(marker_id).index() {
                        GenotypeIndex::Het => carriers.push(sample.id),
                        GenotypeIndex::HomAlt => {
                            carriers.push(sample.id);
                            carriers.push(sample.id);
                        }
                        _ => {}
                    }
                }
            }
        }

        for index in table.values_mut() {
            index.create_pairs();
        }

        Ok(table)
    }

    /// Entry point for an explicit list of focal positions: each position is
    /// matched by strict equality, and the carrier count at that site
    /// becomes its `fk`.
    pub fn select(positions: &[u32], grid: &Grid) -> Result<BTreeMap<usize, ShareIndex>, ShareIndexError> {
        let mut by_fk: BTreeMap<usize, BTreeSet<MarkerId>> = BTreeMap::new();
        for &pos in positions {
            let marker = grid
                .markers()
                .iter()
                .find(|m| m.position == pos)
                .ok_or(ShareIndexError::PositionNotFound { position: pos })?;
            let fk = marker.haplotype_counts.alt_count as usize;
            if fk < MIN_FK {
                return Err(ShareIndexError::FkTooSmall { fk });
            }
            by_fk.entry(fk).or_default().insert(marker.id);
        }

        let mut table = BTreeMap::new();
        for (fk, marker_ids) in by_fk {
            let mut index = ShareIndex::new(fk);
            for marker_id in marker_ids {
                index.sites.insert(marker_id, Vec::with_capacity(fk));
            }
            for sample in grid.samples() {
                let vector = grid.get(sample.id).map_err(|_| ShareIndexError::PositionNotFound { position: 0 })?;
                for (&marker_id, carriers) in index.sites.iter_mut() {
                    match vector.genotype(marker_id).index() {
                        GenotypeIndex::Het => carriers.push(sample.id),
                        GenotypeIndex::HomAlt => {
                            carriers.push(sample.id);
                            carriers.push(sample.id);
                        }
                        _ => {}
                    }
                }
            }
            index.create_pairs();
            table.insert(fk, index);
        }
        Ok(table)
    }

    /// Enumerate all unordered pairs of carriers at each site; sites with
    /// fewer than `MIN_FK` carriers are dropped.
    fn create_pairs(&mut self) {
        self.pairs.clear();
        self.sites.retain(|_, carriers| carriers.len() >= MIN_FK);
        for (&marker_id, carriers) in self.sites.iter() {
            let n = carriers.len();
            for i in 0..n - 1 {
                for j in (i + 1)..n {
                    let pair = normalize_pair(carriers[i], carriers[j]);
                    self.pairs.entry(pair).or_default().insert(marker_id);
                }
            }
        }
    }

    /// Rebuild `sites` from `pairs` so the two views stay consistent after
    /// sub-sampling pairs.
    fn remake_sites(&mut self) {
        self.sites.clear();
        for (&(a, b), markers) in self.pairs.iter() {
            for &marker_id in markers {
                let entry = self.sites.entry(marker_id).or_default();
                entry.push(a);
                entry.push(b);
            }
        }
        for carriers in self.sites.values_mut() {
            carriers.sort_unstable();
        }
    }

    fn prune_empty(&mut self) {
        self.sites.retain(|_, v| !v.is_empty());
        self.pairs.retain(|_, v| !v.is_empty());
    }

    /// Uniform-without-replacement sub-sampling of sites (keeping at most
    /// `max_sites`), regenerating `pairs` afterwards from the kept sites.
    pub fn subsample_sites(&mut self, max_sites: usize) {
        if self.sites.len() <= max_sites {
            return;
        }
        let mut keys: Vec<MarkerId> = self.sites.keys().copied().collect();
        keys.shuffle(&mut rand::thread_rng());
        let keep: HashSet<MarkerId> = keys.into_iter().take(max_sites).collect();
        self.sites.retain(|k, _| keep.contains(k));
        self.create_pairs();
        self.prune_empty();
    }

    /// Uniform-without-replacement sub-sampling of pairs (keeping at most
    /// `max_pairs`), then regenerating `sites` from the kept pairs so the
    /// two views remain consistent.
    pub fn subsample_pairs(&mut self, max_pairs: usize) {
        if self.pairs.len() <= max_pairs {
            return;
        }
        let mut keys: Vec<SamplePair> = self.pairs.keys().copied().collect();
        keys.shuffle(&mut rand::thread_rng());
        let keep: HashSet<SamplePair> = keys.into_iter().take(max_pairs).collect();
        self.pairs.retain(|k, _| keep.contains(k));
        self.remake_sites();
        self.prune_empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Grid, InMemorySource};
    use crate::model::{Genotype, GenotypeCounts, Haplotype, HaplotypeCounts, Marker, Sample};

    fn build_grid() -> Grid {
        // 6 samples, 4 markers; marker 0 is shared by samples {0,1,2} het,
        // fk=3.
        let samples: Vec<Sample> = (0..6)
            .map(|i| Sample {
                id: i,
                label: format!("S{i}"),
                phased: true,
            })
            .collect();
        let markers: Vec<Marker> = (0..4)
            .map(|i| Marker {
                id: i,
                chromosome: 1,
                position: (i as u32 + 1) * 1000,
                allele_ref: "A".into(),
                allele_alt: "T".into(),
                haplotype_counts: HaplotypeCounts {
                    ref_count: 9,
                    alt_count: if i == 0 { 3 } else { 0 },
                    missing_count: 0,
                },
                genotype_counts: GenotypeCounts {
                    het: if i == 0 { 3 } else { 0 },
                    hom_ref: if i == 0 { 3 } else { 6 },
                    ..GenotypeCounts::default()
                },
                recomb_rate: 1e-8,
                dist_cm: i as f64 * 0.01,
            })
            .collect();
        let rows: Vec<Vec<Genotype>> = (0..6)
            .map(|s| {
                (0..4)
                    .map(|m| {
                        if m == 0 && s < 3 {
                            Genotype::new(Haplotype::Ref, Haplotype::Alt, true)
                        } else {
                            Genotype::new(Haplotype::Ref, Haplotype::Ref, true)
                        }
                    })
                    .collect()
            })
            .collect();
        Grid::new(samples, markers, Box::new(InMemorySource::new(rows, false))).unwrap()
    }

    #[test]
    fn detect_builds_consistent_index() {
        let grid = build_grid();
        let mut targets = BTreeSet::new();
        targets.insert(3usize);
        let table = ShareIndex::detect(&targets, &grid).unwrap();
        let index = &table[&3];
        assert_eq!(index.sites[&0].len(), 3);
        // C(3,2) = 3 pairs, each sharing exactly site 0.
        assert_eq!(index.pairs.len(), 3);
        for markers in index.pairs.values() {
            assert!(markers.contains(&0));
        }
    }

    #[test]
    fn fk_below_minimum_rejected() {
        let grid = build_grid();
        let mut targets = BTreeSet::new();
        targets.insert(1usize);
        assert!(ShareIndex::detect(&targets, &grid).is_err());
    }

    #[test]
    fn subsample_keeps_views_consistent() {
        let grid = build_grid();
        let mut targets = BTreeSet::new();
        targets.insert(3usize);
        let mut table = ShareIndex::detect(&targets, &grid).unwrap();
        let index = table.get_mut(&3).unwrap();
        index.subsample_pairs(1);
        assert_eq!(index.pairs.len(), 1);
        for (&(a, b), markers) in index.pairs.iter() {
            for &m in markers {
                assert!(index.sites[&m].contains(&a));
                assert!(index.sites[&m].contains(&b));
            }
        }
    }
}
