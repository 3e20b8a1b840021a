// Copyright 2016-2020 Patrick K. Albers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Nearest-neighbour pair selection: rank carriers at a focal site
//! by Hamming distance to build concordant/discordant candidate lists, then
//! cut down to the configured sharer/outgroup limits.
//!
//! Grounded on `examples/original_source/src/age/AgeInfer.cpp`'s `Near`
//! class (`Near::Rank`, `Near::Chunk`, `Near::pairwise`).

use itertools::Itertools;
use ordered_float::NotNan;

use crate::grid::Grid;
use crate::model::{Genotype, GenotypeIndex, SampleId};

/// One candidate pairing of the focal sample against another carrier (or
/// non-carrier, for the discordant list), ranked by Hamming distance over a
/// window of markers around the focal site.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub sample: SampleId,
    pub hamming: u32,
}

/// Count mismatching genotypes between two samples' decoded vectors,
/// skipping positions where either side is missing.
fn hamming_distance(a: &[Genotype], b: &[Genotype]) -> u32 {
    a.iter()
        .zip(b.iter())
        .filter(|(x, y)| {
            !matches!(x.index(), GenotypeIndex::Missing) && !matches!(y.index(), GenotypeIndex::Missing) && x.index() != y.index()
        })
        .count() as u32
}

/// Rank every sample in `pool` by Hamming distance to `focal_sample`,
/// nearest first; ties are broken by sample id for determinism.
fn rank_by_distance(grid: &Grid, focal_sample: SampleId, pool: &[SampleId]) -> Result<Vec<Candidate>, crate::errors::GridError> {
    let focal_vector = grid.get(focal_sample)?;
    let mut candidates = Vec::with_capacity(pool.len());
    for &sample in pool {
        if sample == focal_sample {
            continue;
        }
        let other = grid.get(sample)?;
        let hamming = hamming_distance(focal_vector.genotypes(), other.genotypes());
        candidates.push(Candidate { sample, hamming });
    }
    candidates.sort_by_key(|c| (c.hamming, c.sample));
    Ok(candidates)
}

/// The selected neighbour lists for one focal sample at one focal site.
pub struct Selection {
    pub concordant: Vec<SampleId>,
    pub discordant: Vec<SampleId>,
}

/// Build the concordant list (other carriers at the site, nearest first) and
/// the discordant list (non-carriers, nearest first), then cut each down to
/// `limit_sharers` / `outgroup_size`.
pub fn select_neighbours(
    grid: &Grid,
    focal_sample: SampleId,
    carriers: &[SampleId],
    non_carriers: &[SampleId],
    limit_sharers: usize,
    outgroup_size: usize,
) -> Result<Selection, crate::errors::GridError> {
    let mut concordant_ranked = rank_by_distance(grid, focal_sample, carriers)?;
    let mut discordant_ranked = rank_by_distance(grid, focal_sample, non_carriers)?;

    diversify(&mut concordant_ranked);
    diversify(&mut discordant_ranked);

    concordant_ranked.truncate(limit_sharers);
    discordant_ranked.truncate(outgroup_size);

    Ok(Selection {
        concordant: concordant_ranked.into_iter().map(|c| c.sample).collect(),
        discordant: discordant_ranked.into_iter().map(|c| c.sample).collect(),
    })
}

/// Break exact ties in Hamming distance with a stable, seedless shuffle
/// within each tied block, so repeated runs over the same data don't always
/// favour the lowest sample id when cutting at a boundary. Candidates are
/// already sorted by (hamming, sample), so tied blocks are consecutive runs.
fn diversify(candidates: &mut [Candidate]) {
    use rand::seq::SliceRandom;
    let mut rng = rand::thread_rng();
    let shuffled: Vec<Candidate> = candidates
        .iter()
        .copied()
        .group_by(|c| c.hamming)
        .into_iter()
        .flat_map(|(_, group)| {
            let mut block: Vec<Candidate> = group.collect();
            block.shuffle(&mut rng);
            block
        })
        .collect();
    candidates.copy_from_slice(&shuffled);
}

/// A scored pair kept for the composite likelihood estimator: how "tight" a
/// neighbour the concordant/discordant partner was, used to weight the
/// pair's contribution via `1 / (1 + hamming)` (closer neighbours carry more
/// evidence about the true coalescent time at the focal site).
pub fn pair_weight(hamming: u32) -> NotNan<f64> {
    NotNan::new(1.0 / (1.0 + hamming as f64)).expect("1/(1+n) is never NaN for n >= 0")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::InMemorySource;
    use crate::model::{GenotypeCounts, Haplotype, HaplotypeCounts, Marker, Sample};

    fn marker(id: usize, pos: u32) -> Marker {
        Marker {
            id,
            chromosome: 1,
            position: pos,
            allele_ref: "A".into(),
            allele_alt: "T".into(),
            haplotype_counts: HaplotypeCounts::default(),
            genotype_counts: GenotypeCounts::default(),
            recomb_rate: 1e-8,
            dist_cm: pos as f64 / 1_000_000.0,
        }
    }

    fn toy_grid() -> Grid {
        let samples: Vec<Sample> = (0..5)
            .map(|i| Sample {
                id: i,
                label: format!("S{i}"),
                phased: true,
            })
            .collect();
        let markers: Vec<Marker> = (0..10).map(|i| marker(i, (i as u32 + 1) * 100)).collect();
        let rows: Vec<Vec<Genotype>> = vec![
            vec![Genotype::new(Haplotype::Ref, Haplotype::Ref, true); 10],
            vec![Genotype::new(Haplotype::Ref, Haplotype::Ref, true); 10],
            {
                let mut v = vec![Genotype::new(Haplotype::Ref, Haplotype::Ref, true); 10];
                v[5] = Genotype::new(Haplotype::Ref, Haplotype::Alt, true);
                v
            },
            vec![Genotype::new(Haplotype::Alt, Haplotype::Alt, true); 10],
            vec![Genotype::new(Haplotype::Alt, Haplotype::Alt, true); 10],
        ];
        Grid::new(samples, markers, Box::new(InMemorySource::new(rows, false))).unwrap()
    }

    #[test]
    fn nearest_neighbour_is_ranked_first() {
        let grid = toy_grid();
        let selection = select_neighbours(&grid, 0, &[1, 2, 3], &[4], 10, 10).unwrap();
        assert_eq!(selection.concordant[0], 1);
    }

    #[test]
    fn limits_are_respected() {
        let grid = toy_grid();
        let selection = select_neighbours(&grid, 0, &[1, 2, 3], &[4], 1, 1).unwrap();
        assert_eq!(selection.concordant.len(), 1);
        assert_eq!(selection.discordant.len(), 1);
    }
}
