// Copyright 2016-2020 Patrick K. Albers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! A tiny end-to-end run over an in-memory grid: build a grid, detect a
//! shared site, run the orchestrator over it with the expected HMM rule,
//! and check the output files are well formed.

use std::sync::Arc;

use geva::ccf::Clock;
use geva::grid::{Grid, InMemorySource};
use geva::hmm::{EmissionTable, HmmModel, InitialTable};
use geva::io::output_io;
use geva::model::{Genotype, GenotypeCounts, Haplotype, HaplotypeCounts, Marker, Sample};
use geva::orchestrator::{batches_from_index, Orchestrator};
use geva::param::Parameters;
use geva::share_index::ShareIndex;

fn toy_grid() -> Grid {
    let n_samples = 12;
    let n_markers = 30;
    let samples: Vec<Sample> = (0..n_samples)
        .map(|i| Sample {
            id: i,
            label: format!("S{i}"),
            phased: true,
        })
        .collect();

    // Samples 0..4 share a derived allele at marker 15; everyone else is
    // reference homozygous everywhere.
    let rows: Vec<Vec<Genotype>> = (0..n_samples)
        .map(|s| {
            (0..n_markers)
                .map(|m| {
                    if m == 15 && s < 4 {
                        Genotype::new(Haplotype::Ref, Haplotype::Alt, true)
                    } else {
                        Genotype::new(Haplotype::Ref, Haplotype::Ref, true)
                    }
                })
                .collect()
        })
        .collect();

    let markers: Vec<Marker> = (0..n_markers)
        .map(|i| Marker {
            id: i,
            chromosome: 1,
            position: (i as u32 + 1) * 1000,
            allele_ref: "A".into(),
            allele_alt: "T".into(),
            haplotype_counts: HaplotypeCounts {
                ref_count: (n_samples * 2 - if i == 15 { 4 } else { 0 }) as u32,
                alt_count: if i == 15 { 4 } else { 0 },
                missing_count: 0,
            },
            genotype_counts: GenotypeCounts {
                het: if i == 15 { 4 } else { 0 },
                hom_ref: if i == 15 { (n_samples - 4) as u32 } else { n_samples as u32 },
                ..GenotypeCounts::default()
            },
            recomb_rate: 1e-8,
            dist_cm: i as f64 * 0.01,
        })
        .collect();

    Grid::new(samples, markers, Box::new(InMemorySource::new(rows, true))).unwrap()
}

#[test]
fn tiny_run_produces_a_site_estimate() {
    let _ = env_logger::init();

    let grid = toy_grid();
    let nh = grid.sample_count() * 2;
    let n_markers = grid.marker_count();

    let alt_counts: Vec<usize> = grid.markers().iter().map(|m| m.haplotype_counts.alt_count as usize).collect();
    let frequencies: Vec<f64> = alt_counts.iter().map(|&k| k as f64 / nh as f64).collect();
    let initial = InitialTable::expected(&alt_counts);
    let emission = EmissionTable::expected(&frequencies);
    let dists: Vec<f64> = grid.markers().windows(2).map(|w| (w[1].dist_cm - w[0].dist_cm).max(1e-10)).collect();
    let model = Arc::new(HmmModel::new(initial, emission, dists, 10_000.0, nh));

    let mut params = Parameters::build(&grid, 10_000.0, 1e-8, 64, 40.0, true);
    params.estimate_theta().unwrap();
    let params = Arc::new(params);

    let mut targets = std::collections::BTreeSet::new();
    targets.insert(4usize);
    let indices = ShareIndex::detect(&targets, &grid).unwrap();
    let index = &indices[&4];
    assert_eq!(index.sites.len(), 1);

    let batches = batches_from_index(index, &grid).unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].focal, 15);

    let grid = Arc::new(grid);
    let orchestrator = Orchestrator::new(2);

    let mut pairs_buf = Vec::new();
    let mut sites_buf = Vec::new();
    output_io::write_pairs_header(&mut pairs_buf).unwrap();
    output_io::write_sites_header(&mut sites_buf).unwrap();

    let mut n_sites = 0;
    orchestrator
        .run(grid, model, params, Clock::Cmb, batches, |outcome| {
            n_sites += 1;
            output_io::write_pairs(&mut pairs_buf, Clock::Cmb, &outcome.pairs).unwrap();
            output_io::write_site(&mut sites_buf, Clock::Cmb, &outcome.raw, &outcome.adjusted).unwrap();
        })
        .unwrap();

    assert_eq!(n_sites, 1);
    let sites_text = String::from_utf8(sites_buf).unwrap();
    assert_eq!(sites_text.lines().count(), 3); // header + raw + adjusted
    assert!(sites_text.contains("15"));

    let _ = n_markers;
}
