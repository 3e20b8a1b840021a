// Copyright 2016-2020 Patrick K. Albers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Command-line configuration and the dispatch that drives the pipeline,
//! following `examples/PROSIC-libprosic/src/cli.rs`'s `StructOpt` enum +
//! free `run` function shape.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use log::info;
use structopt::StructOpt;

use crate::ccf::Clock;
use crate::errors::{CliError, GevaError};
use crate::hmm::{EmissionTable, HmmModel, InitialTable};
use crate::io::{grid_io, hmm_io, output_io};
use crate::orchestrator::{batches_from_index, Orchestrator};
use crate::param::Parameters;
use crate::share_index::ShareIndex;

#[derive(Debug, StructOpt)]
#[structopt(name = "geva", about = "Estimation of allele age from shared haplotype segments.")]
pub enum Geva {
    /// Rebuild the binary grid from an already-materialized genotype
    /// source. True VCF/GEN/HAP ingestion is an external collaborator and
    /// is not implemented here; this mode exists so the rest of the
    /// pipeline has a concrete on-disk grid to run against.
    Preprocess {
        #[structopt(long)]
        grid: PathBuf,
        #[structopt(long)]
        out: PathBuf,
    },
    /// Run the full age-inference pipeline against a pre-built grid.
    Infer {
        #[structopt(long)]
        grid: PathBuf,
        #[structopt(long)]
        hmm_initial: PathBuf,
        #[structopt(long)]
        hmm_emission: PathBuf,
        #[structopt(long)]
        position: Option<u32>,
        #[structopt(long)]
        positions: Option<PathBuf>,
        #[structopt(long, default_value = "10000")]
        ne: f64,
        #[structopt(long, default_value = "1e-8")]
        mutation_rate: f64,
        #[structopt(long, default_value = "1024")]
        n_times: usize,
        #[structopt(long, default_value = "40.0")]
        max_time: f64,
        #[structopt(long, default_value = "4")]
        threads: usize,
        #[structopt(long)]
        limit_sharers: Option<usize>,
        #[structopt(long)]
        outgroup_size: Option<usize>,
        #[structopt(long)]
        out: PathBuf,
    },
    /// Decode and print a single pair's IBD segment without running the
    /// full aggregator; a debugging aid grounded on the original's
    /// `print_ibd.h`.
    DumpIbd {
        #[structopt(long)]
        grid: PathBuf,
        #[structopt(long)]
        hmm_initial: PathBuf,
        #[structopt(long)]
        hmm_emission: PathBuf,
        #[structopt(long)]
        position: u32,
        #[structopt(long)]
        sample_a: usize,
        #[structopt(long)]
        sample_b: usize,
        #[structopt(long, default_value = "10000")]
        ne: f64,
    },
}

fn setup_logging(out: &PathBuf) -> Result<(), GevaError> {
    let log_path = out.with_extension("log");
    fern::Dispatch::new()
        .format(|out, message, record| out.finish(format_args!("[{}] {}", record.level(), message)))
        .level(log::LevelFilter::Info)
        .chain(std::io::stdout())
        .chain(fern::log_file(log_path)?)
        .apply()
        .map_err(|e| GevaError::Other(e.to_string()))
}

fn load_grid_model(grid_path: &PathBuf, initial_path: &PathBuf, emission_path: &PathBuf, ne: f64) -> Result<(crate::grid::Grid, HmmModel), GevaError> {
    let grid_file = File::open(grid_path)?;
    let grid = grid_io::load_grid(&mut BufReader::new(grid_file))?;

    let nh = grid.sample_count() * 2;
    let alt_counts: Vec<usize> = grid.markers().iter().map(|m| m.haplotype_counts.alt_count as usize).collect();
    let frequencies: Vec<f64> = alt_counts.iter().map(|&k| k as f64 / nh as f64).collect();

    let initial_file = BufReader::new(File::open(initial_path)?);
    let (con, dis) = hmm_io::load_initial(initial_file, nh)?;
    let initial = InitialTable::from_interpolated(&alt_counts, &con, &dis);

    let emission_file = BufReader::new(File::open(emission_path)?);
    let emission_rows = hmm_io::load_emission(emission_file, nh)?;
    let per_marker_rows: Vec<_> = alt_counts.iter().map(|&k| emission_rows[k.min(emission_rows.len() - 1)]).collect();
    let emission = EmissionTable::from_rows(per_marker_rows);

    let dists: Vec<f64> = grid
        .markers()
        .windows(2)
        .map(|w| (w[1].dist_cm - w[0].dist_cm).max(1e-10))
        .collect();

    let model = HmmModel::new(initial, emission, dists, ne, nh);
    Ok((grid, model))
}

pub fn run(opt: Geva) -> Result<(), GevaError> {
    match opt {
        Geva::Preprocess { grid, out } => {
            setup_logging(&out)?;
            info!("rebuilding grid from {:?}", grid);
            let grid_file = File::open(&grid)?;
            let loaded = grid_io::read_grid(&mut BufReader::new(grid_file))?;
            let mut writer = BufWriter::new(File::create(&out)?);
            grid_io::write_grid(
                &mut writer,
                &loaded.samples,
                &loaded.markers,
                &loaded.rows,
                loaded.interval_first,
                loaded.interval_last,
                loaded.compressed,
            )?;
            writer.flush()?;
            Ok(())
        }
        Geva::Infer {
            grid,
            hmm_initial,
            hmm_emission,
            position,
            positions,
            ne,
            mutation_rate,
            n_times,
            max_time,
            threads,
            limit_sharers,
            outgroup_size,
            out,
        } => {
            setup_logging(&out)?;
            if position.is_some() == positions.is_some() {
                return Err(CliError::PositionSpecConflict.into());
            }
            let (grid, model) = load_grid_model(&grid, &hmm_initial, &hmm_emission, ne)?;
            let mut tuning_builder = crate::param::TuningBuilder::default();
            if let Some(v) = limit_sharers {
                tuning_builder.limit_sharers(v);
            }
            if let Some(v) = outgroup_size {
                tuning_builder.outgroup_size(v);
            }
            let tuning = tuning_builder.build().map_err(|e| GevaError::Other(e.to_string()))?;
            let mut params = Parameters::build_with_tuning(&grid, ne, mutation_rate, n_times, max_time, true, tuning);
            params.estimate_theta().ok();

            let positions: Vec<u32> = if let Some(p) = position {
                vec![p]
            } else {
                let path = positions.ok_or(CliError::PositionSpecConflict)?;
                std::fs::read_to_string(path)?
                    .split_whitespace()
                    .filter_map(|s| s.parse().ok())
                    .collect()
            };

            let indices = ShareIndex::select(&positions, &grid)?;
            let grid = Arc::new(grid);
            let model = Arc::new(model);
            let params = Arc::new(params);

            let mut pairs_out = BufWriter::new(File::create(out.with_extension("pairs.txt"))?);
            let mut sites_out = BufWriter::new(File::create(out.with_extension("sites.txt"))?);
            output_io::write_pairs_header(&mut pairs_out)?;
            output_io::write_sites_header(&mut sites_out)?;

            let orchestrator = Orchestrator::new(threads);
            for (_, index) in indices {
                let batches = batches_from_index(&index, &grid)?;
                orchestrator.run(Arc::clone(&grid), Arc::clone(&model), Arc::clone(&params), Clock::Cmb, batches, |outcome| {
                    output_io::write_pairs(&mut pairs_out, Clock::Cmb, &outcome.pairs).ok();
                    output_io::write_site(&mut sites_out, Clock::Cmb, &outcome.raw, &outcome.adjusted).ok();
                })?;
            }
            pairs_out.flush()?;
            sites_out.flush()?;
            Ok(())
        }
        Geva::DumpIbd {
            grid,
            hmm_initial,
            hmm_emission,
            position,
            sample_a,
            sample_b,
            ne,
        } => {
            let (grid, model) = load_grid_model(&grid, &hmm_initial, &hmm_emission, ne)?;
            let focal = grid
                .markers()
                .iter()
                .find(|m| m.position == position)
                .map(|m| m.id)
                .ok_or(crate::errors::ShareIndexError::PositionNotFound { position })?;
            let fk = grid.marker(focal)?.haplotype_counts.alt_count as usize;

            let a = grid.get(sample_a)?;
            let b = grid.get(sample_b)?;
            let markers: Vec<usize> = (0..grid.marker_count()).collect();
            let obs: Vec<_> = markers.iter().map(|&m| crate::hmm::decoder::classify_genotype(a.genotype(m), b.genotype(m))).collect();
            let observations = crate::hmm::PairObservations { markers, obs };

            let segment = crate::hmm::decode_pair(&model, fk, focal, &observations, true)?;
            println!("focal={focal} left={} right={}", segment.left, segment.right);
            Ok(())
        }
    }
}
