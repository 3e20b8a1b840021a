// Copyright 2016-2020 Patrick K. Albers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Crate-wide error types.
//!
//! Each concern gets its own flat `thiserror` enum, following the pattern in
//! varlociraptor's `errors.rs`. Fatal error kinds are represented here;
//! soft/recoverable issues are never errors, they are skipped pairs/sites
//! counted as warnings by the orchestrator.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    #[error("checkpoint mismatch at offset {offset}: expected {expected:?}, found {found:?}")]
    CheckpointMismatch {
        offset: u64,
        expected: [u8; 4],
        found: [u8; 4],
    },
    #[error("decompressed genotype vector for sample {sample} has length {actual}, expected {expected}")]
    WrongDecodedLength {
        sample: usize,
        expected: usize,
        actual: usize,
    },
    #[error("duplicate sample id {id} on reload")]
    DuplicateSampleId { id: usize },
    #[error("missing sample id {id} on reload")]
    MissingSampleId { id: usize },
    #[error("phase requested on unphased variant vector for sample {id}")]
    PhaseRequestedOnUnphased { id: usize },
    #[error("no such sample id {id}")]
    UnknownSampleId { id: usize },
    #[error("no such marker id {id}")]
    UnknownMarkerId { id: usize },
    #[error("marker positions are not strictly increasing at index {index}")]
    NonMonotonicPosition { index: usize },
    #[error("genetic distance decreases at index {index}")]
    NonMonotonicDistance { index: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ShareIndexError {
    #[error("requested minor allele count fk={fk} is below the minimum of 2")]
    FkTooSmall { fk: usize },
    #[error("no marker found at position {position}")]
    PositionNotFound { position: u32 },
    #[error("carrier count at site {marker} is {actual}, expected fk={expected}")]
    CarrierCountMismatch {
        marker: usize,
        expected: usize,
        actual: usize,
    },
}

#[derive(Error, Debug)]
pub enum HmmError {
    #[error("decoded transition probability {value} outside [0,1] for fk={fk}")]
    TransitionOutOfRange { value: f64, fk: usize },
    #[error("focal observation {observed:?} is invalid for a {kind} pair")]
    InvalidFocalObservation { observed: String, kind: &'static str },
    #[error("hmm parameter row sum {sum} outside [0.999, 1.001] for frequency {frequency}")]
    RowSumOutOfRange { sum: f64, frequency: f64 },
    #[error("hmm parameter file {path:?} header does not match expected columns")]
    HeaderMismatch { path: PathBuf },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CcfError {
    #[error("segment ({lhs},{rhs}) does not contain focal site {focal}")]
    SegmentExcludesFocal {
        lhs: usize,
        focal: usize,
        rhs: usize,
    },
    #[error("posterior probability vectors shorter than segment length")]
    PosteriorTooShort,
}

#[derive(Error, Debug)]
pub enum EstimateError {
    #[error("both theta components (Ne, mutation rate) were set explicitly and estimated; exactly one source is allowed")]
    ConflictingTheta,
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error("preprocess mode requires --vcf")]
    MissingVcf,
    #[error("infer mode requires exactly one of --position or --positions")]
    PositionSpecConflict,
    #[error("infer mode requires --hmm <initial> <emission>")]
    MissingHmmFiles,
    #[error("--out prefix is required")]
    MissingOutPrefix,
}

/// Aggregate error type returned from the CLI entry point.
#[derive(Error, Debug)]
pub enum GevaError {
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    ShareIndex(#[from] ShareIndexError),
    #[error(transparent)]
    Hmm(#[from] HmmError),
    #[error(transparent)]
    Ccf(#[from] CcfError),
    #[error(transparent)]
    Estimate(#[from] EstimateError),
    #[error(transparent)]
    Cli(#[from] CliError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}
