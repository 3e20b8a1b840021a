// Copyright 2016-2020 Patrick K. Albers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Binary grid reader/writer, grounded on
//! `examples/original_source/src/gen/GenGrid.cpp`'s `Grid::Make` /
//! `Grid::Read`: little-endian fixed-width fields, each section bracketed
//! by a 4-byte checkpoint literal that is validated on read and whose
//! mismatch is fatal.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::errors::GridError;
use crate::grid::{Grid, GridSource};
use crate::model::{GenotypeCounts, HaplotypeCounts, Marker, Sample, SampleId};

/// The fixed 4-byte literal separating every section of the file.
pub const CHECKPOINT: [u8; 4] = *b"GEV\x01";

fn write_checkpoint<W: Write>(w: &mut W) -> std::io::Result<()> {
    w.write_all(&CHECKPOINT)
}

fn read_checkpoint<R: Read>(r: &mut R, offset: u64) -> Result<(), GridError> {
    let mut found = [0u8; 4];
    r.read_exact(&mut found)?;
    if found != CHECKPOINT {
        return Err(GridError::CheckpointMismatch {
            offset,
            expected: CHECKPOINT,
            found,
        });
    }
    Ok(())
}

fn write_string<W: Write>(w: &mut W, s: &str) -> std::io::Result<()> {
    w.write_u16::<LittleEndian>(s.len() as u16)?;
    w.write_all(s.as_bytes())
}

fn read_string<R: Read>(r: &mut R) -> std::io::Result<String> {
    let len = r.read_u16::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Persist a fully decoded grid to `out`: header, per-individual packed
/// byte records, a sample section, then a marker section, each closed by a
/// checkpoint.
pub fn write_grid<W: Write>(out: &mut W, samples: &[Sample], markers: &[Marker], rows: &[Vec<u8>], interval_first: u32, interval_last: u32, compressed: bool) -> std::io::Result<()> {
    out.write_u32::<LittleEndian>(samples.len() as u32)?;
    out.write_u32::<LittleEndian>(markers.len() as u32)?;
    out.write_u32::<LittleEndian>(interval_first)?;
    out.write_u32::<LittleEndian>(interval_last)?;
    out.write_u8(compressed as u8)?;

    for (i, row) in rows.iter().enumerate() {
        write_checkpoint(out)?;
        out.write_u32::<LittleEndian>(i as u32)?;
        out.write_u32::<LittleEndian>(markers.len() as u32)?;
        out.write_u32::<LittleEndian>(row.len() as u32)?;
        out.write_all(row)?;
    }

    write_checkpoint(out)?;
    for sample in samples {
        out.write_u32::<LittleEndian>(sample.id as u32)?;
        write_string(out, &sample.label)?;
        out.write_u8(sample.phased as u8)?;
    }

    write_checkpoint(out)?;
    for marker in markers {
        out.write_u32::<LittleEndian>(marker.id as u32)?;
        write_string(out, &marker.allele_ref)?;
        write_string(out, &marker.allele_alt)?;
        out.write_u16::<LittleEndian>(marker.chromosome)?;
        out.write_u32::<LittleEndian>(marker.position)?;
        out.write_u32::<LittleEndian>(marker.haplotype_counts.ref_count)?;
        out.write_u32::<LittleEndian>(marker.haplotype_counts.alt_count)?;
        out.write_u32::<LittleEndian>(marker.haplotype_counts.missing_count)?;
        out.write_u32::<LittleEndian>(marker.genotype_counts.hom_ref)?;
        out.write_u32::<LittleEndian>(marker.genotype_counts.het)?;
        out.write_u32::<LittleEndian>(marker.genotype_counts.hom_alt)?;
        out.write_u32::<LittleEndian>(marker.genotype_counts.missing)?;
        out.write_f64::<LittleEndian>(marker.recomb_rate)?;
        out.write_f64::<LittleEndian>(marker.dist_cm)?;
    }
    write_checkpoint(out)
}

/// Everything needed to reconstruct a `Grid` after reading the file.
pub struct LoadedGrid {
    pub samples: Vec<Sample>,
    pub markers: Vec<Marker>,
    pub rows: Vec<Vec<u8>>,
    pub interval_first: u32,
    pub interval_last: u32,
    pub compressed: bool,
}

pub fn read_grid<R: Read>(r: &mut R) -> Result<LoadedGrid, GridError> {
    let n_samples = r.read_u32::<LittleEndian>()? as usize;
    let n_markers = r.read_u32::<LittleEndian>()? as usize;
    let interval_first = r.read_u32::<LittleEndian>()?;
    let interval_last = r.read_u32::<LittleEndian>()?;
    let compressed = r.read_u8()? != 0;

    let mut rows = Vec::with_capacity(n_samples);
    for i in 0..n_samples {
        read_checkpoint(r, 0)?;
        let idx = r.read_u32::<LittleEndian>()? as usize;
        if idx != i {
            return Err(GridError::DuplicateSampleId { id: idx });
        }
        let marker_size = r.read_u32::<LittleEndian>()? as usize;
        if marker_size != n_markers {
            return Err(GridError::WrongDecodedLength {
                sample: idx,
                expected: n_markers,
                actual: marker_size,
            });
        }
        let vector_length = r.read_u32::<LittleEndian>()? as usize;
        let mut raw = vec![0u8; vector_length];
        r.read_exact(&mut raw)?;
        rows.push(raw);
    }

    read_checkpoint(r, 0)?;
    let mut samples = Vec::with_capacity(n_samples);
    for _ in 0..n_samples {
        let id = r.read_u32::<LittleEndian>()? as SampleId;
        let label = read_string(r)?;
        let phased = r.read_u8()? != 0;
        samples.push(Sample { id, label, phased });
    }

    read_checkpoint(r, 0)?;
    let mut markers = Vec::with_capacity(n_markers);
    for _ in 0..n_markers {
        let id = r.read_u32::<LittleEndian>()? as usize;
        let allele_ref = read_string(r)?;
        let allele_alt = read_string(r)?;
        let chromosome = r.read_u16::<LittleEndian>()?;
        let position = r.read_u32::<LittleEndian>()?;
        let haplotype_counts = HaplotypeCounts {
            ref_count: r.read_u32::<LittleEndian>()?,
            alt_count: r.read_u32::<LittleEndian>()?,
            missing_count: r.read_u32::<LittleEndian>()?,
        };
        let genotype_counts = GenotypeCounts {
            hom_ref: r.read_u32::<LittleEndian>()?,
            het: r.read_u32::<LittleEndian>()?,
            hom_alt: r.read_u32::<LittleEndian>()?,
            missing: r.read_u32::<LittleEndian>()?,
        };
        let recomb_rate = r.read_f64::<LittleEndian>()?;
        let dist_cm = r.read_f64::<LittleEndian>()?;
        markers.push(Marker {
            id,
            chromosome,
            position,
            allele_ref,
            allele_alt,
            haplotype_counts,
            genotype_counts,
            recomb_rate,
            dist_cm,
        });
    }
    read_checkpoint(r, 0)?;

    Ok(LoadedGrid {
        samples,
        markers,
        rows,
        interval_first,
        interval_last,
        compressed,
    })
}

/// `GridSource` backed by the rows decoded from a file already read fully
/// into memory; seeking back into the file on every `get` is unnecessary at
/// the scale this crate targets.
pub struct FileGridSource {
    rows: Vec<Vec<u8>>,
    compressed: bool,
}

impl FileGridSource {
    pub fn new(rows: Vec<Vec<u8>>, compressed: bool) -> Self {
        FileGridSource { rows, compressed }
    }
}

impl GridSource for FileGridSource {
    fn raw_bytes(&self, sample: SampleId) -> Result<Vec<u8>, GridError> {
        self.rows.get(sample).cloned().ok_or(GridError::UnknownSampleId { id: sample })
    }

    fn compressed(&self) -> bool {
        self.compressed
    }
}

pub fn load_grid<R: Read>(r: &mut R) -> Result<Grid, GridError> {
    let loaded = read_grid(r)?;
    let source = Box::new(FileGridSource::new(loaded.rows, loaded.compressed));
    Grid::new(loaded.samples, loaded.markers, source)
}
