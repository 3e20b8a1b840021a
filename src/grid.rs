// Copyright 2016-2020 Patrick K. Albers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The genotype grid: random-access per-individual genotype vectors
//! behind a bounded, randomly-evicting cache.
//!
//! Grounded on `examples/original_source/src/gen/GenGrid.cpp`'s `Grid::read`
//! / `Grid::get` / `Grid::prune`. The file-backed byte source is abstracted
//! behind `GridSource`; this module only owns cache semantics and decode
//! validation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::Rng;

use crate::errors::GridError;
use crate::model::{self, Genotype, Marker, MarkerId, Sample, SampleId, VariantVector};

/// Supplies raw (possibly compressed) per-sample genotype bytes. Concrete
/// implementations live in `crate::io::grid_io` (binary file) and in test
/// fixtures (in-memory).
pub trait GridSource: Send + Sync {
    fn raw_bytes(&self, sample: SampleId) -> Result<Vec<u8>, GridError>;
    fn compressed(&self) -> bool;
}

/// An in-memory source used by tests and by the preprocess pipeline before
/// it is persisted to disk.
pub struct InMemorySource {
    rows: Vec<Vec<u8>>,
    compressed: bool,
}

impl InMemorySource {
    pub fn new(rows: Vec<Vec<Genotype>>, compressed: bool) -> Self {
        let rows = rows
            .into_iter()
            .map(|r| if compressed { model::compress(&r) } else { raw_bytes_of(&r) })
            .collect();
        InMemorySource { rows, compressed }
    }
}

fn raw_bytes_of(values: &[Genotype]) -> Vec<u8> {
    // Uncompressed on-disk representation stores one byte per genotype, the
    // run field fixed at zero (a run of length 1); this keeps `decompress`
    // usable uniformly regardless of the grid's compression flag.
    values.iter().map(|g| encode_uncompressed(*g)).collect()
}

fn encode_uncompressed(g: Genotype) -> u8 {
    // Re-use the packed single-run encoding: compress() on a length-1 slice
    // yields exactly one such byte.
    model::compress(&[g])[0]
}

impl GridSource for InMemorySource {
    fn raw_bytes(&self, sample: SampleId) -> Result<Vec<u8>, GridError> {
        self.rows
            .get(sample)
            .cloned()
            .ok_or(GridError::UnknownSampleId { id: sample })
    }

    fn compressed(&self) -> bool {
        self.compressed
    }
}

struct CacheState {
    entries: HashMap<SampleId, Arc<VariantVector>>,
    /// Deterministic iteration order over sample ids used by the rotating
    /// cursor eviction scan.
    order: Vec<SampleId>,
    limit: usize,
}

impl CacheState {
    fn new(sample_count: usize) -> Self {
        CacheState {
            entries: HashMap::new(),
            order: (0..sample_count).collect(),
            limit: usize::MAX,
        }
    }

    /// Random-cursor eviction: pick a random start, walk the sample order
    /// cyclically, evicting any entry whose only live reference is the
    /// cache's own (`Arc::strong_count == 1`), until the limit is met.
    fn prune(&mut self) {
        if self.entries.len() <= self.limit || self.order.is_empty() {
            return;
        }
        let n = self.order.len();
        let start = rand::thread_rng().gen_range(0, n);
        let mut cursor = (start + 1) % n;
        while cursor != start {
            let id = self.order[cursor];
            if let Some(entry) = self.entries.get(&id) {
                if Arc::strong_count(entry) == 1 {
                    self.entries.remove(&id);
                    if self.entries.len() <= self.limit {
                        return;
                    }
                }
            }
            cursor = (cursor + 1) % n;
        }
    }
}

/// The genotype grid: immutable sample/marker metadata plus a mutable,
/// serialised decode cache.
pub struct Grid {
    samples: Vec<Sample>,
    markers: Vec<Marker>,
    source: Box<dyn GridSource>,
    cache: Mutex<CacheState>,
}

impl Grid {
    pub fn new(samples: Vec<Sample>, markers: Vec<Marker>, source: Box<dyn GridSource>) -> Result<Self, GridError> {
        model::validate_marker_order(&markers)?;
        let cache = Mutex::new(CacheState::new(samples.len()));
        Ok(Grid {
            samples,
            markers,
            source,
            cache,
        })
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    pub fn sample(&self, id: SampleId) -> Result<&Sample, GridError> {
        self.samples.get(id).ok_or(GridError::UnknownSampleId { id })
    }

    pub fn marker(&self, id: MarkerId) -> Result<&Marker, GridError> {
        self.markers.get(id).ok_or(GridError::UnknownMarkerId { id })
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Decode a sample's raw genotype vector without populating the cache.
    pub fn read(&self, sample: SampleId) -> Result<Vec<Genotype>, GridError> {
        let _lock = self.cache.lock().unwrap();
        self.decode(sample)
    }

    fn decode(&self, sample: SampleId) -> Result<Vec<Genotype>, GridError> {
        // The packed byte format (code nibble + run nibble) is used whether
        // or not the grid was built with run-length folding enabled; an
        // "uncompressed" source simply never folds runs, so every byte
        // carries run=0 and raw_length == marker_count.
        let raw = self.source.raw_bytes(sample)?;
        let nm = self.marker_count();
        model::decompress(&raw, nm).ok_or(GridError::WrongDecodedLength {
            sample,
            expected: nm,
            actual: 0,
        })
    }

    /// Fetch (and cache) a sample's decoded variant vector.
    pub fn get(&self, sample: SampleId) -> Result<Arc<VariantVector>, GridError> {
        let mut guard = self.cache.lock().unwrap();
        if let Some(v) = guard.entries.get(&sample) {
            return Ok(Arc::clone(v));
        }
        guard.prune();
        let phased = self.sample(sample)?.phased;
        let values = self.decode(sample)?;
        let vector = Arc::new(VariantVector::new(sample, phased, values));
        guard.entries.insert(sample, Arc::clone(&vector));
        Ok(vector)
    }

    /// Set the cache ceiling (entry count) and prune to it immediately.
    pub fn set_cache_limit(&self, max_entries: usize) {
        let mut guard = self.cache.lock().unwrap();
        guard.limit = max_entries;
        guard.prune();
    }

    pub fn cached_entry_count(&self) -> usize {
        self.cache.lock().unwrap().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Genotype, GenotypeCounts, Haplotype, HaplotypeCounts};

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

    fn sample(id: usize, phased: bool) -> Sample {
        Sample {
            id,
            label: format!("S{}", id),
            phased,
        }
    }

    fn toy_grid(n_samples: usize, n_markers: usize, compressed: bool) -> Grid {
        let samples = (0..n_samples).map(|i| sample(i, true)).collect();
        let markers = (0..n_markers).map(|i| marker(i, (i as u32 + 1) * 100)).collect();
        let rows: Vec<Vec<Genotype>> = (0..n_samples)
            .map(|s| {
                (0..n_markers)
                    .map(|m| {
                        if (s + m) % 2 == 0 {
                            Genotype::new(Haplotype::Ref, Haplotype::Ref, true)
                        } else {
                            Genotype::new(Haplotype::Ref, Haplotype::Alt, true)
                        }
                    })
                    .collect()
            })
            .collect();
        let source = Box::new(InMemorySource::new(rows, compressed));
        Grid::new(samples, markers, source).unwrap()
    }

    #[test]
    fn get_returns_vector_of_marker_size() {
        let grid = toy_grid(5, 37, true);
        for s in 0..5 {
            let v = grid.get(s).unwrap();
            assert_eq!(v.len(), grid.marker_count());
        }
    }

    #[test]
    fn get_is_idempotent() {
        let grid = toy_grid(3, 10, false);
        let a = grid.get(1).unwrap();
        let b = grid.get(1).unwrap();
        assert_eq!(a.genotypes(), b.genotypes());
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn cache_prunes_to_limit() {
        let grid = toy_grid(20, 5, true);
        for s in 0..20 {
            let _ = grid.get(s).unwrap();
        }
        assert_eq!(grid.cached_entry_count(), 20);
        grid.set_cache_limit(5);
        assert!(grid.cached_entry_count() <= 5);
    }

    #[test]
    fn decode_failure_is_fatal() {
        struct BadSource;
        impl GridSource for BadSource {
            fn raw_bytes(&self, _sample: SampleId) -> Result<Vec<u8>, GridError> {
                Ok(vec![0u8; 2]) // far too short for any non-trivial marker_count
            }
            fn compressed(&self) -> bool {
                false
            }
        }
        let samples = vec![sample(0, true)];
        let markers: Vec<Marker> = (0..50).map(|i| marker(i, i as u32 + 1)).collect();
        let grid = Grid::new(samples, markers, Box::new(BadSource)).unwrap();
        assert!(grid.get(0).is_err());
    }
}
