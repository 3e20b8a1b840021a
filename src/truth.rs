// Copyright 2016-2020 Patrick K. Albers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Simulation-truth comparison (supplemented from `original_source/`'s
//! `IBD_SIM`, explicitly named a simulation-truth-loader external
//! collaborator and out of core scope): a narrow trait plus a test-only
//! in-memory implementation, used to check a decoded `Segment`'s endpoints
//! against the breakpoints a simulator actually produced.

use crate::hmm::Segment;
use crate::model::{MarkerId, SampleId};

/// Ground-truth IBD breakpoints for a pair at a focal site, as known only in
/// simulated data.
pub trait TruthSource {
    fn true_segment(&self, focal: MarkerId, a: SampleId, b: SampleId) -> Option<Segment>;
}

/// A `TruthSource` populated directly in test code, keyed by
/// `(focal, a, b)` with `a <= b`.
#[derive(Default)]
pub struct InMemoryTruth {
    entries: std::collections::HashMap<(MarkerId, SampleId, SampleId), Segment>,
}

impl InMemoryTruth {
    pub fn new() -> Self {
        InMemoryTruth::default()
    }

    pub fn insert(&mut self, focal: MarkerId, a: SampleId, b: SampleId, segment: Segment) {
        let key = if a <= b { (focal, a, b) } else { (focal, b, a) };
        self.entries.insert(key, segment);
    }
}

impl TruthSource for InMemoryTruth {
    fn true_segment(&self, focal: MarkerId, a: SampleId, b: SampleId) -> Option<Segment> {
        let key = if a <= b { (focal, a, b) } else { (focal, b, a) };
        self.entries.get(&key).copied()
    }
}

/// Absolute difference (in marker-index units) between a decoded segment
/// and the known truth, on each side independently.
pub fn endpoint_error(decoded: Segment, truth: Segment) -> (usize, usize) {
    (
        decoded.left.abs_diff(truth.left),
        decoded.right.abs_diff(truth.right),
    )
}
