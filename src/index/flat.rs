//! Brute-force flat index: score every stored vector, return the top-k.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::domain::ChunkId;
use crate::metrics::{score, Metric};

/// Ordered `(chunk_id, vector)` pairs plus the metric they're scored under.
/// `rebuild` replaces the whole state atomically; the previous instance (if
/// held via `Arc` by an in-flight reader) is untouched.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    metric: Metric,
    pairs: Vec<(ChunkId, Vec<f32>)>,
}

impl FlatIndex {
    pub fn new(metric: Metric) -> Self {
        Self { metric, pairs: Vec::new() }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn rebuild(&mut self, pairs: Vec<(ChunkId, Vec<f32>)>) {
        self.pairs = pairs;
    }

    /// Score every stored pair, return top-k by score, insertion-order
    /// tie-break.
    pub fn query(&self, q: &[f32], k: usize) -> Vec<(ChunkId, f32)> {
        self.query_filtered_indices(q, k, |_| true)
    }

    /// Like `query`, but only scores ids present in `allowed`.
    pub fn query_filtered(&self, q: &[f32], k: usize, allowed: &HashSet<ChunkId>) -> Vec<(ChunkId, f32)> {
        self.query_filtered_indices(q, k, |id| allowed.contains(id))
    }

    fn query_filtered_indices(
        &self,
        q: &[f32],
        k: usize,
        keep: impl Fn(&ChunkId) -> bool,
    ) -> Vec<(ChunkId, f32)> {
        let mut scored: Vec<(usize, ChunkId, f32)> = self
            .pairs
            .iter()
            .enumerate()
            .filter(|(_, (id, _))| keep(id))
            .map(|(i, (id, v))| (i, *id, score(self.metric, q, v)))
            .collect();
        scored.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.into_iter().take(k).map(|(_, id, s)| (id, s)).collect()
    }
}
