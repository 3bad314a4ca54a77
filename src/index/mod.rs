//! The vector index layer: an exact flat scan and an approximate RP-forest,
//! both scored under the unified [`crate::metrics::score`] convention and
//! selectable per query through [`LiveIndex`].

pub mod flat;
pub mod rp_forest;

use std::collections::HashSet;
use std::sync::Arc;

use crate::domain::ChunkId;

pub use flat::FlatIndex;
pub use rp_forest::{RpForest, RpParams};

/// A live, swappable index instance held behind `Arc` so readers that
/// obtained a clone before a rebuild keep scoring against the old data.
#[derive(Clone)]
pub enum LiveIndex {
    Flat(Arc<FlatIndex>),
    Rp(Arc<RpForest>),
}

impl LiveIndex {
    pub fn query(&self, q: &[f32], k: usize) -> Vec<(ChunkId, f32)> {
        match self {
            LiveIndex::Flat(idx) => idx.query(q, k),
            LiveIndex::Rp(idx) => idx.query(q, k),
        }
    }

    pub fn query_filtered(&self, q: &[f32], k: usize, allowed: &HashSet<ChunkId>) -> Vec<(ChunkId, f32)> {
        match self {
            LiveIndex::Flat(idx) => idx.query_filtered(q, k, allowed),
            LiveIndex::Rp(idx) => idx.query_filtered(q, k, allowed),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            LiveIndex::Flat(idx) => idx.len(),
            LiveIndex::Rp(idx) => idx.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
