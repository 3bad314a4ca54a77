//! The embedding provider is an external collaborator (§1): the core only
//! consumes a pure text→vector function. This module defines that seam as a
//! trait plus one concrete, deterministic implementation (§10.4) so that
//! integration tests and the scenarios in spec §8 are self-contained without
//! a network call.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::metrics::{normalize_in_place, sample_standard_normal};

/// Pure text→vector function. Implementations are expected to be
/// deterministic for a given `(text, dim)` pair only to the extent they
/// choose to be; the core itself makes no such assumption except through
/// [`StubEmbedder`].
pub trait Embedder: Send + Sync {
    /// Embed `text` into a dense vector of this embedder's fixed dimension.
    fn embed(&self, text: &str) -> Vec<f32>;

    /// The dimension every vector this embedder produces will have.
    fn dim(&self) -> usize;
}

/// Deterministic embedder for tests and demos: seeds a PRNG from a hash of
/// the input text, draws `dim` standard-normal samples, and L2-normalizes.
/// Grounded line-for-line in semantics on the original `StubEmbeddingProvider`.
/// Repeated calls with the same text and dimension always produce the same
/// vector, and vectors are unit-length so cosine-metric assumptions hold.
#[derive(Debug, Clone)]
pub struct StubEmbedder {
    dim: usize,
}

impl StubEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Embedder for StubEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let seed = hasher.finish();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut v: Vec<f32> = (0..self.dim).map(|_| sample_standard_normal(&mut rng)).collect();
        normalize_in_place(&mut v);
        v
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_text_gives_same_vector() {
        let embedder = StubEmbedder::new(16);
        assert_eq!(embedder.embed("hello"), embedder.embed("hello"));
    }

    #[test]
    fn different_text_gives_different_vector() {
        let embedder = StubEmbedder::new(16);
        assert_ne!(embedder.embed("hello"), embedder.embed("goodbye"));
    }

    #[test]
    fn vectors_are_unit_length() {
        let embedder = StubEmbedder::new(32);
        let v = embedder.embed("some chunk of text");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn dim_matches_requested() {
        let embedder = StubEmbedder::new(7);
        assert_eq!(embedder.embed("x").len(), 7);
        assert_eq!(embedder.dim(), 7);
    }
}
