//! Annoy-style random-projection forest: an ensemble of trees, each splitting
//! its point set on a random hyperplane at the median projection. Compared to
//! a typical `AnnoyIndex`/`RPTree` (single uniform-in-`[-1,1]` hyperplane,
//! zero threshold, SoA vector storage), this version draws a true
//! standard-normal hyperplane direction with a median split threshold, with
//! every tree seeded reproducibly from one forest-level seed.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::domain::ChunkId;
use crate::metrics::{dot, random_unit_vector, score, Metric};

const MAX_SPLIT_ATTEMPTS: usize = 5;

fn default_trees() -> usize {
    6
}

fn default_leaf_size() -> usize {
    16
}

fn default_seed() -> u64 {
    42
}

fn default_candidate_mult() -> f32 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpParams {
    #[serde(default = "default_trees")]
    pub trees: usize,
    #[serde(default = "default_leaf_size")]
    pub leaf_size: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_candidate_mult")]
    pub candidate_mult: f32,
}

impl Default for RpParams {
    fn default() -> Self {
        Self {
            trees: default_trees(),
            leaf_size: default_leaf_size(),
            seed: default_seed(),
            candidate_mult: default_candidate_mult(),
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(Vec<ChunkId>),
    Internal { w: Vec<f32>, b: f32, left: Box<Node>, right: Box<Node> },
}

/// A forest of independent random-projection trees plus the raw vectors
/// needed for exact rerank of the union of candidate leaves.
#[derive(Debug, Clone)]
pub struct RpForest {
    metric: Metric,
    params: RpParams,
    trees: Vec<Node>,
    pairs: Vec<(ChunkId, Vec<f32>)>,
    by_id: HashMap<ChunkId, usize>,
}

impl RpForest {
    pub fn new(metric: Metric, params: RpParams) -> Self {
        Self {
            metric,
            params,
            trees: Vec::new(),
            pairs: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn params(&self) -> &RpParams {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Build `trees` trees from `pairs`. Each tree draws its own child seed
    /// from a single forest-level RNG seeded from `params.seed`, in tree
    /// order, so the whole forest is reproducible from one `u64`.
    pub fn rebuild(&mut self, pairs: Vec<(ChunkId, Vec<f32>)>) {
        let leaf_size = self.params.leaf_size.max(1);
        let mut seeder = ChaCha8Rng::seed_from_u64(self.params.seed);
        let indices: Vec<usize> = (0..pairs.len()).collect();
        let trees = (0..self.params.trees.max(1))
            .map(|_| {
                let tree_seed = seeder.next_u64();
                let mut rng = ChaCha8Rng::seed_from_u64(tree_seed);
                build_node(&pairs, indices.clone(), leaf_size, &mut rng)
            })
            .collect();
        self.by_id = pairs.iter().enumerate().map(|(i, (id, _))| (*id, i)).collect();
        self.pairs = pairs;
        self.trees = trees;
    }

    /// Union leaf candidates across all trees up to the cap, then exact
    /// rerank against `q`.
    pub fn query(&self, q: &[f32], k: usize) -> Vec<(ChunkId, f32)> {
        self.query_filtered_indices(q, k, |_| true)
    }

    pub fn query_filtered(&self, q: &[f32], k: usize, allowed: &HashSet<ChunkId>) -> Vec<(ChunkId, f32)> {
        self.query_filtered_indices(q, k, |id| allowed.contains(id))
    }

    fn candidates(&self, q: &[f32], k: usize) -> Vec<ChunkId> {
        let cap = k.max(
            ((self.trees.len() * self.params.leaf_size.max(1)) as f32 * self.params.candidate_mult.max(0.1))
                .floor() as usize,
        );
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        'trees: for tree in &self.trees {
            for id in descend(tree, q) {
                if seen.insert(id) {
                    out.push(id);
                    if out.len() >= cap {
                        break 'trees;
                    }
                }
            }
        }
        out.truncate(cap);
        out
    }

    fn query_filtered_indices(&self, q: &[f32], k: usize, keep: impl Fn(&ChunkId) -> bool) -> Vec<(ChunkId, f32)> {
        let candidates = self.candidates(q, k);
        let mut scored: Vec<(usize, ChunkId, f32)> = candidates
            .iter()
            .enumerate()
            .filter(|(_, id)| keep(id))
            .filter_map(|(i, id)| {
                self.by_id
                    .get(id)
                    .map(|&idx| (i, *id, score(self.metric, q, &self.pairs[idx].1)))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.into_iter().take(k).map(|(_, id, s)| (id, s)).collect()
    }
}

fn build_node(pairs: &[(ChunkId, Vec<f32>)], indices: Vec<usize>, leaf_size: usize, rng: &mut ChaCha8Rng) -> Node {
    if indices.len() <= leaf_size || indices.is_empty() {
        return Node::Leaf(indices.iter().map(|&i| pairs[i].0).collect());
    }
    let dim = pairs[indices[0]].1.len();
    for _ in 0..MAX_SPLIT_ATTEMPTS {
        let w = random_unit_vector(dim, rng);
        let mut projected: Vec<(usize, f32)> = indices.iter().map(|&i| (i, dot(&w, &pairs[i].1))).collect();
        projected.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        let median = projected[projected.len() / 2].1;
        let left: Vec<usize> = projected.iter().filter(|(_, p)| *p < median).map(|(i, _)| *i).collect();
        let right: Vec<usize> = projected.iter().filter(|(_, p)| *p >= median).map(|(i, _)| *i).collect();
        if !left.is_empty() && !right.is_empty() {
            return Node::Internal {
                w,
                b: median,
                left: Box::new(build_node(pairs, left, leaf_size, rng)),
                right: Box::new(build_node(pairs, right, leaf_size, rng)),
            };
        }
    }
    Node::Leaf(indices.iter().map(|&i| pairs[i].0).collect())
}

fn descend(node: &Node, q: &[f32]) -> Vec<ChunkId> {
    match node {
        Node::Leaf(ids) => ids.clone(),
        Node::Internal { w, b, left, right } => {
            if dot(w, q) >= *b {
                descend(right, q)
            } else {
                descend(left, q)
            }
        }
    }
}
