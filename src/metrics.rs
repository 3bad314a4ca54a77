//! Metric kernels over dense float vectors.
//!
//! Provides `dot`, `l2_squared`, and `cosine`, plus the unified "larger is
//! better" `score` used by every index and ranker so that flat scan and the
//! RP-forest agree on ordering.

/// Threshold for treating a norm as "effectively zero" in cosine similarity.
const NORM_EPSILON: f32 = 1e-9;

/// Dot product of two vectors. Mismatched lengths use the shorter length
/// rather than panicking; callers enforce the dimension invariant upstream.
#[inline]
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    let mut acc = 0.0f32;
    for i in 0..n {
        acc += a[i] * b[i];
    }
    acc
}

/// Squared Euclidean distance between two vectors.
#[inline]
#[must_use]
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    let mut acc = 0.0f32;
    for i in 0..n {
        let d = a[i] - b[i];
        acc += d * d;
    }
    acc
}

/// L2 norm of a vector.
#[inline]
#[must_use]
pub fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Cosine similarity. Assumes both vectors are L2-normalized, in which case
/// this equals `dot(a, b)`; computed directly here so callers that pass
/// unnormalized vectors still get a sensible value rather than relying on an
/// invariant they might violate.
#[must_use]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let na = norm(a);
    let nb = norm(b);
    if na < NORM_EPSILON || nb < NORM_EPSILON {
        return 0.0;
    }
    dot(a, b) / (na * nb)
}

/// Distance metric selectable per index/query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
    L2,
}

impl Metric {
    /// Parse from the wire string used in request bodies and persisted state.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cosine" => Some(Metric::Cosine),
            "l2" => Some(Metric::L2),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::L2 => "l2",
        }
    }
}

/// The unified "larger is better" score for top-k selection: cosine
/// similarity as-is, or negated squared L2 so that closer points still score
/// higher.
#[inline]
#[must_use]
pub fn score(metric: Metric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        Metric::Cosine => cosine(a, b),
        Metric::L2 => -l2_squared(a, b),
    }
}

/// Normalize a vector to unit length in place. No-op on effectively-zero
/// vectors.
pub fn normalize_in_place(v: &mut [f32]) {
    let n = norm(v);
    if n < NORM_EPSILON {
        return;
    }
    for x in v.iter_mut() {
        *x /= n;
    }
}

/// Draw one standard-normal sample via the Box-Muller transform. The crate
/// has no `rand_distr` dependency, so this is the portable way to get
/// Gaussian samples out of `rand`'s uniform generators.
pub fn sample_standard_normal(rng: &mut impl rand::Rng) -> f32 {
    let u1: f32 = rng.gen_range(1e-12f32..1.0);
    let u2: f32 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

/// Sample a vector uniform on the unit sphere: draw independent standard
/// normal coordinates, then normalize.
pub fn random_unit_vector(dim: usize, rng: &mut impl rand::Rng) -> Vec<f32> {
    let mut v: Vec<f32> = (0..dim).map(|_| sample_standard_normal(rng)).collect();
    normalize_in_place(&mut v);
    v
}
