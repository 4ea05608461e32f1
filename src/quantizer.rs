//! Vector Quantizer - learned codebook of feature-space regions
//!
//! Maps a feature vector to the index of its nearest prototype ("region code").
//! Distance is cosine, fixed for the lifetime of an engine. Ties go to the
//! lowest index so assignment is deterministic.
//!
//! ## Learning
//!
//! - **Cold start**: while fewer than K codes exist, a vector that is not
//!   similar enough to any existing code seeds a new one directly.
//! - **EMA**: vectors assigned during a training step are accumulated, and
//!   `commit_step` moves each touched code toward the mean of its assignments:
//!   `code = γ·code + (1-γ)·mean`.
//! - **Reseeding** (optional): codes idle for a long window are replaced by a
//!   recently observed vector. Their index never changes.

use crate::encoder::cosine_similarity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Discrete identifier of a feature-space region
pub type RegionCode = u32;

const RESERVOIR_CAPACITY: usize = 64;

/// Quantizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizerConfig {
    /// Number of codes K (fixed for a trained engine)
    pub codebook_size: usize,

    /// EMA decay γ applied per training step
    pub ema_decay: f32,

    /// During cold start, seed a new code if the best similarity is below this
    pub seed_similarity: f32,

    /// Reseed codes unused for this many steps (None disables the policy)
    pub reseed_idle_steps: Option<u64>,
}

impl Default for QuantizerConfig {
    fn default() -> Self {
        Self {
            codebook_size: 256,
            ema_decay: 0.95,
            seed_similarity: 0.8,
            reseed_idle_steps: None,
        }
    }
}

/// Ordered prototypes with per-code usage and EMA state
///
/// Codes are only ever appended (during cold start) or updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Codebook {
    /// Vector dimensionality
    pub dim: usize,

    /// Capacity K
    pub capacity: usize,

    /// Populated prototypes, `codes.len() <= capacity`
    pub codes: Vec<Vec<f32>>,

    /// Lifetime assignment count per code
    pub usage: Vec<u64>,

    /// Training step at which each code was last updated
    pub last_used: Vec<u64>,

    /// EMA decay γ
    pub ema_decay: f32,

    /// Committed training steps
    pub step: u64,
}

impl Codebook {
    pub fn new(dim: usize, capacity: usize, ema_decay: f32) -> Self {
        Self {
            dim,
            capacity,
            codes: Vec::new(),
            usage: Vec::new(),
            last_used: Vec::new(),
            ema_decay,
            step: 0,
        }
    }

    /// Number of populated codes
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.codes.len() >= self.capacity
    }
}

/// Codebook plus per-step accumulation state
#[derive(Debug, Clone)]
pub struct VectorQuantizer {
    codebook: Codebook,
    config: QuantizerConfig,
    /// code -> (sum of assigned vectors, count) for the current step
    pending: BTreeMap<RegionCode, (Vec<f32>, u64)>,
    /// Recently observed vectors for reseeding idle codes
    reservoir: VecDeque<Vec<f32>>,
}

impl VectorQuantizer {
    pub fn new(dim: usize, config: QuantizerConfig) -> Self {
        let codebook = Codebook::new(dim, config.codebook_size, config.ema_decay);
        Self::from_codebook(codebook, config)
    }

    /// Resume from a persisted codebook
    pub fn from_codebook(codebook: Codebook, config: QuantizerConfig) -> Self {
        Self {
            codebook,
            config,
            pending: BTreeMap::new(),
            reservoir: VecDeque::with_capacity(RESERVOIR_CAPACITY),
        }
    }

    pub fn codebook(&self) -> &Codebook {
        &self.codebook
    }

    /// Nearest code for a vector, or None before any code exists.
    ///
    /// Never mutates the codebook; this is the query path.
    pub fn quantize(&self, vector: &[f32]) -> Option<RegionCode> {
        self.nearest(vector, 1).first().map(|(code, _)| *code)
    }

    /// Up to `n` nearest codes with their similarity, best first.
    ///
    /// Ties are broken by lowest code index.
    pub fn nearest(&self, vector: &[f32], n: usize) -> Vec<(RegionCode, f32)> {
        let mut scored: Vec<(RegionCode, f32)> = self
            .codebook
            .codes
            .iter()
            .enumerate()
            .map(|(i, code)| (i as RegionCode, cosine_similarity(vector, code)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(n);
        scored
    }

    /// Assign a region during learning, seeding a new code on cold start.
    pub fn assign(&mut self, vector: &[f32]) -> RegionCode {
        let best = self.nearest(vector, 1).first().copied();
        let seed = match best {
            None => true,
            Some((_, sim)) => !self.codebook.is_full() && sim < self.config.seed_similarity,
        };

        if seed && !self.codebook.is_full() {
            let code = self.codebook.codes.len() as RegionCode;
            self.codebook.codes.push(vector.to_vec());
            self.codebook.usage.push(0);
            self.codebook.last_used.push(self.codebook.step);
            tracing::debug!(code, populated = self.codebook.len(), "seeded codebook entry");
            return code;
        }

        best.map(|(code, _)| code).unwrap_or(0)
    }

    /// Record an assignment for the current training step.
    pub fn update(&mut self, vector: &[f32], code: RegionCode) {
        if code as usize >= self.codebook.codes.len() || vector.len() != self.codebook.dim {
            return;
        }
        let entry = self
            .pending
            .entry(code)
            .or_insert_with(|| (vec![0.0; vector.len()], 0));
        for (acc, v) in entry.0.iter_mut().zip(vector) {
            *acc += v;
        }
        entry.1 += 1;

        if self.reservoir.len() == RESERVOIR_CAPACITY {
            self.reservoir.pop_front();
        }
        self.reservoir.push_back(vector.to_vec());
    }

    /// Apply the EMA for every code touched this step and advance the step.
    pub fn commit_step(&mut self) {
        let gamma = self.codebook.ema_decay.clamp(0.0, 1.0);
        let step = self.codebook.step;
        let pending = std::mem::take(&mut self.pending);

        for (code, (sum, count)) in pending {
            let idx = code as usize;
            let proto = &mut self.codebook.codes[idx];
            for (p, s) in proto.iter_mut().zip(&sum) {
                let mean = s / count as f32;
                let next = gamma * *p + (1.0 - gamma) * mean;
                *p = if next.is_finite() { next } else { 0.0 };
            }
            normalize(proto);
            self.codebook.usage[idx] += count;
            self.codebook.last_used[idx] = step;
        }

        self.codebook.step += 1;
    }

    /// Replace codes idle longer than the configured window. Returns the count.
    pub fn reseed_idle(&mut self) -> usize {
        let Some(window) = self.config.reseed_idle_steps else {
            return 0;
        };
        let step = self.codebook.step;
        let mut reseeded = 0;

        for idx in 0..self.codebook.codes.len() {
            if step.saturating_sub(self.codebook.last_used[idx]) <= window {
                continue;
            }
            let Some(fresh) = self.reservoir.pop_back() else {
                break;
            };
            self.codebook.codes[idx] = fresh;
            self.codebook.usage[idx] = 0;
            self.codebook.last_used[idx] = step;
            reseeded += 1;
        }

        if reseeded > 0 {
            tracing::debug!(reseeded, step, "reseeded idle codebook entries");
        }
        reseeded
    }

    /// Exponential of the lifetime usage entropy. Observability only.
    ///
    /// Rises as codes are discovered and settles at the effective number of
    /// codes in use. Between discoveries it can dip slightly while usage
    /// counts are uneven.
    pub fn perplexity(&self) -> f32 {
        let total: u64 = self.codebook.usage.iter().sum();
        if total == 0 {
            return 0.0;
        }
        let entropy: f64 = self
            .codebook
            .usage
            .iter()
            .filter(|&&u| u > 0)
            .map(|&u| {
                let p = u as f64 / total as f64;
                -p * p.ln()
            })
            .sum();
        entropy.exp() as f32
    }

    /// Fraction of the K codes that have ever been used. Observability only.
    pub fn utilization(&self) -> f32 {
        if self.codebook.capacity == 0 {
            return 0.0;
        }
        let active = self.codebook.usage.iter().filter(|&&u| u > 0).count();
        active as f32 / self.codebook.capacity as f32
    }
}

fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterConfig;
    use crate::encoder::{encode, FEATURE_DIM};
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn quantizer(k: usize) -> VectorQuantizer {
        VectorQuantizer::new(
            FEATURE_DIM,
            QuantizerConfig {
                codebook_size: k,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_empty_codebook_quantize() {
        let q = quantizer(4);
        assert_eq!(q.quantize(encode("cat").as_slice()), None);
    }

    #[test]
    fn test_cold_start_seeds_distinct() {
        let mut q = quantizer(4);
        let a = q.assign(encode("cat").as_slice());
        let b = q.assign(encode("xylophone").as_slice());
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(q.codebook().len(), 2);

        // Same vector maps back to its seed
        assert_eq!(q.assign(encode("cat").as_slice()), 0);
        assert_eq!(q.codebook().len(), 2);
    }

    #[test]
    fn test_capacity_is_fixed() {
        let mut q = quantizer(2);
        for word in ["alpha", "quartz", "mnemonic", "zygote", "buffalo"] {
            let v = encode(word);
            let code = q.assign(v.as_slice());
            assert!(code < 2);
        }
        assert_eq!(q.codebook().len(), 2);
    }

    #[test]
    fn test_tie_breaks_to_lowest_index() {
        let mut q = quantizer(4);
        let v = encode("same");
        q.codebook.codes.push(v.as_slice().to_vec());
        q.codebook.codes.push(v.as_slice().to_vec());
        q.codebook.usage.extend([0, 0]);
        q.codebook.last_used.extend([0, 0]);
        assert_eq!(q.quantize(v.as_slice()), Some(0));
    }

    #[test]
    fn test_ema_update_moves_toward_mean() {
        let mut q = quantizer(1);
        let a = encode("apple");
        let b = encode("apricot");
        let code = q.assign(a.as_slice());
        let before = cosine_similarity(&q.codebook().codes[0], b.as_slice());

        q.update(b.as_slice(), code);
        q.commit_step();

        let after = cosine_similarity(&q.codebook().codes[0], b.as_slice());
        assert!(after > before);
        assert_eq!(q.codebook().usage[0], 1);
        assert_eq!(q.codebook().step, 1);
    }

    #[test]
    fn test_perplexity_and_utilization() {
        let mut q = quantizer(8);
        assert_eq!(q.perplexity(), 0.0);
        for word in ["one", "quartz", "mnemonic", "zygote"] {
            let v = encode(word);
            let code = q.assign(v.as_slice());
            q.update(v.as_slice(), code);
        }
        q.commit_step();
        assert!(q.perplexity() > 1.0);
        assert!(q.utilization() > 0.0 && q.utilization() <= 1.0);
    }

    /// Noisy sample around one of 32 orthogonal four-dimension directions
    fn region_sample(region: usize, rng: &mut ChaCha8Rng) -> Vec<f32> {
        let mut v: Vec<f32> = (0..FEATURE_DIM).map(|_| rng.gen_range(-0.05..0.05)).collect();
        for x in &mut v[region * 4..region * 4 + 4] {
            *x += 1.0;
        }
        v
    }

    #[test]
    fn test_perplexity_rises_then_plateaus() {
        const REGIONS: usize = 32;
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut q = quantizer(64);
        let mut history = Vec::new();

        // Each epoch visits every region once, in a shuffled order
        for _ in 0..12 {
            let mut order: Vec<usize> = (0..REGIONS).collect();
            order.shuffle(&mut rng);
            for region in order {
                let v = region_sample(region, &mut rng);
                let code = q.assign(&v);
                q.update(&v, code);
                q.commit_step();
                history.push(q.perplexity());
            }
        }
        assert_eq!(q.codebook().len(), REGIONS);

        // Strictly rising while regions are still being discovered
        for pair in history[..REGIONS].windows(2) {
            assert!(pair[1] > pair[0], "{:?}", pair);
        }

        // Usage counts differ by at most one per code, which bounds the dip
        // below the running peak at 6% (second epoch, half the codes ahead)
        let mut peak = 0.0f32;
        for (step, &p) in history.iter().enumerate() {
            peak = peak.max(p);
            assert!(p >= 0.93 * peak, "step {}: {} vs peak {}", step, p, peak);
        }

        // Plateau at the region count over the last five epochs
        for &p in &history[history.len() - 5 * REGIONS..] {
            assert!((p - REGIONS as f32).abs() <= 0.01 * REGIONS as f32, "{}", p);
        }
    }

    #[test]
    fn test_similar_inputs_share_or_neighbor_regions() {
        let vocab = [
            "garden", "river", "window", "harbor", "morning", "coffee", "bridge", "yellow", "planet", "lantern",
            "winter", "forest", "market", "candle", "rocket", "violin",
        ];
        let mut q = quantizer(256);
        for _ in 0..5 {
            for word in vocab {
                let v = encode(word);
                let code = q.assign(v.as_slice());
                q.update(v.as_slice(), code);
                q.commit_step();
            }
        }

        let threshold = ClusterConfig::default().similarity_threshold;
        let search = 1 + ClusterConfig::default().neighbor_regions;
        let pairs = [
            ("harbor", "harbors"),
            ("lantern", "lanterns"),
            ("garden", "gardens"),
            ("rocket", "rockets"),
            ("violin", "violins"),
        ];
        let mut checked = 0;
        for (a, b) in pairs {
            let (va, vb) = (encode(a), encode(b));
            if va.cosine(&vb) < threshold {
                continue;
            }
            checked += 1;
            let code_b = q.quantize(vb.as_slice()).unwrap();
            let near_a: Vec<RegionCode> = q.nearest(va.as_slice(), search).into_iter().map(|(c, _)| c).collect();
            assert!(near_a.contains(&code_b), "{} -> {:?}, {} -> {}", a, near_a, b, code_b);

            // The shared prototype is closer to the variant than to an unrelated word
            let proto = &q.codebook().codes[code_b as usize];
            let unrelated = encode("qzxjklvwmp");
            assert!(cosine_similarity(proto, vb.as_slice()) > cosine_similarity(proto, unrelated.as_slice()));
        }
        assert!(checked > 0);
    }

    #[test]
    fn test_reseed_keeps_index() {
        let mut q = VectorQuantizer::new(
            FEATURE_DIM,
            QuantizerConfig {
                codebook_size: 2,
                reseed_idle_steps: Some(2),
                ..Default::default()
            },
        );
        let idle = q.assign(encode("dormant").as_slice());
        let busy = encode("active");
        let busy_code = q.assign(busy.as_slice());
        for _ in 0..5 {
            q.update(busy.as_slice(), busy_code);
            q.commit_step();
        }
        assert_eq!(q.reseed_idle(), 1);
        assert_eq!(q.codebook().len(), 2);
        assert_eq!(q.codebook().usage[idle as usize], 0);
    }
}
