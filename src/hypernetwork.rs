//! Neuron Hypernetwork - procedural sizing and seeding of neuron populations
//!
//! Two pure functions:
//! - `budget` decides how many neurons a cluster should hold from its usage
//!   statistics: `round(α·ln(1+frequency) + β·novelty + γ·complexity)`, clamped.
//! - `generate` derives a neuron's non-learned attributes from a stable seed.
//!
//! Because generation is deterministic, storage only needs the region code and
//! the neuron id to rebuild these attributes. Synaptic weights are never derived
//! here; they are learned and always read back from storage.

use crate::neuron::NeuronId;
use crate::quantizer::RegionCode;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Budget weights and bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HypernetworkConfig {
    /// Weight on ln(1 + frequency)
    pub alpha: f32,
    /// Weight on novelty
    pub beta: f32,
    /// Weight on complexity
    pub gamma: f32,
    pub min_neurons: usize,
    pub max_neurons: usize,
    /// Half-width of the procedural bias range
    pub bias_range: f32,
}

impl Default for HypernetworkConfig {
    fn default() -> Self {
        Self {
            alpha: 4.0,
            beta: 8.0,
            gamma: 8.0,
            min_neurons: 4,
            max_neurons: 48,
            bias_range: 0.05,
        }
    }
}

/// Procedurally regenerable neuron attributes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeuronSeedState {
    /// Activation bias/threshold offset
    pub bias: f32,
}

#[derive(Debug, Clone, Default)]
pub struct NeuronHypernetwork {
    config: HypernetworkConfig,
}

impl NeuronHypernetwork {
    pub fn new(config: HypernetworkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HypernetworkConfig {
        &self.config
    }

    /// Target neuron count for a cluster
    pub fn budget(&self, frequency: u64, novelty: f32, complexity: f32) -> usize {
        let novelty = sanitize_unit(novelty);
        let complexity = sanitize_unit(complexity);
        let raw = self.config.alpha * (1.0 + frequency as f32).ln()
            + self.config.beta * novelty
            + self.config.gamma * complexity;
        let raw = if raw.is_finite() { raw.round().max(0.0) } else { 0.0 };
        (raw as usize).clamp(self.config.min_neurons, self.config.max_neurons.max(self.config.min_neurons))
    }

    /// Stable seed for a neuron: SHA-256 of (region code, neuron id)
    pub fn seed_for(region: RegionCode, id: NeuronId) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(region.to_le_bytes());
        hasher.update(id.raw().to_le_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash[..8]);
        u64::from_le_bytes(bytes)
    }

    /// Derive initial attributes from a seed
    pub fn generate(&self, seed: u64) -> NeuronSeedState {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let range = self.config.bias_range.abs();
        let bias = if range > 0.0 {
            rng.gen_range(-range..=range)
        } else {
            0.0
        };
        NeuronSeedState { bias }
    }

    /// Pick up to `fanout` wiring partners for a new neuron, deterministically.
    pub fn wiring_targets(&self, seed: u64, candidates: &[NeuronId], fanout: usize) -> Vec<NeuronId> {
        // Offset so wiring does not correlate with the bias draw
        let mut rng = ChaCha8Rng::seed_from_u64(seed ^ 0x9E37_79B9_7F4A_7C15);
        candidates
            .choose_multiple(&mut rng, fanout.min(candidates.len()))
            .copied()
            .collect()
    }
}

fn sanitize_unit(v: f32) -> f32 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
