//! Engine configuration
//!
//! Every knob the engine exposes, grouped by component. All sections default
//! independently, so a JSON file only needs the fields it changes.

use crate::cluster::ClusterConfig;
use crate::colony::ColonyConfig;
use crate::consolidation::{CheckpointPolicy, MaintenancePolicy};
use crate::error::{Error, Result};
use crate::graph::CascadeParams;
use crate::hypernetwork::HypernetworkConfig;
use crate::plasticity::HebbianRule;
use crate::quantizer::QuantizerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Novelty scoring weights and classification thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoveltyConfig {
    /// Weight on `min(growth_ratio, 1)`
    pub growth_weight: f32,

    /// Weight on `depth / max_depth`
    pub depth_weight: f32,

    /// Weight on average per-layer growth
    pub layer_weight: f32,

    /// Novelty below this is "familiar"
    pub familiar_below: f32,

    /// Novelty at or above this is "novel"
    pub novel_at: f32,
}

impl Default for NoveltyConfig {
    fn default() -> Self {
        Self {
            growth_weight: 0.4,
            depth_weight: 0.4,
            layer_weight: 0.2,
            familiar_below: 0.35,
            novel_at: 0.70,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub quantizer: QuantizerConfig,
    pub hypernetwork: HypernetworkConfig,
    pub hebbian: HebbianRule,
    pub cascade: CascadeParams,
    pub cluster: ClusterConfig,
    pub colony: ColonyConfig,
    pub novelty: NoveltyConfig,
    pub checkpoint: CheckpointPolicy,
    pub maintenance: MaintenancePolicy,
}

impl EngineConfig {
    /// Wires quickly and checkpoints often
    pub fn fast_learner() -> Self {
        Self {
            hebbian: HebbianRule::aggressive(),
            checkpoint: CheckpointPolicy::aggressive(),
            maintenance: MaintenancePolicy {
                decay_interval: 128,
                decay_idle_steps: 1024,
            },
            ..Self::default()
        }
    }

    /// Slow plasticity, small working set, infrequent checkpoints
    pub fn conservative() -> Self {
        Self {
            hebbian: HebbianRule::conservative(),
            colony: ColonyConfig::compact(),
            checkpoint: CheckpointPolicy::conservative(),
            maintenance: MaintenancePolicy {
                decay_interval: 1024,
                decay_idle_steps: 8192,
            },
            ..Self::default()
        }
    }

    /// Load from a JSON file and validate
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Write as pretty JSON
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject knob combinations the engine cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.quantizer.codebook_size == 0 {
            return Err(Error::Config("quantizer.codebook_size must be at least 1".into()));
        }
        unit("quantizer.ema_decay", self.quantizer.ema_decay)?;
        unit("quantizer.seed_similarity", self.quantizer.seed_similarity)?;

        let h = &self.hypernetwork;
        if h.min_neurons > h.max_neurons {
            return Err(Error::Config(format!(
                "hypernetwork.min_neurons ({}) exceeds max_neurons ({})",
                h.min_neurons, h.max_neurons
            )));
        }
        for (name, v) in [("alpha", h.alpha), ("beta", h.beta), ("gamma", h.gamma), ("bias_range", h.bias_range)] {
            if !v.is_finite() || v < 0.0 {
                return Err(Error::Config(format!("hypernetwork.{} must be finite and non-negative", name)));
            }
        }

        let r = &self.hebbian;
        unit("hebbian.initial_weight", r.initial_weight)?;
        unit("hebbian.wiring_weight", r.wiring_weight)?;
        unit("hebbian.increment", r.increment)?;
        unit("hebbian.decay_factor", r.decay_factor)?;
        unit("hebbian.prune_threshold", r.prune_threshold)?;
        if r.should_prune(r.initial_weight) || r.should_prune(r.wiring_weight) {
            return Err(Error::Config("hebbian initial and wiring weights must exceed prune_threshold".into()));
        }

        unit("cascade.decay_factor", self.cascade.decay_factor)?;
        unit("cascade.activation_threshold", self.cascade.activation_threshold)?;
        if self.cascade.neuron_cap == 0 {
            return Err(Error::Config("cascade.neuron_cap must be at least 1".into()));
        }

        unit("cluster.similarity_threshold", self.cluster.similarity_threshold)?;
        unit("cluster.query_similarity_threshold", self.cluster.query_similarity_threshold)?;

        if self.colony.max_loaded_clusters == 0 {
            return Err(Error::Config("colony.max_loaded_clusters must be at least 1".into()));
        }
        if self.colony.clusters_per_partition == 0 {
            return Err(Error::Config("colony.clusters_per_partition must be at least 1".into()));
        }

        let n = &self.novelty;
        for (name, v) in [
            ("growth_weight", n.growth_weight),
            ("depth_weight", n.depth_weight),
            ("layer_weight", n.layer_weight),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(Error::Config(format!("novelty.{} must be finite and non-negative", name)));
            }
        }
        unit("novelty.familiar_below", n.familiar_below)?;
        unit("novelty.novel_at", n.novel_at)?;
        if n.familiar_below > n.novel_at {
            return Err(Error::Config("novelty.familiar_below must not exceed novel_at".into()));
        }

        if self.checkpoint.max_write_retries == 0 {
            return Err(Error::Config("checkpoint.max_write_retries must be at least 1".into()));
        }
        Ok(())
    }
}

fn unit(name: &str, v: f32) -> Result<()> {
    if v.is_finite() && (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(Error::Config(format!("{} must be within [0, 1], got {}", name, v)))
    }
}
