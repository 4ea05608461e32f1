//! Consolidation - checkpoint triggers and the periodic maintenance pass
//!
//! Checkpoints are the durability boundary: anything learned after the last
//! one is lost on a crash. Maintenance is the forgetting side of plasticity:
//! synapses that stop being co-activated decay and are eventually pruned.

use crate::colony::Colony;
use crate::graph::SynapticGraph;
use crate::quantizer::VectorQuantizer;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Policy for when to checkpoint and how many checkpoints to retain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointPolicy {
    /// Triggers that initiate a checkpoint
    pub triggers: Vec<CheckpointTrigger>,

    /// Manifests retained after garbage collection
    pub keep_checkpoints: usize,

    /// Write attempts before a checkpoint is reported as failed
    pub max_write_retries: u32,
}

/// Triggers for checkpointing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointTrigger {
    /// Checkpoint after N learning steps
    StepCount(u64),

    /// Checkpoint after a time period
    TimePeriod { seconds: u64 },

    /// Only on explicit request
    Manual,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            triggers: vec![
                CheckpointTrigger::StepCount(1000),
                CheckpointTrigger::TimePeriod { seconds: 300 },
            ],
            keep_checkpoints: 2,
            max_write_retries: 3,
        }
    }
}

impl CheckpointPolicy {
    /// Frequent checkpoints, small loss window
    pub fn aggressive() -> Self {
        Self {
            triggers: vec![
                CheckpointTrigger::StepCount(100),
                CheckpointTrigger::TimePeriod { seconds: 30 },
            ],
            keep_checkpoints: 3,
            max_write_retries: 5,
        }
    }

    /// Infrequent checkpoints
    pub fn conservative() -> Self {
        Self {
            triggers: vec![
                CheckpointTrigger::StepCount(10_000),
                CheckpointTrigger::TimePeriod { seconds: 3600 },
            ],
            keep_checkpoints: 2,
            max_write_retries: 3,
        }
    }

    /// Checkpoint only when asked
    pub fn manual() -> Self {
        Self {
            triggers: vec![CheckpointTrigger::Manual],
            ..Self::default()
        }
    }

    /// Check if any trigger is met
    pub fn should_checkpoint(&self, steps_since: u64, last_checkpoint: &DateTime<Utc>) -> bool {
        for trigger in &self.triggers {
            match trigger {
                CheckpointTrigger::StepCount(n) => {
                    if *n > 0 && steps_since >= *n {
                        return true;
                    }
                }
                CheckpointTrigger::TimePeriod { seconds } => {
                    // Nothing new to write
                    if steps_since == 0 {
                        continue;
                    }
                    let elapsed = Utc::now().signed_duration_since(*last_checkpoint);
                    if elapsed >= Duration::seconds(*seconds as i64) {
                        return true;
                    }
                }
                CheckpointTrigger::Manual => {}
            }
        }
        false
    }
}

/// When and how hard the maintenance pass runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenancePolicy {
    /// Run every N learning steps (0 disables)
    pub decay_interval: u64,

    /// Synapses unused for longer than this many steps decay
    pub decay_idle_steps: u64,
}

impl Default for MaintenancePolicy {
    fn default() -> Self {
        Self {
            decay_interval: 256,
            decay_idle_steps: 2048,
        }
    }
}

impl MaintenancePolicy {
    pub fn is_due(&self, step: u64) -> bool {
        self.decay_interval > 0 && step > 0 && step % self.decay_interval == 0
    }
}

/// Result of a maintenance pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceResult {
    /// Synapses weakened and kept
    pub decayed: usize,

    /// Synapses removed
    pub pruned: usize,

    /// Codebook entries reseeded
    pub reseeded: usize,
}

/// Decay idle resident synapses and reseed idle codes.
///
/// Only resident edges are visited; evicted clusters keep their stored
/// weights until they are paged back in.
pub fn maintain(
    graph: &mut SynapticGraph,
    colony: &mut Colony,
    quantizer: &mut VectorQuantizer,
    step: u64,
    policy: &MaintenancePolicy,
) -> MaintenanceResult {
    let decay = graph.decay_idle(step, policy.decay_idle_steps);
    colony.mark_changed(decay.touched.iter().map(|id| id.cluster()));
    let reseeded = quantizer.reseed_idle();

    let result = MaintenanceResult {
        decayed: decay.decayed,
        pruned: decay.pruned,
        reseeded,
    };
    if result.pruned > 0 || result.reseeded > 0 {
        tracing::debug!(step, decayed = result.decayed, pruned = result.pruned, reseeded, "maintenance pass");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colony::ColonyConfig;
    use crate::encoder::FEATURE_DIM;
    use crate::neuron::{ClusterId, NeuronId};
    use crate::quantizer::QuantizerConfig;

    #[test]
    fn test_checkpoint_policy_step_count() {
        let policy = CheckpointPolicy::default();
        let now = Utc::now();
        assert!(!policy.should_checkpoint(10, &now));
        assert!(policy.should_checkpoint(1000, &now));
    }

    #[test]
    fn test_checkpoint_policy_time() {
        let policy = CheckpointPolicy {
            triggers: vec![CheckpointTrigger::TimePeriod { seconds: 60 }],
            ..Default::default()
        };
        let old = Utc::now() - Duration::seconds(120);
        assert!(policy.should_checkpoint(1, &old));
        assert!(!policy.should_checkpoint(0, &old));
        assert!(!policy.should_checkpoint(1, &Utc::now()));
    }

    #[test]
    fn test_manual_never_fires() {
        let policy = CheckpointPolicy::manual();
        let old = Utc::now() - Duration::days(30);
        assert!(!policy.should_checkpoint(u64::MAX, &old));
    }

    #[test]
    fn test_maintenance_schedule() {
        let policy = MaintenancePolicy::default();
        assert!(!policy.is_due(0));
        assert!(!policy.is_due(255));
        assert!(policy.is_due(256));

        let off = MaintenancePolicy {
            decay_interval: 0,
            ..Default::default()
        };
        assert!(!off.is_due(256));
    }

    #[test]
    fn test_maintain_prunes_idle_synapses() {
        let mut graph = SynapticGraph::default();
        let mut colony = Colony::new(ColonyConfig::default());
        let mut quantizer = VectorQuantizer::new(FEATURE_DIM, QuantizerConfig::default());
        let a = NeuronId::new(ClusterId(0), 0);
        let b = NeuronId::new(ClusterId(0), 1);
        graph.learn(&[a, b], 0);

        let policy = MaintenancePolicy {
            decay_interval: 1,
            decay_idle_steps: 5,
        };
        let mut pruned = 0;
        for step in 10..100 {
            pruned += maintain(&mut graph, &mut colony, &mut quantizer, step, &policy).pruned;
        }
        assert_eq!(pruned, 2);
        assert_eq!(graph.synapse_count(), 0);
    }
}
