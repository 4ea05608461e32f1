//! Snapshots and the persisted record types
//!
//! An `EngineSnapshot` is an immutable copy of everything a checkpoint needs,
//! taken under a short read lock. The writer then works from the copy alone,
//! so learning never races the checkpoint iterating live collections.
//!
//! Every float is sanitized (NaN/Infinity become 0.0) before it is encoded.

use crate::cluster::ClusterMeta;
use crate::neuron::{ClusterId, NeuronRecord};
use crate::quantizer::Codebook;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Storage unit grouping a fixed range of cluster ids
pub type PartitionId = u32;

/// One immutable generation of a partition
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionData {
    pub id: PartitionId,
    /// Neuron records of every cluster in the partition, sorted by id
    pub neurons: Vec<NeuronRecord>,
}

impl PartitionData {
    pub fn empty(id: PartitionId) -> Self {
        Self {
            id,
            neurons: Vec::new(),
        }
    }

    /// Records belonging to one cluster
    pub fn cluster_records(&self, cluster: ClusterId) -> Vec<NeuronRecord> {
        self.neurons.iter().filter(|r| r.cluster() == cluster).cloned().collect()
    }

    pub fn sanitize(&mut self) {
        for record in &mut self.neurons {
            record.importance = sanitize_f32(record.importance).clamp(0.0, 1.0);
            for (_, synapse) in &mut record.synapses {
                synapse.weight = sanitize_f32(synapse.weight).clamp(0.0, 1.0);
            }
        }
        self.neurons.sort_by_key(|r| r.id);
    }
}

/// A manifest's pointer to one partition generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PartitionRef {
    pub id: PartitionId,
    pub generation: u64,
}

/// A committed checkpoint: codebook, cluster metadata and partition refs
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    /// Monotonic checkpoint sequence number
    pub sequence: u64,
    pub engine_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Learning steps completed when the snapshot was taken
    pub step: u64,
    pub next_cluster_id: u32,
    pub codebook: Codebook,
    pub clusters: Vec<ClusterMeta>,
    pub partitions: Vec<PartitionRef>,
}

impl Manifest {
    pub fn sanitize(&mut self) {
        for code in &mut self.codebook.codes {
            for v in code.iter_mut() {
                *v = sanitize_f32(*v);
            }
        }
        self.codebook.ema_decay = sanitize_f32(self.codebook.ema_decay);
        for meta in &mut self.clusters {
            for v in meta.centroid.iter_mut() {
                *v = sanitize_f32(*v);
            }
            meta.complexity = sanitize_f32(meta.complexity);
        }
        self.clusters.sort_by_key(|m| m.id);
        self.partitions.sort();
    }

    pub fn neuron_count(&self) -> usize {
        self.clusters.iter().map(|m| m.members.len()).sum()
    }

    pub fn generation_of(&self, partition: PartitionId) -> Option<u64> {
        self.partitions
            .iter()
            .find(|p| p.id == partition)
            .map(|p| p.generation)
    }
}

/// A partition with unpersisted changes, captured for the writer
#[derive(Debug, Clone)]
pub struct DirtyPartition {
    pub id: PartitionId,

    /// Generation the partition pointed at when the snapshot was taken
    pub base_generation: Option<u64>,

    /// Resident clusters: (id, revision at snapshot, records)
    pub resident: Vec<(ClusterId, u64, Vec<NeuronRecord>)>,

    /// Non-resident clusters whose records must be carried over from the base
    pub carried: BTreeSet<ClusterId>,
}

/// Immutable copy of engine state for one checkpoint
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub engine_id: Uuid,
    pub step: u64,
    pub next_cluster_id: u32,
    pub codebook: Codebook,
    pub clusters: Vec<ClusterMeta>,
    /// Partitions already durable at their current generation
    pub clean: Vec<PartitionRef>,
    pub dirty: Vec<DirtyPartition>,
}

impl EngineSnapshot {
    pub fn dirty_partitions(&self) -> usize {
        self.dirty.len()
    }
}

/// Replace NaN/Infinity with 0.0
pub fn sanitize_f32(v: f32) -> f32 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Synapse;
    use crate::neuron::NeuronId;

    fn record(cluster: u32, ordinal: u32) -> NeuronRecord {
        NeuronRecord {
            id: NeuronId::new(ClusterId(cluster), ordinal),
            region: 0,
            importance: f32::NAN,
            usage: 1,
            created_at: Utc::now(),
            last_activated: None,
            synapses: vec![(
                NeuronId::new(ClusterId(cluster), ordinal + 1),
                Synapse {
                    weight: f32::INFINITY,
                    last_used: 0,
                },
            )],
        }
    }

    #[test]
    fn test_partition_sanitize() {
        let mut data = PartitionData {
            id: 0,
            neurons: vec![record(1, 0), record(0, 3)],
        };
        data.sanitize();
        assert_eq!(data.neurons[0].id, NeuronId::new(ClusterId(0), 3));
        assert_eq!(data.neurons[0].importance, 0.0);
        assert_eq!(data.neurons[0].synapses[0].1.weight, 0.0);
        assert_eq!(data.cluster_records(ClusterId(1)).len(), 1);
    }

    #[test]
    fn test_manifest_sanitize() {
        let mut codebook = Codebook::new(2, 4, 0.95);
        codebook.codes.push(vec![f32::NAN, 1.0]);
        let mut manifest = Manifest {
            sequence: 1,
            engine_id: Uuid::new_v4(),
            created_at: Utc::now(),
            step: 0,
            next_cluster_id: 0,
            codebook,
            clusters: Vec::new(),
            partitions: vec![
                PartitionRef { id: 2, generation: 9 },
                PartitionRef { id: 1, generation: 4 },
            ],
        };
        manifest.sanitize();
        assert_eq!(manifest.codebook.codes[0], vec![0.0, 1.0]);
        assert_eq!(manifest.partitions[0].id, 1);
        assert_eq!(manifest.generation_of(2), Some(9));
        assert_eq!(manifest.generation_of(3), None);
    }
}
