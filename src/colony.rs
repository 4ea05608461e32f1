//! # Cluster Colony
//!
//! The colony owns every cluster's metadata and decides which clusters have
//! their neurons in memory.
//!
//! ## Residency
//!
//! - Metadata (id, region, centroid, membership) is always resident.
//! - Neurons and their outgoing synapses are loaded a partition at a time on
//!   first touch.
//! - At the end of each engine operation, clusters idle for longer than the
//!   eviction window are dropped, then least-recently-touched clusters until
//!   the resident count fits `max_loaded_clusters`.
//! - A dirty cluster is spilled (its partition rewritten as a new generation)
//!   before its neurons are dropped. If the spill fails it stays resident.
//!
//! ## Partitions
//!
//! Cluster `c` lives in partition `c / clusters_per_partition`. The colony
//! tracks the generation each partition currently resolves to.

use crate::cluster::{ClusterMeta, NeuronCluster};
use crate::error::{Error, Result};
use crate::graph::SynapticGraph;
use crate::hypernetwork::NeuronHypernetwork;
use crate::neuron::{ClusterId, NeuronId, NeuronRecord};
use crate::quantizer::RegionCode;
use crate::snapshot::{DirtyPartition, PartitionData, PartitionId, PartitionRef};
use crate::storage::{PartitionStore, WrittenPartition};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Residency and partitioning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColonyConfig {
    /// Resident clusters kept after each operation
    pub max_loaded_clusters: usize,

    /// Operations a cluster may go untouched before eviction
    pub idle_eviction_steps: u64,

    /// Clusters grouped into one partition file
    pub clusters_per_partition: u32,
}

impl Default for ColonyConfig {
    fn default() -> Self {
        Self {
            max_loaded_clusters: 256,
            idle_eviction_steps: 4096,
            clusters_per_partition: 4,
        }
    }
}

impl ColonyConfig {
    /// Small working set for memory-constrained hosts
    pub fn compact() -> Self {
        Self {
            max_loaded_clusters: 32,
            idle_eviction_steps: 512,
            clusters_per_partition: 4,
        }
    }
}

/// Colony statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColonyStats {
    pub clusters: usize,
    pub resident_clusters: usize,
    pub resident_neurons: usize,
    pub total_neurons: usize,
    pub partitions: usize,
    pub partition_loads: u64,
    pub evictions: u64,
    pub spills: u64,
    pub spill_failures: u64,
}

/// All clusters of one engine
#[derive(Debug)]
pub struct Colony {
    clusters: BTreeMap<ClusterId, NeuronCluster>,
    by_region: HashMap<RegionCode, Vec<ClusterId>>,
    partition_gens: BTreeMap<PartitionId, u64>,
    next_cluster_id: u32,
    config: ColonyConfig,
    clock: u64,
    partition_loads: u64,
    evictions: u64,
    spills: u64,
    spill_failures: u64,
}

impl Colony {
    pub fn new(config: ColonyConfig) -> Self {
        Self {
            clusters: BTreeMap::new(),
            by_region: HashMap::new(),
            partition_gens: BTreeMap::new(),
            next_cluster_id: 0,
            config,
            clock: 0,
            partition_loads: 0,
            evictions: 0,
            spills: 0,
            spill_failures: 0,
        }
    }

    /// Rebuild from checkpointed metadata. No neurons are loaded.
    pub fn restore(
        config: ColonyConfig,
        metas: Vec<ClusterMeta>,
        partitions: &[PartitionRef],
        next_cluster_id: u32,
    ) -> Self {
        let mut colony = Self::new(config);
        for meta in metas {
            colony.next_cluster_id = colony.next_cluster_id.max(meta.id.0.saturating_add(1));
            colony.by_region.entry(meta.region).or_default().push(meta.id);
            colony.clusters.insert(meta.id, NeuronCluster::from_meta(meta, 0));
        }
        colony.next_cluster_id = colony.next_cluster_id.max(next_cluster_id);
        for part in partitions {
            colony.partition_gens.insert(part.id, part.generation);
        }
        colony
    }

    pub fn config(&self) -> &ColonyConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn next_cluster_id(&self) -> u32 {
        self.next_cluster_id
    }

    pub fn get(&self, id: ClusterId) -> Option<&NeuronCluster> {
        self.clusters.get(&id)
    }

    pub fn get_mut(&mut self, id: ClusterId) -> Option<&mut NeuronCluster> {
        self.clusters.get_mut(&id)
    }

    pub fn clusters(&self) -> impl Iterator<Item = &NeuronCluster> {
        self.clusters.values()
    }

    /// Current operation tick
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Start a new operation
    pub fn advance_clock(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub fn partition_of(&self, id: ClusterId) -> PartitionId {
        id.0 / self.config.clusters_per_partition.max(1)
    }

    /// Generation each partition currently resolves to
    pub fn partition_generations(&self) -> &BTreeMap<PartitionId, u64> {
        &self.partition_gens
    }

    /// Does some cluster own this neuron id?
    pub fn is_known(&self, id: NeuronId) -> bool {
        self.clusters.get(&id.cluster()).map_or(false, |c| c.owns(id))
    }

    /// Clusters anchored at any of `regions`, with centroid similarity to
    /// `vector`, best first (ties to lowest id)
    pub fn candidates(&self, regions: &[RegionCode], vector: &[f32]) -> Vec<(ClusterId, f32)> {
        let mut found: Vec<(ClusterId, f32)> = Vec::new();
        for region in regions {
            let Some(ids) = self.by_region.get(region) else {
                continue;
            };
            for id in ids {
                if let Some(cluster) = self.clusters.get(id) {
                    found.push((*id, cluster.similarity(vector)));
                }
            }
        }
        found.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        found.dedup_by_key(|(id, _)| *id);
        found
    }

    /// Reuse the most similar cluster at or above `threshold`, otherwise
    /// allocate a new one anchored at `vector` in `region`.
    ///
    /// Returns the cluster id and whether it was created.
    pub fn find_or_create(
        &mut self,
        vector: &[f32],
        region: RegionCode,
        search_regions: &[RegionCode],
        complexity: f32,
        threshold: f32,
    ) -> Result<(ClusterId, bool)> {
        if let Some(&(id, sim)) = self.candidates(search_regions, vector).first() {
            if sim >= threshold {
                return Ok((id, false));
            }
        }

        let id = ClusterId(self.next_cluster_id);
        self.next_cluster_id = self
            .next_cluster_id
            .checked_add(1)
            .ok_or_else(|| Error::InvalidState("cluster id space exhausted".into()))?;

        let cluster = NeuronCluster::new(id, region, vector, complexity, self.clock);
        self.clusters.insert(id, cluster);
        self.by_region.entry(region).or_default().push(id);
        tracing::info!(cluster = %id, region, total = self.clusters.len(), "created cluster");
        Ok((id, true))
    }

    /// Make a cluster's neurons resident, loading its partition if needed
    pub fn ensure_resident(
        &mut self,
        id: ClusterId,
        graph: &mut SynapticGraph,
        store: &dyn PartitionStore,
        hypernet: &NeuronHypernetwork,
    ) -> bool {
        let clock = self.clock;
        match self.clusters.get_mut(&id) {
            None => return false,
            Some(cluster) if cluster.is_resident() => {
                cluster.touch(clock);
                return true;
            }
            Some(_) => {}
        }
        self.load_partition(self.partition_of(id), graph, store, hypernet);
        if let Some(cluster) = self.clusters.get_mut(&id) {
            cluster.touch(clock);
        }
        true
    }

    /// Materialize every non-resident cluster of a partition.
    ///
    /// Returns the number of clusters loaded.
    pub fn load_partition(
        &mut self,
        pid: PartitionId,
        graph: &mut SynapticGraph,
        store: &dyn PartitionStore,
        hypernet: &NeuronHypernetwork,
    ) -> usize {
        let targets: Vec<ClusterId> = self
            .partition_members(pid)
            .into_iter()
            .filter(|id| self.clusters.get(id).map_or(false, |c| !c.is_resident()))
            .collect();
        if targets.is_empty() {
            return 0;
        }

        let generation = self.partition_gens.get(&pid).copied();
        let data = store.load_partition(pid, generation);
        let mut by_cluster: BTreeMap<ClusterId, Vec<NeuronRecord>> = BTreeMap::new();
        for record in data.neurons {
            by_cluster.entry(record.cluster()).or_default().push(record);
        }

        let clock = self.clock;
        for id in &targets {
            // Detach so the orphan guard can consult the remaining clusters
            let Some(mut cluster) = self.clusters.remove(id) else {
                continue;
            };
            let records = by_cluster.remove(id).unwrap_or_default();
            let clusters = &self.clusters;
            let own_id = cluster.id();
            let own_members: BTreeSet<NeuronId> = cluster.member_ids().collect();
            cluster.materialize(records, hypernet, graph, |t| {
                if t.cluster() == own_id {
                    own_members.contains(&t)
                } else {
                    clusters.get(&t.cluster()).map_or(false, |c| c.owns(t))
                }
            });
            cluster.touch(clock);
            self.clusters.insert(*id, cluster);
        }

        self.partition_loads += 1;
        tracing::debug!(partition = pid, ?generation, clusters = targets.len(), "loaded partition");
        targets.len()
    }

    fn partition_members(&self, pid: PartitionId) -> Vec<ClusterId> {
        let per = self.config.clusters_per_partition.max(1);
        let start = pid.saturating_mul(per);
        let end = start.saturating_add(per);
        self.clusters
            .range(ClusterId(start)..ClusterId(end))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Write a partition's current state as a new generation.
    ///
    /// Resident clusters contribute their in-memory records; non-resident ones
    /// are carried over from the current generation.
    pub fn spill_partition(&mut self, pid: PartitionId, graph: &SynapticGraph, store: &dyn PartitionStore) -> Result<u64> {
        let members = self.partition_members(pid);
        let base_generation = self.partition_gens.get(&pid).copied();

        let mut data = PartitionData::empty(pid);
        let carried: BTreeSet<ClusterId> = members
            .iter()
            .copied()
            .filter(|id| self.clusters.get(id).map_or(false, |c| !c.is_resident()))
            .collect();
        if !carried.is_empty() {
            let base = store.load_partition(pid, base_generation);
            data.neurons
                .extend(base.neurons.into_iter().filter(|r| carried.contains(&r.cluster())));
        }

        let mut revisions = Vec::new();
        for id in &members {
            if let Some(cluster) = self.clusters.get(id) {
                if cluster.is_resident() {
                    data.neurons.extend(cluster.records(graph));
                    revisions.push((*id, cluster.revision()));
                }
            }
        }
        data.sanitize();

        let generation = store.allocate_generation();
        store.write_partition(&data, generation)?;

        self.partition_gens.insert(pid, generation);
        for (id, revision) in revisions {
            if let Some(cluster) = self.clusters.get_mut(&id) {
                cluster.mark_persisted(revision);
            }
        }
        self.spills += 1;
        tracing::debug!(partition = pid, generation, neurons = data.neurons.len(), "spilled partition");
        Ok(generation)
    }

    /// Drop a cluster's neurons, spilling first if it has unpersisted changes.
    ///
    /// Returns false if the cluster stays resident.
    pub fn evict(&mut self, id: ClusterId, graph: &mut SynapticGraph, store: &dyn PartitionStore) -> bool {
        let Some(cluster) = self.clusters.get(&id) else {
            return false;
        };
        if !cluster.is_resident() {
            return false;
        }
        if cluster.is_dirty() {
            let pid = self.partition_of(id);
            if let Err(e) = self.spill_partition(pid, graph, store) {
                self.spill_failures += 1;
                tracing::warn!(cluster = %id, partition = pid, error = %e, "spill failed, keeping cluster resident");
                return false;
            }
        }
        if let Some(cluster) = self.clusters.get_mut(&id) {
            cluster.dematerialize(graph);
        }
        self.evictions += 1;
        true
    }

    /// Evict every resident cluster of a partition. Returns the count evicted.
    pub fn evict_partition(&mut self, pid: PartitionId, graph: &mut SynapticGraph, store: &dyn PartitionStore) -> usize {
        self.partition_members(pid)
            .into_iter()
            .filter(|id| self.evict(*id, graph, store))
            .count()
    }

    /// Apply the idle window and the resident-cluster cap.
    ///
    /// Returns the number of clusters evicted.
    pub fn enforce_capacity(&mut self, graph: &mut SynapticGraph, store: &dyn PartitionStore) -> usize {
        let mut resident: Vec<(u64, ClusterId)> = self
            .clusters
            .values()
            .filter(|c| c.is_resident())
            .map(|c| (c.last_touched(), c.id()))
            .collect();
        resident.sort_unstable();

        let mut remaining = resident.len();
        let mut evicted = 0;
        for (last_touched, id) in resident {
            let idle = self.clock.saturating_sub(last_touched) > self.config.idle_eviction_steps;
            let over = remaining > self.config.max_loaded_clusters;
            if !idle && !over {
                // Sorted by recency: nothing later qualifies
                break;
            }
            if self.evict(id, graph, store) {
                evicted += 1;
                remaining -= 1;
            }
        }

        if evicted > 0 {
            tracing::debug!(evicted, resident = remaining, "evicted clusters");
        }
        evicted
    }

    /// Bring the resident count back under the cap without writing anything.
    ///
    /// Only clean clusters are dropped, least recently touched first, and
    /// clusters in `keep` stay. Dirty clusters wait for the learner or a
    /// checkpoint, so the cap can be exceeded until then.
    pub fn trim_clean(&mut self, graph: &mut SynapticGraph, keep: &BTreeSet<ClusterId>) -> usize {
        let mut resident: Vec<(u64, ClusterId)> = self
            .clusters
            .values()
            .filter(|c| c.is_resident())
            .map(|c| (c.last_touched(), c.id()))
            .collect();
        resident.sort_unstable();

        let mut remaining = resident.len();
        let mut dropped = 0;
        for (_, id) in resident {
            if remaining <= self.config.max_loaded_clusters {
                break;
            }
            if keep.contains(&id) {
                continue;
            }
            let Some(cluster) = self.clusters.get_mut(&id) else {
                continue;
            };
            if cluster.is_dirty() {
                continue;
            }
            cluster.dematerialize(graph);
            self.evictions += 1;
            dropped += 1;
            remaining -= 1;
        }
        dropped
    }

    /// Bump the revision of every listed cluster
    pub fn mark_changed(&mut self, ids: impl IntoIterator<Item = ClusterId>) {
        let unique: BTreeSet<ClusterId> = ids.into_iter().collect();
        for id in unique {
            if let Some(cluster) = self.clusters.get_mut(&id) {
                cluster.bump();
            }
        }
    }

    /// Metadata of every cluster, sorted by id
    pub fn metas(&self) -> Vec<ClusterMeta> {
        self.clusters.values().map(|c| c.meta().clone()).collect()
    }

    /// Split partitions into clean refs and dirty copies for a checkpoint
    pub fn snapshot_partitions(&self, graph: &SynapticGraph) -> (Vec<PartitionRef>, Vec<DirtyPartition>) {
        let mut grouped: BTreeMap<PartitionId, Vec<&NeuronCluster>> = BTreeMap::new();
        for cluster in self.clusters.values() {
            grouped.entry(self.partition_of(cluster.id())).or_default().push(cluster);
        }

        let mut clean = Vec::new();
        let mut dirty = Vec::new();
        for (pid, members) in grouped {
            let base_generation = self.partition_gens.get(&pid).copied();
            let is_dirty = members.iter().any(|c| c.is_dirty());
            if !is_dirty {
                if let Some(generation) = base_generation {
                    clean.push(PartitionRef { id: pid, generation });
                }
                continue;
            }

            let mut part = DirtyPartition {
                id: pid,
                base_generation,
                resident: Vec::new(),
                carried: BTreeSet::new(),
            };
            for cluster in members {
                if cluster.is_resident() {
                    part.resident.push((cluster.id(), cluster.revision(), cluster.records(graph)));
                } else {
                    part.carried.insert(cluster.id());
                }
            }
            dirty.push(part);
        }
        (clean, dirty)
    }

    /// Record a committed checkpoint.
    ///
    /// A partition adopts the checkpoint's generation only if nothing was
    /// spilled for it since the snapshot; a newer spill already holds state at
    /// least as recent.
    pub fn mark_persisted(&mut self, revisions: &[(ClusterId, u64)], written: &[WrittenPartition]) {
        for part in written {
            let current = self.partition_gens.get(&part.id).copied();
            if current == part.base_generation {
                self.partition_gens.insert(part.id, part.generation);
            }
        }
        for (id, revision) in revisions {
            if let Some(cluster) = self.clusters.get_mut(id) {
                cluster.mark_persisted(*revision);
            }
        }
    }

    pub fn resident_clusters(&self) -> usize {
        self.clusters.values().filter(|c| c.is_resident()).count()
    }

    pub fn stats(&self) -> ColonyStats {
        ColonyStats {
            clusters: self.clusters.len(),
            resident_clusters: self.resident_clusters(),
            resident_neurons: self.clusters.values().map(|c| c.resident_neurons()).sum(),
            total_neurons: self.clusters.values().map(|c| c.len()).sum(),
            partitions: self.partition_gens.len(),
            partition_loads: self.partition_loads,
            evictions: self.evictions,
            spills: self.spills,
            spill_failures: self.spill_failures,
        }
    }
}
