//! Neuron Cluster - a region-scoped neuron population
//!
//! A cluster's metadata (id, region, centroid, membership) is small and always
//! in memory. Its neurons and their outgoing synapses are materialized from a
//! partition on first touch and dropped again on eviction.
//!
//! Mutations bump a revision counter; the colony compares it against the last
//! persisted revision to decide what needs writing.

use crate::encoder::cosine_similarity;
use crate::error::{Error, Result};
use crate::graph::SynapticGraph;
use crate::hypernetwork::NeuronHypernetwork;
use crate::neuron::{ClusterId, Neuron, NeuronId, NeuronRecord};
use crate::quantizer::RegionCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cluster lookup and activation knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Reuse an existing cluster at or above this centroid similarity
    pub similarity_threshold: f32,

    /// Minimum centroid similarity for a cluster to seed a query
    pub query_similarity_threshold: f32,

    /// Extra nearest regions searched besides the best one
    pub neighbor_regions: usize,

    /// Neurons always activated when a concept is seen
    pub entry_neurons: usize,

    /// Rotating window of additional members activated per sample
    pub active_window: usize,

    /// Existing neurons each new neuron is wired to
    pub wiring_fanout: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.65,
            query_similarity_threshold: 0.65,
            neighbor_regions: 2,
            entry_neurons: 4,
            active_window: 8,
            wiring_fanout: 3,
        }
    }
}

/// Always-resident cluster metadata, persisted in the checkpoint manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMeta {
    pub id: ClusterId,
    pub region: RegionCode,
    /// Running mean of member vectors
    pub centroid: Vec<f32>,
    pub sample_count: u64,
    /// Running mean of input complexity
    pub complexity: f32,
    /// Next ordinal to allocate; never reused
    pub next_ordinal: u32,
    /// Member ordinals in allocation order
    pub members: Vec<u32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NeuronCluster {
    meta: ClusterMeta,
    neurons: BTreeMap<NeuronId, Neuron>,
    resident: bool,
    last_touched: u64,
    revision: u64,
    persisted_revision: u64,
}

impl NeuronCluster {
    /// A fresh, resident cluster anchored at `vector`
    pub fn new(id: ClusterId, region: RegionCode, vector: &[f32], complexity: f32, tick: u64) -> Self {
        Self {
            meta: ClusterMeta {
                id,
                region,
                centroid: vector.iter().map(|v| sanitize(*v)).collect(),
                sample_count: 0,
                complexity: sanitize(complexity).clamp(0.0, 1.0),
                next_ordinal: 0,
                members: Vec::new(),
                created_at: Utc::now(),
            },
            neurons: BTreeMap::new(),
            resident: true,
            last_touched: tick,
            // Never persisted yet
            revision: 1,
            persisted_revision: 0,
        }
    }

    /// Restore metadata only; neurons stay in storage until touched
    pub fn from_meta(meta: ClusterMeta, tick: u64) -> Self {
        Self {
            meta,
            neurons: BTreeMap::new(),
            resident: false,
            last_touched: tick,
            revision: 0,
            persisted_revision: 0,
        }
    }

    pub fn id(&self) -> ClusterId {
        self.meta.id
    }

    pub fn region(&self) -> RegionCode {
        self.meta.region
    }

    pub fn meta(&self) -> &ClusterMeta {
        &self.meta
    }

    pub fn centroid(&self) -> &[f32] {
        &self.meta.centroid
    }

    pub fn sample_count(&self) -> u64 {
        self.meta.sample_count
    }

    pub fn complexity(&self) -> f32 {
        self.meta.complexity
    }

    /// Member count (resident or not)
    pub fn len(&self) -> usize {
        self.meta.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meta.members.is_empty()
    }

    pub fn member_ids(&self) -> impl Iterator<Item = NeuronId> + '_ {
        self.meta.members.iter().map(|&o| NeuronId::new(self.meta.id, o))
    }

    /// Does this cluster own `id`?
    pub fn owns(&self, id: NeuronId) -> bool {
        id.cluster() == self.meta.id && self.meta.members.binary_search(&id.ordinal()).is_ok()
    }

    pub fn is_resident(&self) -> bool {
        self.resident
    }

    pub fn resident_neurons(&self) -> usize {
        self.neurons.len()
    }

    pub fn neuron(&self, id: NeuronId) -> Option<&Neuron> {
        self.neurons.get(&id)
    }

    pub fn last_touched(&self) -> u64 {
        self.last_touched
    }

    pub fn touch(&mut self, tick: u64) {
        self.last_touched = self.last_touched.max(tick);
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_dirty(&self) -> bool {
        self.revision > self.persisted_revision
    }

    /// Record a mutation of metadata, neurons or outgoing synapses
    pub fn bump(&mut self) {
        self.revision += 1;
    }

    /// Record that state up to `revision` is durable
    pub fn mark_persisted(&mut self, revision: u64) {
        self.persisted_revision = self.persisted_revision.max(revision.min(self.revision));
    }

    pub fn similarity(&self, vector: &[f32]) -> f32 {
        cosine_similarity(vector, &self.meta.centroid)
    }

    /// How unfamiliar `vector` is to this cluster; 1.0 before any sample
    pub fn novelty(&self, vector: &[f32]) -> f32 {
        if self.meta.sample_count == 0 {
            1.0
        } else {
            (1.0 - self.similarity(vector)).clamp(0.0, 1.0)
        }
    }

    /// Fold one sample into the centroid (incremental mean)
    pub fn observe(&mut self, vector: &[f32], complexity: f32) {
        self.meta.sample_count += 1;
        let n = self.meta.sample_count as f32;
        if vector.len() == self.meta.centroid.len() {
            for (c, v) in self.meta.centroid.iter_mut().zip(vector) {
                *c = sanitize(*c + (sanitize(*v) - *c) / n);
            }
        }
        let complexity = sanitize(complexity).clamp(0.0, 1.0);
        self.meta.complexity = sanitize(self.meta.complexity + (complexity - self.meta.complexity) / n);
        self.bump();
    }

    /// Grow to `target` members, wiring each new neuron into the population.
    ///
    /// Never removes members. Returns the ids that were created.
    pub fn grow(
        &mut self,
        target: usize,
        hypernet: &NeuronHypernetwork,
        graph: &mut SynapticGraph,
        fanout: usize,
        tick: u64,
    ) -> Result<Vec<NeuronId>> {
        if !self.resident {
            return Err(Error::InvalidState(format!("grow on non-resident cluster {}", self.meta.id)));
        }

        let wiring_weight = graph.rule().wiring_weight;
        let mut created = Vec::new();
        while self.meta.members.len() < target {
            let ordinal = self.meta.next_ordinal;
            let next = ordinal
                .checked_add(1)
                .ok_or_else(|| Error::InvalidState(format!("ordinal space exhausted in {}", self.meta.id)))?;
            let id = NeuronId::new(self.meta.id, ordinal);

            let candidates: Vec<NeuronId> = self.member_ids().collect();
            let seed = NeuronHypernetwork::seed_for(self.meta.region, id);
            for partner in hypernet.wiring_targets(seed, &candidates, fanout) {
                graph.connect(id, partner, wiring_weight, tick);
                graph.connect(partner, id, wiring_weight, tick);
            }

            self.neurons.insert(id, Neuron::grow(id, self.meta.region, hypernet));
            self.meta.members.push(ordinal);
            self.meta.next_ordinal = next;
            created.push(id);
        }

        if !created.is_empty() {
            self.bump();
        }
        Ok(created)
    }

    /// The first `n` members by allocation order
    pub fn entry_neurons(&self, n: usize) -> Vec<NeuronId> {
        self.member_ids().take(n).collect()
    }

    /// Entry neurons plus a window over the rest that rotates with each sample
    pub fn active_set(&self, entry: usize, window: usize) -> Vec<NeuronId> {
        let mut active = self.entry_neurons(entry);
        let rest = &self.meta.members[entry.min(self.meta.members.len())..];
        if !rest.is_empty() && window > 0 {
            let offset = (self.meta.sample_count as usize).wrapping_mul(window) % rest.len();
            for i in 0..window.min(rest.len()) {
                let ordinal = rest[(offset + i) % rest.len()];
                active.push(NeuronId::new(self.meta.id, ordinal));
            }
        }
        active
    }

    /// Mark neurons as co-active in a learning step
    pub fn activate(&mut self, ids: &[NeuronId], now: DateTime<Utc>) {
        let mut changed = false;
        for id in ids {
            if let Some(neuron) = self.neurons.get_mut(id) {
                neuron.activate(now);
                changed = true;
            }
        }
        if changed {
            self.bump();
        }
    }

    /// Load neuron records and their synapses.
    ///
    /// Members without a record are regenerated from their id. Records for
    /// ids this cluster does not own, and synapses whose target fails
    /// `is_known`, are dropped. Returns the number of dropped synapses.
    pub fn materialize(
        &mut self,
        records: Vec<NeuronRecord>,
        hypernet: &NeuronHypernetwork,
        graph: &mut SynapticGraph,
        is_known: impl Fn(NeuronId) -> bool,
    ) -> usize {
        if self.resident {
            return 0;
        }

        let mut by_id: BTreeMap<NeuronId, NeuronRecord> = BTreeMap::new();
        for record in records {
            if self.owns(record.id) {
                by_id.insert(record.id, record);
            } else {
                tracing::debug!(cluster = %self.meta.id, neuron = %record.id, "ignoring foreign neuron record");
            }
        }

        let mut orphans = 0;
        let ids: Vec<NeuronId> = self.member_ids().collect();
        for id in ids {
            let neuron = match by_id.remove(&id) {
                Some(record) => {
                    let neuron = Neuron::from_record(&record, hypernet);
                    let before = record.synapses.len();
                    let edges: Vec<_> = record.synapses.into_iter().filter(|(t, _)| is_known(*t)).collect();
                    orphans += before - edges.len();
                    graph.insert_outgoing(id, edges);
                    neuron
                }
                None => Neuron::grow(id, self.meta.region, hypernet),
            };
            self.neurons.insert(id, neuron);
        }

        if orphans > 0 {
            tracing::debug!(cluster = %self.meta.id, orphans, "dropped synapses to unknown neurons");
        }
        self.resident = true;
        orphans
    }

    /// Drop neurons and their outgoing synapses from memory
    pub fn dematerialize(&mut self, graph: &mut SynapticGraph) {
        for id in self.neurons.keys() {
            graph.remove_source(*id);
        }
        self.neurons.clear();
        self.resident = false;
    }

    /// Persistable records for every resident neuron, sorted by id
    pub fn records(&self, graph: &SynapticGraph) -> Vec<NeuronRecord> {
        self.neurons
            .values()
            .map(|n| n.to_record(graph.outgoing_records(n.id)))
            .collect()
    }
}

fn sanitize(v: f32) -> f32 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode;

    fn cluster(text: &str) -> NeuronCluster {
        NeuronCluster::new(ClusterId(1), 0, encode(text).as_slice(), 0.5, 0)
    }

    #[test]
    fn test_grow_is_monotonic() {
        let hypernet = NeuronHypernetwork::default();
        let mut graph = SynapticGraph::default();
        let mut c = cluster("cat");

        let created = c.grow(6, &hypernet, &mut graph, 3, 0).unwrap();
        assert_eq!(created.len(), 6);
        assert_eq!(c.len(), 6);

        // Smaller target never shrinks
        assert!(c.grow(2, &hypernet, &mut graph, 3, 1).unwrap().is_empty());
        assert_eq!(c.len(), 6);

        c.grow(10, &hypernet, &mut graph, 3, 2).unwrap();
        assert_eq!(c.len(), 10);
        assert_eq!(c.meta().next_ordinal, 10);
        assert!(graph.synapse_count() > 0);
    }

    #[test]
    fn test_new_neurons_are_wired() {
        let hypernet = NeuronHypernetwork::default();
        let mut graph = SynapticGraph::default();
        let mut c = cluster("dog");
        c.grow(8, &hypernet, &mut graph, 3, 0).unwrap();

        // Every neuron after the first has at least one partner
        for id in c.member_ids().skip(1) {
            assert!(graph.outgoing(id).map_or(0, |e| e.len()) >= 1, "{} unwired", id);
        }
    }

    #[test]
    fn test_observe_moves_centroid() {
        let mut c = cluster("apple");
        let other = encode("apples");
        let before = c.similarity(other.as_slice());
        c.observe(encode("apple").as_slice(), 0.5);
        c.observe(other.as_slice(), 0.5);
        assert_eq!(c.sample_count(), 2);
        assert!(c.similarity(other.as_slice()) > before);
        assert!(c.is_dirty());
    }

    #[test]
    fn test_active_set_rotates() {
        let hypernet = NeuronHypernetwork::default();
        let mut graph = SynapticGraph::default();
        let mut c = cluster("red");
        c.grow(20, &hypernet, &mut graph, 3, 0).unwrap();

        let first = c.active_set(4, 8);
        assert_eq!(first.len(), 12);
        assert_eq!(&first[..4], &c.entry_neurons(4)[..]);

        c.observe(encode("red").as_slice(), 0.5);
        let second = c.active_set(4, 8);
        assert_eq!(&second[..4], &first[..4]);
        assert_ne!(&second[4..], &first[4..]);
    }

    #[test]
    fn test_dematerialize_and_materialize() {
        let hypernet = NeuronHypernetwork::default();
        let mut graph = SynapticGraph::default();
        let mut c = cluster("fruit");
        c.grow(5, &hypernet, &mut graph, 3, 0).unwrap();
        let ids: Vec<_> = c.member_ids().collect();
        graph.learn(&ids, 1);

        let records = c.records(&graph);
        let synapses = graph.synapse_count();
        let bias = c.neuron(ids[2]).map(|n| n.bias);

        c.dematerialize(&mut graph);
        assert!(!c.is_resident());
        assert_eq!(graph.synapse_count(), 0);
        assert_eq!(c.len(), 5);

        let id = c.id();
        let dropped = c.materialize(records, &hypernet, &mut graph, |t| t.cluster() == id);
        assert_eq!(dropped, 0);
        assert_eq!(graph.synapse_count(), synapses);
        assert_eq!(c.neuron(ids[2]).map(|n| n.bias), bias);
    }

    #[test]
    fn test_materialize_drops_orphans_and_fills_gaps() {
        let hypernet = NeuronHypernetwork::default();
        let mut graph = SynapticGraph::default();
        let mut c = cluster("pear");
        c.grow(3, &hypernet, &mut graph, 3, 0).unwrap();
        let ids: Vec<_> = c.member_ids().collect();
        let ghost = NeuronId::new(ClusterId(99), 0);
        graph.connect(ids[0], ghost, 0.5, 0);

        let mut records = c.records(&graph);
        records.remove(1);
        c.dematerialize(&mut graph);

        let id = c.id();
        let dropped = c.materialize(records, &hypernet, &mut graph, |t| t.cluster() == id);
        assert_eq!(dropped, 1);
        assert_eq!(c.resident_neurons(), 3);
        assert!(graph.weight(ids[0], ghost).is_none());
    }
}
