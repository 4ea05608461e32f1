//! Sparse Synaptic Graph - weighted directed edges between neurons
//!
//! Edges are keyed by source neuron and held only for resident sources; the
//! colony moves a cluster's outgoing edges in and out of the graph as its
//! partition is loaded and evicted.
//!
//! ## Cascade
//!
//! Recall is a breadth-first spread of activation:
//!
//! ```text
//! layer 0: seeds
//! layer n: every neuron newly activated in layer n-1 pushes
//!          activation × weight × decay onto each outgoing edge
//! ```
//!
//! A contribution below the activation threshold is dropped before it reaches
//! its target. The surviving contributions arriving at the same target are
//! summed and saturate at 1.0. Any target that receives one joins the active
//! set; neurons that were already active absorb the input but are not expanded
//! again. The cascade stops when a layer activates nothing new, when
//! `max_depth` layers have fired, or when the active set hits `neuron_cap`.

use crate::neuron::{ClusterId, NeuronId};
use crate::plasticity::{sanitize_weight, HebbianRule};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A learned directed edge. The target is the key it is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Synapse {
    /// Weight in `[0, 1]`
    pub weight: f32,

    /// Learning step at which the edge was last created or strengthened
    pub last_used: u64,
}

/// Counts from one Hebbian step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LearnOutcome {
    pub created: usize,
    pub strengthened: usize,
}

/// Counts from one idle-decay pass
#[derive(Debug, Clone, Default)]
pub struct DecayOutcome {
    pub decayed: usize,
    pub pruned: usize,
    /// Sources whose edges changed
    pub touched: BTreeSet<NeuronId>,
}

/// Sparse adjacency over resident neurons
#[derive(Debug, Clone, Default)]
pub struct SynapticGraph {
    outgoing: HashMap<NeuronId, BTreeMap<NeuronId, Synapse>>,
    rule: HebbianRule,
    synapses: usize,
}

impl SynapticGraph {
    pub fn new(rule: HebbianRule) -> Self {
        Self {
            outgoing: HashMap::new(),
            rule,
            synapses: 0,
        }
    }

    pub fn rule(&self) -> &HebbianRule {
        &self.rule
    }

    /// Create `a -> b` if absent. Returns true if an edge was created.
    pub fn connect(&mut self, a: NeuronId, b: NeuronId, initial_weight: f32, tick: u64) -> bool {
        if a == b {
            return false;
        }
        let weight = sanitize_weight(initial_weight);
        if self.rule.should_prune(weight) {
            return false;
        }
        let edges = self.outgoing.entry(a).or_default();
        if edges.contains_key(&b) {
            return false;
        }
        edges.insert(b, Synapse { weight, last_used: tick });
        self.synapses += 1;
        true
    }

    /// Adjust `a -> b` by `delta`. Returns the new weight, or None if the
    /// edge is absent or was pruned.
    pub fn strengthen(&mut self, a: NeuronId, b: NeuronId, delta: f32, tick: u64) -> Option<f32> {
        let current = self.outgoing.get(&a)?.get(&b)?.weight;
        let delta = if delta.is_finite() { delta } else { 0.0 };
        self.set_weight(a, b, current + delta, Some(tick))
    }

    /// Scale `a -> b` by `factor`. Returns the new weight, or None if the
    /// edge is absent or was pruned.
    pub fn decay(&mut self, a: NeuronId, b: NeuronId, factor: f32) -> Option<f32> {
        let current = self.outgoing.get(&a)?.get(&b)?.weight;
        let factor = if factor.is_finite() { factor.clamp(0.0, 1.0) } else { 0.0 };
        self.set_weight(a, b, current * factor, None)
    }

    fn set_weight(&mut self, a: NeuronId, b: NeuronId, weight: f32, tick: Option<u64>) -> Option<f32> {
        let weight = sanitize_weight(weight);
        if self.rule.should_prune(weight) {
            self.remove_edge(a, b);
            return None;
        }
        let synapse = self.outgoing.get_mut(&a)?.get_mut(&b)?;
        synapse.weight = weight;
        if let Some(tick) = tick {
            synapse.last_used = tick;
        }
        Some(weight)
    }

    fn remove_edge(&mut self, a: NeuronId, b: NeuronId) {
        if let Some(edges) = self.outgoing.get_mut(&a) {
            if edges.remove(&b).is_some() {
                self.synapses -= 1;
            }
            if edges.is_empty() {
                self.outgoing.remove(&a);
            }
        }
    }

    /// Hebbian step: wire every pair in the co-active set, both directions.
    pub fn learn(&mut self, active: &[NeuronId], tick: u64) -> LearnOutcome {
        let mut ids: Vec<NeuronId> = active.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mut outcome = LearnOutcome::default();
        for (i, &a) in ids.iter().enumerate() {
            for &b in &ids[i + 1..] {
                for (src, dst) in [(a, b), (b, a)] {
                    if self.hebbian_pair(src, dst, tick) {
                        outcome.created += 1;
                    } else {
                        outcome.strengthened += 1;
                    }
                }
            }
        }
        outcome
    }

    /// Returns true if the edge was created, false if strengthened
    fn hebbian_pair(&mut self, src: NeuronId, dst: NeuronId, tick: u64) -> bool {
        let edges = self.outgoing.entry(src).or_default();
        match edges.get_mut(&dst) {
            Some(synapse) => {
                synapse.weight = self.rule.strengthen(synapse.weight);
                synapse.last_used = tick;
                false
            }
            None => {
                edges.insert(
                    dst,
                    Synapse {
                        weight: sanitize_weight(self.rule.initial_weight),
                        last_used: tick,
                    },
                );
                self.synapses += 1;
                true
            }
        }
    }

    /// Decay every edge idle for more than `idle_steps`, pruning the weak ones
    pub fn decay_idle(&mut self, tick: u64, idle_steps: u64) -> DecayOutcome {
        let mut outcome = DecayOutcome::default();
        let rule = &self.rule;

        for (&source, edges) in self.outgoing.iter_mut() {
            let before = edges.len();
            let mut changed = false;
            edges.retain(|_, synapse| {
                if tick.saturating_sub(synapse.last_used) <= idle_steps {
                    return true;
                }
                changed = true;
                synapse.weight = rule.decay(synapse.weight, 1);
                if rule.should_prune(synapse.weight) {
                    false
                } else {
                    outcome.decayed += 1;
                    true
                }
            });
            outcome.pruned += before - edges.len();
            if changed {
                outcome.touched.insert(source);
            }
        }

        self.synapses -= outcome.pruned;
        self.outgoing.retain(|_, edges| !edges.is_empty());
        outcome
    }

    pub fn outgoing(&self, source: NeuronId) -> Option<&BTreeMap<NeuronId, Synapse>> {
        self.outgoing.get(&source)
    }

    pub fn weight(&self, a: NeuronId, b: NeuronId) -> Option<f32> {
        self.outgoing.get(&a)?.get(&b).map(|s| s.weight)
    }

    /// Copy of a source's edges, sorted by target
    pub fn outgoing_records(&self, source: NeuronId) -> Vec<(NeuronId, Synapse)> {
        self.outgoing
            .get(&source)
            .map(|edges| edges.iter().map(|(t, s)| (*t, *s)).collect())
            .unwrap_or_default()
    }

    /// Install edges read from storage. Invalid edges are skipped.
    pub fn insert_outgoing(&mut self, source: NeuronId, edges: impl IntoIterator<Item = (NeuronId, Synapse)>) -> usize {
        let mut inserted = 0;
        for (target, synapse) in edges {
            let weight = sanitize_weight(synapse.weight);
            if target == source || self.rule.should_prune(weight) {
                continue;
            }
            let map = self.outgoing.entry(source).or_default();
            if map.insert(target, Synapse { weight, ..synapse }).is_none() {
                inserted += 1;
            }
        }
        if self.outgoing.get(&source).map_or(false, |m| m.is_empty()) {
            self.outgoing.remove(&source);
        }
        self.synapses += inserted;
        inserted
    }

    /// Drop and return a source's edges
    pub fn remove_source(&mut self, source: NeuronId) -> Vec<(NeuronId, Synapse)> {
        match self.outgoing.remove(&source) {
            Some(edges) => {
                self.synapses -= edges.len();
                edges.into_iter().collect()
            }
            None => Vec::new(),
        }
    }

    /// Total resident edges
    pub fn synapse_count(&self) -> usize {
        self.synapses
    }

    /// Number of sources holding at least one edge
    pub fn source_count(&self) -> usize {
        self.outgoing.len()
    }

    /// Run a full cascade over resident edges
    pub fn propagate(&self, seeds: &[(NeuronId, f32)], params: &CascadeParams) -> CascadeResult {
        let mut cascade = Cascade::new(seeds, params.clone());
        while !cascade.is_done() {
            cascade.step(self);
        }
        cascade.finish()
    }
}

/// Cascade knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeParams {
    /// Maximum number of propagation layers
    pub max_depth: usize,

    /// Attenuation per hop
    pub decay_factor: f32,

    /// Minimum summed input for a neuron to activate
    pub activation_threshold: f32,

    /// Safety brake on the total active set
    pub neuron_cap: usize,
}

impl Default for CascadeParams {
    fn default() -> Self {
        Self {
            max_depth: 6,
            decay_factor: 0.8,
            activation_threshold: 0.05,
            neuron_cap: 4096,
        }
    }
}

/// Outcome of a cascade. Query-only, never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CascadeResult {
    /// Seed neurons and their starting activation
    pub seeds: Vec<(NeuronId, f32)>,

    /// Every active neuron (seeds included) with its final activation
    pub activated: BTreeMap<NeuronId, f32>,

    /// New activations per fired layer
    pub layer_counts: Vec<usize>,

    /// Layers that activated at least one new neuron
    pub max_depth: usize,

    /// True if the neuron cap stopped the cascade
    pub capped: bool,
}

impl CascadeResult {
    pub fn seed_count(&self) -> usize {
        self.seeds.len()
    }

    pub fn activated_count(&self) -> usize {
        self.activated.len()
    }

    /// `(total - seed) / seed`, 0 with no seeds
    pub fn growth_ratio(&self) -> f32 {
        let seeds = self.seed_count();
        if seeds == 0 {
            return 0.0;
        }
        self.activated_count().saturating_sub(seeds) as f32 / seeds as f32
    }

    /// Mean of each layer's size relative to the one before it, each term
    /// capped at 1.0
    pub fn avg_layer_growth(&self) -> f32 {
        if self.layer_counts.is_empty() || self.seeds.is_empty() {
            return 0.0;
        }
        let mut prev = self.seed_count() as f32;
        let mut total = 0.0;
        for &count in &self.layer_counts {
            total += (count as f32 / prev).min(1.0);
            prev = count.max(1) as f32;
        }
        total / self.layer_counts.len() as f32
    }

    /// Clusters touched by the cascade
    pub fn clusters(&self) -> BTreeSet<ClusterId> {
        self.activated.keys().map(|id| id.cluster()).collect()
    }
}

/// An in-progress cascade, advanced one layer at a time.
///
/// Stepping is separate from the graph so the caller can page in the
/// frontier's clusters before each layer fires.
#[derive(Debug, Clone)]
pub struct Cascade {
    params: CascadeParams,
    seeds: Vec<(NeuronId, f32)>,
    activation: BTreeMap<NeuronId, f32>,
    frontier: Vec<NeuronId>,
    layer_counts: Vec<usize>,
    capped: bool,
    done: bool,
}

impl Cascade {
    pub fn new(seeds: &[(NeuronId, f32)], params: CascadeParams) -> Self {
        let mut activation: BTreeMap<NeuronId, f32> = BTreeMap::new();
        for &(id, act) in seeds {
            let act = sanitize_weight(act);
            if act <= 0.0 {
                continue;
            }
            let slot = activation.entry(id).or_insert(0.0);
            *slot = slot.max(act);
        }

        let mut capped = false;
        if activation.len() > params.neuron_cap {
            let mut ranked: Vec<(NeuronId, f32)> = activation.into_iter().collect();
            rank(&mut ranked);
            ranked.truncate(params.neuron_cap);
            activation = ranked.into_iter().collect();
            capped = true;
        }

        let seeds: Vec<(NeuronId, f32)> = activation.iter().map(|(id, a)| (*id, *a)).collect();
        let frontier: Vec<NeuronId> = activation.keys().copied().collect();
        let done = frontier.is_empty() || params.max_depth == 0 || capped;

        Self {
            params,
            seeds,
            activation,
            frontier,
            layer_counts: Vec::new(),
            capped,
            done,
        }
    }

    /// Neurons that fire in the next layer
    pub fn frontier(&self) -> &[NeuronId] {
        &self.frontier
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Fire one layer. Returns the number of newly activated neurons.
    pub fn step(&mut self, graph: &SynapticGraph) -> usize {
        if self.done {
            return 0;
        }

        let decay = sanitize_weight(self.params.decay_factor);
        let threshold = self.params.activation_threshold;
        let mut incoming: BTreeMap<NeuronId, f32> = BTreeMap::new();
        for source in &self.frontier {
            let act = self.activation.get(source).copied().unwrap_or(0.0);
            let Some(edges) = graph.outgoing(*source) else {
                continue;
            };
            for (target, synapse) in edges {
                let contribution = act * synapse.weight * decay;
                // Sub-threshold contributions never reach the target
                if contribution.is_finite() && contribution > 0.0 && contribution >= threshold {
                    *incoming.entry(*target).or_insert(0.0) += contribution;
                }
            }
        }

        let mut fresh: Vec<(NeuronId, f32)> = Vec::new();
        for (target, input) in incoming {
            let input = input.min(1.0);
            match self.activation.get_mut(&target) {
                Some(current) => *current = (*current + input).min(1.0),
                None => fresh.push((target, input)),
            }
        }

        let room = self.params.neuron_cap.saturating_sub(self.activation.len());
        if fresh.len() > room {
            rank(&mut fresh);
            fresh.truncate(room);
            self.capped = true;
        }
        fresh.sort_unstable_by_key(|(id, _)| *id);

        let count = fresh.len();
        self.frontier = fresh.iter().map(|(id, _)| *id).collect();
        self.activation.extend(fresh);

        if count > 0 {
            self.layer_counts.push(count);
        }
        if count == 0 || self.capped || self.layer_counts.len() >= self.params.max_depth {
            self.done = true;
        }
        count
    }

    pub fn finish(self) -> CascadeResult {
        CascadeResult {
            max_depth: self.layer_counts.len(),
            seeds: self.seeds,
            activated: self.activation,
            layer_counts: self.layer_counts,
            capped: self.capped,
        }
    }
}

/// Strongest first, then lowest id
fn rank(entries: &mut [(NeuronId, f32)]) {
    entries.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(i: u32) -> NeuronId {
        NeuronId::new(ClusterId(0), i)
    }

    fn chain(len: u32, weight: f32) -> SynapticGraph {
        let mut g = SynapticGraph::new(HebbianRule::standard());
        for i in 0..len - 1 {
            g.connect(n(i), n(i + 1), weight, 0);
        }
        g
    }

    #[test]
    fn test_connect_rejects_self_and_duplicates() {
        let mut g = SynapticGraph::default();
        assert!(!g.connect(n(1), n(1), 0.5, 0));
        assert!(g.connect(n(1), n(2), 0.5, 0));
        assert!(!g.connect(n(1), n(2), 0.9, 0));
        assert_eq!(g.weight(n(1), n(2)), Some(0.5));
        assert_eq!(g.synapse_count(), 1);
    }

    #[test]
    fn test_strengthen_clamps_and_prunes() {
        let mut g = SynapticGraph::default();
        g.connect(n(1), n(2), 0.5, 0);
        assert_eq!(g.strengthen(n(1), n(2), 0.8, 1), Some(1.0));
        assert_eq!(g.strengthen(n(1), n(2), -0.995, 2), None);
        assert_eq!(g.weight(n(1), n(2)), None);
        assert_eq!(g.synapse_count(), 0);
        assert_eq!(g.source_count(), 0);
    }

    #[test]
    fn test_hebbian_learning_is_bidirectional_and_bounded() {
        let mut g = SynapticGraph::default();
        let outcome = g.learn(&[n(1), n(2), n(3)], 1);
        assert_eq!(outcome.created, 6);
        assert_eq!(g.synapse_count(), 6);

        let mut last = g.weight(n(1), n(2)).unwrap_or(0.0);
        for step in 2..10 {
            g.learn(&[n(1), n(2)], step);
            let w = g.weight(n(1), n(2)).unwrap_or(0.0);
            assert!(w > last);
            assert_eq!(g.weight(n(2), n(1)), Some(w));
            last = w;
        }
        for step in 10..200 {
            g.learn(&[n(1), n(2)], step);
        }
        assert!(g.weight(n(1), n(2)).unwrap_or(0.0) <= 1.0);
    }

    #[test]
    fn test_decay_idle_prunes_eventually() {
        let mut g = SynapticGraph::default();
        g.learn(&[n(1), n(2)], 0);
        g.learn(&[n(3), n(4)], 100);

        let mut last = g.weight(n(1), n(2)).unwrap_or(0.0);
        let mut tick = 100;
        loop {
            let outcome = g.decay_idle(tick, 10);
            assert!(!outcome.touched.contains(&n(3)));
            match g.weight(n(1), n(2)) {
                Some(w) => {
                    assert!(w < last);
                    last = w;
                }
                None => break,
            }
            tick += 1;
            assert!(tick < 1000, "edge never pruned");
        }
        assert_eq!(g.synapse_count(), 2);
        assert!(g.weight(n(3), n(4)).is_some());
    }

    #[test]
    fn test_remove_and_insert_outgoing() {
        let mut g = SynapticGraph::default();
        g.learn(&[n(1), n(2), n(3)], 5);
        let edges = g.remove_source(n(1));
        assert_eq!(edges.len(), 2);
        assert_eq!(g.synapse_count(), 4);

        let mut bad = edges.clone();
        bad.push((n(1), Synapse { weight: 0.5, last_used: 0 }));
        bad.push((n(9), Synapse { weight: f32::NAN, last_used: 0 }));
        assert_eq!(g.insert_outgoing(n(1), bad), 2);
        assert_eq!(g.outgoing_records(n(1)), edges);
        assert_eq!(g.synapse_count(), 6);
    }

    #[test]
    fn test_cascade_follows_chain() {
        let g = chain(5, 1.0);
        let params = CascadeParams {
            decay_factor: 0.9,
            activation_threshold: 0.1,
            ..Default::default()
        };
        let result = g.propagate(&[(n(0), 1.0)], &params);
        assert_eq!(result.seed_count(), 1);
        assert_eq!(result.activated_count(), 5);
        assert_eq!(result.max_depth, 4);
        assert_eq!(result.layer_counts, vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_cascade_dies_on_weak_edges() {
        let g = chain(5, 0.05);
        let result = g.propagate(&[(n(0), 1.0)], &CascadeParams::default());
        assert_eq!(result.activated_count(), 1);
        assert_eq!(result.max_depth, 0);
        assert_eq!(result.growth_ratio(), 0.0);
    }

    #[test]
    fn test_cascade_drops_sub_threshold_contributions() {
        // Three weak edges converge on one target; none alone clears the threshold
        let mut g = SynapticGraph::default();
        for i in 0..3 {
            g.connect(n(i), n(10), 0.05, 0);
        }
        let params = CascadeParams {
            decay_factor: 1.0,
            activation_threshold: 0.12,
            ..Default::default()
        };
        let seeds: Vec<_> = (0..3).map(|i| (n(i), 1.0)).collect();
        let weak = g.propagate(&seeds, &params);
        assert_eq!(weak.activated_count(), 3);
        assert!(!weak.activated.contains_key(&n(10)));
        assert_eq!(weak.max_depth, 0);
    }

    #[test]
    fn test_cascade_integrates_surviving_inputs() {
        let mut g = SynapticGraph::default();
        for i in 0..3 {
            g.connect(n(i), n(10), 0.3, 0);
        }
        // Below threshold, contributes nothing
        g.connect(n(3), n(10), 0.05, 0);
        let params = CascadeParams {
            decay_factor: 1.0,
            activation_threshold: 0.12,
            ..Default::default()
        };

        let one = g.propagate(&[(n(0), 1.0)], &params);
        assert_eq!(one.activated.get(&n(10)).copied(), Some(0.3));

        let seeds: Vec<_> = (0..4).map(|i| (n(i), 1.0)).collect();
        let all = g.propagate(&seeds, &params);
        let act = all.activated.get(&n(10)).copied().unwrap_or(0.0);
        assert!((act - 0.9).abs() < 1e-6, "summed {}", act);
    }

    #[test]
    fn test_cascade_respects_depth_and_cap() {
        let g = chain(10, 1.0);
        let shallow = CascadeParams {
            max_depth: 2,
            decay_factor: 1.0,
            ..Default::default()
        };
        let result = g.propagate(&[(n(0), 1.0)], &shallow);
        assert_eq!(result.max_depth, 2);
        assert_eq!(result.activated_count(), 3);

        let mut fan = SynapticGraph::default();
        for i in 1..50 {
            fan.connect(n(0), n(i), 1.0, 0);
        }
        let capped = CascadeParams {
            neuron_cap: 10,
            ..Default::default()
        };
        let result = fan.propagate(&[(n(0), 1.0)], &capped);
        assert_eq!(result.activated_count(), 10);
        assert!(result.capped);
    }

    #[test]
    fn test_cascade_zero_depth_and_empty_seeds() {
        let g = chain(3, 1.0);
        let params = CascadeParams {
            max_depth: 0,
            ..Default::default()
        };
        let result = g.propagate(&[(n(0), 1.0)], &params);
        assert_eq!(result.activated_count(), 1);
        assert_eq!(result.max_depth, 0);

        let empty = g.propagate(&[], &CascadeParams::default());
        assert_eq!(empty.seed_count(), 0);
        assert_eq!(empty.avg_layer_growth(), 0.0);
    }
}
