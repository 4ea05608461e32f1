//! Engine - the learn/query orchestrator
//!
//! An `Engine` owns one colony of clusters, the resident synaptic graph, the
//! codebook and a handle to the persistence layer. It is cheap to clone: all
//! clones share the same state behind a `parking_lot::RwLock`.
//!
//! ## Actors
//!
//! - **Learning loop** (single writer): `learn`/`train` hold the write lock for
//!   one step at a time.
//! - **Checkpointer**: copies an `EngineSnapshot` under the read lock, then
//!   encodes and writes it with no lock held. Learning never races the writer
//!   over live collections.
//! - **Queries**: never create clusters or neurons and run under the read
//!   lock. A cluster that is not resident is paged in through a short write
//!   section that only drops clean clusters, so a query never spills.
//!
//! Checkpoints are serialized by their own mutex so a manual checkpoint and
//! the background task cannot interleave their manifest commits.

use crate::cluster::ClusterMeta;
use crate::colony::{Colony, ColonyStats};
use crate::config::EngineConfig;
use crate::consolidation::{self, MaintenanceResult};
use crate::encoder::{self, FeatureVector, FEATURE_DIM};
use crate::error::{Error, Result};
use crate::graph::{Cascade, CascadeResult, SynapticGraph};
use crate::hypernetwork::NeuronHypernetwork;
use crate::neuron::{ClusterId, NeuronId};
use crate::quantizer::{Codebook, RegionCode, VectorQuantizer};
use crate::snapshot::{EngineSnapshot, PartitionId};
use crate::storage::{self, FsStore, MemoryStore, PartitionStore};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Coarse novelty bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    Familiar,
    Moderate,
    Novel,
}

impl Classification {
    pub fn name(&self) -> &'static str {
        match self {
            Classification::Familiar => "familiar",
            Classification::Moderate => "moderate",
            Classification::Novel => "novel",
        }
    }
}

/// Outcome of `Engine::query`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Neurons active when the cascade stopped, seeds included
    pub activated_count: usize,

    pub seed_count: usize,

    /// Layers that activated at least one new neuron
    pub max_depth: usize,

    /// 0.0 = deeply familiar, 1.0 = never seen
    pub novelty_score: f32,

    pub classification: Classification,
}

impl QueryResult {
    /// The result for input that reaches no trained cluster
    fn unseen() -> Self {
        Self {
            activated_count: 0,
            seed_count: 0,
            max_depth: 0,
            novelty_score: 1.0,
            classification: Classification::Novel,
        }
    }
}

/// What one learning step changed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearnReport {
    pub tokens: usize,
    pub clusters_created: usize,
    pub neurons_grown: usize,
    pub synapses_created: usize,
    pub synapses_strengthened: usize,
    pub evicted: usize,
    pub maintenance: Option<MaintenanceResult>,
    /// Set when a checkpoint trigger fired after this step
    pub checkpoint: Option<CheckpointOutcome>,
}

/// Result of a checkpoint attempt. A failure is reported, never raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CheckpointOutcome {
    Committed {
        sequence: u64,
        step: u64,
        partitions_written: usize,
        clusters: usize,
    },
    Failed {
        attempts: u32,
        reason: String,
    },
}

impl CheckpointOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CheckpointOutcome::Committed { .. })
    }

    /// Sequence number of the committed manifest
    pub fn sequence(&self) -> Option<u64> {
        match self {
            CheckpointOutcome::Committed { sequence, .. } => Some(*sequence),
            CheckpointOutcome::Failed { .. } => None,
        }
    }

    /// Convert into a `Result` for callers that want `?`
    pub fn into_result(self) -> Result<u64> {
        match self {
            CheckpointOutcome::Committed { sequence, .. } => Ok(sequence),
            CheckpointOutcome::Failed { attempts, reason } => Err(Error::CheckpointFailed { attempts, reason }),
        }
    }
}

/// Cooperative cancellation for `Engine::train`
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A stream of training texts
pub trait TrainingSource {
    /// Next text, or `None` at end of stream
    fn next_text(&mut self) -> Option<String>;
}

impl<I> TrainingSource for I
where
    I: Iterator<Item = String>,
{
    fn next_text(&mut self) -> Option<String> {
        self.next()
    }
}

/// Summary of a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub steps: u64,
    pub cancelled: bool,
    pub clusters_created: usize,
    pub neurons_grown: usize,
    pub final_checkpoint: CheckpointOutcome,
}

/// Engine statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub engine_id: Uuid,
    pub learn_steps: u64,
    pub colony: ColonyStats,
    pub resident_synapses: usize,
    pub codebook_codes: usize,
    pub codebook_capacity: usize,
    pub codebook_perplexity: f32,
    pub codebook_utilization: f32,
    pub checkpoints_written: u64,
    pub checkpoints_failed: u64,
    pub last_checkpoint_sequence: Option<u64>,
    pub last_checkpoint_at: DateTime<Utc>,
}

/// Everything the write lock guards
#[derive(Debug)]
pub(crate) struct EngineState {
    pub(crate) config: EngineConfig,
    pub(crate) quantizer: VectorQuantizer,
    pub(crate) hypernet: NeuronHypernetwork,
    pub(crate) colony: Colony,
    pub(crate) graph: SynapticGraph,
    pub(crate) step: u64,
    /// Step covered by the last committed checkpoint
    pub(crate) last_checkpoint_step: u64,
    pub(crate) last_checkpoint_at: DateTime<Utc>,
    /// Step and time of the last attempt, committed or not. Triggers count
    /// from here so a failing store is not retried on every step.
    pub(crate) last_attempt_step: u64,
    pub(crate) last_attempt_at: DateTime<Utc>,
    pub(crate) last_sequence: Option<u64>,
    pub(crate) checkpoints_written: u64,
    pub(crate) checkpoints_failed: u64,
}

impl EngineState {
    /// Regions to search for a vector: the nearest `1 + neighbor_regions` codes
    fn search_regions(&self, vector: &[f32]) -> Vec<RegionCode> {
        let n = 1 + self.config.cluster.neighbor_regions;
        self.quantizer.nearest(vector, n).into_iter().map(|(code, _)| code).collect()
    }

    /// Clusters a query vector reaches, with their similarity, best first
    fn matches(&self, vector: &[f32]) -> Vec<(ClusterId, f32)> {
        let regions = self.search_regions(vector);
        self.colony
            .candidates(&regions, vector)
            .into_iter()
            .filter(|(_, sim)| *sim >= self.config.cluster.query_similarity_threshold)
            .collect()
    }

    /// Best trained cluster for a concept, if any reaches the query threshold
    fn resolve(&self, vector: &[f32]) -> Option<ClusterId> {
        self.matches(vector).first().map(|(id, _)| *id)
    }

    /// Entry neurons of every resident matching cluster, activated at
    /// `similarity + bias`
    fn seeds(&self, vectors: &[FeatureVector]) -> Vec<(NeuronId, f32)> {
        let mut seeds: Vec<(NeuronId, f32)> = Vec::new();
        for v in vectors {
            for (cid, sim) in self.matches(v.as_slice()) {
                let Some(cluster) = self.colony.get(cid) else {
                    continue;
                };
                // Evicted by the learner since it was paged in
                if !cluster.is_resident() {
                    continue;
                }
                for id in cluster.entry_neurons(self.config.cluster.entry_neurons) {
                    if seeds.iter().any(|(s, _)| *s == id) {
                        continue;
                    }
                    let bias = cluster.neuron(id).map_or(0.0, |n| n.bias);
                    let activation = (sim + bias).clamp(0.0, 1.0);
                    seeds.push((id, if activation.is_finite() { activation } else { 0.0 }));
                }
            }
        }
        seeds
    }
}

/// The associative memory engine
#[derive(Clone)]
pub struct Engine {
    state: Arc<RwLock<EngineState>>,
    store: Arc<dyn PartitionStore>,
    checkpoint_lock: Arc<Mutex<()>>,
    engine_id: Uuid,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("engine_id", &self.engine_id).finish_non_exhaustive()
    }
}

impl Engine {
    /// Engine backed by an in-memory store
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::open(config, Arc::new(MemoryStore::new()))
    }

    /// Engine backed by a directory, resuming from its latest checkpoint
    pub fn open_dir(root: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        let store = FsStore::open(root)?;
        Self::open(config, Arc::new(store))
    }

    /// Open over any store, resuming from the newest readable checkpoint.
    ///
    /// Only the codebook and cluster metadata are loaded; neurons stay on disk
    /// until a cluster is first touched.
    pub fn open(config: EngineConfig, store: Arc<dyn PartitionStore>) -> Result<Self> {
        config.validate()?;
        let hypernet = NeuronHypernetwork::new(config.hypernetwork.clone());
        let graph = SynapticGraph::new(config.hebbian.clone());

        let state = match store.load_latest() {
            Some(manifest) => {
                if manifest.codebook.dim != FEATURE_DIM {
                    return Err(Error::InvalidState(format!(
                        "checkpoint {} has feature dimension {}, expected {}",
                        manifest.sequence, manifest.codebook.dim, FEATURE_DIM
                    )));
                }
                if manifest.codebook.capacity != config.quantizer.codebook_size {
                    tracing::warn!(
                        persisted = manifest.codebook.capacity,
                        configured = config.quantizer.codebook_size,
                        "codebook size is fixed once trained, keeping the persisted size"
                    );
                }
                let quantizer = VectorQuantizer::from_codebook(manifest.codebook.clone(), config.quantizer.clone());
                let colony = Colony::restore(
                    config.colony.clone(),
                    manifest.clusters.clone(),
                    &manifest.partitions,
                    manifest.next_cluster_id,
                );
                tracing::info!(
                    engine = %manifest.engine_id,
                    sequence = manifest.sequence,
                    step = manifest.step,
                    clusters = colony.len(),
                    "resumed from checkpoint"
                );
                let engine_id = manifest.engine_id;
                let state = EngineState {
                    quantizer,
                    hypernet,
                    colony,
                    graph,
                    step: manifest.step,
                    last_checkpoint_step: manifest.step,
                    last_checkpoint_at: manifest.created_at,
                    last_attempt_step: manifest.step,
                    last_attempt_at: manifest.created_at,
                    last_sequence: Some(manifest.sequence),
                    checkpoints_written: 0,
                    checkpoints_failed: 0,
                    config,
                };
                (engine_id, state)
            }
            None => {
                let engine_id = Uuid::new_v4();
                tracing::info!(engine = %engine_id, "starting fresh engine");
                let state = EngineState {
                    quantizer: VectorQuantizer::new(FEATURE_DIM, config.quantizer.clone()),
                    hypernet,
                    colony: Colony::new(config.colony.clone()),
                    graph,
                    step: 0,
                    last_checkpoint_step: 0,
                    last_checkpoint_at: Utc::now(),
                    last_attempt_step: 0,
                    last_attempt_at: Utc::now(),
                    last_sequence: None,
                    checkpoints_written: 0,
                    checkpoints_failed: 0,
                    config,
                };
                (engine_id, state)
            }
        };

        let (engine_id, state) = state;
        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            store,
            checkpoint_lock: Arc::new(Mutex::new(())),
            engine_id,
        })
    }

    pub fn engine_id(&self) -> Uuid {
        self.engine_id
    }

    pub fn config(&self) -> EngineConfig {
        self.state.read().config.clone()
    }

    /// The persistence layer this engine writes to
    pub fn store(&self) -> Arc<dyn PartitionStore> {
        Arc::clone(&self.store)
    }

    pub(crate) fn read_state(&self) -> parking_lot::RwLockReadGuard<'_, EngineState> {
        self.state.read()
    }

    /// Copy of the current codebook
    pub fn codebook(&self) -> Codebook {
        self.state.read().quantizer.codebook().clone()
    }

    /// Learning steps completed
    pub fn step(&self) -> u64 {
        self.state.read().step
    }

    /// Learning steps since the last committed checkpoint
    pub fn pending_steps(&self) -> u64 {
        let state = self.state.read();
        state.step.saturating_sub(state.last_checkpoint_step)
    }

    /// Learn one input. Never fails; unseen input grows new clusters.
    pub fn learn(&self, text: &str) -> LearnReport {
        let tokens = encoder::tokenize(text);
        let mut report = LearnReport {
            tokens: tokens.len(),
            ..Default::default()
        };
        if tokens.is_empty() {
            return report;
        }

        let checkpoint_due = {
            let mut guard = self.state.write();
            let st = &mut *guard;
            st.colony.advance_clock();
            st.step += 1;
            let step = st.step;
            let now = Utc::now();
            let store = &*self.store;

            let mut active: BTreeSet<NeuronId> = BTreeSet::new();
            let mut touched: BTreeSet<ClusterId> = BTreeSet::new();

            for token in &tokens {
                let vector = encoder::encode(token);
                let v = vector.as_slice();
                let complexity = encoder::complexity(token);

                let region = st.quantizer.assign(v);
                let mut search = st.search_regions(v);
                if !search.contains(&region) {
                    search.push(region);
                }

                let (cid, created) = match st.colony.find_or_create(
                    v,
                    region,
                    &search,
                    complexity,
                    st.config.cluster.similarity_threshold,
                ) {
                    Ok(found) => found,
                    Err(e) => {
                        tracing::warn!(token = %token, error = %e, "cannot place concept, skipping token");
                        continue;
                    }
                };
                if created {
                    report.clusters_created += 1;
                }
                if !st.colony.ensure_resident(cid, &mut st.graph, store, &st.hypernet) {
                    continue;
                }

                let Some(cluster) = st.colony.get_mut(cid) else {
                    continue;
                };
                let novelty = if created { 1.0 } else { cluster.novelty(v) };
                cluster.observe(v, complexity);
                let target = st.hypernet.budget(cluster.sample_count(), novelty, cluster.complexity());
                match cluster.grow(target, &st.hypernet, &mut st.graph, st.config.cluster.wiring_fanout, step) {
                    Ok(grown) => report.neurons_grown += grown.len(),
                    Err(e) => tracing::warn!(cluster = %cid, error = %e, "growth stopped"),
                }

                let set = cluster.active_set(st.config.cluster.entry_neurons, st.config.cluster.active_window);
                cluster.activate(&set, now);
                active.extend(set);
                touched.insert(cid);

                st.quantizer.update(v, region);
            }

            let active: Vec<NeuronId> = active.into_iter().collect();
            let outcome = st.graph.learn(&active, step);
            report.synapses_created = outcome.created;
            report.synapses_strengthened = outcome.strengthened;
            st.colony.mark_changed(touched);
            st.quantizer.commit_step();

            if st.config.maintenance.is_due(step) {
                report.maintenance = Some(consolidation::maintain(
                    &mut st.graph,
                    &mut st.colony,
                    &mut st.quantizer,
                    step,
                    &st.config.maintenance,
                ));
            }

            report.evicted = st.colony.enforce_capacity(&mut st.graph, store);

            st.config
                .checkpoint
                .should_checkpoint(step.saturating_sub(st.last_attempt_step), &st.last_attempt_at)
        };

        if checkpoint_due {
            report.checkpoint = Some(self.checkpoint());
        }
        report
    }

    /// Probe memory with an input. Creates nothing.
    ///
    /// Runs under the read lock. Clusters that are not resident are paged in
    /// through `page_in`, which never writes to the store.
    pub fn query(&self, text: &str) -> QueryResult {
        let tokens = encoder::tokenize(text);
        if tokens.is_empty() {
            return QueryResult::unseen();
        }
        let vectors: Vec<FeatureVector> = tokens.iter().map(|token| encoder::encode(token)).collect();

        let missing: BTreeSet<ClusterId> = {
            let st = self.state.read();
            vectors
                .iter()
                .flat_map(|v| st.matches(v.as_slice()))
                .map(|(cid, _)| cid)
                .filter(|cid| st.colony.get(*cid).map_or(false, |c| !c.is_resident()))
                .collect()
        };
        if !missing.is_empty() {
            self.page_in(&missing);
        }

        let mut st = self.state.read();
        let seeds = st.seeds(&vectors);
        if seeds.is_empty() {
            return QueryResult::unseen();
        }

        let mut cascade = Cascade::new(&seeds, st.config.cascade.clone());
        while !cascade.is_done() {
            let missing: BTreeSet<ClusterId> = cascade
                .frontier()
                .iter()
                .map(|id| id.cluster())
                .filter(|cid| st.colony.get(*cid).map_or(false, |c| !c.is_resident()))
                .collect();
            if !missing.is_empty() {
                drop(st);
                self.page_in(&missing);
                st = self.state.read();
            }
            cascade.step(&st.graph);
        }
        score(&cascade.finish(), &st)
    }

    /// Load clusters for a reader in a short write section.
    ///
    /// Clean clusters outside `needed` may be dropped to stay under the
    /// resident cap. Nothing is spilled.
    fn page_in(&self, needed: &BTreeSet<ClusterId>) {
        let mut guard = self.state.write();
        let st = &mut *guard;
        st.colony.advance_clock();
        for &cid in needed {
            st.colony.ensure_resident(cid, &mut st.graph, &*self.store, &st.hypernet);
        }
        st.colony.trim_clean(&mut st.graph, needed);
    }

    /// Cluster a concept resolves to, without creating anything
    pub fn cluster_of(&self, concept: &str) -> Option<ClusterId> {
        let vector = encoder::encode(&concept.to_lowercase());
        self.state.read().resolve(vector.as_slice())
    }

    /// Metadata of one cluster
    pub fn cluster_meta(&self, id: ClusterId) -> Option<ClusterMeta> {
        self.state.read().colony.get(id).map(|c| c.meta().clone())
    }

    /// Count synapses from neurons of `from` onto neurons of `to`.
    ///
    /// Pages `from` in if needed.
    pub fn cluster_links(&self, from: ClusterId, to: ClusterId) -> usize {
        let resident = self.state.read().colony.get(from).map(|c| c.is_resident());
        match resident {
            None => return 0,
            Some(false) => self.page_in(&BTreeSet::from([from])),
            Some(true) => {}
        }

        let st = self.state.read();
        match st.colony.get(from) {
            Some(cluster) => cluster
                .member_ids()
                .filter_map(|id| st.graph.outgoing(id))
                .map(|edges| edges.keys().filter(|t| t.cluster() == to).count())
                .sum(),
            None => 0,
        }
    }

    /// Page in every cluster of a partition
    pub fn load_partition(&self, pid: PartitionId) -> usize {
        let mut guard = self.state.write();
        let st = &mut *guard;
        st.colony.load_partition(pid, &mut st.graph, &*self.store, &st.hypernet)
    }

    /// Evict every cluster of a partition, spilling dirty ones first
    pub fn evict_partition(&self, pid: PartitionId) -> usize {
        let mut guard = self.state.write();
        let st = &mut *guard;
        st.colony.evict_partition(pid, &mut st.graph, &*self.store)
    }

    /// Write a checkpoint now.
    ///
    /// The snapshot is copied under the read lock; encoding and I/O happen
    /// with no engine lock held. Failed writes are retried, then reported.
    pub fn checkpoint(&self) -> CheckpointOutcome {
        let _serial = self.checkpoint_lock.lock();

        let (snapshot, max_attempts, keep) = {
            let st = self.state.read();
            let (clean, dirty) = st.colony.snapshot_partitions(&st.graph);
            let snapshot = EngineSnapshot {
                engine_id: self.engine_id,
                step: st.step,
                next_cluster_id: st.colony.next_cluster_id(),
                codebook: st.quantizer.codebook().clone(),
                clusters: st.colony.metas(),
                clean,
                dirty,
            };
            (
                snapshot,
                st.config.checkpoint.max_write_retries.max(1),
                st.config.checkpoint.keep_checkpoints,
            )
        };
        let revisions: Vec<(ClusterId, u64)> = snapshot
            .dirty
            .iter()
            .flat_map(|p| p.resident.iter().map(|(id, rev, _)| (*id, *rev)))
            .collect();

        let mut attempts = 0;
        let mut last_error = None;
        let mut saved = None;
        while attempts < max_attempts {
            attempts += 1;
            match storage::save_snapshot(&*self.store, &snapshot) {
                Ok(checkpoint) => {
                    saved = Some(checkpoint);
                    break;
                }
                Err(e) => {
                    tracing::warn!(attempt = attempts, max_attempts, error = %e, "checkpoint write failed");
                    last_error = Some(e);
                }
            }
        }

        let Some(saved) = saved else {
            let reason = last_error.map_or_else(|| "no attempt made".to_string(), |e| e.to_string());
            let mut st = self.state.write();
            st.checkpoints_failed += 1;
            // Back off until the next trigger window; the steps stay pending
            st.last_attempt_step = st.last_attempt_step.max(snapshot.step);
            st.last_attempt_at = Utc::now();
            tracing::error!(attempts, step = snapshot.step, reason = %reason, "checkpoint failed, learning continues");
            return CheckpointOutcome::Failed { attempts, reason };
        };

        let live = {
            let mut st = self.state.write();
            st.colony.mark_persisted(&revisions, &saved.written);
            st.last_checkpoint_step = st.last_checkpoint_step.max(snapshot.step);
            st.last_checkpoint_at = saved.manifest.created_at;
            st.last_attempt_step = st.last_attempt_step.max(snapshot.step);
            st.last_attempt_at = saved.manifest.created_at;
            st.last_sequence = Some(saved.manifest.sequence);
            st.checkpoints_written += 1;
            st.colony.partition_generations().clone()
        };

        if let Err(e) = self.store.collect_garbage(keep, &live) {
            tracing::warn!(error = %e, "checkpoint garbage collection failed");
        }

        tracing::info!(
            sequence = saved.manifest.sequence,
            step = snapshot.step,
            partitions = saved.written.len(),
            clusters = snapshot.clusters.len(),
            "checkpoint committed"
        );
        CheckpointOutcome::Committed {
            sequence: saved.manifest.sequence,
            step: snapshot.step,
            partitions_written: saved.written.len(),
            clusters: snapshot.clusters.len(),
        }
    }

    /// Learn from a source until it ends or `cancel` is raised.
    ///
    /// Cancellation is checked between steps, so the in-flight step always
    /// completes. A final checkpoint is written either way.
    pub fn train<S>(&self, source: &mut S, cancel: &CancelFlag) -> TrainingReport
    where
        S: TrainingSource + ?Sized,
    {
        tracing::info!(engine = %self.engine_id, step = self.step(), "training started");
        let mut steps = 0u64;
        let mut clusters_created = 0;
        let mut neurons_grown = 0;
        let mut cancelled = false;

        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let Some(text) = source.next_text() else {
                break;
            };
            let report = self.learn(&text);
            steps += 1;
            clusters_created += report.clusters_created;
            neurons_grown += report.neurons_grown;
        }

        let final_checkpoint = self.checkpoint();
        if cancelled {
            tracing::info!(steps, "training cancelled");
        } else {
            tracing::info!(steps, clusters_created, neurons_grown, "training finished");
        }
        TrainingReport {
            steps,
            cancelled,
            clusters_created,
            neurons_grown,
            final_checkpoint,
        }
    }

    /// Run `checkpoint` every `interval` on a background thread while there are
    /// unsaved learning steps.
    pub fn spawn_checkpointer(&self, interval: Duration) -> Checkpointer {
        let engine = self.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let thread = std::thread::spawn(move || {
            let mut committed = 0u64;
            while !flag.load(Ordering::Acquire) {
                let deadline = Instant::now() + interval;
                while !flag.load(Ordering::Acquire) {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    std::thread::park_timeout(deadline - now);
                }
                if flag.load(Ordering::Acquire) {
                    break;
                }
                if engine.pending_steps() > 0 && engine.checkpoint().is_committed() {
                    committed += 1;
                }
            }
            committed
        });

        Checkpointer {
            stop,
            thread: Some(thread),
        }
    }

    pub fn stats(&self) -> EngineStats {
        let st = self.state.read();
        let codebook = st.quantizer.codebook();
        EngineStats {
            engine_id: self.engine_id,
            learn_steps: st.step,
            colony: st.colony.stats(),
            resident_synapses: st.graph.synapse_count(),
            codebook_codes: codebook.len(),
            codebook_capacity: codebook.capacity,
            codebook_perplexity: st.quantizer.perplexity(),
            codebook_utilization: st.quantizer.utilization(),
            checkpoints_written: st.checkpoints_written,
            checkpoints_failed: st.checkpoints_failed,
            last_checkpoint_sequence: st.last_sequence,
            last_checkpoint_at: st.last_checkpoint_at,
        }
    }
}

/// Familiarity from cascade spread; novelty is its complement
fn score(result: &CascadeResult, st: &EngineState) -> QueryResult {
    let weights = &st.config.novelty;
    let depth_term = if st.config.cascade.max_depth > 0 {
        result.max_depth as f32 / st.config.cascade.max_depth as f32
    } else {
        0.0
    };
    let familiarity = weights.growth_weight * result.growth_ratio().min(1.0)
        + weights.depth_weight * depth_term
        + weights.layer_weight * result.avg_layer_growth();
    let familiarity = if familiarity.is_finite() {
        familiarity.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let novelty = 1.0 - familiarity;

    let classification = if novelty < weights.familiar_below {
        Classification::Familiar
    } else if novelty < weights.novel_at {
        Classification::Moderate
    } else {
        Classification::Novel
    };

    QueryResult {
        activated_count: result.activated_count(),
        seed_count: result.seed_count(),
        max_depth: result.max_depth,
        novelty_score: novelty,
        classification,
    }
}

/// Handle to a background checkpoint thread. Stops the thread when dropped.
#[derive(Debug)]
pub struct Checkpointer {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<u64>>,
}

impl Checkpointer {
    /// Stop the thread and return how many checkpoints it committed
    pub fn stop(mut self) -> u64 {
        self.shutdown()
    }

    fn shutdown(&mut self) -> u64 {
        self.stop.store(true, Ordering::Release);
        let Some(thread) = self.thread.take() else {
            return 0;
        };
        thread.thread().unpark();
        match thread.join() {
            Ok(committed) => committed,
            Err(_) => {
                tracing::warn!("checkpoint thread panicked");
                0
            }
        }
    }
}

impl Drop for Checkpointer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
