//! # Neurogrow
//!
//! A procedurally grown associative memory. Text is encoded into feature
//! vectors, quantized into region codes, and stored as populations of neurons
//! whose synapses strengthen when they fire together. Recall is a cascade of
//! activation through that graph; how far and how deep it spreads is the
//! engine's measure of familiarity.
//!
//! ## Pipeline
//!
//! ```text
//! learn:  text -> tokens -> encode -> quantize -> find/create cluster -> grow -> Hebbian learn
//! query:  text -> tokens -> encode -> nearest regions -> seed entry neurons -> cascade -> novelty
//! ```
//!
//! ## Components
//!
//! | Module | Role |
//! |--------|------|
//! | `encoder` | Pure text -> 128-dim vector |
//! | `quantizer` | Online codebook, region codes |
//! | `hypernetwork` | Neuron budgets and seed-derived attributes |
//! | `graph` | Sparse weighted synapses and the activation cascade |
//! | `cluster`, `colony` | Neuron populations, lazy residency, eviction |
//! | `storage`, `codec` | Immutable partition generations and checkpoint manifests |
//! | `engine` | The learn/query orchestrator and checkpointing |
//!
//! ## Memory Bound
//!
//! Cluster metadata is always in memory; neurons and synapses are paged in by
//! partition on first touch and evicted after an idle window or when the
//! resident-cluster cap is exceeded. Dirty clusters are spilled to a new
//! partition generation before they are dropped.
//!
//! ## Example
//!
//! ```rust,no_run
//! use neurogrow::{Engine, EngineConfig};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//!
//! let engine = Engine::open_dir("./memory", EngineConfig::default())?;
//!
//! for _ in 0..20 {
//!     engine.learn("the cat chased the dog");
//! }
//!
//! let cat = engine.query("cat");
//! let unseen = engine.query("qzxjklvwmp");
//! assert!(cat.novelty_score < unseen.novelty_score);
//!
//! engine.checkpoint().into_result()?;
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod codec;
pub mod colony;
pub mod config;
pub mod consolidation;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod export;
pub mod graph;
pub mod hypernetwork;
pub mod neuron;
pub mod plasticity;
pub mod quantizer;
pub mod snapshot;
pub mod storage;

// Re-exports
pub use crate::cluster::{ClusterConfig, ClusterMeta, NeuronCluster};
pub use crate::colony::{Colony, ColonyConfig, ColonyStats};
pub use crate::config::{EngineConfig, NoveltyConfig};
pub use crate::consolidation::{CheckpointPolicy, CheckpointTrigger, MaintenancePolicy, MaintenanceResult};
pub use crate::encoder::{encode, tokenize, FeatureVector, FEATURE_DIM};
pub use crate::engine::{
    CancelFlag, CheckpointOutcome, Checkpointer, Classification, Engine, EngineStats, LearnReport, QueryResult,
    TrainingReport, TrainingSource,
};
pub use crate::error::{Error, Result};
pub use crate::export::{EngineExport, ExportedCluster};
pub use crate::graph::{CascadeParams, CascadeResult, Synapse, SynapticGraph};
pub use crate::hypernetwork::{HypernetworkConfig, NeuronHypernetwork};
pub use crate::neuron::{ClusterId, Neuron, NeuronId, NeuronRecord};
pub use crate::plasticity::{HebbianRule, UpdatePolicy};
pub use crate::quantizer::{Codebook, QuantizerConfig, RegionCode, VectorQuantizer};
pub use crate::snapshot::{Manifest, PartitionData, PartitionId, PartitionRef};
pub use crate::storage::{FsStore, MemoryStore, PartitionStore};
