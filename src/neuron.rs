//! Neuron identity and state
//!
//! A neuron's id is the one thing that must never change across save, reload
//! and regeneration. Ids are composed from the owning cluster and a per-cluster
//! ordinal, both allocated monotonically and persisted, so an id is never
//! reused and never depends on procedural generation.

use crate::graph::Synapse;
use crate::hypernetwork::NeuronHypernetwork;
use crate::quantizer::RegionCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cluster identity (also its region-scoped memory unit id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterId(pub u32);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Stable neuron identity: `cluster << 32 | ordinal`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NeuronId(u64);

impl NeuronId {
    pub fn new(cluster: ClusterId, ordinal: u32) -> Self {
        Self(((cluster.0 as u64) << 32) | ordinal as u64)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    /// Owning cluster
    pub fn cluster(self) -> ClusterId {
        ClusterId((self.0 >> 32) as u32)
    }

    /// Allocation ordinal within the owning cluster
    pub fn ordinal(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for NeuronId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}.{}", self.cluster().0, self.ordinal())
    }
}

/// A resident neuron
#[derive(Debug, Clone, PartialEq)]
pub struct Neuron {
    pub id: NeuronId,

    /// Region code assigned when the neuron was grown
    pub region: RegionCode,

    /// Activation bias/threshold offset (procedurally regenerated)
    pub bias: f32,

    /// Importance in [0, 1], rises with use
    pub importance: f32,

    /// Fatigue/usage counter
    pub usage: u32,

    pub created_at: DateTime<Utc>,

    pub last_activated: Option<DateTime<Utc>>,
}

impl Neuron {
    /// Grow a fresh neuron, seeding its bias from (region, id)
    pub fn grow(id: NeuronId, region: RegionCode, hypernet: &NeuronHypernetwork) -> Self {
        let seed = NeuronHypernetwork::seed_for(region, id);
        Self {
            id,
            region,
            bias: hypernet.generate(seed).bias,
            importance: 0.0,
            usage: 0,
            created_at: Utc::now(),
            last_activated: None,
        }
    }

    /// Rebuild from a stored record. Bias is regenerated, never stored.
    pub fn from_record(record: &NeuronRecord, hypernet: &NeuronHypernetwork) -> Self {
        let seed = NeuronHypernetwork::seed_for(record.region, record.id);
        Self {
            id: record.id,
            region: record.region,
            bias: hypernet.generate(seed).bias,
            importance: sanitize(record.importance).clamp(0.0, 1.0),
            usage: record.usage,
            created_at: record.created_at,
            last_activated: record.last_activated,
        }
    }

    pub fn cluster(&self) -> ClusterId {
        self.id.cluster()
    }

    /// Mark as co-active in a learning step
    pub fn activate(&mut self, now: DateTime<Utc>) {
        self.usage = self.usage.saturating_add(1);
        self.importance = (self.importance + 0.1 * (1.0 - self.importance)).clamp(0.0, 1.0);
        self.last_activated = Some(now);
    }

    /// Compact persisted form with the neuron's outgoing synapses
    pub fn to_record(&self, synapses: Vec<(NeuronId, Synapse)>) -> NeuronRecord {
        NeuronRecord {
            id: self.id,
            region: self.region,
            importance: self.importance,
            usage: self.usage,
            created_at: self.created_at,
            last_activated: self.last_activated,
            synapses,
        }
    }
}

/// Compact on-disk neuron: identity, region code, learned counters and the
/// explicit outgoing synapse map
#[derive(Debug, Clone, PartialEq)]
pub struct NeuronRecord {
    pub id: NeuronId,
    pub region: RegionCode,
    pub importance: f32,
    pub usage: u32,
    pub created_at: DateTime<Utc>,
    pub last_activated: Option<DateTime<Utc>>,
    /// Outgoing edges, sorted by target id
    pub synapses: Vec<(NeuronId, Synapse)>,
}

impl NeuronRecord {
    /// Owning cluster
    pub fn cluster(&self) -> ClusterId {
        self.id.cluster()
    }
}

fn sanitize(v: f32) -> f32 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}
