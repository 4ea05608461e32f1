//! Export - JSON inspection dump of engine state
//!
//! A human-readable summary for debugging and offline analysis. It is not a
//! checkpoint format: neurons of non-resident clusters are not paged in, so
//! their synapse counts are reported as unknown.

use crate::engine::{Engine, EngineStats};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level export document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineExport {
    pub stats: EngineStats,

    /// One entry per cluster, by id
    pub clusters: Vec<ExportedCluster>,

    /// Lifetime usage per populated codebook entry
    pub codebook_usage: Vec<u64>,

    pub metadata: ExportMetadata,
}

/// Cluster summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedCluster {
    pub id: u32,
    pub region: u32,
    pub sample_count: u64,
    pub neurons: usize,
    pub complexity: f32,
    pub resident: bool,

    /// Outgoing synapses of resident members; `None` when paged out
    pub synapses: Option<usize>,

    /// Clusters this one has at least one synapse onto (resident only)
    pub linked_clusters: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub exported_at: String,
    pub format_version: u32,
}

const EXPORT_FORMAT_VERSION: u32 = 1;

impl Engine {
    /// Build the export document under a read lock
    pub fn export_data(&self) -> EngineExport {
        let stats = self.stats();
        let state = self.read_state();

        let clusters = state
            .colony
            .clusters()
            .map(|cluster| {
                let (synapses, linked_clusters) = if cluster.is_resident() {
                    let mut count = 0;
                    let mut linked = std::collections::BTreeSet::new();
                    for id in cluster.member_ids() {
                        if let Some(edges) = state.graph.outgoing(id) {
                            count += edges.len();
                            linked.extend(
                                edges
                                    .keys()
                                    .map(|t| t.cluster())
                                    .filter(|c| *c != cluster.id())
                                    .map(|c| c.0),
                            );
                        }
                    }
                    (Some(count), linked.into_iter().collect())
                } else {
                    (None, Vec::new())
                };

                ExportedCluster {
                    id: cluster.id().0,
                    region: cluster.region(),
                    sample_count: cluster.sample_count(),
                    neurons: cluster.len(),
                    complexity: cluster.complexity(),
                    resident: cluster.is_resident(),
                    synapses,
                    linked_clusters,
                }
            })
            .collect();

        EngineExport {
            stats,
            clusters,
            codebook_usage: state.quantizer.codebook().usage.clone(),
            metadata: ExportMetadata {
                exported_at: chrono::Utc::now().to_rfc3339(),
                format_version: EXPORT_FORMAT_VERSION,
            },
        }
    }

    /// Export to a pretty-printed JSON file
    pub fn export_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let export = self.export_data();

        let json = serde_json::to_string_pretty(&export)?;
        std::fs::write(path, json)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::consolidation::CheckpointPolicy;
    use tempfile::tempdir;

    #[test]
    fn test_export_to_json() {
        let config = EngineConfig {
            checkpoint: CheckpointPolicy::manual(),
            ..EngineConfig::default()
        };
        let engine = Engine::new(config).unwrap();
        engine.learn("red apple");
        engine.learn("green apple");

        let dir = tempdir().unwrap();
        let path = dir.path().join("export.json");
        engine.export_json(&path).unwrap();

        let json = std::fs::read_to_string(&path).unwrap();
        let export: EngineExport = serde_json::from_str(&json).unwrap();
        assert_eq!(export.clusters.len(), 3);
        assert_eq!(export.stats.learn_steps, 2);
        assert!(export.clusters.iter().all(|c| c.resident && c.synapses.unwrap_or(0) > 0));

        // "apple" fired with both colors
        let apple = engine.cluster_of("apple").unwrap();
        let entry = export.clusters.iter().find(|c| c.id == apple.0).unwrap();
        assert_eq!(entry.linked_clusters.len(), 2);
    }
}
