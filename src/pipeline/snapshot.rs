//! Graph snapshots: save and restore nodes, parameters and links.
//!
//! Links are stored as `(output, input)` port-id pairs. Restoring is two
//! phases: rebuild every node with its original node and port ids, then
//! re-run `connect` for each recorded pair. A pair that no longer validates is
//! dropped with a warning and counted in the [`RestoreReport`].

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::graph::Graph;
use crate::pipeline::id::{IdAllocator, NodeId, PortId};
use crate::pipeline::node::AnyNode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{info, warn};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortRecord {
    pub id: PortId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub node_type: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub ports: Vec<PortRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkRecord {
    pub output: PortId,
    pub input: PortId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub nodes: Vec<NodeRecord>,
    pub links: Vec<LinkRecord>,
}

impl GraphSnapshot {
    pub fn empty() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            nodes: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn encode(&self) -> PipelineResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn decode(bytes: &[u8]) -> PipelineResult<Self> {
        let snapshot: GraphSnapshot = serde_json::from_slice(bytes)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(PipelineError::invalid_param(
                "version",
                format!(
                    "snapshot version {} is newer than supported {}",
                    snapshot.version, SNAPSHOT_VERSION
                ),
            ));
        }
        Ok(snapshot)
    }

    /// The link graph as a set of `(output, input)` pairs.
    pub fn link_pairs(&self) -> BTreeSet<(PortId, PortId)> {
        self.links.iter().map(|l| (l.output, l.input)).collect()
    }

    fn validate_ids(&self) -> PipelineResult<()> {
        let mut nodes = HashSet::new();
        let mut ports = HashSet::new();
        let out_of_range = |raw: u64| {
            PipelineError::invalid_param("ids", format!("id {} is outside the allocatable range", raw))
        };
        for record in &self.nodes {
            if !IdAllocator::accepts(record.id.0) {
                return Err(out_of_range(record.id.0));
            }
            if !nodes.insert(record.id) {
                return Err(PipelineError::invalid_param(
                    "nodes",
                    format!("duplicate node id {}", record.id),
                ));
            }
            for port in &record.ports {
                if !IdAllocator::accepts(port.id.0) {
                    return Err(out_of_range(port.id.0));
                }
                if !ports.insert(port.id) {
                    return Err(PipelineError::invalid_param(
                        "ports",
                        format!("duplicate port id {}", port.id),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl Default for GraphSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// What a restore actually rebuilt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub nodes: usize,
    pub links: usize,
    pub dropped_links: usize,
}

impl Graph {
    pub fn save_snapshot(&self) -> GraphSnapshot {
        let nodes = self
            .node_ids()
            .into_iter()
            .map(|id| NodeRecord {
                id,
                node_type: self.node_type(id).unwrap_or_default().to_string(),
                params: self.params(id).unwrap_or_default(),
                ports: self
                    .ports_of(id)
                    .iter()
                    .filter_map(|pid| self.port(*pid))
                    .map(|p| PortRecord {
                        id: p.id,
                        name: p.name.to_string(),
                    })
                    .collect(),
            })
            .collect();
        let links = self
            .links()
            .into_iter()
            .map(|(output, input)| LinkRecord { output, input })
            .collect();
        GraphSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            nodes,
            links,
        }
    }

    /// Replace the whole graph with `snapshot`.
    ///
    /// Every node is instantiated and its parameters loaded before anything
    /// is touched, so an unknown type or bad parameters leave the graph as it
    /// was.
    pub fn restore_snapshot(&mut self, snapshot: &GraphSnapshot) -> PipelineResult<RestoreReport> {
        snapshot.validate_ids()?;

        let mut built: Vec<(NodeId, AnyNode, HashMap<String, PortId>)> =
            Vec::with_capacity(snapshot.nodes.len());
        for record in &snapshot.nodes {
            let mut node = self.factory().create(&record.node_type)?;
            node.as_plugin_mut().load_params(record.params.clone())?;
            let port_ids = record
                .ports
                .iter()
                .map(|p| (p.name.clone(), p.id))
                .collect();
            built.push((record.id, node, port_ids));
        }

        for id in self.node_ids() {
            self.delete_node(id);
        }

        let mut report = RestoreReport::default();
        for (id, node, port_ids) in built {
            self.insert_node(id, node, &port_ids);
            report.nodes += 1;
        }
        for link in &snapshot.links {
            match self.connect(link.output, link.input) {
                Ok(()) => report.links += 1,
                Err(err) => {
                    warn!(
                        "Dropping link {} -> {} from snapshot: {}",
                        link.output, link.input, err
                    );
                    report.dropped_links += 1;
                }
            }
        }
        info!(
            "Restored snapshot: {} nodes, {} links ({} dropped)",
            report.nodes, report.links, report.dropped_links
        );
        Ok(report)
    }
}
