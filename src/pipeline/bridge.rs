//! Thread boundary between the host loop and whoever drives it.
//!
//! `HostBridge` is the caller-side handle: commands go in over one bounded
//! channel, [`HostMessage`]s come back over another. The [`HostLoop`]
//! (crate::pipeline::HostLoop) owns the receiving ends.

use crate::pipeline::graph::Graph;
use crate::pipeline::id::{NodeId, PortId};
use crate::pipeline::job::{JobProgress, JobState};
use crate::pipeline::port::{PortDirection, PortKind};
use crate::pipeline::report::ReportedError;
use crate::pipeline::snapshot::RestoreReport;
use crate::pipeline::value::ConfigValue;
use crate::types::Frame;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::path::PathBuf;

/// Messages sent from the host loop to the caller.
#[derive(Debug, Clone)]
pub enum HostMessage {
    /// A `CreateNode` command succeeded.
    NodeCreated { node_id: NodeId, node_type: String },

    /// Something was reported on the graph's error channel.
    Error(ReportedError),

    /// Progress of every job-bearing node.
    Progress(Vec<(NodeId, JobProgress)>),

    /// A job reached a terminal state.
    JobFinished { node_id: NodeId, state: JobState },

    /// Response to `RequestFrame`. `None` means the node had no data.
    Frame {
        node_id: NodeId,
        index: usize,
        frame: Option<Frame>,
    },

    /// Response to `RequestTopology`.
    Topology(TopologySnapshot),

    ProjectSaved(PathBuf),

    ProjectLoaded { path: PathBuf, report: RestoreReport },

    /// The host loop is shutting down.
    Shutdown,
}

/// Snapshot of a single port.
#[derive(Debug, Clone, PartialEq)]
pub struct PortSnapshot {
    pub id: PortId,
    pub name: String,
    pub label: String,
    pub direction: PortDirection,
    pub kind: PortKind,
    pub links: Vec<PortId>,
}

/// Snapshot of a single node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub node_type: String,
    pub ports: Vec<PortSnapshot>,
    pub job: Option<JobProgress>,
}

/// Complete topology of the graph, links as `(output, input)` pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopologySnapshot {
    pub nodes: Vec<NodeSnapshot>,
    pub links: Vec<(PortId, PortId)>,
}

impl TopologySnapshot {
    pub fn capture(graph: &Graph) -> Self {
        let nodes = graph
            .node_ids()
            .into_iter()
            .map(|id| NodeSnapshot {
                id,
                node_type: graph.node_type(id).unwrap_or_default().to_string(),
                ports: graph
                    .ports_of(id)
                    .iter()
                    .filter_map(|pid| graph.port(*pid))
                    .map(|p| PortSnapshot {
                        id: p.id,
                        name: p.name.to_string(),
                        label: p.label().to_string(),
                        direction: p.direction,
                        kind: p.effective_kind(),
                        links: p.links().to_vec(),
                    })
                    .collect(),
                job: graph.job_progress(id),
            })
            .collect();
        Self {
            nodes,
            links: graph.links(),
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Commands sent from the caller to the host loop.
#[derive(Debug, Clone)]
pub enum GraphCommand {
    CreateNode {
        node_type: String,
        params: Option<serde_json::Value>,
    },
    DeleteNode(NodeId),
    /// Link two ports. Rejected pairs are ignored.
    Connect { a: PortId, b: PortId },
    DisconnectAll(PortId),
    Configure {
        node_id: NodeId,
        key: String,
        value: ConfigValue,
    },
    StartJob(NodeId),
    CancelJob(NodeId),
    RequestFrame { node_id: NodeId, index: usize },
    RequestTopology,
    SaveProject(PathBuf),
    LoadProject(PathBuf),
    DismissError,
    /// Change the host loop rate. 0 means unthrottled.
    SetTickRate(u32),
    /// Stop the host loop.
    Shutdown,
}

/// Channel capacity for commands (caller → host loop).
const CMD_CHANNEL_CAPACITY: usize = 256;
/// Channel capacity for messages (host loop → caller).
const MSG_CHANNEL_CAPACITY: usize = 10_000;

/// Caller-side handle for talking to the host loop.
pub struct HostBridge {
    pub cmd_tx: Sender<GraphCommand>,
    pub msg_rx: Receiver<HostMessage>,
}

impl HostBridge {
    /// Create a new bridge pair: `(bridge, cmd_rx, msg_tx)`.
    ///
    /// The host loop owns `cmd_rx` and `msg_tx`.
    pub fn new() -> (Self, Receiver<GraphCommand>, Sender<HostMessage>) {
        let (cmd_tx, cmd_rx) = bounded(CMD_CHANNEL_CAPACITY);
        let (msg_tx, msg_rx) = bounded(MSG_CHANNEL_CAPACITY);
        (Self { cmd_tx, msg_rx }, cmd_rx, msg_tx)
    }

    /// Drain all pending messages.
    pub fn drain(&self) -> Vec<HostMessage> {
        let mut msgs = Vec::new();
        while let Ok(msg) = self.msg_rx.try_recv() {
            msgs.push(msg);
        }
        msgs
    }

    /// Try to receive a single message without blocking.
    pub fn try_recv(&self) -> Option<HostMessage> {
        self.msg_rx.try_recv().ok()
    }

    pub fn send_command(&self, cmd: GraphCommand) -> bool {
        self.cmd_tx.send(cmd).is_ok()
    }

    pub fn create_node(&self, node_type: impl Into<String>) {
        let _ = self.cmd_tx.send(GraphCommand::CreateNode {
            node_type: node_type.into(),
            params: None,
        });
    }

    pub fn connect(&self, a: PortId, b: PortId) {
        let _ = self.cmd_tx.send(GraphCommand::Connect { a, b });
    }

    pub fn configure(&self, node_id: NodeId, key: impl Into<String>, value: ConfigValue) {
        let _ = self.cmd_tx.send(GraphCommand::Configure {
            node_id,
            key: key.into(),
            value,
        });
    }

    pub fn start_job(&self, node_id: NodeId) {
        let _ = self.cmd_tx.send(GraphCommand::StartJob(node_id));
    }

    pub fn cancel_job(&self, node_id: NodeId) {
        let _ = self.cmd_tx.send(GraphCommand::CancelJob(node_id));
    }

    pub fn request_frame(&self, node_id: NodeId, index: usize) {
        let _ = self
            .cmd_tx
            .send(GraphCommand::RequestFrame { node_id, index });
    }

    pub fn request_topology(&self) {
        let _ = self.cmd_tx.send(GraphCommand::RequestTopology);
    }

    pub fn save_project(&self, path: impl Into<PathBuf>) {
        let _ = self.cmd_tx.send(GraphCommand::SaveProject(path.into()));
    }

    pub fn load_project(&self, path: impl Into<PathBuf>) {
        let _ = self.cmd_tx.send(GraphCommand::LoadProject(path.into()));
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(GraphCommand::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_round_trip() {
        let (bridge, cmd_rx, msg_tx) = HostBridge::new();
        bridge.start_job(NodeId(7));
        bridge.shutdown();
        assert!(matches!(cmd_rx.try_recv(), Ok(GraphCommand::StartJob(NodeId(7)))));
        assert!(matches!(cmd_rx.try_recv(), Ok(GraphCommand::Shutdown)));

        msg_tx.send(HostMessage::Shutdown).unwrap();
        msg_tx.send(HostMessage::Progress(Vec::new())).unwrap();
        assert_eq!(bridge.drain().len(), 2);
        assert!(bridge.try_recv().is_none());
    }

    #[test]
    fn test_topology_capture() {
        let mut graph = Graph::default();
        let src = graph.create_node("SyntheticStack").unwrap();
        let export = graph.create_node("Export").unwrap();
        let out = graph.port_by_name(src, "out").unwrap();
        let input = graph.port_by_name(export, "in").unwrap();
        graph.connect(out, input).unwrap();

        let topology = TopologySnapshot::capture(&graph);
        assert_eq!(topology.nodes.len(), 2);
        assert_eq!(topology.links, vec![(out, input)]);
        let export_node = topology.node(export).unwrap();
        assert_eq!(export_node.ports[0].kind, PortKind::Dataset);
        assert_eq!(export_node.ports[0].links, vec![out]);
        assert!(export_node.job.is_some());
        assert!(topology.node(src).unwrap().job.is_none());
    }

    #[test]
    fn test_send_fails_after_host_drops() {
        let (bridge, cmd_rx, _msg_tx) = HostBridge::new();
        drop(cmd_rx);
        assert!(!bridge.send_command(GraphCommand::RequestTopology));
    }
}
