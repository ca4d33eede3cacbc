//! Node abstraction for the graph.
//!
//! Two-layer design:
//! - **`NodePlugin` trait**: the pull/tick interface every node implements,
//!   and the extension point for node kinds defined outside this crate.
//! - **`BuiltinNode` enum**: enum dispatch over the built-in node kinds.
//!
//! `AnyNode` wraps either variant so the graph can handle both uniformly.
//!
//! While a node runs one of its hooks it is checked out of the graph and
//! receives a [`NodeContext`] through which it pulls from upstream nodes,
//! reports errors and reaches the worker pool.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::events::GraphEvent;
use crate::pipeline::graph::Graph;
use crate::pipeline::id::{NodeId, PortId};
use crate::pipeline::job::BatchJob;
use crate::pipeline::nodes::{
    BakeStackNode, ExporterNode, FrameFilterNode, ParticleFitNode, ReconstructionNode,
    SyntheticStackNode,
};
use crate::pipeline::port::{PortDescriptor, PortDirection, PortKind};
use crate::pipeline::value::ConfigValue;
use crate::pipeline::worker_pool::WorkerPool;
use crate::types::{Frame, ParticleSet};
use std::fmt::Display;

/// Result of an upstream traversal: a live node or the sentinel.
///
/// The sentinel answers every pull with "no data", so callers can always call
/// through without first checking connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRef {
    Node(NodeId),
    Sentinel,
}

impl NodeRef {
    pub fn id(self) -> Option<NodeId> {
        match self {
            NodeRef::Node(id) => Some(id),
            NodeRef::Sentinel => None,
        }
    }

    pub fn is_sentinel(self) -> bool {
        matches!(self, NodeRef::Sentinel)
    }
}

impl From<Option<NodeId>> for NodeRef {
    fn from(id: Option<NodeId>) -> Self {
        id.map(NodeRef::Node).unwrap_or(NodeRef::Sentinel)
    }
}

/// Context passed to node hooks.
pub struct NodeContext<'a> {
    graph: &'a mut Graph,
    node_id: NodeId,
}

impl<'a> NodeContext<'a> {
    pub(crate) fn new(graph: &'a mut Graph, node_id: NodeId) -> Self {
        Self { graph, node_id }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Type tag of the node this context belongs to.
    pub fn node_label(&self) -> String {
        self.graph
            .node_type(self.node_id)
            .unwrap_or("node")
            .to_string()
    }

    pub fn port(&self, name: &str) -> PipelineResult<PortId> {
        self.graph
            .port_by_name(self.node_id, name)
            .ok_or_else(|| PipelineError::UnknownPort {
                node_id: self.node_id,
                name: name.to_string(),
            })
    }

    /// The node feeding the named input, or the sentinel.
    pub fn upstream(&self, input: &str) -> NodeRef {
        match self.graph.port_by_name(self.node_id, input) {
            Some(port) => self.graph.incoming_node(port),
            None => NodeRef::Sentinel,
        }
    }

    pub fn incoming_kind(&self, input: &str) -> Option<PortKind> {
        self.graph
            .port_by_name(self.node_id, input)
            .and_then(|port| self.graph.incoming_kind(port))
    }

    /// Pull frame `index` through the named input. `None` when disconnected
    /// or when upstream has nothing (its failures are already reported).
    pub fn pull_frame(&mut self, input: &str, index: usize) -> Option<Frame> {
        let upstream = self.upstream(input);
        self.graph.produce_frame(upstream, index)
    }

    pub fn pull_particles(&mut self, input: &str) -> Option<ParticleSet> {
        let upstream = self.upstream(input);
        self.graph.produce_particles(upstream)
    }

    /// Frame count of the root source reached through the named input.
    pub fn source_frame_count(&self, input: &str) -> Option<usize> {
        let source = self.graph.resolve_source(self.upstream(input));
        self.graph.frame_count(source)
    }

    pub fn pool(&self) -> WorkerPool {
        self.graph.pool().clone()
    }

    pub fn batch_size(&self) -> usize {
        self.graph.batch_size()
    }

    pub fn report_error(&mut self, err: &dyn Display, context: impl Into<String>) {
        self.graph.report_error(err, context);
    }

    pub fn emit(&mut self, event: GraphEvent) {
        self.graph.emit(event);
    }

    /// Signal that this node's output changed without a parameter edit
    /// (e.g. a job materialized new data). Invalidates downstream caches.
    pub fn mark_output_changed(&mut self) {
        self.graph.mark_output_changed(self.node_id);
    }
}

/// The interface every node kind implements.
pub trait NodePlugin: Send {
    /// Type tag, used by the registry and in snapshots.
    fn type_name(&self) -> &str;

    /// Port descriptors for this node.
    fn ports(&self) -> &[PortDescriptor];

    /// Input followed by upstream-source searches. Defaults to the first input.
    fn primary_input(&self) -> Option<&'static str> {
        self.ports()
            .iter()
            .find(|p| p.direction == PortDirection::Input)
            .map(|p| p.name)
    }

    /// Whether this node is a data-source root.
    fn is_source(&self) -> bool {
        false
    }

    /// Number of frames available, for source roots.
    fn frame_count(&self) -> Option<usize> {
        None
    }

    /// Opt into single-entry frame memoization.
    fn caches_frames(&self) -> bool {
        false
    }

    fn produce_frame(&mut self, _ctx: &mut NodeContext, _index: usize) -> PipelineResult<Option<Frame>> {
        Ok(None)
    }

    fn produce_particles(&mut self, _ctx: &mut NodeContext) -> PipelineResult<Option<ParticleSet>> {
        Ok(None)
    }

    /// Called once per host-loop cycle.
    fn on_tick(&mut self, _ctx: &mut NodeContext) {}

    /// Called when a parameter is edited or a control key is sent.
    fn on_config_change(
        &mut self,
        key: &str,
        _value: &ConfigValue,
        _ctx: &mut NodeContext,
    ) -> PipelineResult<()> {
        Err(PipelineError::invalid_param(key, "unknown parameter"))
    }

    /// Typed parameters as JSON, for snapshots.
    fn save_params(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    fn load_params(&mut self, _params: serde_json::Value) -> PipelineResult<()> {
        Ok(())
    }

    /// The embedded batch job, for nodes that host one.
    fn job(&self) -> Option<&BatchJob> {
        None
    }
}

/// Enum dispatch for built-in nodes.
pub enum BuiltinNode {
    SyntheticStack(SyntheticStackNode),
    FrameFilter(FrameFilterNode),
    BakeStack(BakeStackNode),
    Export(ExporterNode),
    ParticleFit(ParticleFitNode),
    Reconstruction(ReconstructionNode),
}

macro_rules! dispatch {
    ($node:expr, $n:ident => $body:expr) => {
        match $node {
            BuiltinNode::SyntheticStack($n) => $body,
            BuiltinNode::FrameFilter($n) => $body,
            BuiltinNode::BakeStack($n) => $body,
            BuiltinNode::Export($n) => $body,
            BuiltinNode::ParticleFit($n) => $body,
            BuiltinNode::Reconstruction($n) => $body,
        }
    };
}

impl NodePlugin for BuiltinNode {
    fn type_name(&self) -> &str {
        dispatch!(self, n => n.type_name())
    }

    fn ports(&self) -> &[PortDescriptor] {
        dispatch!(self, n => n.ports())
    }

    fn primary_input(&self) -> Option<&'static str> {
        dispatch!(self, n => n.primary_input())
    }

    fn is_source(&self) -> bool {
        dispatch!(self, n => n.is_source())
    }

    fn frame_count(&self) -> Option<usize> {
        dispatch!(self, n => n.frame_count())
    }

    fn caches_frames(&self) -> bool {
        dispatch!(self, n => n.caches_frames())
    }

    fn produce_frame(&mut self, ctx: &mut NodeContext, index: usize) -> PipelineResult<Option<Frame>> {
        dispatch!(self, n => n.produce_frame(ctx, index))
    }

    fn produce_particles(&mut self, ctx: &mut NodeContext) -> PipelineResult<Option<ParticleSet>> {
        dispatch!(self, n => n.produce_particles(ctx))
    }

    fn on_tick(&mut self, ctx: &mut NodeContext) {
        dispatch!(self, n => n.on_tick(ctx))
    }

    fn on_config_change(
        &mut self,
        key: &str,
        value: &ConfigValue,
        ctx: &mut NodeContext,
    ) -> PipelineResult<()> {
        dispatch!(self, n => n.on_config_change(key, value, ctx))
    }

    fn save_params(&self) -> serde_json::Value {
        dispatch!(self, n => n.save_params())
    }

    fn load_params(&mut self, params: serde_json::Value) -> PipelineResult<()> {
        dispatch!(self, n => n.load_params(params))
    }

    fn job(&self) -> Option<&BatchJob> {
        dispatch!(self, n => n.job())
    }
}

/// Wrapper that holds either a built-in node (enum dispatch) or a plugin (trait object).
pub enum AnyNode {
    Builtin(BuiltinNode),
    Plugin(Box<dyn NodePlugin>),
}

impl AnyNode {
    pub fn as_plugin(&self) -> &dyn NodePlugin {
        match self {
            AnyNode::Builtin(n) => n,
            AnyNode::Plugin(n) => n.as_ref(),
        }
    }

    pub fn as_plugin_mut(&mut self) -> &mut dyn NodePlugin {
        match self {
            AnyNode::Builtin(n) => n,
            AnyNode::Plugin(n) => n.as_mut(),
        }
    }
}

impl From<BuiltinNode> for AnyNode {
    fn from(node: BuiltinNode) -> Self {
        AnyNode::Builtin(node)
    }
}

impl From<Box<dyn NodePlugin>> for AnyNode {
    fn from(node: Box<dyn NodePlugin>) -> Self {
        AnyNode::Plugin(node)
    }
}
