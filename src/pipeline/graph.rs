//! The graph: node registry, port arena and pull/tick entry points.
//!
//! Nodes live in id-keyed slots and ports in an id-keyed map. Links are pairs
//! of port ids, so nothing owns anything across a link and deleting a node is
//! just disconnecting its ports and dropping its slot.
//!
//! While a node runs a hook it is taken out of its slot and handed a
//! [`NodeContext`] borrowing the graph, which is how it pulls from upstream.

use crate::config::SchedulerSettings;
use crate::pipeline::cache::FrameCache;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::events::GraphEvent;
use crate::pipeline::id::{IdAllocator, NodeId, PortId};
use crate::pipeline::job::JobProgress;
use crate::pipeline::node::{AnyNode, NodeContext, NodePlugin, NodeRef};
use crate::pipeline::node_type::NodeFactory;
use crate::pipeline::port::{Port, PortKind};
use crate::pipeline::report::{ErrorChannel, ReportedError};
use crate::pipeline::value::ConfigValue;
use crate::pipeline::worker_pool::{panic_message, WorkerPool};
use crate::types::{Frame, ParticleSet};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Display;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, info};

/// A node plus its per-node engine state.
struct NodeSlot {
    /// `None` while the node is checked out running a hook.
    node: Option<AnyNode>,
    type_name: String,
    ports: Vec<PortId>,
    changed: bool,
    cache: FrameCache,
}

pub struct Graph {
    nodes: BTreeMap<NodeId, NodeSlot>,
    ports: HashMap<PortId, Port>,
    ids: IdAllocator,
    /// Bumped on every change that can alter produced data.
    generation: u64,
    errors: ErrorChannel,
    pool: WorkerPool,
    settings: SchedulerSettings,
    factory: NodeFactory,
    subscribers: Vec<Sender<GraphEvent>>,
}

impl Graph {
    pub fn new(settings: SchedulerSettings) -> Self {
        Self {
            nodes: BTreeMap::new(),
            ports: HashMap::new(),
            ids: IdAllocator::new(),
            generation: 0,
            errors: ErrorChannel::new(),
            pool: WorkerPool::new(settings.worker_count),
            settings,
            factory: NodeFactory::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn with_factory(mut self, factory: NodeFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn factory(&self) -> &NodeFactory {
        &self.factory
    }

    pub fn factory_mut(&mut self) -> &mut NodeFactory {
        &mut self.factory
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Process-wide fan-out width for every job in this graph.
    pub fn batch_size(&self) -> usize {
        self.settings.batch_size.max(1)
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Receive every subsequent [`GraphEvent`] in firing order.
    pub fn subscribe(&mut self) -> Receiver<GraphEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub(crate) fn emit(&mut self, event: GraphEvent) {
        // Drop subscribers whose receiver is gone
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    // ---- Registry ----

    /// Instantiate and register a node by type tag.
    pub fn create_node(&mut self, type_name: &str) -> PipelineResult<NodeId> {
        let node = self.factory.create(type_name)?;
        Ok(self.add_node(node))
    }

    /// Like [`create_node`](Self::create_node) but with initial parameters.
    /// Nothing is registered if the parameters do not load.
    pub fn create_node_with(
        &mut self,
        type_name: &str,
        params: serde_json::Value,
    ) -> PipelineResult<NodeId> {
        let mut node = self.factory.create(type_name)?;
        node.as_plugin_mut().load_params(params)?;
        Ok(self.add_node(node))
    }

    pub fn add_node(&mut self, node: AnyNode) -> NodeId {
        let id = self.ids.next_node();
        self.insert_node(id, node, &HashMap::new());
        id
    }

    pub fn add_plugin(&mut self, plugin: Box<dyn NodePlugin>) -> NodeId {
        self.add_node(AnyNode::Plugin(plugin))
    }

    /// Register `node` under `id`, taking port ids from `port_ids` by name
    /// where present and allocating fresh ones otherwise.
    pub(crate) fn insert_node(
        &mut self,
        id: NodeId,
        node: AnyNode,
        port_ids: &HashMap<String, PortId>,
    ) {
        self.ids.observe(id.0);
        let type_name = node.as_plugin().type_name().to_string();
        let mut ports = Vec::with_capacity(node.as_plugin().ports().len());
        for desc in node.as_plugin().ports() {
            let port_id = match port_ids.get(desc.name) {
                Some(&pid) => {
                    self.ids.observe(pid.0);
                    pid
                }
                None => self.ids.next_port(),
            };
            self.ports
                .insert(port_id, Port::from_descriptor(port_id, id, desc));
            ports.push(port_id);
        }
        self.nodes.insert(
            id,
            NodeSlot {
                node: Some(node),
                type_name: type_name.clone(),
                ports,
                changed: true,
                cache: FrameCache::new(),
            },
        );
        info!("Created {} node {}", type_name, id);
        self.emit(GraphEvent::NodeCreated(id));
    }

    /// Disconnect every port of `id` and drop it. Returns `false` if the node
    /// was not registered.
    pub fn delete_node(&mut self, id: NodeId) -> bool {
        let Some(port_ids) = self.nodes.get(&id).map(|slot| slot.ports.clone()) else {
            return false;
        };
        for port in &port_ids {
            self.disconnect_all(*port);
        }
        for port in &port_ids {
            self.ports.remove(port);
        }
        if let Some(slot) = self.nodes.remove(&id) {
            info!("Deleted {} node {}", slot.type_name, id);
        }
        self.generation += 1;
        self.emit(GraphEvent::NodeDeleted(id));
        true
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn node_type(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(&id).map(|slot| slot.type_name.as_str())
    }

    /// Borrow a node. `None` if unknown or currently running a hook.
    pub fn node(&self, id: NodeId) -> Option<&dyn NodePlugin> {
        self.nodes
            .get(&id)
            .and_then(|slot| slot.node.as_ref())
            .map(|node| node.as_plugin())
    }

    pub fn ports_of(&self, id: NodeId) -> &[PortId] {
        self.nodes
            .get(&id)
            .map(|slot| slot.ports.as_slice())
            .unwrap_or(&[])
    }

    pub fn port(&self, id: PortId) -> Option<&Port> {
        self.ports.get(&id)
    }

    pub fn port_by_name(&self, node: NodeId, name: &str) -> Option<PortId> {
        self.ports_of(node)
            .iter()
            .copied()
            .find(|pid| self.ports.get(pid).is_some_and(|p| p.name == name))
    }

    /// Every link as `(output, input)`, sorted.
    pub fn links(&self) -> Vec<(PortId, PortId)> {
        let mut links: Vec<(PortId, PortId)> = self
            .ports
            .values()
            .filter(|p| p.is_input())
            .flat_map(|p| p.links().iter().map(move |&out| (out, p.id)))
            .collect();
        links.sort();
        links
    }

    // ---- Links ----

    /// Check the connection rule without mutating anything.
    pub fn can_connect(&self, a: PortId, b: PortId) -> PipelineResult<()> {
        let pa = self.ports.get(&a).ok_or(PipelineError::PortNotFound(a))?;
        let pb = self.ports.get(&b).ok_or(PipelineError::PortNotFound(b))?;
        pa.check_compatible(pb)
            .map_err(|reason| PipelineError::IncompatiblePorts { a, b, reason })
    }

    /// Link `a` and `b`. An input side that was already linked has its old
    /// link evicted first, with disconnect events fired before connect events.
    /// On rejection nothing changes.
    pub fn connect(&mut self, a: PortId, b: PortId) -> PipelineResult<()> {
        self.can_connect(a, b)?;

        for port in [a, b] {
            let evicted: Vec<PortId> = match self.ports.get(&port) {
                Some(p) if p.is_input() => p.links().to_vec(),
                _ => Vec::new(),
            };
            for old in evicted {
                debug!("Evicting link {} <-> {}", port, old);
                self.unlink(port, old);
            }
        }

        let (a_kind, a_label, a_owner) = self.identity(a)?;
        let (b_kind, b_label, b_owner) = self.identity(b)?;
        if let Some(pa) = self.ports.get_mut(&a) {
            pa.add_link(b);
            pa.narrow_to(b_kind, &b_label);
        }
        if let Some(pb) = self.ports.get_mut(&b) {
            pb.add_link(a);
            pb.narrow_to(a_kind, &a_label);
        }
        self.mark_changed(a_owner);
        self.mark_changed(b_owner);
        self.generation += 1;
        debug!("Connected {} <-> {}", a, b);
        self.emit(GraphEvent::PortConnected { port: a, partner: b });
        self.emit(GraphEvent::PortConnected { port: b, partner: a });
        Ok(())
    }

    /// Interactive variant of [`connect`](Self::connect): a rejected attempt
    /// is a non-event. Returns whether a link was made.
    pub fn try_connect(&mut self, a: PortId, b: PortId) -> bool {
        match self.connect(a, b) {
            Ok(()) => true,
            Err(err) => {
                debug!("Ignoring connection attempt: {}", err);
                false
            }
        }
    }

    /// Sever every link of `port` and reset its inherited identity.
    pub fn disconnect_all(&mut self, port: PortId) {
        let partners = self
            .ports
            .get(&port)
            .map(|p| p.links().to_vec())
            .unwrap_or_default();
        for partner in partners {
            self.unlink(port, partner);
        }
        if let Some(p) = self.ports.get_mut(&port) {
            p.reset_identity();
        }
    }

    fn identity(&self, port: PortId) -> PipelineResult<(PortKind, String, NodeId)> {
        self.ports
            .get(&port)
            .map(|p| (p.effective_kind(), p.label().to_string(), p.owner))
            .ok_or(PipelineError::PortNotFound(port))
    }

    fn unlink(&mut self, port: PortId, partner: PortId) {
        let mut removed = false;
        for (side, other) in [(port, partner), (partner, port)] {
            if let Some(p) = self.ports.get_mut(&side) {
                removed |= p.remove_link(other);
                if !p.is_linked() {
                    p.reset_identity();
                }
            }
        }
        if !removed {
            return;
        }
        for side in [port, partner] {
            if let Some(owner) = self.ports.get(&side).map(|p| p.owner) {
                self.mark_changed(owner);
            }
        }
        self.generation += 1;
        debug!("Disconnected {} <-> {}", port, partner);
        self.emit(GraphEvent::PortDisconnected { port, partner });
        self.emit(GraphEvent::PortDisconnected {
            port: partner,
            partner: port,
        });
    }

    // ---- Traversal ----

    /// The node feeding an input port with exactly one link, else the sentinel.
    pub fn incoming_node(&self, port: PortId) -> NodeRef {
        match self.ports.get(&port) {
            Some(p) if p.is_input() && p.links().len() == 1 => self
                .ports
                .get(&p.links()[0])
                .map(|partner| NodeRef::Node(partner.owner))
                .unwrap_or(NodeRef::Sentinel),
            _ => NodeRef::Sentinel,
        }
    }

    /// Effective kind of the port feeding `port`, if any.
    pub fn incoming_kind(&self, port: PortId) -> Option<PortKind> {
        match self.ports.get(&port) {
            Some(p) if p.is_input() && p.links().len() == 1 => self
                .ports
                .get(&p.links()[0])
                .map(|partner| partner.effective_kind()),
            _ => None,
        }
    }

    /// Walk primary inputs upstream of `node` until a source root.
    pub fn find_upstream_source(&self, node: NodeId) -> NodeRef {
        self.resolve_source(self.primary_upstream(node))
    }

    /// `start` itself if it is a source root, otherwise keep walking.
    pub(crate) fn resolve_source(&self, start: NodeRef) -> NodeRef {
        let mut visited = HashSet::new();
        let mut current = start;
        while let NodeRef::Node(id) = current {
            if !visited.insert(id) {
                break;
            }
            let Some(node) = self.node(id) else {
                break;
            };
            if node.is_source() {
                return current;
            }
            current = self.primary_upstream(id);
        }
        NodeRef::Sentinel
    }

    fn primary_upstream(&self, id: NodeId) -> NodeRef {
        let port = self
            .node(id)
            .and_then(|node| node.primary_input())
            .and_then(|name| self.port_by_name(id, name));
        match port {
            Some(port) => self.incoming_node(port),
            None => NodeRef::Sentinel,
        }
    }

    /// Frame count advertised by a node (normally a source root).
    pub fn frame_count(&self, node: NodeRef) -> Option<usize> {
        node.id()
            .and_then(|id| self.node(id))
            .and_then(|node| node.frame_count())
    }

    // ---- Pull ----

    /// Pull boundary: failures are reported and become "no data".
    pub fn produce_frame(&mut self, node: NodeRef, index: usize) -> Option<Frame> {
        let NodeRef::Node(id) = node else {
            return None;
        };
        match self.try_produce_frame(id, index) {
            Ok(frame) => frame,
            Err(err) => {
                let context = format!("{} frame {}", self.describe(id), index);
                self.report_error(&err, context);
                None
            }
        }
    }

    pub fn produce_particles(&mut self, node: NodeRef) -> Option<ParticleSet> {
        let NodeRef::Node(id) = node else {
            return None;
        };
        match self.with_node(id, |node, ctx| node.produce_particles(ctx)) {
            Ok(Ok(particles)) => particles,
            Ok(Err(err)) | Err(err) => {
                let context = format!("{} particles", self.describe(id));
                self.report_error(&err, context);
                None
            }
        }
    }

    /// Produce without the reporting boundary, consulting the memo first.
    pub fn try_produce_frame(&mut self, id: NodeId, index: usize) -> PipelineResult<Option<Frame>> {
        let generation = self.generation;
        let caches = {
            let slot = self.nodes.get_mut(&id).ok_or(PipelineError::NodeNotFound(id))?;
            let caches = slot
                .node
                .as_ref()
                .ok_or(PipelineError::ReentrantPull(id))?
                .as_plugin()
                .caches_frames();
            if caches {
                if let Some(frame) = slot.cache.get(index, generation) {
                    return Ok(Some(frame));
                }
            }
            caches
        };

        let result = self.with_node(id, |node, ctx| node.produce_frame(ctx, index))?;
        if caches && generation == self.generation {
            if let (Ok(Some(frame)), Some(slot)) = (&result, self.nodes.get_mut(&id)) {
                slot.cache.store(index, generation, frame.clone());
            }
        }
        result
    }

    /// Check the node out of its slot, run `f`, and put it back. The node is
    /// returned to its slot even if `f` panics; the panic becomes an error.
    fn with_node<R>(
        &mut self,
        id: NodeId,
        f: impl FnOnce(&mut dyn NodePlugin, &mut NodeContext) -> R,
    ) -> PipelineResult<R> {
        let mut node = self
            .nodes
            .get_mut(&id)
            .ok_or(PipelineError::NodeNotFound(id))?
            .node
            .take()
            .ok_or(PipelineError::ReentrantPull(id))?;
        let out = {
            let mut ctx = NodeContext::new(self, id);
            catch_unwind(AssertUnwindSafe(|| f(node.as_plugin_mut(), &mut ctx)))
        };
        if let Some(slot) = self.nodes.get_mut(&id) {
            slot.node = Some(node);
        }
        out.map_err(|payload| {
            PipelineError::node(id, format!("panicked: {}", panic_message(payload.as_ref())))
        })
    }

    fn describe(&self, id: NodeId) -> String {
        format!("{} {}", self.node_type(id).unwrap_or("node"), id)
    }

    // ---- Parameters, jobs, tick ----

    /// Apply an interactive parameter edit or control key.
    pub fn configure(&mut self, id: NodeId, key: &str, value: &ConfigValue) -> PipelineResult<()> {
        self.with_node(id, |node, ctx| node.on_config_change(key, value, ctx))??;
        self.generation += 1;
        self.mark_changed(id);
        self.emit(GraphEvent::ParamChanged {
            node: id,
            key: key.to_string(),
        });
        Ok(())
    }

    /// Replace a node's typed parameters from JSON.
    pub fn set_params(&mut self, id: NodeId, params: serde_json::Value) -> PipelineResult<()> {
        self.with_node(id, |node, _ctx| node.load_params(params))??;
        self.generation += 1;
        self.mark_changed(id);
        self.emit(GraphEvent::ParamChanged {
            node: id,
            key: "params".to_string(),
        });
        Ok(())
    }

    pub fn params(&self, id: NodeId) -> Option<serde_json::Value> {
        self.node(id).map(|node| node.save_params())
    }

    pub fn start_job(&mut self, id: NodeId) -> PipelineResult<()> {
        self.configure(id, "start", &ConfigValue::Bool(true))
    }

    pub fn cancel_job(&mut self, id: NodeId) -> PipelineResult<()> {
        self.configure(id, "cancel", &ConfigValue::Bool(true))
    }

    pub fn job_progress(&self, id: NodeId) -> Option<JobProgress> {
        self.node(id).and_then(|node| node.job()).map(|job| job.progress())
    }

    /// Progress of every node hosting a job.
    pub fn jobs(&self) -> Vec<(NodeId, JobProgress)> {
        self.nodes
            .keys()
            .filter_map(|&id| self.job_progress(id).map(|p| (id, p)))
            .collect()
    }

    pub fn has_running_jobs(&self) -> bool {
        self.nodes
            .keys()
            .any(|&id| self.job_progress(id).is_some_and(|p| p.state.is_running()))
    }

    /// Call `on_tick` once on every node, in id order.
    pub fn tick_all(&mut self) {
        for id in self.node_ids() {
            if self.contains(id) {
                if let Err(err) = self.with_node(id, |node, ctx| node.on_tick(ctx)) {
                    let context = format!("{} tick", self.describe(id));
                    self.report_error(&err, context);
                }
            }
        }
    }

    // ---- Change tracking ----

    fn mark_changed(&mut self, id: NodeId) {
        if let Some(slot) = self.nodes.get_mut(&id) {
            slot.changed = true;
        }
    }

    pub(crate) fn mark_output_changed(&mut self, id: NodeId) {
        self.generation += 1;
        self.mark_changed(id);
    }

    pub fn is_changed(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_some_and(|slot| slot.changed)
    }

    /// Read and clear the changed flag.
    pub fn take_changed(&mut self, id: NodeId) -> bool {
        self.nodes
            .get_mut(&id)
            .map(|slot| std::mem::take(&mut slot.changed))
            .unwrap_or(false)
    }

    /// `(hits, misses)` of a node's frame memo.
    pub fn cache_stats(&self, id: NodeId) -> Option<(u64, u64)> {
        self.nodes
            .get(&id)
            .map(|slot| (slot.cache.hits(), slot.cache.misses()))
    }

    // ---- Errors ----

    pub fn report_error(&mut self, err: &dyn Display, context: impl Into<String>) {
        let entry = self.errors.report(err, context);
        self.emit(GraphEvent::ErrorReported(entry));
    }

    pub fn errors(&self) -> &ErrorChannel {
        &self.errors
    }

    pub fn latest_error(&self) -> Option<&ReportedError> {
        self.errors.latest()
    }

    pub fn dismiss_error(&mut self) -> Option<ReportedError> {
        self.errors.dismiss()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new(SchedulerSettings::default())
    }
}
