//! Lazy frame-stack dataflow graph.
//!
//! Nodes are connected through typed ports. Data is pulled: asking a node for
//! frame `i` makes it pull whatever it needs from upstream, so nothing is
//! computed until a viewer, exporter or job asks. Long-running work (baking,
//! exporting, fitting) runs as batch jobs advanced a slice at a time by the
//! host loop's tick.
//!
//! # Architecture
//!
//! ```text
//! [SyntheticStack] ──► [FrameFilter] ──► [BakeStack] ──► [Export]
//!                                    └─► [ParticleFit] ──► [Reconstruction]
//! ```
//!
//! # Design
//!
//! - **Arena graph**: nodes and ports live in maps keyed by id; links are
//!   port-id pairs, never owning references.
//! - **Sentinel**: traversal yields [`NodeRef::Sentinel`] on a dead end, and
//!   pulling from it is always "no data".
//! - **Enum dispatch**: built-in nodes are a [`BuiltinNode`] enum; third-party
//!   nodes are boxed [`NodePlugin`]s registered on the [`NodeFactory`].
//! - **Cooperative jobs**: a [`BatchJob`] draws at most `batch_size` items per
//!   tick and fans them out on the [`WorkerPool`].
//! - **Dedicated thread**: the [`HostLoop`] owns the graph and talks to
//!   callers through the [`HostBridge`] channels.

pub mod bridge;
pub mod cache;
pub mod error;
pub mod events;
pub mod executor;
pub mod graph;
pub mod id;
pub mod job;
pub mod node;
pub mod node_type;
pub mod nodes;
pub mod port;
pub mod report;
pub mod snapshot;
pub mod value;
pub mod worker_pool;

pub use bridge::{
    GraphCommand, HostBridge, HostMessage, NodeSnapshot, PortSnapshot, TopologySnapshot,
};
pub use cache::FrameCache;
pub use error::{PipelineError, PipelineResult};
pub use events::GraphEvent;
pub use executor::HostLoop;
pub use graph::Graph;
pub use id::{IdAllocator, NodeId, PortId};
pub use job::{BatchJob, BatchWork, Dispatch, IndexRange, JobControl, JobProgress, JobState};
pub use node::{AnyNode, BuiltinNode, NodeContext, NodePlugin, NodeRef};
pub use node_type::{NodeFactory, NodeType};
pub use port::{Incompatibility, KindSet, Port, PortDescriptor, PortDirection, PortKind};
pub use report::{ErrorChannel, ReportedError};
pub use snapshot::{GraphSnapshot, LinkRecord, NodeRecord, PortRecord, RestoreReport};
pub use value::ConfigValue;
pub use worker_pool::{PoolStats, WorkerPool};
