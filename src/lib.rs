//! # frameflow-rs: lazy frame-stack dataflow graph
//!
//! A node graph for processing stacks of image frames. Nodes expose typed
//! ports, data is pulled on demand through the graph, and long-running work
//! runs as cooperative batch jobs advanced by a host loop tick.
//!
//! ## Architecture
//!
//! - **Graph**: arena of nodes and ports with a single-link-per-input rule
//! - **Pull**: `produce_frame` walks upstream, memoized per node where enabled
//! - **Jobs**: bake, export and particle fitting run a bounded slice per tick
//!   on a scoped worker pool
//! - **Host loop**: owns the graph, drains commands over crossbeam channels and
//!   forwards errors and progress
//!
//! ## Configuration
//!
//! `config.toml` and the rolling log live in the platform data directory under
//! `dev.frameflow.frameflow-rs`. Graphs are saved as `.ffproj` project files.
//!
//! ## Example
//!
//! ```ignore
//! use frameflow_rs::config::AppConfig;
//! use frameflow_rs::pipeline::{Graph, NodeRef};
//!
//! let config = AppConfig::load_or_default();
//! let mut graph = Graph::new(config.scheduler);
//! let stack = graph.create_node("SyntheticStack")?;
//! let filter = graph.create_node("FrameFilter")?;
//! graph.connect(
//!     graph.port_by_name(stack, "out").unwrap(),
//!     graph.port_by_name(filter, "in").unwrap(),
//! )?;
//! let frame = graph.produce_frame(NodeRef::Node(filter), 0);
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod types;

// Re-export commonly used types
pub use config::{AppConfig, ProjectFile};
pub use error::{FrameFlowError, Result};
pub use pipeline::{Graph, HostBridge, HostLoop, NodeId, NodeRef, PortId};
pub use types::{Frame, ParticleRecord, ParticleSet};
