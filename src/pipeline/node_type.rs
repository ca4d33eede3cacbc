//! Node type enumeration and the factory used by the graph registry.
//!
//! Built-in kinds are listed in [`NodeType`]. Additional kinds can be
//! registered on a [`NodeFactory`] under their own type tag; the graph then
//! creates them by name exactly like built-ins, including during snapshot
//! restore.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::{AnyNode, BuiltinNode, NodePlugin};
use crate::pipeline::nodes::{
    BakeStackNode, ExporterNode, FrameFilterNode, ParticleFitNode, ReconstructionNode,
    SyntheticStackNode,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Types of nodes that can be instantiated by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    // Sources
    /// Deterministic synthetic image stack.
    SyntheticStack,

    // Transforms
    /// Per-frame arithmetic and temporal filtering.
    FrameFilter,
    /// Pre-bakes an upstream stack into memory.
    BakeStack,
    /// Renders particles into a super-resolved image.
    Reconstruction,

    // Streaming sinks
    /// Writes frames to disk.
    Export,
    /// Localizes particles in every frame.
    ParticleFit,
}

impl NodeType {
    /// Type tag used in snapshots and by `Graph::create_node`.
    pub fn type_tag(&self) -> &'static str {
        match self {
            NodeType::SyntheticStack => "SyntheticStack",
            NodeType::FrameFilter => "FrameFilter",
            NodeType::BakeStack => "BakeStack",
            NodeType::Reconstruction => "Reconstruction",
            NodeType::Export => "Export",
            NodeType::ParticleFit => "ParticleFit",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            NodeType::SyntheticStack => "Synthetic Stack",
            NodeType::FrameFilter => "Frame Filter",
            NodeType::BakeStack => "Bake Stack",
            NodeType::Reconstruction => "Reconstruction",
            NodeType::Export => "Export",
            NodeType::ParticleFit => "Particle Fit",
        }
    }

    pub fn all() -> &'static [NodeType] {
        &[
            NodeType::SyntheticStack,
            NodeType::FrameFilter,
            NodeType::BakeStack,
            NodeType::Reconstruction,
            NodeType::Export,
            NodeType::ParticleFit,
        ]
    }

    /// Whether this node type hosts a batch job.
    pub fn is_streaming(&self) -> bool {
        matches!(
            self,
            NodeType::BakeStack | NodeType::Export | NodeType::ParticleFit
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            NodeType::SyntheticStack =>
                "Generates a deterministic image stack.\n\
                 Blinking Gaussian emitters over a flat background.\n\
                 Acts as the data-source root for downstream nodes.",

            NodeType::FrameFilter =>
                "Applies gain, offset and threshold per frame.\n\
                 Optional temporal mean over neighbouring frames.\n\
                 Caches the last produced frame.",

            NodeType::BakeStack =>
                "Copies upstream frames into memory.\n\
                 Runs as a batch job, a few frames per tick.\n\
                 Serves baked frames once complete.",

            NodeType::Reconstruction =>
                "Renders localized particles as a histogram.\n\
                 Frame i shows particles from frames 0..=i.\n\
                 Magnification sets the output pixel size.",

            NodeType::Export =>
                "Writes frames to a directory.\n\
                 Raw little-endian f32 or CSV per frame.\n\
                 A manifest is written on completion.",

            NodeType::ParticleFit =>
                "Detects local maxima in every frame.\n\
                 Refines each with a weighted centroid.\n\
                 Runs on the worker pool, a slice per tick.",
        }
    }

    pub fn instantiate(&self) -> BuiltinNode {
        match self {
            NodeType::SyntheticStack => BuiltinNode::SyntheticStack(SyntheticStackNode::new()),
            NodeType::FrameFilter => BuiltinNode::FrameFilter(FrameFilterNode::new()),
            NodeType::BakeStack => BuiltinNode::BakeStack(BakeStackNode::new()),
            NodeType::Reconstruction => BuiltinNode::Reconstruction(ReconstructionNode::new()),
            NodeType::Export => BuiltinNode::Export(ExporterNode::new()),
            NodeType::ParticleFit => BuiltinNode::ParticleFit(ParticleFitNode::new()),
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for NodeType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeType::all()
            .iter()
            .copied()
            .find(|t| t.type_tag() == s)
            .ok_or_else(|| PipelineError::UnknownNodeType(s.to_string()))
    }
}

type PluginConstructor = Box<dyn Fn() -> Box<dyn NodePlugin> + Send + Sync>;

/// Creates nodes by type tag: built-ins first, then registered plugins.
#[derive(Default)]
pub struct NodeFactory {
    plugins: BTreeMap<String, PluginConstructor>,
}

impl NodeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin kind. A later registration under the same tag
    /// replaces the earlier one; built-in tags cannot be shadowed.
    pub fn register<F>(&mut self, type_name: impl Into<String>, constructor: F) -> PipelineResult<()>
    where
        F: Fn() -> Box<dyn NodePlugin> + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        if type_name.parse::<NodeType>().is_ok() {
            return Err(PipelineError::invalid_param(
                type_name,
                "type tag is reserved for a built-in node",
            ));
        }
        self.plugins.insert(type_name, Box::new(constructor));
        Ok(())
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        type_name.parse::<NodeType>().is_ok() || self.plugins.contains_key(type_name)
    }

    pub fn create(&self, type_name: &str) -> PipelineResult<AnyNode> {
        if let Ok(node_type) = type_name.parse::<NodeType>() {
            return Ok(AnyNode::Builtin(node_type.instantiate()));
        }
        self.plugins
            .get(type_name)
            .map(|constructor| AnyNode::Plugin(constructor()))
            .ok_or_else(|| PipelineError::UnknownNodeType(type_name.to_string()))
    }

    /// Every creatable type tag.
    pub fn available_types(&self) -> Vec<String> {
        NodeType::all()
            .iter()
            .map(|t| t.type_tag().to_string())
            .chain(self.plugins.keys().cloned())
            .collect()
    }
}
