//! Pipeline-specific error types.

use crate::pipeline::id::{NodeId, PortId};
use crate::pipeline::port::Incompatibility;
use thiserror::Error;

/// Errors that can occur within the graph engine.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Node {node_id:?} error: {message}")]
    Node { node_id: NodeId, message: String },

    #[error("Cannot link {a:?} and {b:?}: {reason}")]
    IncompatiblePorts {
        a: PortId,
        b: PortId,
        reason: Incompatibility,
    },

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Node not found: {0:?}")]
    NodeNotFound(NodeId),

    #[error("Port not found: {0:?}")]
    PortNotFound(PortId),

    #[error("Node {node_id:?} has no port named '{name}'")]
    UnknownPort { node_id: NodeId, name: String },

    #[error("Re-entrant pull on node {0:?} (cycle in graph)")]
    ReentrantPull(NodeId),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid parameter '{key}': {message}")]
    InvalidParameter { key: String, message: String },

    #[error("No upstream data source")]
    NoUpstreamSource,

    #[error("Job already running")]
    JobAlreadyRunning,

    #[error("Worker panicked: {0}")]
    WorkerPanic(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn node(node_id: NodeId, message: impl Into<String>) -> Self {
        PipelineError::Node {
            node_id,
            message: message.into(),
        }
    }

    pub fn invalid_param(key: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::InvalidParameter {
            key: key.into(),
            message: message.into(),
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::port::PortKind;

    #[test]
    fn test_incompatible_message() {
        let err = PipelineError::IncompatiblePorts {
            a: PortId(1),
            b: PortId(2),
            reason: Incompatibility::KindMismatch {
                a: PortKind::Dataset,
                b: PortKind::Colour,
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("Dataset cannot link with Colour"));
    }

    #[test]
    fn test_invalid_param_message() {
        let err = PipelineError::invalid_param("radius", "must be positive");
        assert_eq!(err.to_string(), "Invalid parameter 'radius': must be positive");
    }
}
