//! Notifications emitted by a [`Graph`](crate::pipeline::Graph).
//!
//! Subscribers receive events over crossbeam channels in the order they were
//! fired. For an input port that already had a link, the eviction's
//! `PortDisconnected` pair is always delivered before the new `PortConnected`
//! pair.

use crate::pipeline::id::{NodeId, PortId};
use crate::pipeline::job::JobState;
use crate::pipeline::report::ReportedError;

#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    NodeCreated(NodeId),
    NodeDeleted(NodeId),
    /// `port` gained a link to `partner` (fired once for each side).
    PortConnected { port: PortId, partner: PortId },
    /// `port` lost its link to `partner` (fired once for each side).
    PortDisconnected { port: PortId, partner: PortId },
    ParamChanged { node: NodeId, key: String },
    JobFinished { node: NodeId, state: JobState },
    ErrorReported(ReportedError),
}
