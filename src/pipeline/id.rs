//! Identity types for the graph.
//!
//! Nodes and ports are addressed by `u64` newtypes handed out by one
//! [`IdAllocator`]. The allocator is seeded from wall-clock time and only ever
//! moves forward, so ids stay unique across save/restore cycles: a restored
//! graph keeps its original ids and the allocator is advanced past them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier of a node in a [`Graph`](crate::pipeline::Graph).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl NodeId {
    pub const INVALID: NodeId = NodeId(u64::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "NodeId(INVALID)")
        } else {
            write!(f, "NodeId({})", self.0)
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Identifier of a port. Stable across snapshot save/restore.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortId(pub u64);

impl PortId {
    pub const INVALID: PortId = PortId(u64::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Debug for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "PortId(INVALID)")
        } else {
            write!(f, "PortId({})", self.0)
        }
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Monotonic, time-seeded id source shared by nodes and ports.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    /// Ids at or above this are never allocated or accepted from a snapshot,
    /// which leaves half the id space between any restored id and `INVALID`.
    pub const LIMIT: u64 = u64::MAX / 2;

    /// Whether `raw` can be used as a restored id.
    pub fn accepts(raw: u64) -> bool {
        raw < Self::LIMIT
    }

    /// Seed from the current time in microseconds.
    pub fn new() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(1);
        Self::starting_at(micros)
    }

    /// Start at an explicit value (tests, deterministic tools).
    pub fn starting_at(next: u64) -> Self {
        Self {
            next: next.clamp(1, Self::LIMIT - 1),
        }
    }

    fn bump(&mut self) -> u64 {
        let id = self.next;
        self.next = self.next.saturating_add(1);
        id
    }

    pub fn next_node(&mut self) -> NodeId {
        NodeId(self.bump())
    }

    pub fn next_port(&mut self) -> PortId {
        PortId(self.bump())
    }

    /// Ensure every future id is greater than `raw`. Ids outside
    /// [`accepts`](Self::accepts) are ignored.
    pub fn observe(&mut self, raw: u64) {
        if Self::accepts(raw) && raw >= self.next {
            self.next = raw + 1;
        }
    }

    /// The value the next id will take.
    pub fn peek(&self) -> u64 {
        self.next
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
