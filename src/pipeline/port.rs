//! Ports and the type-compatibility model.
//!
//! Each node declares its ports via static `PortDescriptor` arrays. When a node
//! is registered in a graph every descriptor is instantiated as a [`Port`]
//! with its own stable [`PortId`]. The graph uses these to validate and track
//! links.

use crate::pipeline::id::{NodeId, PortId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of data flowing through a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortKind {
    /// A stack of frames addressed by index.
    Dataset,
    /// A single image.
    Image,
    /// A rendered reconstruction.
    Reconstruction,
    /// Colour/lookup information.
    Colour,
    /// Particle coordinates.
    Coordinates,
    /// Wildcard that narrows to whatever concrete kind it is linked to.
    Multi,
}

impl PortKind {
    pub const ALL: [PortKind; 6] = [
        PortKind::Dataset,
        PortKind::Image,
        PortKind::Reconstruction,
        PortKind::Colour,
        PortKind::Coordinates,
        PortKind::Multi,
    ];

    #[inline]
    const fn bit(self) -> u8 {
        1 << (self as u8)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PortKind::Dataset => "Dataset",
            PortKind::Image => "Image",
            PortKind::Reconstruction => "Reconstruction",
            PortKind::Colour => "Colour",
            PortKind::Coordinates => "Coordinates",
            PortKind::Multi => "Multi",
        }
    }
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Whether a port is an input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

/// Small bitset of [`PortKind`]s.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KindSet(u8);

impl KindSet {
    pub const EMPTY: KindSet = KindSet(0);

    pub const fn single(kind: PortKind) -> Self {
        KindSet(kind.bit())
    }

    pub const fn with(self, kind: PortKind) -> Self {
        KindSet(self.0 | kind.bit())
    }

    pub fn of(kinds: &[PortKind]) -> Self {
        kinds.iter().fold(Self::EMPTY, |set, &k| set.with(k))
    }

    #[inline]
    pub fn contains(self, kind: PortKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = PortKind> {
        PortKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

impl fmt::Debug for KindSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Static descriptor for a node's port.
#[derive(Debug, Clone)]
pub struct PortDescriptor {
    pub name: &'static str,
    pub label: &'static str,
    pub direction: PortDirection,
    pub kind: PortKind,
    /// Kinds this port will link with besides its own.
    pub accepts: KindSet,
}

impl PortDescriptor {
    pub const fn input(name: &'static str, kind: PortKind) -> Self {
        Self {
            name,
            label: name,
            direction: PortDirection::Input,
            kind,
            accepts: KindSet::single(kind),
        }
    }

    pub const fn output(name: &'static str, kind: PortKind) -> Self {
        Self {
            name,
            label: name,
            direction: PortDirection::Output,
            kind,
            accepts: KindSet::single(kind),
        }
    }

    /// Widen the accepted partner kinds (used by `Multi` ports).
    pub const fn accepting(mut self, accepts: KindSet) -> Self {
        self.accepts = accepts;
        self
    }

    pub const fn labelled(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }
}

/// Why two ports cannot be linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incompatibility {
    SameDirection,
    AlreadyLinked,
    SameNode,
    KindMismatch { a: PortKind, b: PortKind },
}

impl fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Incompatibility::SameDirection => write!(f, "ports have the same direction"),
            Incompatibility::AlreadyLinked => write!(f, "ports are already linked"),
            Incompatibility::SameNode => write!(f, "ports belong to the same node"),
            Incompatibility::KindMismatch { a, b } => {
                write!(f, "{} cannot link with {}", a, b)
            }
        }
    }
}

/// Kind half of the connection rule: equal kinds, or either side lists the
/// other's kind among its accepted partners.
pub fn kinds_compatible(a: PortKind, a_accepts: KindSet, b: PortKind, b_accepts: KindSet) -> bool {
    a == b || a_accepts.contains(b) || b_accepts.contains(a)
}

/// A live port owned by exactly one node.
#[derive(Debug, Clone)]
pub struct Port {
    pub id: PortId,
    /// Owning node (back-reference, not ownership).
    pub owner: NodeId,
    pub name: &'static str,
    pub direction: PortDirection,
    /// Static kind from the descriptor.
    pub kind: PortKind,
    pub accepts: KindSet,
    default_label: &'static str,
    effective_kind: PortKind,
    label: String,
    links: Vec<PortId>,
}

impl Port {
    pub fn from_descriptor(id: PortId, owner: NodeId, desc: &PortDescriptor) -> Self {
        Self {
            id,
            owner,
            name: desc.name,
            direction: desc.direction,
            kind: desc.kind,
            accepts: desc.accepts,
            default_label: desc.label,
            effective_kind: desc.kind,
            label: desc.label.to_string(),
            links: Vec::new(),
        }
    }

    #[inline]
    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    pub fn links(&self) -> &[PortId] {
        &self.links
    }

    pub fn is_linked(&self) -> bool {
        !self.links.is_empty()
    }

    pub fn is_linked_to(&self, other: PortId) -> bool {
        self.links.contains(&other)
    }

    /// Kind after narrowing; equals `kind` unless this is a linked `Multi` port.
    pub fn effective_kind(&self) -> PortKind {
        self.effective_kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Check the four-part connection rule against `other`.
    pub fn check_compatible(&self, other: &Port) -> Result<(), Incompatibility> {
        if self.direction == other.direction {
            return Err(Incompatibility::SameDirection);
        }
        if self.is_linked_to(other.id) || other.is_linked_to(self.id) {
            return Err(Incompatibility::AlreadyLinked);
        }
        if self.owner == other.owner {
            return Err(Incompatibility::SameNode);
        }
        if !kinds_compatible(self.kind, self.accepts, other.kind, other.accepts) {
            return Err(Incompatibility::KindMismatch {
                a: self.kind,
                b: other.kind,
            });
        }
        Ok(())
    }

    pub(crate) fn add_link(&mut self, other: PortId) {
        if !self.links.contains(&other) {
            self.links.push(other);
        }
    }

    pub(crate) fn remove_link(&mut self, other: PortId) -> bool {
        let before = self.links.len();
        self.links.retain(|&p| p != other);
        self.links.len() != before
    }

    /// Inherit a partner's identity; only `Multi` ports narrow.
    pub(crate) fn narrow_to(&mut self, kind: PortKind, label: &str) {
        if self.kind == PortKind::Multi && kind != PortKind::Multi {
            self.effective_kind = kind;
            self.label = label.to_string();
        }
    }

    pub(crate) fn reset_identity(&mut self) {
        self.effective_kind = self.kind;
        self.label = self.default_label.to_string();
    }
}
