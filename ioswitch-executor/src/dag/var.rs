//! Graph-time variable edges.

use super::NodeId;
use ioswitch_core::{VarId, VarKind};
use std::fmt;

/// Graph-scoped identifier of an edge.
///
/// Independent of the [`VarId`] assigned at lowering time. `0` is never
/// handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DagVarId(pub(crate) u32);

impl DagVarId {
    /// Get the raw ID value.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for DagVarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A node slot: which node, and which index in the slot vector matching the
/// edge's kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// The node.
    pub node: NodeId,
    /// Slot index.
    pub slot: usize,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(node: NodeId, slot: usize) -> Self {
        Self { node, slot }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.node, self.slot)
    }
}

/// An edge with one producer and any number of consumers.
#[derive(Debug, Clone)]
pub struct DagVar {
    /// Edge identity.
    pub id: DagVarId,
    /// Stream or value.
    pub kind: VarKind,
    /// The producing output slot. Fixed once the edge exists.
    pub from: Endpoint,
    /// Consuming input slots.
    pub to: Vec<Endpoint>,
    /// Runtime ID, [`VarId::UNASSIGNED`] until lowering.
    pub var_id: VarId,
}
