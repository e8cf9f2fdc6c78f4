//! Location-agnostic dataflow graph.
//!
//! Applications describe *what* moves where: nodes tagged with the
//! environment they run in (driver or a specific worker), connected by typed
//! edges carrying either a byte stream or a scalar value. The graph says
//! nothing about how data crosses process boundaries; the
//! [`plan`](crate::plan) passes insert that.
//!
//! Nodes live in an arena owned by the [`Graph`] and are addressed by
//! [`NodeId`]; edges are addressed by [`DagVarId`] and remember their
//! producing and consuming slots as [`Endpoint`]s.

mod graph;
mod node;
mod var;

pub use graph::Graph;
pub use node::{CustomNode, Node, NodeEnv, NodeId, NodeKind};
pub use var::{DagVar, DagVarId, Endpoint};
