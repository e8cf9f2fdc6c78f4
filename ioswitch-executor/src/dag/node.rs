//! Graph nodes.

use super::{DagVarId, Graph};
use crate::exec::{DriverReadStream, DriverSignal, DriverWriteStream};
use crate::ops::Op;
use ioswitch_core::error::{Result, SwitchError};
use ioswitch_core::{ScalarValue, VarId, VarKind, WorkerInfo};
use std::fmt;

/// Stable identifier of a node within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Get the raw index.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Where a node executes.
///
/// Two environments are the same exactly when they compare equal: same
/// variant, and for workers, equal descriptors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum NodeEnv {
    /// Not decided yet. Must be resolved before planning.
    #[default]
    Unknown,
    /// The driver process.
    Driver,
    /// A worker process.
    Worker(WorkerInfo),
}

impl NodeEnv {
    /// The worker descriptor, if this is a worker environment.
    pub fn worker(&self) -> Option<&WorkerInfo> {
        match self {
            Self::Worker(w) => Some(w),
            _ => None,
        }
    }
}

impl fmt::Display for NodeEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("unknown"),
            Self::Driver => f.write_str("driver"),
            Self::Worker(w) => write!(f, "{}", w),
        }
    }
}

/// Application-defined node kind.
///
/// Lowering calls [`CustomNode::generate_op`] with the node (for its slots)
/// and the graph (to resolve slot edges to runtime IDs).
pub trait CustomNode: fmt::Debug + Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    /// Produce the lowered op, or `None` for bookkeeping-only nodes.
    fn generate_op(&self, node: &Node, graph: &Graph) -> Result<Option<Box<dyn Op>>>;
}

/// What a node does.
///
/// Slot conventions of the built-in kinds (`in`/`out`, stream/value):
///
/// | Kind | Slots |
/// |------|-------|
/// | `FromDriver` | out stream 0 |
/// | `ToDriver` | in stream 0 |
/// | `DriverSignal` | out value 0 |
/// | `Drop` | in stream 0 |
/// | `SendStream` / `GetStream` | in stream 0, out stream 0; Get adds signal out value 0 |
/// | `SendValue` / `GetValue` | in value 0, out value 0; Get adds signal out value 1 |
/// | `Store` | in value 0 |
/// | `ConstValue` | out value 0 |
/// | `OnStreamBegin` / `OnStreamEnd` | in stream 0, out stream 0, signal out value 0 |
/// | `HoldUntil` | in values `0..waits` are signals; in stream `i` emits out stream `i`; in value `waits + i` emits out value `i` |
/// | `Broadcast` | in value 0, out values `0..` |
#[derive(Debug)]
pub enum NodeKind {
    /// Stream written by the application through the driver.
    FromDriver(DriverWriteStream),
    /// Stream read by the application through the driver.
    ToDriver(DriverReadStream),
    /// Signal raised by the application through the driver.
    DriverSignal(DriverSignal),
    /// Drains and discards a stream.
    Drop,
    /// Pushes a stream to another worker.
    SendStream {
        /// Destination.
        to: WorkerInfo,
    },
    /// Pushes a value to another worker.
    SendValue {
        /// Destination.
        to: WorkerInfo,
    },
    /// Pulls a stream from a worker.
    GetStream {
        /// Source.
        from: WorkerInfo,
    },
    /// Pulls a value from a worker.
    GetValue {
        /// Source.
        from: WorkerInfo,
    },
    /// Records a value in the result store.
    Store {
        /// Result key.
        key: String,
    },
    /// Publishes a constant.
    ConstValue {
        /// The constant.
        value: ScalarValue,
    },
    /// Signals when a stream becomes available.
    OnStreamBegin,
    /// Signals when a stream has been read to EOF.
    OnStreamEnd,
    /// Withholds variables until signals arrive.
    HoldUntil {
        /// Number of leading input values that are wait signals.
        waits: usize,
    },
    /// Copies one value to several outputs.
    Broadcast,
    /// Application-defined kind.
    Custom(Box<dyn CustomNode>),
}

impl NodeKind {
    /// Short name used in diagnostics.
    pub fn name(&self) -> &str {
        match self {
            Self::FromDriver(_) => "from_driver",
            Self::ToDriver(_) => "to_driver",
            Self::DriverSignal(_) => "driver_signal",
            Self::Drop => "drop",
            Self::SendStream { .. } => "send_stream",
            Self::SendValue { .. } => "send_value",
            Self::GetStream { .. } => "get_stream",
            Self::GetValue { .. } => "get_value",
            Self::Store { .. } => "store",
            Self::ConstValue { .. } => "const_value",
            Self::OnStreamBegin => "on_stream_begin",
            Self::OnStreamEnd => "on_stream_end",
            Self::HoldUntil { .. } => "hold_until",
            Self::Broadcast => "broadcast",
            Self::Custom(c) => c.name(),
        }
    }

    /// Whether this node was inserted by the transfer rewrite.
    pub fn is_transfer(&self) -> bool {
        matches!(
            self,
            Self::SendStream { .. }
                | Self::SendValue { .. }
                | Self::GetStream { .. }
                | Self::GetValue { .. }
                | Self::HoldUntil { .. }
        )
    }
}

/// A node with its environment and typed slots.
#[derive(Debug)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) env: NodeEnv,
    pub(crate) pinned: bool,
    pub(crate) kind: NodeKind,
    pub(crate) input_streams: Vec<Option<DagVarId>>,
    pub(crate) output_streams: Vec<Option<DagVarId>>,
    pub(crate) input_values: Vec<Option<DagVarId>>,
    pub(crate) output_values: Vec<Option<DagVarId>>,
}

impl Node {
    pub(crate) fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            env: NodeEnv::Unknown,
            pinned: false,
            kind,
            input_streams: Vec::new(),
            output_streams: Vec::new(),
            input_values: Vec::new(),
            output_values: Vec::new(),
        }
    }

    /// This node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Where the node runs.
    pub fn env(&self) -> &NodeEnv {
        &self.env
    }

    /// Whether rewrite passes must leave the environment alone.
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// What the node does.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Input stream slots.
    pub fn input_streams(&self) -> &[Option<DagVarId>] {
        &self.input_streams
    }

    /// Output stream slots.
    pub fn output_streams(&self) -> &[Option<DagVarId>] {
        &self.output_streams
    }

    /// Input value slots.
    pub fn input_values(&self) -> &[Option<DagVarId>] {
        &self.input_values
    }

    /// Output value slots.
    pub fn output_values(&self) -> &[Option<DagVarId>] {
        &self.output_values
    }

    pub(crate) fn inputs(&self, kind: VarKind) -> &[Option<DagVarId>] {
        match kind {
            VarKind::Stream => &self.input_streams,
            VarKind::Value => &self.input_values,
        }
    }

    pub(crate) fn inputs_mut(&mut self, kind: VarKind) -> &mut Vec<Option<DagVarId>> {
        match kind {
            VarKind::Stream => &mut self.input_streams,
            VarKind::Value => &mut self.input_values,
        }
    }

    pub(crate) fn outputs_mut(&mut self, kind: VarKind) -> &mut Vec<Option<DagVarId>> {
        match kind {
            VarKind::Stream => &mut self.output_streams,
            VarKind::Value => &mut self.output_values,
        }
    }

    /// Every edge this node produces.
    pub fn outputs(&self) -> impl Iterator<Item = DagVarId> + '_ {
        self.output_streams
            .iter()
            .chain(&self.output_values)
            .flatten()
            .copied()
    }

    /// Runtime ID of input stream `slot`.
    pub fn input_stream_var(&self, graph: &Graph, slot: usize) -> Result<VarId> {
        self.slot_var(graph, &self.input_streams, slot, true)
    }

    /// Runtime ID of output stream `slot`.
    pub fn output_stream_var(&self, graph: &Graph, slot: usize) -> Result<VarId> {
        self.slot_var(graph, &self.output_streams, slot, false)
    }

    /// Runtime ID of input value `slot`.
    pub fn input_value_var(&self, graph: &Graph, slot: usize) -> Result<VarId> {
        self.slot_var(graph, &self.input_values, slot, true)
    }

    /// Runtime ID of output value `slot`.
    pub fn output_value_var(&self, graph: &Graph, slot: usize) -> Result<VarId> {
        self.slot_var(graph, &self.output_values, slot, false)
    }

    fn slot_var(
        &self,
        graph: &Graph,
        slots: &[Option<DagVarId>],
        slot: usize,
        input: bool,
    ) -> Result<VarId> {
        let edge = slots.get(slot).copied().flatten();
        let var = edge.and_then(|id| graph.var(id));
        match var {
            Some(var) if var.var_id.is_assigned() => Ok(var.var_id),
            Some(var) => Err(SwitchError::InvalidTopology {
                cause: format!("edge {} of {} has no runtime ID yet", var.id, self.describe()),
            }),
            None if input => Err(SwitchError::UnconnectedInput {
                node: self.describe(),
                slot,
            }),
            None => Err(SwitchError::InvalidTopology {
                cause: format!("output slot {} of {} does not exist", slot, self.describe()),
            }),
        }
    }

    /// `name#id@env`, for diagnostics.
    pub fn describe(&self) -> String {
        format!("{}#{}@{}", self.kind.name(), self.id, self.env)
    }
}
