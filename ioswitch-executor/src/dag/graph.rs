//! The mutable dataflow graph.

use super::{CustomNode, DagVar, DagVarId, Endpoint, Node, NodeEnv, NodeId, NodeKind};
use crate::exec::{DriverReadStream, DriverSignal, DriverWriteStream};
use ioswitch_core::error::{Result, SwitchError};
use ioswitch_core::{ScalarValue, VarId, VarKind};
use std::fmt::Write as _;

/// Arena of nodes plus the edges between them.
///
/// Node IDs index the arena and stay valid for the graph's lifetime; removed
/// nodes leave an empty arena slot. Iteration order is insertion order.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Option<Node>>,
    /// Iteration order. Entries removed during a walk are nulled and
    /// compacted once the outermost walk ends.
    order: Vec<Option<NodeId>>,
    vars: Vec<DagVar>,
    walk_depth: usize,
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with an unknown environment.
    pub fn add_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(Node::new(id, kind)));
        self.order.push(Some(id));
        id
    }

    /// Add a node in `env`, pinned so rewrite passes keep it there.
    pub fn add_pinned(&mut self, kind: NodeKind, env: NodeEnv) -> NodeId {
        let id = self.add_node(kind);
        if let Some(node) = self.node_mut(id) {
            node.env = env;
            node.pinned = true;
        }
        id
    }

    /// Remove a node, detaching it from every edge it touches.
    ///
    /// Consumers of the node's outputs are left with empty input slots.
    /// Safe to call from inside [`Graph::walk`].
    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        let node = self.nodes.get_mut(id.0)?.take()?;

        let inputs = node.input_streams.iter().enumerate();
        for (slot, var) in inputs.chain(node.input_values.iter().enumerate()) {
            if let Some(index) = var.and_then(|v| self.var_index(v)) {
                let endpoint = Endpoint::new(id, slot);
                self.vars[index].to.retain(|e| *e != endpoint);
            }
        }
        for var in node.outputs() {
            let Some(index) = self.var_index(var) else {
                continue;
            };
            let kind = self.vars[index].kind;
            for consumer in std::mem::take(&mut self.vars[index].to) {
                if let Some(Some(c)) = self.nodes.get_mut(consumer.node.0) {
                    if let Some(slot) = c.inputs_mut(kind).get_mut(consumer.slot) {
                        *slot = None;
                    }
                }
            }
        }

        if self.walk_depth > 0 {
            if let Some(entry) = self.order.iter_mut().find(|e| **e == Some(id)) {
                *entry = None;
            }
        } else {
            self.order.retain(|e| *e != Some(id));
        }
        Some(node)
    }

    /// Look a node up.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    fn require(&self, id: NodeId) -> Result<&Node> {
        self.node(id).ok_or_else(|| SwitchError::InvalidTopology {
            cause: format!("node {} does not exist", id),
        })
    }

    fn require_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.node_mut(id).ok_or_else(|| SwitchError::InvalidTopology {
            cause: format!("node {} does not exist", id),
        })
    }

    /// Live nodes in iteration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.order.iter().flatten().filter_map(|id| self.node(*id))
    }

    /// IDs of live nodes in iteration order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes().map(Node::id).collect()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes().count()
    }

    /// Whether the graph has no live nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set a node's environment. Pinned nodes cannot be moved.
    pub fn set_env(&mut self, id: NodeId, env: NodeEnv) -> Result<()> {
        let node = self.require_mut(id)?;
        if node.pinned && node.env != env {
            return Err(SwitchError::InvalidTopology {
                cause: format!("{} is pinned and cannot move to {}", node.describe(), env),
            });
        }
        node.env = env;
        Ok(())
    }

    /// Set a node's environment and pin it there.
    pub fn pin_env(&mut self, id: NodeId, env: NodeEnv) -> Result<()> {
        let node = self.require_mut(id)?;
        node.env = env;
        node.pinned = true;
        Ok(())
    }

    /// Look an edge up.
    pub fn var(&self, id: DagVarId) -> Option<&DagVar> {
        self.var_index(id).map(|i| &self.vars[i])
    }

    pub(crate) fn var_mut(&mut self, id: DagVarId) -> Option<&mut DagVar> {
        self.var_index(id).map(move |i| &mut self.vars[i])
    }

    /// Every edge ever created, in creation order.
    pub fn vars(&self) -> impl Iterator<Item = &DagVar> + '_ {
        self.vars.iter()
    }

    fn var_index(&self, id: DagVarId) -> Option<usize> {
        let index = (id.0 as usize).checked_sub(1)?;
        (index < self.vars.len()).then_some(index)
    }

    fn gen_var_id(&self) -> DagVarId {
        DagVarId(self.vars.len() as u32 + 1)
    }

    /// Create an edge produced by a new output slot of `node`.
    pub fn new_output(&mut self, node: NodeId, kind: VarKind) -> Result<DagVarId> {
        let id = self.gen_var_id();
        let outputs = self.require_mut(node)?.outputs_mut(kind);
        let slot = outputs.len();
        outputs.push(Some(id));
        self.vars.push(DagVar {
            id,
            kind,
            from: Endpoint::new(node, slot),
            to: Vec::new(),
            var_id: VarId::UNASSIGNED,
        });
        Ok(id)
    }

    /// Create a stream produced by `node`.
    pub fn new_output_stream(&mut self, node: NodeId) -> Result<DagVarId> {
        self.new_output(node, VarKind::Stream)
    }

    /// Create a value produced by `node`.
    pub fn new_output_value(&mut self, node: NodeId) -> Result<DagVarId> {
        self.new_output(node, VarKind::Value)
    }

    /// Feed `var` into input `slot` of `node` (of the slot vector matching
    /// the edge's kind), growing the slot vector if needed.
    ///
    /// An input slot has exactly one producer; connecting an occupied slot
    /// is an error.
    pub fn connect(&mut self, var: DagVarId, node: NodeId, slot: usize) -> Result<()> {
        let kind = self
            .var(var)
            .ok_or_else(|| SwitchError::InvalidTopology {
                cause: format!("edge {} does not exist", var),
            })?
            .kind;

        let target = self.require_mut(node)?;
        let inputs = target.inputs_mut(kind);
        if inputs.len() <= slot {
            inputs.resize(slot + 1, None);
        }
        let current = inputs[slot];
        match current {
            Some(existing) if existing == var => return Ok(()),
            Some(existing) => {
                return Err(SwitchError::InvalidTopology {
                    cause: format!(
                        "{} input slot {} already fed by {}",
                        target.describe(),
                        slot,
                        existing
                    ),
                });
            }
            None => inputs[slot] = Some(var),
        }

        if let Some(v) = self.var_mut(var) {
            v.to.push(Endpoint::new(node, slot));
        }
        Ok(())
    }

    /// Feed `var` into a new input slot of `node`, returning the slot index.
    pub fn add_input(&mut self, var: DagVarId, node: NodeId) -> Result<usize> {
        let kind = self
            .var(var)
            .ok_or_else(|| SwitchError::InvalidTopology {
                cause: format!("edge {} does not exist", var),
            })?
            .kind;
        let slot = self.require(node)?.inputs(kind).len();
        self.connect(var, node, slot)?;
        Ok(slot)
    }

    /// Empty input `slot` of `node`, returning the edge that fed it.
    pub fn disconnect(&mut self, node: NodeId, kind: VarKind, slot: usize) -> Option<DagVarId> {
        let var = self.node_mut(node)?.inputs_mut(kind).get_mut(slot)?.take()?;
        if let Some(v) = self.var_mut(var) {
            let endpoint = Endpoint::new(node, slot);
            v.to.retain(|e| *e != endpoint);
        }
        Some(var)
    }

    /// Re-point consumer `endpoint` of `from` at edge `to`.
    pub(crate) fn move_consumer(
        &mut self,
        from: DagVarId,
        endpoint: Endpoint,
        to: DagVarId,
    ) -> Result<()> {
        let kind = self
            .var(from)
            .ok_or_else(|| SwitchError::InvalidTopology {
                cause: format!("edge {} does not exist", from),
            })?
            .kind;
        self.disconnect(endpoint.node, kind, endpoint.slot);
        self.connect(to, endpoint.node, endpoint.slot)
    }

    /// Visit the nodes present when the walk starts, stopping early when `f`
    /// returns `false`.
    ///
    /// `f` may add and remove nodes. Added nodes are not visited by this walk;
    /// removed nodes are skipped.
    pub fn walk<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Graph, NodeId) -> bool,
    {
        let len = self.order.len();
        self.walk_depth += 1;
        for i in 0..len {
            let Some(id) = self.order.get(i).copied().flatten() else {
                continue;
            };
            if !f(self, id) {
                break;
            }
        }
        self.walk_depth -= 1;
        if self.walk_depth == 0 {
            self.order.retain(Option::is_some);
        }
    }

    /// Render nodes, environments and edges for debugging.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for node in self.nodes() {
            let _ = writeln!(
                out,
                "{} {} @{}{}",
                node.id(),
                node.kind().name(),
                node.env(),
                if node.is_pinned() { " (pinned)" } else { "" }
            );
            for (label, slots) in [
                ("in stream", node.input_streams()),
                ("in value", node.input_values()),
            ] {
                for (slot, var) in slots.iter().enumerate() {
                    match var {
                        Some(v) => {
                            let _ = writeln!(out, "  {} {}: {}", label, slot, v);
                        }
                        None => {
                            let _ = writeln!(out, "  {} {}: <unconnected>", label, slot);
                        }
                    }
                }
            }
            for (label, slots) in [
                ("out stream", node.output_streams()),
                ("out value", node.output_values()),
            ] {
                for (slot, var) in slots.iter().enumerate() {
                    let Some(var) = var.and_then(|v| self.var(v)) else {
                        continue;
                    };
                    let targets: Vec<String> = var.to.iter().map(ToString::to_string).collect();
                    let _ = write!(out, "  {} {}: {}", label, slot, var.id);
                    if var.var_id.is_assigned() {
                        let _ = write!(out, " ({})", var.var_id);
                    }
                    let _ = writeln!(out, " -> [{}]", targets.join(", "));
                }
            }
        }
        out
    }
}

/// Constructors for the built-in node kinds.
///
/// Nodes consuming an existing edge start in the producer's environment
/// (unpinned); driver ingress/egress nodes are pinned to the driver.
impl Graph {
    fn producer_env(&self, var: DagVarId) -> Result<NodeEnv> {
        let from = self
            .var(var)
            .ok_or_else(|| SwitchError::InvalidTopology {
                cause: format!("edge {} does not exist", var),
            })?
            .from;
        Ok(self.require(from.node)?.env.clone())
    }

    fn add_consumer(&mut self, kind: NodeKind, input: DagVarId) -> Result<NodeId> {
        let env = self.producer_env(input)?;
        let id = self.add_node(kind);
        self.set_env(id, env)?;
        self.add_input(input, id)?;
        Ok(id)
    }

    /// A stream the application writes through the driver.
    pub fn from_driver(&mut self, handle: DriverWriteStream) -> Result<(NodeId, DagVarId)> {
        let id = self.add_pinned(NodeKind::FromDriver(handle), NodeEnv::Driver);
        let out = self.new_output_stream(id)?;
        Ok((id, out))
    }

    /// A stream the application reads through the driver.
    pub fn to_driver(&mut self, handle: DriverReadStream, input: DagVarId) -> Result<NodeId> {
        let id = self.add_pinned(NodeKind::ToDriver(handle), NodeEnv::Driver);
        self.add_input(input, id)?;
        Ok(id)
    }

    /// A signal the application raises through the driver.
    pub fn driver_signal(&mut self, handle: DriverSignal) -> Result<(NodeId, DagVarId)> {
        let id = self.add_pinned(NodeKind::DriverSignal(handle), NodeEnv::Driver);
        let out = self.new_output_value(id)?;
        Ok((id, out))
    }

    /// Discard a stream.
    pub fn drop_stream(&mut self, input: DagVarId) -> Result<NodeId> {
        self.add_consumer(NodeKind::Drop, input)
    }

    /// Record a value in the driver's result store.
    pub fn store(&mut self, input: DagVarId, key: impl Into<String>) -> Result<NodeId> {
        let id = self.add_pinned(NodeKind::Store { key: key.into() }, NodeEnv::Driver);
        self.add_input(input, id)?;
        Ok(id)
    }

    /// A constant produced in `env`.
    pub fn const_value(&mut self, value: ScalarValue, env: NodeEnv) -> Result<(NodeId, DagVarId)> {
        let id = self.add_node(NodeKind::ConstValue { value });
        self.set_env(id, env)?;
        let out = self.new_output_value(id)?;
        Ok((id, out))
    }

    /// Republish a stream with a signal raised when it becomes available.
    ///
    /// Returns the node, the republished stream and the signal.
    pub fn on_stream_begin(&mut self, input: DagVarId) -> Result<(NodeId, DagVarId, DagVarId)> {
        let id = self.add_consumer(NodeKind::OnStreamBegin, input)?;
        let out = self.new_output_stream(id)?;
        let signal = self.new_output_value(id)?;
        Ok((id, out, signal))
    }

    /// Republish a stream with a signal raised once it was read to EOF.
    ///
    /// Returns the node, the republished stream and the signal.
    pub fn on_stream_end(&mut self, input: DagVarId) -> Result<(NodeId, DagVarId, DagVarId)> {
        let id = self.add_consumer(NodeKind::OnStreamEnd, input)?;
        let out = self.new_output_stream(id)?;
        let signal = self.new_output_value(id)?;
        Ok((id, out, signal))
    }

    /// Copy a value to `count` independent edges.
    pub fn broadcast(&mut self, input: DagVarId, count: usize) -> Result<(NodeId, Vec<DagVarId>)> {
        let id = self.add_consumer(NodeKind::Broadcast, input)?;
        let outs = (0..count)
            .map(|_| self.new_output_value(id))
            .collect::<Result<Vec<_>>>()?;
        Ok((id, outs))
    }

    /// Add an application-defined node in `env`.
    pub fn custom(&mut self, node: impl CustomNode + 'static, env: NodeEnv) -> Result<NodeId> {
        let id = self.add_node(NodeKind::Custom(Box::new(node)));
        self.set_env(id, env)?;
        Ok(id)
    }
}
