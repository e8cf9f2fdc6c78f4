//! Transfer insertion and lowering.

use super::PlanBuilder;
use crate::dag::{DagVarId, Endpoint, Graph, Node, NodeEnv, NodeId, NodeKind};
use crate::ops::{
    Broadcast, ConstValue, DropStream, GetStream, GetValue, HoldUntil, OnStreamBegin, OnStreamEnd,
    Op, SendStream, SendValue, Store,
};
use ioswitch_core::error::{Result, SwitchError};
use ioswitch_core::{VarKind, WorkerInfo};
use tracing::instrument;

/// Rewrite the graph, then lower it into `builder`.
#[instrument(skip_all, fields(nodes = graph.len()))]
pub fn generate(graph: &mut Graph, builder: &mut PlanBuilder) -> Result<()> {
    insert_transfers(graph)?;
    build_plan(graph, builder)
}

/// Insert transfer and barrier nodes on every edge crossing an environment
/// boundary.
///
/// For each produced edge, consumers are grouped by environment and every
/// foreign group is served by one transfer:
/// - a driver group behind a worker producer gets a `HoldUntil` on the
///   producer's worker plus a `Get` on the driver whose signal releases the
///   hold;
/// - any other foreign group (a different worker, or any worker when the
///   producer is the driver) gets a `Send` on the producer's side.
///
/// Transfer nodes are never rewritten themselves, so running the pass again
/// changes nothing.
pub fn insert_transfers(graph: &mut Graph) -> Result<()> {
    let mut failure = None;
    let before = graph.len();
    graph.walk(|g, id| match rewrite_node(g, id) {
        Ok(()) => true,
        Err(e) => {
            failure = Some(e);
            false
        }
    });
    if let Some(e) = failure {
        return Err(e);
    }
    tracing::debug!(inserted = graph.len() - before, "Inserted transfer nodes");
    Ok(())
}

fn rewrite_node(graph: &mut Graph, id: NodeId) -> Result<()> {
    let Some(node) = graph.node(id) else {
        return Ok(());
    };
    if node.kind().is_transfer() {
        return Ok(());
    }
    let env = node.env().clone();
    let outputs: Vec<DagVarId> = node.outputs().collect();
    for var in outputs {
        rewrite_edge(graph, id, &env, var)?;
    }
    Ok(())
}

fn rewrite_edge(graph: &mut Graph, producer: NodeId, env: &NodeEnv, var: DagVarId) -> Result<()> {
    let Some(edge) = graph.var(var) else {
        return Ok(());
    };
    let kind = edge.kind;

    let mut groups: Vec<(NodeEnv, Vec<Endpoint>)> = Vec::new();
    for consumer in edge.to.clone() {
        let Some(node) = graph.node(consumer.node) else {
            continue;
        };
        let target = node.env();
        if target == env {
            continue;
        }
        if *target == NodeEnv::Unknown {
            return Err(SwitchError::UnresolvedEnv {
                node: node.describe(),
            });
        }
        if *env == NodeEnv::Unknown {
            let node = graph.node(producer).map(Node::describe).unwrap_or_default();
            return Err(SwitchError::UnresolvedEnv { node });
        }
        match groups.iter_mut().find(|(e, _)| e == target) {
            Some((_, endpoints)) => endpoints.push(consumer),
            None => groups.push((target.clone(), vec![consumer])),
        }
    }

    for (target, endpoints) in groups {
        match (env, &target) {
            (NodeEnv::Worker(source), NodeEnv::Driver) => {
                insert_pull(graph, source, var, kind, &endpoints)?
            }
            (_, NodeEnv::Worker(dest)) => insert_push(graph, env, dest, var, kind, &endpoints)?,
            _ => {
                return Err(SwitchError::InvalidTopology {
                    cause: format!("no transfer from {} to {}", env, target),
                });
            }
        }
    }
    Ok(())
}

fn insert_push(
    graph: &mut Graph,
    env: &NodeEnv,
    dest: &WorkerInfo,
    var: DagVarId,
    kind: VarKind,
    consumers: &[Endpoint],
) -> Result<()> {
    let node_kind = match kind {
        VarKind::Stream => NodeKind::SendStream { to: dest.clone() },
        VarKind::Value => NodeKind::SendValue { to: dest.clone() },
    };
    let send = graph.add_pinned(node_kind, env.clone());
    graph.add_input(var, send)?;
    let remote = graph.new_output(send, kind)?;
    for consumer in consumers {
        graph.move_consumer(var, *consumer, remote)?;
    }
    tracing::debug!(var = %var, from = %env, to = %dest, "Inserted send");
    Ok(())
}

fn insert_pull(
    graph: &mut Graph,
    source: &WorkerInfo,
    var: DagVarId,
    kind: VarKind,
    consumers: &[Endpoint],
) -> Result<()> {
    let hold = graph.add_pinned(
        NodeKind::HoldUntil { waits: 1 },
        NodeEnv::Worker(source.clone()),
    );
    // Input value 0 is the wait signal, wired once the Get exists.
    let held_slot = match kind {
        VarKind::Stream => 0,
        VarKind::Value => 1,
    };
    graph.connect(var, hold, held_slot)?;
    let released = graph.new_output(hold, kind)?;

    let get_kind = match kind {
        VarKind::Stream => NodeKind::GetStream {
            from: source.clone(),
        },
        VarKind::Value => NodeKind::GetValue {
            from: source.clone(),
        },
    };
    let get = graph.add_pinned(get_kind, NodeEnv::Driver);
    graph.add_input(released, get)?;
    let received = graph.new_output(get, kind)?;
    let signal = graph.new_output_value(get)?;
    graph.connect(signal, hold, 0)?;

    for consumer in consumers {
        graph.move_consumer(var, *consumer, received)?;
    }
    tracing::debug!(var = %var, from = %source, "Inserted hold and get");
    Ok(())
}

/// Assign runtime IDs to every edge and lower every node into `builder`.
///
/// Fails on unresolved environments, unconnected inputs, and edges bound by
/// more than one consumer (a runtime variable is bound exactly once; use a
/// broadcast to copy values).
pub fn build_plan(graph: &mut Graph, builder: &mut PlanBuilder) -> Result<()> {
    validate(graph)?;

    let unassigned: Vec<DagVarId> = graph
        .vars()
        .filter(|v| !v.var_id.is_assigned() && graph.node(v.from.node).is_some())
        .map(|v| v.id)
        .collect();
    for id in unassigned {
        let var_id = builder.new_var_id();
        if let Some(var) = graph.var_mut(id) {
            var.var_id = var_id;
        }
    }

    for node in graph.nodes() {
        if let Some(op) = lower_node(node, graph)? {
            builder.at_env(node.env())?.add_boxed(op);
        }
    }
    Ok(())
}

fn validate(graph: &Graph) -> Result<()> {
    for node in graph.nodes() {
        if *node.env() == NodeEnv::Unknown {
            return Err(SwitchError::UnresolvedEnv {
                node: node.describe(),
            });
        }
        for slots in [node.input_streams(), node.input_values()] {
            if let Some(slot) = slots.iter().position(Option::is_none) {
                return Err(SwitchError::UnconnectedInput {
                    node: node.describe(),
                    slot,
                });
            }
        }
    }

    for var in graph.vars() {
        if graph.node(var.from.node).is_none() {
            continue;
        }
        if var.to.len() > 1 {
            return Err(SwitchError::FanOut {
                var: var.id.to_string(),
                consumers: var.to.len(),
            });
        }
        if var.to.is_empty() && var.kind == VarKind::Stream {
            tracing::warn!(var = %var.id, "Stream has no consumer; its producer may never finish");
        }
    }
    Ok(())
}

fn lower_node(node: &Node, graph: &Graph) -> Result<Option<Box<dyn Op>>> {
    let op: Box<dyn Op> = match node.kind() {
        NodeKind::FromDriver(handle) => {
            handle.resolve(node.output_stream_var(graph, 0)?);
            return Ok(None);
        }
        NodeKind::ToDriver(handle) => {
            handle.resolve(node.input_stream_var(graph, 0)?);
            return Ok(None);
        }
        NodeKind::DriverSignal(handle) => {
            handle.resolve(node.output_value_var(graph, 0)?);
            return Ok(None);
        }
        NodeKind::Drop => Box::new(DropStream {
            input: node.input_stream_var(graph, 0)?,
        }),
        NodeKind::SendStream { to } => Box::new(SendStream {
            input: node.input_stream_var(graph, 0)?,
            send: node.output_stream_var(graph, 0)?,
            worker: to.clone(),
        }),
        NodeKind::SendValue { to } => Box::new(SendValue {
            input: node.input_value_var(graph, 0)?,
            send: node.output_value_var(graph, 0)?,
            worker: to.clone(),
        }),
        NodeKind::GetStream { from } => Box::new(GetStream {
            target: node.input_stream_var(graph, 0)?,
            signal: node.output_value_var(graph, 0)?,
            output: node.output_stream_var(graph, 0)?,
            worker: from.clone(),
        }),
        NodeKind::GetValue { from } => Box::new(GetValue {
            target: node.input_value_var(graph, 0)?,
            signal: node.output_value_var(graph, 1)?,
            output: node.output_value_var(graph, 0)?,
            worker: from.clone(),
        }),
        NodeKind::Store { key } => Box::new(Store {
            var: node.input_value_var(graph, 0)?,
            key: key.clone(),
        }),
        NodeKind::ConstValue { value } => Box::new(ConstValue {
            output: node.output_value_var(graph, 0)?,
            value: value.clone(),
        }),
        NodeKind::OnStreamBegin => Box::new(OnStreamBegin {
            input: node.input_stream_var(graph, 0)?,
            output: node.output_stream_var(graph, 0)?,
            signal: node.output_value_var(graph, 0)?,
        }),
        NodeKind::OnStreamEnd => Box::new(OnStreamEnd {
            input: node.input_stream_var(graph, 0)?,
            output: node.output_stream_var(graph, 0)?,
            signal: node.output_value_var(graph, 0)?,
        }),
        NodeKind::HoldUntil { waits } => Box::new(lower_hold(node, graph, *waits)?),
        NodeKind::Broadcast => Box::new(Broadcast {
            source: node.input_value_var(graph, 0)?,
            targets: (0..node.output_values().len())
                .map(|slot| node.output_value_var(graph, slot))
                .collect::<Result<_>>()?,
        }),
        NodeKind::Custom(custom) => return custom.generate_op(node, graph),
    };
    Ok(Some(op))
}

fn lower_hold(node: &Node, graph: &Graph, waits: usize) -> Result<HoldUntil> {
    let wait_ids = (0..waits)
        .map(|slot| node.input_value_var(graph, slot))
        .collect::<Result<Vec<_>>>()?;

    let mut holds = Vec::new();
    let mut emits = Vec::new();
    for slot in 0..node.input_streams().len() {
        holds.push(node.input_stream_var(graph, slot)?);
        emits.push(node.output_stream_var(graph, slot)?);
    }
    for slot in waits..node.input_values().len() {
        holds.push(node.input_value_var(graph, slot)?);
        emits.push(node.output_value_var(graph, slot - waits)?);
    }

    Ok(HoldUntil {
        waits: wait_ids,
        holds,
        emits,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{DriverReadStream, DriverWriteStream};
    use ioswitch_core::{PlanId, ScalarValue};

    fn worker(id: u64) -> WorkerInfo {
        WorkerInfo::new(id, format!("10.0.0.{}:5010", id))
    }

    fn count(graph: &Graph, name: &str) -> usize {
        graph.nodes().filter(|n| n.kind().name() == name).count()
    }

    #[test]
    fn worker_to_driver_value_gets_hold_and_get() {
        let mut graph = Graph::new();
        let (_, v) = graph
            .const_value(ScalarValue::Int(5), NodeEnv::Worker(worker(1)))
            .unwrap();
        let store = graph.store(v, "out").unwrap();

        insert_transfers(&mut graph).unwrap();
        assert_eq!(count(&graph, "hold_until"), 1);
        assert_eq!(count(&graph, "get_value"), 1);
        assert_eq!(count(&graph, "send_value"), 0);

        let hold = graph
            .nodes()
            .find(|n| n.kind().name() == "hold_until")
            .unwrap();
        assert_eq!(hold.env(), &NodeEnv::Worker(worker(1)));
        assert!(hold.is_pinned());
        assert_eq!(hold.input_values().len(), 2);

        // The store now reads what the Get received, in its own environment.
        let fed_by = graph.node(store).unwrap().input_values()[0].unwrap();
        let producer = graph.var(fed_by).unwrap().from.node;
        assert_eq!(graph.node(producer).unwrap().kind().name(), "get_value");
        assert_eq!(graph.node(producer).unwrap().env(), &NodeEnv::Driver);
    }

    #[test]
    fn driver_to_worker_stream_gets_send() {
        let mut graph = Graph::new();
        let (_, s) = graph.from_driver(DriverWriteStream::new()).unwrap();
        let drop = graph.drop_stream(s).unwrap();
        graph.pin_env(drop, NodeEnv::Worker(worker(2))).unwrap();

        insert_transfers(&mut graph).unwrap();
        assert_eq!(count(&graph, "send_stream"), 1);
        assert_eq!(count(&graph, "get_stream"), 0);
        assert_eq!(count(&graph, "hold_until"), 0);
    }

    #[test]
    fn consumers_in_one_env_share_a_transfer() {
        let mut graph = Graph::new();
        let (_, v) = graph
            .const_value(ScalarValue::Int(1), NodeEnv::Worker(worker(1)))
            .unwrap();
        for env in [worker(2), worker(2), worker(3)] {
            let (b, _) = graph.broadcast(v, 0).unwrap();
            graph.pin_env(b, NodeEnv::Worker(env)).unwrap();
        }

        insert_transfers(&mut graph).unwrap();
        let sends: Vec<_> = graph
            .nodes()
            .filter(|n| n.kind().name() == "send_value")
            .collect();
        assert_eq!(sends.len(), 2);

        // Both worker2 consumers now read the single transferred edge.
        let to_worker2 = sends
            .iter()
            .find(|n| matches!(n.kind(), NodeKind::SendValue { to } if *to == worker(2)))
            .unwrap();
        let out = to_worker2.output_values()[0].unwrap();
        assert_eq!(graph.var(out).unwrap().to.len(), 2);
        // The original edge only feeds the two sends now.
        assert_eq!(graph.var(v).unwrap().to.len(), 2);
    }

    #[test]
    fn rewrite_is_idempotent() {
        let mut graph = Graph::new();
        let (_, v) = graph
            .const_value(ScalarValue::Int(5), NodeEnv::Worker(worker(1)))
            .unwrap();
        graph.store(v, "out").unwrap();
        let (_, s) = graph.from_driver(DriverWriteStream::new()).unwrap();
        let d = graph.drop_stream(s).unwrap();
        graph.pin_env(d, NodeEnv::Worker(worker(2))).unwrap();

        insert_transfers(&mut graph).unwrap();
        let first = graph.dump();
        let nodes = graph.len();

        insert_transfers(&mut graph).unwrap();
        assert_eq!(graph.len(), nodes);
        assert_eq!(graph.dump(), first);
    }

    #[test]
    fn unknown_env_is_rejected() {
        let mut graph = Graph::new();
        let (_, v) = graph
            .const_value(ScalarValue::Int(5), NodeEnv::Unknown)
            .unwrap();
        graph.store(v, "out").unwrap();

        let err = insert_transfers(&mut graph).unwrap_err();
        assert_eq!(err.code(), "E101");
        assert!(err.is_plan_error());
    }

    #[test]
    fn lowering_shares_var_ids_across_slots() {
        let mut graph = Graph::new();
        let read = DriverReadStream::new();
        let (_, s) = graph.from_driver(DriverWriteStream::new()).unwrap();
        let (begin, out, signal) = graph.on_stream_begin(s).unwrap();
        graph.pin_env(begin, NodeEnv::Worker(worker(1))).unwrap();
        graph.to_driver(read.clone(), out).unwrap();
        graph.store(signal, "started").unwrap();

        let mut builder = PlanBuilder::new();
        generate(&mut graph, &mut builder).unwrap();

        for var in graph.vars() {
            assert!(var.var_id.is_assigned(), "{} unassigned", var.id);
            let from = graph.node(var.from.node).unwrap();
            let produced = match var.kind {
                VarKind::Stream => from.output_stream_var(&graph, var.from.slot),
                VarKind::Value => from.output_value_var(&graph, var.from.slot),
            }
            .unwrap();
            assert_eq!(produced, var.var_id);
            for to in &var.to {
                let consumer = graph.node(to.node).unwrap();
                let bound = match var.kind {
                    VarKind::Stream => consumer.input_stream_var(&graph, to.slot),
                    VarKind::Value => consumer.input_value_var(&graph, to.slot),
                }
                .unwrap();
                assert_eq!(bound, var.var_id);
            }
        }

        let ids: std::collections::HashSet<_> = graph.vars().map(|v| v.var_id).collect();
        assert_eq!(ids.len(), graph.vars().count());
        assert!(read.var_id().is_ok());
    }

    #[test]
    fn lowering_places_ops_per_env() {
        let mut graph = Graph::new();
        let (_, v) = graph
            .const_value(ScalarValue::Int(5), NodeEnv::Worker(worker(1)))
            .unwrap();
        graph.store(v, "out").unwrap();

        let mut builder = PlanBuilder::new();
        generate(&mut graph, &mut builder).unwrap();
        let plans = builder.build(PlanId::new());

        assert_eq!(plans.driver.op_kinds(), vec!["store", "get_value"]);
        assert_eq!(
            plans.worker(&worker(1)).unwrap().op_kinds(),
            vec!["const_value", "hold_until"]
        );
    }

    #[test]
    fn fan_out_is_rejected() {
        let mut graph = Graph::new();
        let (_, v) = graph
            .const_value(ScalarValue::Int(5), NodeEnv::Driver)
            .unwrap();
        graph.store(v, "a").unwrap();
        graph.store(v, "b").unwrap();

        let err = generate(&mut graph, &mut PlanBuilder::new()).unwrap_err();
        assert_eq!(err.code(), "E104");
    }

    #[test]
    fn unconnected_input_is_rejected() {
        let mut graph = Graph::new();
        let drop = graph.add_pinned(NodeKind::Drop, NodeEnv::Driver);
        let (src, s) = graph.from_driver(DriverWriteStream::new()).unwrap();
        graph.connect(s, drop, 0).unwrap();
        graph.remove_node(src);

        let err = build_plan(&mut graph, &mut PlanBuilder::new()).unwrap_err();
        assert_eq!(err.code(), "E103");
    }
}
