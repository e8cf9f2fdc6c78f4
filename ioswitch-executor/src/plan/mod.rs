//! Plans and plan generation.
//!
//! A [`Plan`] is the unit shipped to one process: the shared plan ID plus an
//! ordered list of ops. Generation runs in two passes over a
//! [`Graph`](crate::dag::Graph):
//!
//! 1. [`insert_transfers`] rewrites every edge that crosses an environment
//!    boundary. Driver-bound edges get a `HoldUntil` on the producing worker
//!    and a `Get` on the driver; everything else gets a `Send` on the
//!    producing side.
//! 2. [`build_plan`] assigns runtime variable IDs and lowers every node into
//!    the op list of its environment.

mod builder;
mod generator;

pub use builder::{EnvPlanBuilder, PlanBuilder};
pub use generator::{build_plan, generate, insert_transfers};

use crate::ops::{codec, Op, OpRegistry};
use ioswitch_core::error::Result;
use ioswitch_core::{PlanId, WorkerInfo};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Ops for one process, tagged with the execution's plan ID.
///
/// Serializes as `{"id": .., "ops": [{"type": <kind>, ..fields}]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Shared by every leg of one execution.
    pub id: PlanId,
    /// Ops, all started concurrently.
    #[serde(with = "codec::list")]
    pub ops: Vec<Arc<dyn Op>>,
}

impl Plan {
    /// Create an empty plan.
    pub fn new(id: PlanId) -> Self {
        Self {
            id,
            ops: Vec::new(),
        }
    }

    /// Append an op.
    pub fn push(&mut self, op: impl Op) {
        self.ops.push(Arc::new(op));
    }

    /// Number of ops.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the plan has no ops.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Kind tags of the ops, in order.
    pub fn op_kinds(&self) -> Vec<&'static str> {
        self.ops.iter().map(|op| op.kind()).collect()
    }

    /// Encode to the JSON wire format.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from the JSON wire format using the process-wide op registry.
    pub fn from_json(json: &str) -> Result<Plan> {
        Ok(serde_json::from_str(json)?)
    }

    /// Decode from the JSON wire format using a specific registry.
    pub fn from_json_with(registry: &OpRegistry, json: &str) -> Result<Plan> {
        #[derive(Deserialize)]
        struct RawPlan {
            id: PlanId,
            ops: Vec<serde_json::Value>,
        }

        let raw: RawPlan = serde_json::from_str(json)?;
        let ops = raw
            .ops
            .into_iter()
            .map(|value| registry.decode(value).map(Arc::from))
            .collect::<Result<Vec<Arc<dyn Op>>>>()?;
        Ok(Plan { id: raw.id, ops })
    }
}

/// The per-process plans of one execution.
#[derive(Debug, Clone)]
pub struct GeneratedPlans {
    /// Plan run by the driver itself.
    pub driver: Plan,
    /// Plans dispatched to workers, ordered by worker.
    pub workers: Vec<(WorkerInfo, Plan)>,
}

impl GeneratedPlans {
    /// ID shared by every plan.
    pub fn plan_id(&self) -> PlanId {
        self.driver.id
    }

    /// The plan for `worker`, if it has one.
    pub fn worker(&self, worker: &WorkerInfo) -> Option<&Plan> {
        self.workers
            .iter()
            .find(|(w, _)| w == worker)
            .map(|(_, plan)| plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{ConstValue, SendStream, Store};
    use ioswitch_core::{ScalarValue, VarId};

    #[test]
    fn plan_json_envelope() {
        let mut plan = Plan::new(PlanId::new());
        plan.push(ConstValue {
            output: VarId::new(1),
            value: ScalarValue::string("abc"),
        });
        plan.push(SendStream {
            input: VarId::new(2),
            send: VarId::new(3),
            worker: WorkerInfo::new(4, "10.0.0.4:5010"),
        });

        let json = plan.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["id"], plan.id.as_uuid().to_string());
        assert_eq!(value["ops"][0]["type"], "const_value");
        assert_eq!(value["ops"][1]["type"], "send_stream");
        assert_eq!(value["ops"][1]["worker"]["id"], 4);

        let back = Plan::from_json(&json).unwrap();
        assert_eq!(back.id, plan.id);
        assert_eq!(back.op_kinds(), vec!["const_value", "send_stream"]);
    }

    #[test]
    fn scoped_registry_rejects_unregistered_kinds() {
        let mut plan = Plan::new(PlanId::new());
        plan.push(Store {
            var: VarId::new(1),
            key: "k".to_string(),
        });
        let json = plan.to_json().unwrap();

        let err = Plan::from_json_with(&OpRegistry::new(), &json).unwrap_err();
        assert_eq!(err.code(), "E802");

        let decoded = Plan::from_json_with(&OpRegistry::with_builtins(), &json).unwrap();
        assert_eq!(decoded.len(), 1);
    }
}
