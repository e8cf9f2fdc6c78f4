//! Accumulates ops per environment and allocates runtime variable IDs.

use super::{GeneratedPlans, Plan};
use crate::dag::NodeEnv;
use crate::ops::Op;
use ioswitch_core::error::{Result, SwitchError};
use ioswitch_core::{PlanId, VarId, WorkerInfo};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Collects the ops of every environment of one execution.
///
/// Variable IDs are allocated here, once for the whole execution, so a
/// variable has the same ID in every plan that mentions it.
#[derive(Debug, Default)]
pub struct PlanBuilder {
    last_var: u32,
    driver: Vec<Arc<dyn Op>>,
    workers: BTreeMap<WorkerInfo, Vec<Arc<dyn Op>>>,
}

impl PlanBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh runtime variable ID.
    pub fn new_var_id(&mut self) -> VarId {
        self.last_var += 1;
        VarId::new(self.last_var)
    }

    /// Ops for the driver.
    pub fn at_driver(&mut self) -> EnvPlanBuilder<'_> {
        EnvPlanBuilder {
            ops: &mut self.driver,
        }
    }

    /// Ops for `worker`.
    pub fn at_worker(&mut self, worker: &WorkerInfo) -> EnvPlanBuilder<'_> {
        EnvPlanBuilder {
            ops: self.workers.entry(worker.clone()).or_default(),
        }
    }

    pub(crate) fn at_env(&mut self, env: &NodeEnv) -> Result<EnvPlanBuilder<'_>> {
        match env {
            NodeEnv::Driver => Ok(self.at_driver()),
            NodeEnv::Worker(worker) => Ok(self.at_worker(worker)),
            NodeEnv::Unknown => Err(SwitchError::UnresolvedEnv {
                node: "<plan builder target>".to_string(),
            }),
        }
    }

    /// Finish, producing one plan per environment that received ops.
    ///
    /// The driver plan always exists, even if empty.
    pub fn build(self, plan_id: PlanId) -> GeneratedPlans {
        let workers = self
            .workers
            .into_iter()
            .filter(|(_, ops)| !ops.is_empty())
            .map(|(worker, ops)| (worker, Plan { id: plan_id, ops }))
            .collect();
        GeneratedPlans {
            driver: Plan {
                id: plan_id,
                ops: self.driver,
            },
            workers,
        }
    }
}

/// Op list of a single environment, borrowed from a [`PlanBuilder`].
#[derive(Debug)]
pub struct EnvPlanBuilder<'a> {
    ops: &'a mut Vec<Arc<dyn Op>>,
}

impl EnvPlanBuilder<'_> {
    /// Append an op.
    pub fn add_op(&mut self, op: impl Op) -> &mut Self {
        self.ops.push(Arc::new(op));
        self
    }

    /// Append an already boxed op.
    pub fn add_boxed(&mut self, op: Box<dyn Op>) -> &mut Self {
        self.ops.push(Arc::from(op));
        self
    }
}
