//! In-process transport.

use super::{Transport, TransportFuture};
use crate::exec::Worker;
use crate::plan::Plan;
use ioswitch_core::error::{Result, SwitchError};
use ioswitch_core::{ByteStream, PlanId, ScalarValue, VarId, WorkerInfo};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

/// Transport that calls straight into workers living in this process.
///
/// Workers are held weakly; a dropped worker becomes unreachable. By default
/// plans are encoded to JSON and decoded again on dispatch, so a plan that
/// runs locally is known to survive the wire.
pub struct LocalTransport {
    workers: RwLock<HashMap<WorkerInfo, Weak<Worker>>>,
    encode_plans: bool,
}

impl LocalTransport {
    /// Create a transport with no reachable workers.
    pub fn new() -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            encode_plans: true,
        }
    }

    /// Pass plans to workers as-is instead of round-tripping them through
    /// the wire format.
    pub fn without_plan_encoding(mut self) -> Self {
        self.encode_plans = false;
        self
    }

    /// Make `worker` reachable under its descriptor.
    pub fn register(&self, worker: &Arc<Worker>) {
        self.workers
            .write()
            .insert(worker.info().clone(), Arc::downgrade(worker));
    }

    /// Make a worker unreachable.
    pub fn unregister(&self, info: &WorkerInfo) {
        self.workers.write().remove(info);
    }

    fn worker(&self, info: &WorkerInfo) -> Result<Arc<Worker>> {
        self.workers
            .read()
            .get(info)
            .and_then(Weak::upgrade)
            .ok_or_else(|| SwitchError::WorkerNotFound {
                worker: info.to_string(),
            })
    }

    fn prepare(&self, plan: Plan) -> Result<Plan> {
        if !self.encode_plans {
            return Ok(plan);
        }
        Plan::from_json(&plan.to_json()?)
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransport")
            .field("workers", &self.workers.read().len())
            .field("encode_plans", &self.encode_plans)
            .finish()
    }
}

impl Transport for LocalTransport {
    fn execute_plan<'a>(
        &'a self,
        worker: &'a WorkerInfo,
        plan: Plan,
        cancel: CancellationToken,
    ) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let target = self.worker(worker)?;
            let plan = self.prepare(plan)?;
            let store = target.serve_execute_plan(plan, cancel).await?;
            if !store.is_empty() {
                tracing::debug!(
                    worker = %worker,
                    keys = store.len(),
                    "Discarding worker-side result store"
                );
            }
            Ok(())
        })
    }

    fn send_stream<'a>(
        &'a self,
        worker: &'a WorkerInfo,
        plan_id: PlanId,
        var_id: VarId,
        stream: ByteStream,
        cancel: CancellationToken,
    ) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.worker(worker)?
                .serve_send_stream(plan_id, var_id, stream, cancel)
                .await
        })
    }

    fn send_value<'a>(
        &'a self,
        worker: &'a WorkerInfo,
        plan_id: PlanId,
        var_id: VarId,
        value: ScalarValue,
        cancel: CancellationToken,
    ) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.worker(worker)?
                .serve_send_value(plan_id, var_id, value, cancel)
                .await
        })
    }

    fn get_stream<'a>(
        &'a self,
        worker: &'a WorkerInfo,
        plan_id: PlanId,
        target: VarId,
        signal: VarId,
        signal_value: ScalarValue,
        cancel: CancellationToken,
    ) -> TransportFuture<'a, ByteStream> {
        Box::pin(async move {
            self.worker(worker)?
                .serve_get_stream(plan_id, target, signal, signal_value, cancel)
                .await
        })
    }

    fn get_value<'a>(
        &'a self,
        worker: &'a WorkerInfo,
        plan_id: PlanId,
        target: VarId,
        signal: VarId,
        signal_value: ScalarValue,
        cancel: CancellationToken,
    ) -> TransportFuture<'a, ScalarValue> {
        Box::pin(async move {
            self.worker(worker)?
                .serve_get_value(plan_id, target, signal, signal_value, cancel)
                .await
        })
    }
}
