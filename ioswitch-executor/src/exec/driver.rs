//! Driver-side orchestration of one distributed execution.

use super::executor::{Executor, ResultStore};
use super::handles::{DriverReadStream, DriverSignal, DriverWriteStream};
use crate::plan::{GeneratedPlans, Plan};
use crate::transport::Transport;
use ioswitch_core::error::{Result, ResultExt, SwitchError};
use ioswitch_core::{ByteRange, ByteStream, PlanId, ScalarValue, SwitchConfig, VarValue, WorkerInfo};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, Instrument};

/// A running distributed execution, seen from the driver process.
///
/// Created by [`Driver::execute`], which immediately starts the driver's own
/// plan and dispatches every worker plan. The application then feeds and
/// drains the driver's ingress/egress variables through the handles it
/// attached to the graph, and collects the outcome with [`Driver::wait`].
pub struct Driver {
    plan_id: PlanId,
    executor: Arc<Executor>,
    cancel: CancellationToken,
    result: Mutex<Option<oneshot::Receiver<Result<ResultStore>>>>,
}

impl Driver {
    /// Start executing `plans`.
    ///
    /// Must be called from within a Tokio runtime. The first failure in any
    /// leg cancels every other leg; with a configured plan timeout the whole
    /// execution is cancelled once it elapses.
    #[instrument(
        skip_all,
        fields(plan_id = %plans.plan_id(), workers = plans.workers.len())
    )]
    pub fn execute(
        plans: GeneratedPlans,
        transport: Arc<dyn Transport>,
        config: Arc<SwitchConfig>,
    ) -> Self {
        let GeneratedPlans { driver, workers } = plans;
        let plan_id = driver.id;
        let cancel = CancellationToken::new();
        let executor = Executor::new(driver, &cancel);
        let (tx, rx) = oneshot::channel();

        tracing::info!(plan_id = %plan_id, legs = workers.len() + 1, "Execution started");

        let task = {
            let executor = Arc::clone(&executor);
            let cancel = cancel.clone();
            async move {
                let timeout = config.plan_timeout();
                let timeout_ms = config.plan_timeout_ms;
                let legs = run_legs(executor, workers, transport, config, cancel.clone());
                let result = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, legs).await {
                        Ok(result) => result,
                        Err(_) => Err(SwitchError::Timeout { timeout_ms }),
                    },
                    None => legs.await,
                };
                // Driver handles stay usable after a clean finish.
                if result.is_err() {
                    cancel.cancel();
                }

                match &result {
                    Ok(store) => {
                        tracing::info!(plan_id = %plan_id, results = store.len(), "Execution finished")
                    }
                    Err(e) => tracing::error!(plan_id = %plan_id, error = %e, "Execution failed"),
                }
                let _ = tx.send(result);
            }
        };
        tokio::spawn(task.in_current_span());

        Self {
            plan_id,
            executor,
            cancel,
            result: Mutex::new(Some(rx)),
        }
    }

    /// ID shared by every leg of this execution.
    pub fn plan_id(&self) -> PlanId {
        self.plan_id
    }

    /// Cancel every leg of the execution.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the execution was cancelled or failed.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the execution to finish.
    ///
    /// Resolves to the driver plan's result store, or to the first failure
    /// observed in any leg. Can be called once. Dropping the returned future
    /// before it resolves cancels the execution.
    pub async fn wait(&self) -> Result<ResultStore> {
        let rx = self.result.lock().take().ok_or(SwitchError::AlreadyWaited)?;
        let guard = self.cancel.clone().drop_guard();
        let result = rx.await;
        guard.disarm();
        result.map_err(|_| SwitchError::cancelled("driver task dropped"))?
    }

    /// Feed a stream into the plan, restricted to the handle's byte range.
    ///
    /// `stream` must start at offset 0 of the data the plan reads.
    pub fn begin_write(&self, handle: &DriverWriteStream, stream: ByteStream) -> Result<()> {
        let var_id = handle.var_id()?;
        self.executor
            .put_var(var_id, VarValue::Stream(stream.range(handle.range())))
    }

    /// Feed a stream that already covers only `stream_range` of the data.
    ///
    /// The handle's range must lie inside `stream_range`; the stream is cut
    /// down to the part the plan needs.
    pub fn begin_write_ranged(
        &self,
        handle: &DriverWriteStream,
        stream: ByteStream,
        stream_range: ByteRange,
    ) -> Result<()> {
        let var_id = handle.var_id()?;
        let relative = handle.range().relative_to(&stream_range)?;
        self.executor
            .put_var(var_id, VarValue::Stream(stream.range(relative)))
    }

    /// Take a stream produced by the plan.
    ///
    /// May be called before or after the stream is produced, including after
    /// [`Driver::wait`] has resolved successfully.
    pub async fn begin_read(&self, handle: &DriverReadStream) -> Result<ByteStream> {
        let var_id = handle.var_id()?;
        self.executor.bind_stream(&self.cancel, var_id).await
    }

    /// Raise a signal inside the plan.
    pub fn signal(&self, handle: &DriverSignal) -> Result<()> {
        let var_id = handle.var_id()?;
        self.executor
            .put_var(var_id, VarValue::Value(ScalarValue::Signal))
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("plan_id", &self.plan_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

async fn run_legs(
    executor: Arc<Executor>,
    workers: Vec<(WorkerInfo, Plan)>,
    transport: Arc<dyn Transport>,
    config: Arc<SwitchConfig>,
    cancel: CancellationToken,
) -> Result<ResultStore> {
    let mut legs: JoinSet<Result<Option<ResultStore>>> = JoinSet::new();

    for (worker, plan) in workers {
        let transport = Arc::clone(&transport);
        let cancel = cancel.clone();
        legs.spawn(async move {
            tracing::debug!(worker = %worker, plan_id = %plan.id, ops = plan.ops.len(), "Dispatching plan");
            transport
                .execute_plan(&worker, plan, cancel)
                .await
                .with_worker(&worker)
                .map(|()| None)
        });
    }
    {
        let executor = Arc::clone(&executor);
        legs.spawn(async move { executor.run(transport, config).await.map(Some) });
    }

    let mut store = None;
    let mut failure: Option<SwitchError> = None;
    while let Some(joined) = legs.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => continue,
            Err(_) => Err(SwitchError::OpPanic {
                plan_id: executor.plan_id(),
            }),
        };
        match result {
            Ok(Some(local)) => store = Some(local),
            Ok(None) => {}
            Err(err) => {
                if failure.is_none() {
                    tracing::warn!(error = %err, "Leg failed, cancelling execution");
                    cancel.cancel();
                    legs.abort_all();
                }
                let replace = match &failure {
                    None => true,
                    Some(prev) => prev.is_cancellation() && !err.is_cancellation(),
                };
                if replace {
                    failure = Some(err);
                }
            }
        }
    }

    match (failure, store) {
        (Some(err), _) => Err(err),
        (None, Some(store)) => Ok(store),
        (None, None) => Err(SwitchError::cancelled("driver plan did not complete")),
    }
}
