//! Per-process directory of live executors.

use super::executor::{Executor, ResultStore};
use crate::plan::Plan;
use crate::transport::Transport;
use ioswitch_core::error::{Result, SwitchError};
use ioswitch_core::{ByteStream, PlanId, ScalarValue, SwitchConfig, VarId, VarValue, WorkerInfo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Executors running in this process, addressable by plan ID.
///
/// Incoming Send/Get requests can arrive before the plan they target has been
/// registered (the driver dispatches all legs at once), so lookups can wait
/// for a bounded time until the plan shows up.
pub struct Worker {
    info: WorkerInfo,
    transport: Arc<dyn Transport>,
    config: Arc<SwitchConfig>,
    state: Mutex<WorkerState>,
}

#[derive(Default)]
struct WorkerState {
    executors: HashMap<PlanId, Arc<Executor>>,
    waiters: HashMap<PlanId, Vec<oneshot::Sender<Arc<Executor>>>>,
}

impl Worker {
    /// Create a worker.
    ///
    /// `transport` is what the plans run by this worker use to reach other
    /// workers.
    pub fn new(
        info: WorkerInfo,
        transport: Arc<dyn Transport>,
        config: Arc<SwitchConfig>,
    ) -> Arc<Self> {
        Arc::new(Self {
            info,
            transport,
            config,
            state: Mutex::new(WorkerState::default()),
        })
    }

    /// This worker's descriptor.
    pub fn info(&self) -> &WorkerInfo {
        &self.info
    }

    /// Register an executor and wake every lookup waiting for its plan.
    pub fn add(&self, exec: Arc<Executor>) {
        let plan_id = exec.plan_id();
        let mut state = self.state.lock();
        if let Some(waiters) = state.waiters.remove(&plan_id) {
            for tx in waiters {
                let _ = tx.send(Arc::clone(&exec));
            }
        }
        state.executors.insert(plan_id, exec);
    }

    /// Deregister a plan.
    pub fn remove(&self, plan_id: PlanId) -> Option<Arc<Executor>> {
        self.state.lock().executors.remove(&plan_id)
    }

    /// Look a plan up without waiting.
    pub fn find(&self, plan_id: PlanId) -> Option<Arc<Executor>> {
        self.state.lock().executors.get(&plan_id).cloned()
    }

    /// Number of registered plans.
    pub fn len(&self) -> usize {
        self.state.lock().executors.len()
    }

    /// Whether no plan is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look a plan up, waiting up to the configured lookup timeout for it to
    /// be registered.
    pub async fn find_or_wait(
        &self,
        cancel: &CancellationToken,
        plan_id: PlanId,
    ) -> Result<Arc<Executor>> {
        let rx = {
            let mut state = self.state.lock();
            if let Some(exec) = state.executors.get(&plan_id) {
                return Ok(Arc::clone(exec));
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.entry(plan_id).or_default().push(tx);
            rx
        };

        let timeout = self.config.plan_lookup_timeout();
        let result = tokio::select! {
            biased;
            found = rx => found.map_err(|_| SwitchError::cancelled("worker lookup dropped")),
            _ = cancel.cancelled() => Err(SwitchError::cancelled("plan lookup interrupted")),
            _ = tokio::time::sleep(timeout) => Err(SwitchError::PlanNotFound {
                plan_id,
                timeout_ms: self.config.plan_lookup_timeout_ms,
            }),
        };
        if result.is_err() {
            self.prune_waiters(plan_id);
        }
        result
    }

    fn prune_waiters(&self, plan_id: PlanId) {
        let mut state = self.state.lock();
        if let Some(waiters) = state.waiters.get_mut(&plan_id) {
            waiters.retain(|tx| !tx.is_closed());
            if waiters.is_empty() {
                state.waiters.remove(&plan_id);
            }
        }
    }

    /// Run a plan dispatched to this worker.
    ///
    /// The plan is registered for the duration of the run and removed
    /// afterwards, whatever the outcome. Anything still parked on it is then
    /// released, closing pushed streams nobody took.
    #[instrument(skip_all, fields(worker = %self.info, plan_id = %plan.id))]
    pub async fn serve_execute_plan(
        &self,
        plan: Plan,
        cancel: CancellationToken,
    ) -> Result<ResultStore> {
        let exec = Executor::new(plan, &cancel);
        self.add(Arc::clone(&exec));
        let result = exec
            .run(Arc::clone(&self.transport), Arc::clone(&self.config))
            .await;
        self.remove(exec.plan_id());
        exec.release();
        result
    }

    /// Accept a pushed stream and hold the request open until the local
    /// consumer closes it.
    ///
    /// The consumer may hand the stream on, so the target plan finishing is
    /// not the end of the request; only its failure is.
    #[instrument(skip_all, fields(worker = %self.info, plan_id = %plan_id, var_id = %var_id))]
    pub async fn serve_send_stream(
        &self,
        plan_id: PlanId,
        var_id: VarId,
        stream: ByteStream,
        cancel: CancellationToken,
    ) -> Result<()> {
        let exec = self.find_or_wait(&cancel, plan_id).await?;
        let (stream, closed) = stream.notify_on_close();
        exec.put_var(var_id, VarValue::Stream(stream))?;

        tokio::select! {
            biased;
            end = closed => {
                let reached_eof = end.map(|e| e.reached_eof).unwrap_or(false);
                tracing::debug!(reached_eof, "Pushed stream closed");
                Ok(())
            }
            _ = cancel.cancelled() => Err(SwitchError::cancelled("send interrupted")),
            _ = exec.cancel_token().cancelled() => {
                Err(SwitchError::cancelled("target plan failed"))
            }
        }
    }

    /// Accept a pushed value.
    #[instrument(skip_all, fields(worker = %self.info, plan_id = %plan_id, var_id = %var_id))]
    pub async fn serve_send_value(
        &self,
        plan_id: PlanId,
        var_id: VarId,
        value: ScalarValue,
        cancel: CancellationToken,
    ) -> Result<()> {
        let exec = self.find_or_wait(&cancel, plan_id).await?;
        exec.put_var(var_id, VarValue::Value(value))
    }

    /// Serve a pull: publish the caller's signal, then hand over the stream
    /// it releases.
    #[instrument(skip_all, fields(worker = %self.info, plan_id = %plan_id, var_id = %target))]
    pub async fn serve_get_stream(
        &self,
        plan_id: PlanId,
        target: VarId,
        signal: VarId,
        signal_value: ScalarValue,
        cancel: CancellationToken,
    ) -> Result<ByteStream> {
        let exec = self.find_or_wait(&cancel, plan_id).await?;
        exec.signal_and_bind(&cancel, signal, VarValue::Value(signal_value), target)
            .await?
            .into_stream(target)
    }

    /// Serve a pull: publish the caller's signal, then hand over the value
    /// it releases.
    #[instrument(skip_all, fields(worker = %self.info, plan_id = %plan_id, var_id = %target))]
    pub async fn serve_get_value(
        &self,
        plan_id: PlanId,
        target: VarId,
        signal: VarId,
        signal_value: ScalarValue,
        cancel: CancellationToken,
    ) -> Result<ScalarValue> {
        let exec = self.find_or_wait(&cancel, plan_id).await?;
        exec.signal_and_bind(&cancel, signal, VarValue::Value(signal_value), target)
            .await?
            .into_value(target)
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("info", &self.info)
            .field("plans", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalTransport;
    use std::time::Duration;

    fn worker(lookup_timeout_ms: u64) -> Arc<Worker> {
        Worker::new(
            WorkerInfo::new(1, "local:1"),
            Arc::new(LocalTransport::new()),
            Arc::new(SwitchConfig::default().with_plan_lookup_timeout_ms(lookup_timeout_ms)),
        )
    }

    #[tokio::test]
    async fn lookup_waits_for_registration() {
        let worker = worker(5_000);
        let plan_id = PlanId::new();

        let lookup = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move {
                worker
                    .find_or_wait(&CancellationToken::new(), plan_id)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!lookup.is_finished());

        let exec = Executor::new(Plan::new(plan_id), &CancellationToken::new());
        worker.add(Arc::clone(&exec));
        let found = lookup.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&found, &exec));
        assert_eq!(worker.len(), 1);

        worker.remove(plan_id);
        assert!(worker.is_empty());
        assert!(worker.find(plan_id).is_none());
    }

    #[tokio::test]
    async fn lookup_times_out() {
        let worker = worker(30);
        let plan_id = PlanId::new();
        let err = worker
            .find_or_wait(&CancellationToken::new(), plan_id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E303");
        assert!(worker.state.lock().waiters.is_empty());
    }

    #[tokio::test]
    async fn lookup_is_cancellable() {
        let worker = worker(60_000);
        let cancel = CancellationToken::new();
        let lookup = {
            let worker = Arc::clone(&worker);
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.find_or_wait(&cancel, PlanId::new()).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        let err = tokio::time::timeout(Duration::from_secs(1), lookup)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn get_publishes_signal_before_binding() {
        let worker = worker(1_000);
        let plan_id = PlanId::new();
        let exec = Executor::new(Plan::new(plan_id), &CancellationToken::new());
        worker.add(Arc::clone(&exec));

        let get = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move {
                worker
                    .serve_get_value(
                        plan_id,
                        VarId::new(2),
                        VarId::new(1),
                        ScalarValue::Signal,
                        CancellationToken::new(),
                    )
                    .await
            })
        };

        // Release the target only after seeing the signal.
        exec.bind_signal(&CancellationToken::new(), VarId::new(1))
            .await
            .unwrap();
        exec.put_var(VarId::new(2), VarValue::Value(ScalarValue::Int(77)))
            .unwrap();

        assert_eq!(get.await.unwrap().unwrap(), ScalarValue::Int(77));
    }

    #[tokio::test]
    async fn pushed_stream_outlives_its_finished_plan() {
        let worker = worker(1_000);
        let plan_id = PlanId::new();
        let exec = Executor::new(Plan::new(plan_id), &CancellationToken::new());
        worker.add(Arc::clone(&exec));

        let send = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move {
                worker
                    .serve_send_stream(
                        plan_id,
                        VarId::new(1),
                        ByteStream::from_bytes(b"relayed".to_vec()),
                        CancellationToken::new(),
                    )
                    .await
            })
        };

        // The plan hands the stream on and finishes.
        let stream = exec
            .bind_stream(&CancellationToken::new(), VarId::new(1))
            .await
            .unwrap();
        exec.run(
            Arc::new(LocalTransport::new()),
            Arc::new(SwitchConfig::default()),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!send.is_finished());

        assert_eq!(stream.read_all().await.unwrap(), b"relayed".to_vec());
        send.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn pushed_stream_fails_with_its_plan() {
        let worker = worker(1_000);
        let plan_id = PlanId::new();
        let exec = Executor::new(Plan::new(plan_id), &CancellationToken::new());
        worker.add(Arc::clone(&exec));

        let send = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move {
                worker
                    .serve_send_stream(
                        plan_id,
                        VarId::new(1),
                        ByteStream::from_bytes(b"lost".to_vec()),
                        CancellationToken::new(),
                    )
                    .await
            })
        };
        let _stream = exec
            .bind_stream(&CancellationToken::new(), VarId::new(1))
            .await
            .unwrap();

        exec.cancel();
        let err = send.await.unwrap().unwrap_err();
        assert!(err.is_cancellation());
    }
}
