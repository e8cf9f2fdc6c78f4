//! Plan executor and its variable-binding core.
//!
//! Every op of a plan runs as its own task. Ops never talk to each other
//! directly: a producer calls [`Executor::put_vars`] and a consumer calls
//! [`Executor::bind_vars`], in either order. A binding names a set of
//! variables and completes once all of them were produced; each produced
//! variable satisfies exactly one binding (the oldest one waiting for it) or
//! is parked until one arrives.

use super::ExecContext;
use crate::plan::Plan;
use crate::transport::Transport;
use ioswitch_core::error::{Result, ResultExt, SwitchError};
use ioswitch_core::{ByteStream, PlanId, ScalarValue, SwitchConfig, VarId, VarValue};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Values recorded by `store` ops, keyed by their result key.
pub type ResultStore = HashMap<String, ScalarValue>;

/// Runs one plan and owns its variables.
pub struct Executor {
    plan: Plan,
    cancel: CancellationToken,
    state: Mutex<BindState>,
    store: Mutex<ResultStore>,
}

#[derive(Default)]
struct BindState {
    /// Produced variables nobody has bound yet.
    vars: HashMap<VarId, VarValue>,
    /// Every variable ever produced in this execution.
    produced: HashSet<VarId>,
    /// Pending bindings, oldest first.
    bindings: Vec<Binding>,
    next_binding: u64,
}

enum Pending {
    Ready(Vec<VarValue>),
    Waiting {
        id: u64,
        rx: oneshot::Receiver<Vec<VarValue>>,
    },
}

struct Binding {
    id: u64,
    /// Unsatisfied (slot, variable) pairs.
    waiting: Vec<(usize, VarId)>,
    bound: Vec<Option<VarValue>>,
    tx: oneshot::Sender<Vec<VarValue>>,
}

impl Executor {
    /// Create an executor for `plan`.
    ///
    /// The executor's cancellation is a child of `parent`: cancelling the
    /// parent stops the plan, while a failure inside the plan cancels only
    /// the executor (and whoever observes its token).
    pub fn new(plan: Plan, parent: &CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            plan,
            cancel: parent.child_token(),
            state: Mutex::new(BindState::default()),
            store: Mutex::new(ResultStore::new()),
        })
    }

    /// ID of the plan this executor runs.
    pub fn plan_id(&self) -> PlanId {
        self.plan.id
    }

    /// The plan this executor runs.
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Token fired when this execution fails or is cancelled from outside.
    ///
    /// A plan that finishes normally leaves it untouched: streams it handed
    /// on may still be read after its last op returned.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stop the execution.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait until every variable in `ids` has been produced, then take them.
    ///
    /// Values come back in the order of `ids`. Variables already produced are
    /// taken synchronously; if all of them are, no binding is registered. Fails
    /// with a cancellation error once `cancel` or the executor's own token
    /// fires.
    pub async fn bind_vars(
        &self,
        cancel: &CancellationToken,
        ids: &[VarId],
    ) -> Result<Vec<VarValue>> {
        let pending = self.register(ids);
        self.complete(cancel, pending).await
    }

    /// Publish `signal`, then bind `target`.
    ///
    /// The binding is registered before the signal becomes visible, so
    /// whatever the signal releases is handed to this caller even when the
    /// releasing op is the plan's last one.
    pub async fn signal_and_bind(
        &self,
        cancel: &CancellationToken,
        signal: VarId,
        signal_value: VarValue,
        target: VarId,
    ) -> Result<VarValue> {
        let pending = self.register(&[target]);
        if let Err(e) = self.put_var(signal, signal_value) {
            if let Pending::Waiting { id, .. } = pending {
                self.abandon(id);
            }
            return Err(e);
        }
        self.complete(cancel, pending)
            .await?
            .pop()
            .ok_or_else(|| SwitchError::InvalidTopology {
                cause: format!("binding for {} completed without a value", target),
            })
    }

    fn register(&self, ids: &[VarId]) -> Pending {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let mut bound = Vec::with_capacity(ids.len());
        let mut waiting = Vec::new();
        for (slot, id) in ids.iter().enumerate() {
            match state.vars.remove(id) {
                Some(value) => bound.push(Some(value)),
                None => {
                    bound.push(None);
                    waiting.push((slot, *id));
                }
            }
        }
        if waiting.is_empty() {
            return Pending::Ready(bound.into_iter().flatten().collect());
        }

        let (tx, rx) = oneshot::channel();
        let id = state.next_binding;
        state.next_binding += 1;
        state.bindings.push(Binding {
            id,
            waiting,
            bound,
            tx,
        });
        Pending::Waiting { id, rx }
    }

    async fn complete(&self, cancel: &CancellationToken, pending: Pending) -> Result<Vec<VarValue>> {
        let (binding_id, rx) = match pending {
            Pending::Ready(values) => return Ok(values),
            Pending::Waiting { id, rx } => (id, rx),
        };

        tokio::select! {
            biased;
            values = rx => values.map_err(|_| SwitchError::cancelled("binding dropped")),
            _ = cancel.cancelled() => {
                self.abandon(binding_id);
                Err(SwitchError::cancelled("bind interrupted"))
            }
            _ = self.cancel.cancelled() => {
                self.abandon(binding_id);
                Err(SwitchError::cancelled("plan cancelled"))
            }
        }
    }

    /// Bind a single stream variable.
    pub async fn bind_stream(&self, cancel: &CancellationToken, id: VarId) -> Result<ByteStream> {
        self.bind_one(cancel, id).await?.into_stream(id)
    }

    /// Bind a single value variable.
    pub async fn bind_value(&self, cancel: &CancellationToken, id: VarId) -> Result<ScalarValue> {
        self.bind_one(cancel, id).await?.into_value(id)
    }

    /// Bind a single signal variable.
    pub async fn bind_signal(&self, cancel: &CancellationToken, id: VarId) -> Result<()> {
        self.bind_one(cancel, id).await?.into_signal(id)
    }

    async fn bind_one(&self, cancel: &CancellationToken, id: VarId) -> Result<VarValue> {
        self.bind_vars(cancel, &[id])
            .await?
            .pop()
            .ok_or_else(|| SwitchError::InvalidTopology {
                cause: format!("binding for {} completed without a value", id),
            })
    }

    /// Publish produced variables.
    ///
    /// Each variable completes the oldest binding waiting for it, or is parked
    /// for a later bind. Producing the same ID twice is an error.
    pub fn put_vars<I>(&self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (VarId, VarValue)>,
    {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        for (id, value) in vars {
            if !state.produced.insert(id) {
                return Err(SwitchError::DuplicateVar { var_id: id });
            }

            let mut value = Some(value);
            let mut completed = None;
            for (index, binding) in state.bindings.iter_mut().enumerate() {
                let Some(pos) = binding.waiting.iter().position(|(_, w)| *w == id) else {
                    continue;
                };
                let (slot, _) = binding.waiting.swap_remove(pos);
                binding.bound[slot] = value.take();
                if binding.waiting.is_empty() {
                    completed = Some(index);
                }
                break;
            }

            if let Some(index) = completed {
                let binding = state.bindings.remove(index);
                let values = binding.bound.into_iter().flatten().collect();
                // The waiter may have been aborted; its values are dropped with it.
                let _ = binding.tx.send(values);
            }
            if let Some(value) = value {
                state.vars.insert(id, value);
            }
        }
        Ok(())
    }

    /// Publish a single variable.
    pub fn put_var(&self, id: VarId, value: VarValue) -> Result<()> {
        self.put_vars([(id, value)])
    }

    /// Record a result under `key`, replacing any earlier value.
    pub fn store(&self, key: impl Into<String>, value: ScalarValue) {
        self.store.lock().insert(key.into(), value);
    }

    /// Number of bindings still waiting.
    pub fn pending_bindings(&self) -> usize {
        self.state.lock().bindings.len()
    }

    fn abandon(&self, binding_id: u64) {
        self.state.lock().bindings.retain(|b| b.id != binding_id);
    }

    /// Drop everything still parked on this execution.
    ///
    /// Unbound streams are closed and bindings still waiting fail with a
    /// cancellation. Meant for a plan that has stopped and can no longer
    /// consume what is sent to it.
    pub fn release(&self) {
        let (vars, bindings) = {
            let mut state = self.state.lock();
            (
                std::mem::take(&mut state.vars),
                std::mem::take(&mut state.bindings),
            )
        };
        if !vars.is_empty() || !bindings.is_empty() {
            tracing::debug!(
                plan_id = %self.plan.id,
                parked_vars = vars.len(),
                pending_bindings = bindings.len(),
                "Releasing leftovers of stopped plan"
            );
        }
    }

    /// Run every op of the plan concurrently.
    ///
    /// The first failing op cancels the executor, which unblocks every other
    /// op with a cancellation error. A real failure is preferred over the
    /// cancellations it caused. On success the result store is returned and
    /// the executor's token is left alone.
    #[instrument(
        skip_all,
        fields(plan_id = %self.plan.id, ops = self.plan.ops.len())
    )]
    pub async fn run(
        self: &Arc<Self>,
        transport: Arc<dyn Transport>,
        config: Arc<SwitchConfig>,
    ) -> Result<ResultStore> {
        let ctx = Arc::new(ExecContext::new(self.cancel.clone(), transport, config));
        let plan_id = self.plan.id;

        tracing::info!(plan_id = %plan_id, "Plan started");

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        for op in self.plan.ops.iter().cloned() {
            let exec = Arc::clone(self);
            let ctx = Arc::clone(&ctx);
            tasks.spawn(async move {
                let kind = op.kind();
                tracing::debug!(plan_id = %plan_id, op = kind, "Op started");
                let result = op.execute(&ctx, &exec).await.with_op(plan_id, kind);
                tracing::debug!(plan_id = %plan_id, op = kind, ok = result.is_ok(), "Op finished");
                result
            });
        }

        let mut failure: Option<SwitchError> = None;
        while let Some(joined) = tasks.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => continue,
                Err(_) => Err(SwitchError::OpPanic { plan_id }),
            };
            let Err(err) = result else {
                continue;
            };

            if failure.is_none() {
                tracing::warn!(plan_id = %plan_id, error = %err, "Op failed, cancelling plan");
                self.cancel.cancel();
                tasks.abort_all();
            }
            let replace = match &failure {
                None => true,
                Some(prev) => prev.is_cancellation() && !err.is_cancellation(),
            };
            if replace {
                failure = Some(err);
            }
        }

        match failure {
            Some(err) => {
                tracing::error!(plan_id = %plan_id, error = %err, "Plan failed");
                Err(err)
            }
            None => {
                tracing::info!(plan_id = %plan_id, "Plan finished");
                Ok(std::mem::take(&mut *self.store.lock()))
            }
        }
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Executor")
            .field("plan_id", &self.plan.id)
            .field("ops", &self.plan.ops.len())
            .field("parked_vars", &state.vars.len())
            .field("pending_bindings", &state.bindings.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{ConstValue, Store};
    use crate::transport::LocalTransport;
    use std::time::Duration;

    fn executor(plan: Plan) -> Arc<Executor> {
        Executor::new(plan, &CancellationToken::new())
    }

    fn int(v: i64) -> VarValue {
        VarValue::Value(ScalarValue::Int(v))
    }

    #[tokio::test]
    async fn put_before_bind_returns_synchronously() {
        let exec = executor(Plan::new(PlanId::new()));
        exec.put_vars([(VarId::new(1), int(1)), (VarId::new(2), int(2))])
            .unwrap();

        let values = exec
            .bind_vars(&CancellationToken::new(), &[VarId::new(2), VarId::new(1)])
            .await
            .unwrap();
        let ints: Vec<_> = values
            .into_iter()
            .map(|v| v.into_value(VarId::new(0)).unwrap().as_int().unwrap())
            .collect();
        assert_eq!(ints, vec![2, 1]);
        assert_eq!(exec.pending_bindings(), 0);
    }

    #[tokio::test]
    async fn bind_before_put_waits_for_all() {
        let exec = executor(Plan::new(PlanId::new()));
        let waiter = {
            let exec = Arc::clone(&exec);
            tokio::spawn(async move {
                exec.bind_vars(&CancellationToken::new(), &[VarId::new(1), VarId::new(2)])
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        exec.put_var(VarId::new(2), int(20)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        assert_eq!(exec.pending_bindings(), 1);

        exec.put_var(VarId::new(1), int(10)).unwrap();
        let values = waiter.await.unwrap().unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].kind(), ioswitch_core::VarKind::Value);
        assert_eq!(exec.pending_bindings(), 0);
    }

    #[tokio::test]
    async fn duplicate_production_is_rejected() {
        let exec = executor(Plan::new(PlanId::new()));
        exec.put_var(VarId::new(5), int(1)).unwrap();
        let _ = exec
            .bind_value(&CancellationToken::new(), VarId::new(5))
            .await
            .unwrap();

        let err = exec.put_var(VarId::new(5), int(2)).unwrap_err();
        assert_eq!(err.code(), "E202");
    }

    #[tokio::test]
    async fn kind_mismatch_surfaces_on_bind() {
        let exec = executor(Plan::new(PlanId::new()));
        exec.put_var(VarId::new(1), int(1)).unwrap();
        let err = exec
            .bind_stream(&CancellationToken::new(), VarId::new(1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E201");
    }

    #[tokio::test]
    async fn cancelled_bind_is_removed() {
        let exec = executor(Plan::new(PlanId::new()));
        let cancel = CancellationToken::new();
        let waiter = {
            let exec = Arc::clone(&exec);
            let cancel = cancel.clone();
            tokio::spawn(async move { exec.bind_value(&cancel, VarId::new(1)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(exec.pending_bindings(), 0);

        // A later value is parked rather than lost.
        exec.put_var(VarId::new(1), int(3)).unwrap();
        let v = exec
            .bind_value(&CancellationToken::new(), VarId::new(1))
            .await
            .unwrap();
        assert_eq!(v.as_int(), Some(3));
    }

    #[tokio::test]
    async fn run_collects_store() {
        let mut plan = Plan::new(PlanId::new());
        plan.push(ConstValue {
            output: VarId::new(1),
            value: ScalarValue::string("hello"),
        });
        plan.push(Store {
            var: VarId::new(1),
            key: "greeting".to_string(),
        });

        let exec = executor(plan);
        let store = exec
            .run(
                Arc::new(LocalTransport::new()),
                Arc::new(SwitchConfig::default()),
            )
            .await
            .unwrap();
        assert_eq!(store.get("greeting"), Some(&ScalarValue::string("hello")));
        assert!(!exec.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn release_closes_parked_streams() {
        let exec = executor(Plan::new(PlanId::new()));
        let (stream, closed) = ByteStream::from_bytes(b"unread".to_vec()).notify_on_close();
        exec.put_var(VarId::new(1), VarValue::Stream(stream)).unwrap();
        let waiter = {
            let exec = Arc::clone(&exec);
            tokio::spawn(async move {
                exec.bind_value(&CancellationToken::new(), VarId::new(2))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        exec.release();
        assert!(!closed.await.unwrap().reached_eof);
        assert!(waiter.await.unwrap().unwrap_err().is_cancellation());
        assert_eq!(exec.pending_bindings(), 0);
    }

    #[tokio::test]
    async fn signal_and_bind_takes_what_the_signal_releases() {
        let exec = executor(Plan::new(PlanId::new()));
        let releaser = {
            let exec = Arc::clone(&exec);
            tokio::spawn(async move {
                exec.bind_signal(&CancellationToken::new(), VarId::new(1))
                    .await?;
                exec.put_var(VarId::new(2), int(5))
            })
        };

        let value = exec
            .signal_and_bind(
                &CancellationToken::new(),
                VarId::new(1),
                VarValue::Value(ScalarValue::Signal),
                VarId::new(2),
            )
            .await
            .unwrap();
        assert_eq!(value.into_value(VarId::new(2)).unwrap(), ScalarValue::Int(5));
        releaser.await.unwrap().unwrap();
        assert_eq!(exec.pending_bindings(), 0);
    }

    #[tokio::test]
    async fn signal_and_bind_rejects_a_repeated_signal() {
        let exec = executor(Plan::new(PlanId::new()));
        exec.put_var(VarId::new(1), VarValue::Value(ScalarValue::Signal))
            .unwrap();
        let err = exec
            .signal_and_bind(
                &CancellationToken::new(),
                VarId::new(1),
                VarValue::Value(ScalarValue::Signal),
                VarId::new(2),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E202");
        assert_eq!(exec.pending_bindings(), 0);
    }

    #[tokio::test]
    async fn run_reports_failing_op() {
        let mut plan = Plan::new(PlanId::new());
        // Two producers of the same variable.
        plan.push(ConstValue {
            output: VarId::new(1),
            value: ScalarValue::Int(1),
        });
        plan.push(ConstValue {
            output: VarId::new(1),
            value: ScalarValue::Int(2),
        });
        // Never satisfied; must be released by cancellation.
        plan.push(Store {
            var: VarId::new(9),
            key: "never".to_string(),
        });

        let exec = executor(plan);
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            exec.run(
                Arc::new(LocalTransport::new()),
                Arc::new(SwitchConfig::default()),
            ),
        )
        .await
        .expect("run must not hang")
        .unwrap_err();

        assert_eq!(err.code(), "E401");
        assert_eq!(err.root_cause().code(), "E202");
        assert!(err.to_string().contains("const_value"));
    }
}
