//! Cross-environment transfer ops.
//!
//! Send ops push a local variable to the same plan on another worker. Get ops
//! run on the receiving side of a pull: they publish a signal on the remote
//! worker (usually releasing a [`HoldUntil`](super::HoldUntil) there) and then
//! receive the held variable.

use super::{Op, OpFuture, RegisteredOp};
use crate::exec::{ExecContext, Executor};
use ioswitch_core::{ScalarValue, VarId, VarValue, WorkerInfo};
use serde::{Deserialize, Serialize};

/// Pushes a local stream to `worker`, where it is published as `send`.
///
/// Completes once the remote side has finished reading the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendStream {
    /// Local stream to push.
    pub input: VarId,
    /// ID the stream is published under on the remote worker.
    pub send: VarId,
    /// Destination worker.
    pub worker: WorkerInfo,
}

impl RegisteredOp for SendStream {
    const KIND: &'static str = "send_stream";
}

impl Op for SendStream {
    fn execute<'a>(&'a self, ctx: &'a ExecContext, exec: &'a Executor) -> OpFuture<'a> {
        Box::pin(async move {
            let stream = exec.bind_stream(&ctx.cancel, self.input).await?;
            tracing::debug!(
                plan_id = %exec.plan_id(),
                var_id = %self.send,
                worker = %self.worker,
                "Sending stream"
            );
            ctx.transport
                .send_stream(&self.worker, exec.plan_id(), self.send, stream, ctx.cancel.clone())
                .await?;
            tracing::debug!(plan_id = %exec.plan_id(), var_id = %self.send, "Stream sent");
            Ok(())
        })
    }
}

/// Pushes a local value to `worker`, where it is published as `send`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendValue {
    /// Local value to push.
    pub input: VarId,
    /// ID the value is published under on the remote worker.
    pub send: VarId,
    /// Destination worker.
    pub worker: WorkerInfo,
}

impl RegisteredOp for SendValue {
    const KIND: &'static str = "send_value";
}

impl Op for SendValue {
    fn execute<'a>(&'a self, ctx: &'a ExecContext, exec: &'a Executor) -> OpFuture<'a> {
        Box::pin(async move {
            let value = exec.bind_value(&ctx.cancel, self.input).await?;
            tracing::debug!(
                plan_id = %exec.plan_id(),
                var_id = %self.send,
                worker = %self.worker,
                "Sending value"
            );
            ctx.transport
                .send_value(&self.worker, exec.plan_id(), self.send, value, ctx.cancel.clone())
                .await
        })
    }
}

/// Pulls stream `target` from `worker` and publishes it locally as `output`.
///
/// Publishing `signal` on the remote side is what allows the target to be
/// produced there. The op completes only after the local consumer has closed
/// the received stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetStream {
    /// Remote stream to receive.
    pub target: VarId,
    /// Remote signal released before receiving.
    pub signal: VarId,
    /// Local ID of the received stream.
    pub output: VarId,
    /// Worker holding the stream.
    pub worker: WorkerInfo,
}

impl RegisteredOp for GetStream {
    const KIND: &'static str = "get_stream";
}

impl Op for GetStream {
    fn execute<'a>(&'a self, ctx: &'a ExecContext, exec: &'a Executor) -> OpFuture<'a> {
        Box::pin(async move {
            tracing::debug!(
                plan_id = %exec.plan_id(),
                var_id = %self.target,
                worker = %self.worker,
                "Getting stream"
            );
            let stream = ctx
                .transport
                .get_stream(
                    &self.worker,
                    exec.plan_id(),
                    self.target,
                    self.signal,
                    ScalarValue::Signal,
                    ctx.cancel.clone(),
                )
                .await?;

            let (stream, closed) = stream.notify_on_close();
            exec.put_var(self.output, VarValue::Stream(stream))?;

            // The sender half lives in the stream wrapper and always fires on drop.
            if let Ok(end) = ctx.cancellable(closed).await? {
                tracing::debug!(
                    plan_id = %exec.plan_id(),
                    var_id = %self.output,
                    reached_eof = end.reached_eof,
                    "Received stream closed"
                );
            }
            Ok(())
        })
    }
}

/// Pulls value `target` from `worker` and publishes it locally as `output`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetValue {
    /// Remote value to receive.
    pub target: VarId,
    /// Remote signal released before receiving.
    pub signal: VarId,
    /// Local ID of the received value.
    pub output: VarId,
    /// Worker holding the value.
    pub worker: WorkerInfo,
}

impl RegisteredOp for GetValue {
    const KIND: &'static str = "get_value";
}

impl Op for GetValue {
    fn execute<'a>(&'a self, ctx: &'a ExecContext, exec: &'a Executor) -> OpFuture<'a> {
        Box::pin(async move {
            let value = ctx
                .transport
                .get_value(
                    &self.worker,
                    exec.plan_id(),
                    self.target,
                    self.signal,
                    ScalarValue::Signal,
                    ctx.cancel.clone(),
                )
                .await?;
            exec.put_var(self.output, VarValue::Value(value))
        })
    }
}
