//! Ops that consume or observe a stream in place.

use super::{Op, OpFuture, RegisteredOp};
use crate::exec::{ExecContext, Executor};
use ioswitch_core::error::SwitchError;
use ioswitch_core::{ScalarValue, VarId, VarValue};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

/// Reads a stream to EOF and discards the bytes.
///
/// Used for outputs nobody consumes, so producers never block on a reader
/// that does not exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropStream {
    /// Stream to drain.
    pub input: VarId,
}

impl RegisteredOp for DropStream {
    const KIND: &'static str = "drop";
}

impl Op for DropStream {
    fn execute<'a>(&'a self, ctx: &'a ExecContext, exec: &'a Executor) -> OpFuture<'a> {
        Box::pin(async move {
            let mut stream = exec.bind_stream(&ctx.cancel, self.input).await?;
            let mut buf = vec![0u8; ctx.config.stream_chunk_size.max(1)];
            let mut total = 0u64;
            loop {
                let n = ctx.cancellable(stream.read(&mut buf)).await??;
                if n == 0 {
                    break;
                }
                total += n as u64;
            }
            tracing::debug!(
                plan_id = %exec.plan_id(),
                var_id = %self.input,
                bytes = total,
                "Dropped stream"
            );
            Ok(())
        })
    }
}

/// Republishes a stream and signals as soon as it is available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnStreamBegin {
    /// Stream to observe.
    pub input: VarId,
    /// The same stream, republished.
    pub output: VarId,
    /// Signal published alongside the stream.
    pub signal: VarId,
}

impl RegisteredOp for OnStreamBegin {
    const KIND: &'static str = "on_stream_begin";
}

impl Op for OnStreamBegin {
    fn execute<'a>(&'a self, ctx: &'a ExecContext, exec: &'a Executor) -> OpFuture<'a> {
        Box::pin(async move {
            let stream = exec.bind_stream(&ctx.cancel, self.input).await?;
            exec.put_vars([
                (self.output, VarValue::Stream(stream)),
                (self.signal, VarValue::Value(ScalarValue::Signal)),
            ])
        })
    }
}

/// Republishes a stream and signals once its consumer has read it to EOF.
///
/// If the consumer closes the stream early the op fails with
/// [`SwitchError::StreamAborted`] and the signal is never published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnStreamEnd {
    /// Stream to observe.
    pub input: VarId,
    /// The same stream, republished.
    pub output: VarId,
    /// Signal published after EOF.
    pub signal: VarId,
}

impl RegisteredOp for OnStreamEnd {
    const KIND: &'static str = "on_stream_end";
}

impl Op for OnStreamEnd {
    fn execute<'a>(&'a self, ctx: &'a ExecContext, exec: &'a Executor) -> OpFuture<'a> {
        Box::pin(async move {
            let stream = exec.bind_stream(&ctx.cancel, self.input).await?;
            let (stream, eof) = stream.notify_on_eof();
            exec.put_var(self.output, VarValue::Stream(stream))?;

            ctx.cancellable(eof)
                .await?
                .map_err(|_| SwitchError::StreamAborted {
                    var_id: self.output,
                })?;
            exec.put_var(self.signal, VarValue::Value(ScalarValue::Signal))
        })
    }
}
