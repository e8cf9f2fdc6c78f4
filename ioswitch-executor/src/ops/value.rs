//! Ops over scalar values.

use super::{Op, OpFuture, RegisteredOp};
use crate::exec::{ExecContext, Executor};
use ioswitch_core::{ScalarValue, VarId, VarValue};
use serde::{Deserialize, Serialize};

/// Records a bound value in the executor's result store under `key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    /// Value to record.
    pub var: VarId,
    /// Result key.
    pub key: String,
}

impl RegisteredOp for Store {
    const KIND: &'static str = "store";
}

impl Op for Store {
    fn execute<'a>(&'a self, ctx: &'a ExecContext, exec: &'a Executor) -> OpFuture<'a> {
        Box::pin(async move {
            let value = exec.bind_value(&ctx.cancel, self.var).await?;
            tracing::debug!(plan_id = %exec.plan_id(), key = %self.key, "Storing result");
            exec.store(self.key.clone(), value);
            Ok(())
        })
    }
}

/// Publishes a constant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstValue {
    /// Variable to publish.
    pub output: VarId,
    /// The constant.
    pub value: ScalarValue,
}

impl RegisteredOp for ConstValue {
    const KIND: &'static str = "const_value";
}

impl Op for ConstValue {
    fn execute<'a>(&'a self, _ctx: &'a ExecContext, exec: &'a Executor) -> OpFuture<'a> {
        Box::pin(async move { exec.put_var(self.output, VarValue::Value(self.value.clone())) })
    }
}

/// Binds one value and republishes a copy under every target ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Broadcast {
    /// Value to copy.
    pub source: VarId,
    /// Variables receiving copies.
    pub targets: Vec<VarId>,
}

impl RegisteredOp for Broadcast {
    const KIND: &'static str = "broadcast";
}

impl Op for Broadcast {
    fn execute<'a>(&'a self, ctx: &'a ExecContext, exec: &'a Executor) -> OpFuture<'a> {
        Box::pin(async move {
            let value = exec.bind_value(&ctx.cancel, self.source).await?;
            exec.put_vars(
                self.targets
                    .iter()
                    .map(|id| (*id, VarValue::Value(value.clone()))),
            )
        })
    }
}
