//! Ordering barriers.
//!
//! Both barriers wait for a set of signal variables; they differ in what is
//! delayed. [`HoldUntil`] withholds *data* (it owns held variables and only
//! republishes them once every signal arrived), while [`HangUntil`] delays
//! the *start* of another op.

use super::{codec, Op, OpFuture, RegisteredOp};
use crate::exec::{ExecContext, Executor};
use ioswitch_core::error::SwitchError;
use ioswitch_core::VarId;
use serde::{Deserialize, Serialize};

/// Withholds variables until every wait signal has been produced.
///
/// `holds[i]` is republished as `emits[i]`. The waits and the holds are bound
/// in a single binding, so nothing is republished before the last signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldUntil {
    /// Signals to wait for.
    pub waits: Vec<VarId>,
    /// Variables to withhold.
    pub holds: Vec<VarId>,
    /// Republished IDs, parallel to `holds`.
    pub emits: Vec<VarId>,
}

impl RegisteredOp for HoldUntil {
    const KIND: &'static str = "hold_until";
}

impl Op for HoldUntil {
    fn execute<'a>(&'a self, ctx: &'a ExecContext, exec: &'a Executor) -> OpFuture<'a> {
        Box::pin(async move {
            if self.holds.len() != self.emits.len() {
                return Err(SwitchError::InvalidTopology {
                    cause: format!(
                        "hold_until holds {} variables but emits {}",
                        self.holds.len(),
                        self.emits.len()
                    ),
                });
            }

            let ids: Vec<VarId> = self.waits.iter().chain(&self.holds).copied().collect();
            let mut values = exec.bind_vars(&ctx.cancel, &ids).await?;
            let held = values.split_off(self.waits.len());
            for (id, value) in self.waits.iter().zip(values) {
                value.into_signal(*id)?;
            }

            tracing::debug!(
                plan_id = %exec.plan_id(),
                waits = self.waits.len(),
                holds = self.holds.len(),
                "Releasing held variables"
            );
            exec.put_vars(self.emits.iter().copied().zip(held))
        })
    }
}

/// Runs an inner op only after every wait signal has been produced.
#[derive(Debug, Serialize, Deserialize)]
pub struct HangUntil {
    /// Signals to wait for.
    pub waits: Vec<VarId>,
    /// The delayed op.
    #[serde(with = "codec::boxed")]
    pub op: Box<dyn Op>,
}

impl RegisteredOp for HangUntil {
    const KIND: &'static str = "hang_until";
}

impl Op for HangUntil {
    fn execute<'a>(&'a self, ctx: &'a ExecContext, exec: &'a Executor) -> OpFuture<'a> {
        Box::pin(async move {
            let values = exec.bind_vars(&ctx.cancel, &self.waits).await?;
            for (id, value) in self.waits.iter().zip(values) {
                value.into_signal(*id)?;
            }
            self.op.execute(ctx, exec).await
        })
    }
}
