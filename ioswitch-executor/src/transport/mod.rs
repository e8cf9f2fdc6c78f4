//! Cross-process transport contract.
//!
//! The runtime never opens connections itself. Everything that crosses a
//! process boundary goes through a [`Transport`]: dispatching a worker's plan,
//! pushing a variable to a worker, and the two-phase pull (publish a signal on
//! the worker, then receive the variable it releases).
//!
//! A networked implementation lives outside this crate. [`LocalTransport`]
//! routes every call to an in-process [`Worker`](crate::exec::Worker).

mod local;

pub use local::LocalTransport;

use crate::plan::Plan;
use ioswitch_core::error::Result;
use ioswitch_core::{ByteStream, PlanId, ScalarValue, VarId, WorkerInfo};
use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Type alias for transport futures.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Client side of the worker RPC surface.
///
/// Every call carries the cancellation token of the calling execution; an
/// implementation must abandon the call (and make the remote side abandon it)
/// once the token fires.
pub trait Transport: Send + Sync {
    /// Run `plan` on `worker`, resolving when it finishes.
    fn execute_plan<'a>(
        &'a self,
        worker: &'a WorkerInfo,
        plan: Plan,
        cancel: CancellationToken,
    ) -> TransportFuture<'a, ()>;

    /// Publish `stream` as `var_id` in plan `plan_id` on `worker`.
    ///
    /// Resolves once the remote consumer has closed the stream.
    fn send_stream<'a>(
        &'a self,
        worker: &'a WorkerInfo,
        plan_id: PlanId,
        var_id: VarId,
        stream: ByteStream,
        cancel: CancellationToken,
    ) -> TransportFuture<'a, ()>;

    /// Publish `value` as `var_id` in plan `plan_id` on `worker`.
    fn send_value<'a>(
        &'a self,
        worker: &'a WorkerInfo,
        plan_id: PlanId,
        var_id: VarId,
        value: ScalarValue,
        cancel: CancellationToken,
    ) -> TransportFuture<'a, ()>;

    /// Publish `signal_value` as `signal` on `worker`, then receive stream
    /// `target` from the same plan.
    fn get_stream<'a>(
        &'a self,
        worker: &'a WorkerInfo,
        plan_id: PlanId,
        target: VarId,
        signal: VarId,
        signal_value: ScalarValue,
        cancel: CancellationToken,
    ) -> TransportFuture<'a, ByteStream>;

    /// Publish `signal_value` as `signal` on `worker`, then receive value
    /// `target` from the same plan.
    fn get_value<'a>(
        &'a self,
        worker: &'a WorkerInfo,
        plan_id: PlanId,
        target: VarId,
        signal: VarId,
        signal_value: ScalarValue,
        cancel: CancellationToken,
    ) -> TransportFuture<'a, ScalarValue>;
}
