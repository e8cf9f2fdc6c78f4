//! ioswitch executor - the I/O switch.
//!
//! This crate turns a location-agnostic dataflow graph into per-process
//! execution plans and runs them:
//! - `dag`: mutable graph of nodes and typed variable edges
//! - `plan`: rewrite pass inserting transfers/barriers at environment
//!   boundaries, and lowering into serializable per-process plans
//! - `ops`: the op library and its string-tag registry
//! - `exec`: the variable-binding executor, the driver and the worker directory
//! - `transport`: the cross-process contract plus an in-process loopback
//! - `observability`: tracing subscriber setup

#![warn(missing_docs)]

pub mod dag;
pub mod exec;
pub mod observability;
pub mod ops;
pub mod plan;
pub mod transport;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::dag::{CustomNode, DagVarId, Endpoint, Graph, Node, NodeEnv, NodeId, NodeKind};
    pub use crate::exec::{
        Driver, DriverReadStream, DriverSignal, DriverWriteStream, ExecContext, Executor, Worker,
    };
    pub use crate::observability::{init_tracing, LogFormat, TracingConfig};
    pub use crate::ops::{register_op, Op, OpFuture, OpRegistry, RegisteredOp};
    pub use crate::plan::{generate, GeneratedPlans, Plan, PlanBuilder};
    pub use crate::transport::{LocalTransport, Transport, TransportFuture};
    pub use ioswitch_core::prelude::*;
}
