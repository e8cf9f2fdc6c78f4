//! Runtime: variable binding, plan execution and process-level orchestration.
//!
//! - [`Executor`] runs one plan's ops concurrently and matches produced
//!   variables to ops waiting on them.
//! - [`Worker`] is the per-process directory of live executors that incoming
//!   Send/Get requests are routed to.
//! - [`Driver`] runs the driver-side plan locally while dispatching every
//!   worker plan, and exposes the application-facing ingress/egress handles.

mod context;
mod driver;
mod executor;
mod handles;
mod worker;

pub use context::ExecContext;
pub use driver::Driver;
pub use executor::{Executor, ResultStore};
pub use handles::{DriverReadStream, DriverSignal, DriverWriteStream};
pub use worker::Worker;
