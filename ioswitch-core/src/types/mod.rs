//! Core types for ioswitch.

mod ids;

pub use ids::{PlanId, VarId, WorkerInfo};
