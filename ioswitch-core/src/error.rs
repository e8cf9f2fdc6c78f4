//! Error types for ioswitch.
//!
//! Errors are grouped by where they originate so callers can tell a plan
//! generation bug from a transport hiccup or a sibling-leg cancellation:
//!
//! | Range | Origin |
//! |-------|--------|
//! | E1xx  | Plan generation (topology, environments) |
//! | E2xx  | Variable binding |
//! | E3xx  | Transport and stream I/O |
//! | E4xx  | Execution and cancellation |
//! | E8xx  | Serialization and configuration |

use crate::types::{PlanId, VarId, WorkerInfo};
use thiserror::Error;

/// The main error type for ioswitch operations.
#[derive(Error, Debug)]
pub enum SwitchError {
    // =========================================================================
    // Plan Generation Errors (E100-E199)
    // =========================================================================
    /// A node's execution environment was never resolved.
    #[error("E101: Node {node} has an unresolved execution environment")]
    UnresolvedEnv {
        /// Description of the node.
        node: String,
    },

    /// The graph topology cannot be lowered.
    #[error("E102: Invalid topology: {cause}")]
    InvalidTopology {
        /// Description of the problem.
        cause: String,
    },

    /// An input slot has no producer.
    #[error("E103: Input slot {slot} of node {node} is not connected")]
    UnconnectedInput {
        /// Description of the node.
        node: String,
        /// Slot index.
        slot: usize,
    },

    /// A variable is consumed by more than one binder after rewriting.
    #[error("E104: Variable {var} fans out to {consumers} consumers; insert an explicit broadcast")]
    FanOut {
        /// Description of the variable.
        var: String,
        /// Number of consumers found.
        consumers: usize,
    },

    // =========================================================================
    // Binding Errors (E200-E299)
    // =========================================================================
    /// A produced variable did not have the kind the binder expected.
    #[error("E201: Variable {var_id} bound as {expected} but produced as {actual}")]
    BindingMismatch {
        /// The variable in question.
        var_id: VarId,
        /// The kind the binder asked for.
        expected: String,
        /// The kind that was produced.
        actual: String,
    },

    /// A variable was produced twice within one plan execution.
    #[error("E202: Variable {var_id} produced more than once")]
    DuplicateVar {
        /// The variable in question.
        var_id: VarId,
    },

    /// A driver handle was used before lowering resolved its variable.
    #[error("E203: Driver handle '{handle}' has no resolved variable")]
    UnresolvedHandle {
        /// Handle description.
        handle: String,
    },

    // =========================================================================
    // Transport Errors (E300-E399)
    // =========================================================================
    /// Transport-level failure talking to a worker.
    #[error("E301: Transport to {worker} failed: {cause}")]
    Transport {
        /// The worker being addressed.
        worker: String,
        /// Reason for the failure.
        cause: String,
    },

    /// No worker is reachable under the given descriptor.
    #[error("E302: Worker {worker} not found")]
    WorkerNotFound {
        /// The worker being addressed.
        worker: String,
    },

    /// A plan never registered on the addressed worker.
    #[error("E303: Plan {plan_id} not registered within {timeout_ms}ms")]
    PlanNotFound {
        /// The plan being looked up.
        plan_id: PlanId,
        /// How long the lookup waited.
        timeout_ms: u64,
    },

    /// Stream read/write failure.
    #[error("E304: Stream I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A stream was closed before reaching its end.
    #[error("E305: Stream {var_id} closed before reaching EOF")]
    StreamAborted {
        /// The variable carrying the stream.
        var_id: VarId,
    },

    // =========================================================================
    // Execution Errors (E400-E499)
    // =========================================================================
    /// An operation failed while executing a plan.
    #[error("E401: Op {op} failed in plan {plan_id}: {cause}")]
    OpFailed {
        /// The plan the op belongs to.
        plan_id: PlanId,
        /// The op kind.
        op: String,
        /// The underlying error.
        #[source]
        cause: Box<SwitchError>,
    },

    /// A remote leg of a distributed execution failed.
    #[error("E402: Plan leg on {worker} failed: {cause}")]
    LegFailed {
        /// The worker running the leg.
        worker: String,
        /// The underlying error.
        #[source]
        cause: Box<SwitchError>,
    },

    /// Execution was cancelled (sibling failure or external request).
    #[error("E403: Cancelled: {reason}")]
    Cancelled {
        /// Why the execution was cancelled.
        reason: String,
    },

    /// Execution exceeded its deadline.
    #[error("E404: Execution timed out after {timeout_ms}ms")]
    Timeout {
        /// The deadline in milliseconds.
        timeout_ms: u64,
    },

    /// An op task panicked.
    #[error("E405: Op task panicked in plan {plan_id}")]
    OpPanic {
        /// The plan the op belongs to.
        plan_id: PlanId,
    },

    /// A driver result was requested twice.
    #[error("E406: Driver result already taken")]
    AlreadyWaited,

    // =========================================================================
    // Serialization/Config Errors (E800-E899)
    // =========================================================================
    /// Serialization error.
    #[error("E801: Serialization error: {0}")]
    Serialization(String),

    /// No decoder is registered for an op tag.
    #[error("E802: Unknown op kind '{kind}'")]
    UnknownOpKind {
        /// The unrecognized tag.
        kind: String,
    },

    /// Invalid configuration value.
    #[error("E803: Invalid config value for '{field}': {cause}")]
    ConfigValue {
        /// The configuration field.
        field: String,
        /// Reason why the value is invalid.
        cause: String,
    },
}

impl SwitchError {
    /// Create a cancellation error.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Create a transport error for the given worker.
    pub fn transport(worker: &WorkerInfo, cause: impl Into<String>) -> Self {
        Self::Transport {
            worker: worker.to_string(),
            cause: cause.into(),
        }
    }

    /// Create a binding mismatch error.
    pub fn mismatch(var_id: VarId, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::BindingMismatch {
            var_id,
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnresolvedEnv { .. } => "E101",
            Self::InvalidTopology { .. } => "E102",
            Self::UnconnectedInput { .. } => "E103",
            Self::FanOut { .. } => "E104",
            Self::BindingMismatch { .. } => "E201",
            Self::DuplicateVar { .. } => "E202",
            Self::UnresolvedHandle { .. } => "E203",
            Self::Transport { .. } => "E301",
            Self::WorkerNotFound { .. } => "E302",
            Self::PlanNotFound { .. } => "E303",
            Self::Io(_) => "E304",
            Self::StreamAborted { .. } => "E305",
            Self::OpFailed { .. } => "E401",
            Self::LegFailed { .. } => "E402",
            Self::Cancelled { .. } => "E403",
            Self::Timeout { .. } => "E404",
            Self::OpPanic { .. } => "E405",
            Self::AlreadyWaited => "E406",
            Self::Serialization(_) => "E801",
            Self::UnknownOpKind { .. } => "E802",
            Self::ConfigValue { .. } => "E803",
        }
    }

    /// Unwrap op/leg context down to the originating error.
    #[must_use]
    pub fn root_cause(&self) -> &SwitchError {
        match self {
            Self::OpFailed { cause, .. } | Self::LegFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Check if this error only reports that the execution was cancelled.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self.root_cause(), Self::Cancelled { .. })
    }

    /// Check if this error originated in the transport layer.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::Transport { .. }
                | Self::WorkerNotFound { .. }
                | Self::PlanNotFound { .. }
                | Self::Io(_)
                | Self::StreamAborted { .. }
        )
    }

    /// Check if this error indicates a plan generation bug.
    #[must_use]
    pub fn is_plan_error(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::UnresolvedEnv { .. }
                | Self::InvalidTopology { .. }
                | Self::UnconnectedInput { .. }
                | Self::FanOut { .. }
                | Self::BindingMismatch { .. }
                | Self::DuplicateVar { .. }
                | Self::UnresolvedHandle { .. }
        )
    }
}

impl From<serde_json::Error> for SwitchError {
    fn from(e: serde_json::Error) -> Self {
        SwitchError::Serialization(e.to_string())
    }
}

/// Result type alias using `SwitchError`.
pub type Result<T> = std::result::Result<T, SwitchError>;

/// Extension trait for adding execution context to errors.
pub trait ResultExt<T> {
    /// Attribute an error to the op that raised it.
    fn with_op(self, plan_id: PlanId, op: &str) -> Result<T>;

    /// Attribute an error to the worker leg that raised it.
    fn with_worker(self, worker: &WorkerInfo) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_op(self, plan_id: PlanId, op: &str) -> Result<T> {
        self.map_err(|e| match e {
            // Cancellation is reported by whoever triggered it.
            e @ SwitchError::Cancelled { .. } => e,
            e => SwitchError::OpFailed {
                plan_id,
                op: op.to_string(),
                cause: Box::new(e),
            },
        })
    }

    fn with_worker(self, worker: &WorkerInfo) -> Result<T> {
        self.map_err(|e| match e {
            e @ SwitchError::Cancelled { .. } => e,
            e => SwitchError::LegFailed {
                worker: worker.to_string(),
                cause: Box::new(e),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_correct() {
        let err = SwitchError::UnresolvedEnv {
            node: "n1".to_string(),
        };
        assert_eq!(err.code(), "E101");

        let err = SwitchError::DuplicateVar { var_id: VarId::new(3) };
        assert_eq!(err.code(), "E202");
        assert!(err.to_string().contains("var_3"));
    }

    #[test]
    fn op_context_wraps_but_keeps_cancellation() {
        let plan_id = PlanId::new();
        let res: Result<()> = Err(SwitchError::Io(std::io::Error::other("boom")));
        let err = res.with_op(plan_id, "send_stream").unwrap_err();
        assert_eq!(err.code(), "E401");
        assert!(err.to_string().contains("send_stream"));
        assert!(err.is_transport());

        let res: Result<()> = Err(SwitchError::cancelled("sibling failed"));
        let err = res.with_op(plan_id, "drop").unwrap_err();
        assert_eq!(err.code(), "E403");
        assert!(err.is_cancellation());
    }

    #[test]
    fn worker_context_chains_to_root() {
        let worker = WorkerInfo::new(7, "10.0.0.7:5010");
        let plan_id = PlanId::new();
        let res: Result<()> = Err(SwitchError::mismatch(VarId::new(4), "stream", "value"));
        let err = res.with_op(plan_id, "hold_until").with_worker(&worker).unwrap_err();

        assert_eq!(err.code(), "E402");
        assert_eq!(err.root_cause().code(), "E201");
        assert!(err.is_plan_error());
        assert!(err.to_string().contains("worker_7"));
    }
}
