//! Strongly-typed identifiers for ioswitch entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for one distributed plan execution.
///
/// Every leg (the driver's plan and each worker's plan) of the same execution
/// shares this ID, which is how Send/Get requests find their target executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(Uuid);

impl PlanId {
    /// Create a new random plan ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a plan ID from an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parse a plan ID from its UUID string form.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plan_{}", self.0)
    }
}

/// Identifier for a variable flowing through a plan.
///
/// IDs are allocated once, at lowering time, and are unique across every leg
/// of one distributed execution. `0` is reserved to mean "not yet assigned".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VarId(u32);

impl VarId {
    /// Sentinel for a variable that lowering has not reached yet.
    pub const UNASSIGNED: VarId = VarId(0);

    /// Create a variable ID from a raw value.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Whether lowering has assigned this ID.
    #[must_use]
    pub const fn is_assigned(&self) -> bool {
        self.0 != 0
    }
}

impl Default for VarId {
    fn default() -> Self {
        Self::UNASSIGNED
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var_{}", self.0)
    }
}

impl From<u32> for VarId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Descriptor of a worker process.
///
/// Opaque to the runtime apart from equality: two nodes run in the same
/// environment exactly when their worker descriptors compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerInfo {
    /// Stable worker identifier assigned by the cluster.
    pub id: u64,
    /// Address the transport uses to reach the worker.
    pub address: String,
}

impl WorkerInfo {
    /// Create a new worker descriptor.
    #[must_use]
    pub fn new(id: u64, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }
}

impl fmt::Display for WorkerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker_{}@{}", self.id, self.address)
    }
}
