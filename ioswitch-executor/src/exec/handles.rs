//! Application-facing handles for driver ingress and egress.
//!
//! A handle is created before planning, attached to a driver node in the
//! graph, and resolved to a concrete [`VarId`] when the graph is lowered.
//! Clones share the resolution, so the copy kept by the application sees the
//! ID assigned through the copy stored in the graph.

use ioswitch_core::error::{Result, SwitchError};
use ioswitch_core::{ByteRange, VarId};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
struct HandleSlot(Arc<Mutex<Option<VarId>>>);

impl HandleSlot {
    fn get(&self, what: &str) -> Result<VarId> {
        (*self.0.lock()).ok_or_else(|| SwitchError::UnresolvedHandle {
            handle: what.to_string(),
        })
    }

    fn set(&self, id: VarId) {
        *self.0.lock() = Some(id);
    }
}

/// Stream the application writes into the driver's plan.
#[derive(Debug, Clone, Default)]
pub struct DriverWriteStream {
    slot: HandleSlot,
    range: ByteRange,
}

impl DriverWriteStream {
    /// A handle accepting the whole stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle whose plan only needs `range` of the written stream.
    pub fn with_range(range: ByteRange) -> Self {
        Self {
            slot: HandleSlot::default(),
            range,
        }
    }

    /// Byte window the plan consumes.
    pub fn range(&self) -> ByteRange {
        self.range
    }

    /// Variable the stream is published as.
    pub fn var_id(&self) -> Result<VarId> {
        self.slot.get("driver write stream")
    }

    pub(crate) fn resolve(&self, id: VarId) {
        self.slot.set(id);
    }
}

/// Stream the application reads out of the driver's plan.
#[derive(Debug, Clone, Default)]
pub struct DriverReadStream {
    slot: HandleSlot,
}

impl DriverReadStream {
    /// Create an unresolved handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Variable the stream is bound from.
    pub fn var_id(&self) -> Result<VarId> {
        self.slot.get("driver read stream")
    }

    pub(crate) fn resolve(&self, id: VarId) {
        self.slot.set(id);
    }
}

/// Signal the application raises inside the driver's plan.
#[derive(Debug, Clone, Default)]
pub struct DriverSignal {
    slot: HandleSlot,
}

impl DriverSignal {
    /// Create an unresolved handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Variable the signal is published as.
    pub fn var_id(&self) -> Result<VarId> {
        self.slot.get("driver signal")
    }

    pub(crate) fn resolve(&self, id: VarId) {
        self.slot.set(id);
    }
}
