//! Prelude for convenient imports.
//!
//! ```ignore
//! use ioswitch_core::prelude::*;
//! ```

// Core types
pub use crate::types::{PlanId, VarId, WorkerInfo};

// Error handling
pub use crate::error::{Result, ResultExt, SwitchError};

// Payloads
pub use crate::stream::{ByteRange, ByteStream, StreamEnd};
pub use crate::value::{ScalarValue, VarKind, VarValue};

// Configuration
pub use crate::config::SwitchConfig;
