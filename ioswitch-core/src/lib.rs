//! ioswitch core library.
//!
//! This crate provides the foundational types shared by every part of the
//! ioswitch dataflow runtime: identifiers, runtime variable payloads, byte
//! stream handles, the error taxonomy and configuration.
//!
//! # Key Components
//!
//! - **Types**: Strongly-typed identifiers (`PlanId`, `VarId`, `WorkerInfo`)
//! - **Value**: Scalar payloads and the produced-variable envelope
//! - **Stream**: Byte-stream handles with close/EOF notification and range windows
//! - **Config**: Runtime tunables loaded from the environment
//!
//! # Example
//!
//! ```ignore
//! use ioswitch_core::prelude::*;
//!
//! let plan_id = PlanId::new();
//! let stream = ByteStream::from_bytes(b"hello".to_vec());
//! let produced = VarValue::Stream(stream);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod prelude;
pub mod stream;
pub mod types;
pub mod value;

// Re-export key types at crate root for convenience
pub use config::SwitchConfig;
pub use error::{Result, ResultExt, SwitchError};
pub use stream::{ByteRange, ByteStream};
pub use types::{PlanId, VarId, WorkerInfo};
pub use value::{ScalarValue, VarKind, VarValue};
