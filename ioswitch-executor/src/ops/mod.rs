//! Op library.
//!
//! An [`Op`] is the lowered, serializable form of a graph node: a small state
//! machine that binds the variables it consumes, does its work (possibly
//! talking to another process through the transport) and publishes the
//! variables it produces. All ops of one plan run concurrently; the only
//! ordering between them comes from shared variable IDs.
//!
//! | Kind | Behavior |
//! |------|----------|
//! | `drop` | Read a stream to EOF and discard it |
//! | `send_stream` / `send_value` | Push a local variable to another worker |
//! | `get_stream` / `get_value` | Signal a worker, then pull a variable from it |
//! | `store` | Record a value in the executor's result store |
//! | `const_value` | Publish a constant |
//! | `on_stream_begin` / `on_stream_end` | Republish a stream plus a lifecycle signal |
//! | `hold_until` | Withhold variables until signals arrive |
//! | `hang_until` | Delay an inner op until signals arrive |
//! | `broadcast` | Clone one value to several IDs |
//!
//! New kinds are added by implementing [`Op`] + [`RegisteredOp`] and calling
//! [`register_op`]; the plan envelope never changes.

mod barrier;
mod registry;
mod stream;
mod transfer;
mod value;

pub use barrier::{HangUntil, HoldUntil};
pub use registry::{codec, decode_op, encode_op, register_op, OpRegistry, OP_TAG};
pub use stream::{DropStream, OnStreamBegin, OnStreamEnd};
pub use transfer::{GetStream, GetValue, SendStream, SendValue};
pub use value::{Broadcast, ConstValue, Store};

use crate::exec::{ExecContext, Executor};
use ioswitch_core::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Type alias for op execution futures.
pub type OpFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// A unit of work inside a plan.
pub trait Op: OpCodec + fmt::Debug + Send + Sync + 'static {
    /// Run the op to completion.
    ///
    /// Implementations block (asynchronously) on variable bindings and I/O and
    /// must return promptly with a cancellation error once `ctx.cancel` fires.
    fn execute<'a>(&'a self, ctx: &'a ExecContext, exec: &'a Executor) -> OpFuture<'a>;
}

/// Wire identity of an op kind.
///
/// Implemented automatically for every [`RegisteredOp`].
pub trait OpCodec {
    /// The string tag identifying this kind on the wire.
    fn kind(&self) -> &'static str;

    /// Serialize the op's fields (without the tag).
    fn encode(&self) -> Result<serde_json::Value>;
}

/// An op kind that can be decoded through the [`OpRegistry`].
pub trait RegisteredOp: Serialize + DeserializeOwned {
    /// The string tag identifying this kind on the wire.
    const KIND: &'static str;
}

impl<T: RegisteredOp> OpCodec for T {
    fn kind(&self) -> &'static str {
        T::KIND
    }

    fn encode(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
