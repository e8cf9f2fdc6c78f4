//! Runtime variable payloads.
//!
//! A variable is produced once, under one [`VarId`], and carries either a
//! byte stream or a small scalar. Scalars are serializable so they can cross
//! process boundaries inside Send/Get requests; streams are moved.

use crate::error::{Result, SwitchError};
use crate::stream::ByteStream;
use crate::types::VarId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two kinds of variable edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarKind {
    /// A byte stream.
    Stream,
    /// A scalar value.
    Value,
}

impl fmt::Display for VarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => f.write_str("stream"),
            Self::Value => f.write_str("value"),
        }
    }
}

/// A typed scalar carried by a value variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ScalarValue {
    /// A string.
    String(String),
    /// A signed integer.
    Int(i64),
    /// A payload-free signal; its presence is the information.
    Signal,
}

impl ScalarValue {
    /// Create a string value.
    pub fn string(v: impl Into<String>) -> Self {
        Self::String(v.into())
    }

    /// Get the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Check whether this is a signal.
    pub fn is_signal(&self) -> bool {
        matches!(self, Self::Signal)
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Int(_) => "int",
            Self::Signal => "signal",
        }
    }
}

/// A produced variable as held by an executor.
pub enum VarValue {
    /// Stream payload.
    Stream(ByteStream),
    /// Scalar payload.
    Value(ScalarValue),
}

impl VarValue {
    /// The kind of edge this payload belongs to.
    pub fn kind(&self) -> VarKind {
        match self {
            Self::Stream(_) => VarKind::Stream,
            Self::Value(_) => VarKind::Value,
        }
    }

    /// Take the stream payload, failing if a scalar was produced.
    pub fn into_stream(self, var_id: VarId) -> Result<ByteStream> {
        match self {
            Self::Stream(s) => Ok(s),
            Self::Value(v) => Err(SwitchError::mismatch(var_id, "stream", v.type_name())),
        }
    }

    /// Take the scalar payload, failing if a stream was produced.
    pub fn into_value(self, var_id: VarId) -> Result<ScalarValue> {
        match self {
            Self::Value(v) => Ok(v),
            Self::Stream(_) => Err(SwitchError::mismatch(var_id, "value", "stream")),
        }
    }

    /// Require a signal payload.
    pub fn into_signal(self, var_id: VarId) -> Result<()> {
        match self.into_value(var_id)? {
            ScalarValue::Signal => Ok(()),
            other => Err(SwitchError::mismatch(var_id, "signal", other.type_name())),
        }
    }
}

impl fmt::Debug for VarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(s) => f.debug_tuple("Stream").field(s).finish(),
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
        }
    }
}

impl From<ScalarValue> for VarValue {
    fn from(v: ScalarValue) -> Self {
        Self::Value(v)
    }
}

impl From<ByteStream> for VarValue {
    fn from(s: ByteStream) -> Self {
        Self::Stream(s)
    }
}
