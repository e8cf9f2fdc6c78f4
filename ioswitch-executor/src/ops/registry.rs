//! String-tag registry for op kinds.
//!
//! Ops travel as JSON objects carrying their fields plus a `"type"` tag.
//! Decoding looks the tag up in a process-wide registry, so applications can
//! add op kinds without touching the plan envelope.

use super::{
    Broadcast, ConstValue, DropStream, GetStream, GetValue, HangUntil, HoldUntil, OnStreamBegin,
    OnStreamEnd, Op, RegisteredOp, SendStream, SendValue, Store,
};
use ioswitch_core::error::{Result, SwitchError};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

/// Field carrying the op kind in the serialized form.
pub const OP_TAG: &str = "type";

type DecodeFn = fn(Value) -> Result<Box<dyn Op>>;

/// Maps op kind tags to decoders.
#[derive(Debug, Default, Clone)]
pub struct OpRegistry {
    decoders: HashMap<&'static str, DecodeFn>,
}

impl OpRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry knowing every built-in op kind.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register::<DropStream>();
        registry.register::<OnStreamBegin>();
        registry.register::<OnStreamEnd>();
        registry.register::<SendStream>();
        registry.register::<SendValue>();
        registry.register::<GetStream>();
        registry.register::<GetValue>();
        registry.register::<Store>();
        registry.register::<ConstValue>();
        registry.register::<Broadcast>();
        registry.register::<HoldUntil>();
        registry.register::<HangUntil>();
        registry
    }

    /// Register an op kind. Re-registering a tag replaces its decoder.
    pub fn register<T: Op + RegisteredOp>(&mut self) {
        self.decoders.insert(T::KIND, decode_as::<T>);
    }

    /// Whether a decoder exists for `kind`.
    pub fn contains(&self, kind: &str) -> bool {
        self.decoders.contains_key(kind)
    }

    /// Decode a tagged op.
    pub fn decode(&self, value: Value) -> Result<Box<dyn Op>> {
        let (decoder, fields) = self.resolve(value)?;
        decoder(fields)
    }

    /// Split the tag off and find its decoder.
    fn resolve(&self, value: Value) -> Result<(DecodeFn, Value)> {
        let Value::Object(mut fields) = value else {
            return Err(SwitchError::Serialization(
                "op must be encoded as an object".to_string(),
            ));
        };
        let kind = match fields.remove(OP_TAG) {
            Some(Value::String(kind)) => kind,
            _ => {
                return Err(SwitchError::Serialization(format!(
                    "op is missing its '{}' tag",
                    OP_TAG
                )));
            }
        };
        let decoder = self
            .decoders
            .get(kind.as_str())
            .copied()
            .ok_or(SwitchError::UnknownOpKind { kind })?;
        Ok((decoder, Value::Object(fields)))
    }
}

fn decode_as<T: Op + RegisteredOp>(value: Value) -> Result<Box<dyn Op>> {
    let op: T = serde_json::from_value(value)?;
    Ok(Box::new(op))
}

static GLOBAL: Lazy<RwLock<OpRegistry>> = Lazy::new(|| RwLock::new(OpRegistry::with_builtins()));

/// Register an op kind with the process-wide registry used by plan decoding.
pub fn register_op<T: Op + RegisteredOp>() {
    GLOBAL.write().register::<T>();
}

/// Decode a tagged op through the process-wide registry.
pub fn decode_op(value: Value) -> Result<Box<dyn Op>> {
    // Nested ops decode through here again; the lock is released first.
    let (decoder, fields) = GLOBAL.read().resolve(value)?;
    decoder(fields)
}

/// Encode an op as a tagged JSON object.
pub fn encode_op(op: &dyn Op) -> Result<Value> {
    match op.encode()? {
        Value::Object(mut fields) => {
            fields.insert(OP_TAG.to_string(), Value::String(op.kind().to_string()));
            Ok(Value::Object(fields))
        }
        _ => Err(SwitchError::Serialization(format!(
            "op '{}' did not encode to an object",
            op.kind()
        ))),
    }
}

/// Serde adapters for fields holding ops.
pub mod codec {
    use super::{decode_op, encode_op};
    use crate::ops::Op;
    use serde::de::Error as _;
    use serde::ser::{Error as _, SerializeSeq};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::sync::Arc;

    /// `#[serde(with = "codec::boxed")]` for `Box<dyn Op>`.
    pub mod boxed {
        use super::*;

        /// Serialize a boxed op as a tagged object.
        #[allow(clippy::borrowed_box)]
        pub fn serialize<S: Serializer>(op: &Box<dyn Op>, s: S) -> Result<S::Ok, S::Error> {
            encode_op(op.as_ref())
                .map_err(S::Error::custom)?
                .serialize(s)
        }

        /// Deserialize a tagged object into a boxed op.
        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Box<dyn Op>, D::Error> {
            let value = serde_json::Value::deserialize(d)?;
            decode_op(value).map_err(D::Error::custom)
        }
    }

    /// `#[serde(with = "codec::list")]` for `Vec<Arc<dyn Op>>`.
    pub mod list {
        use super::*;

        /// Serialize a list of ops as tagged objects.
        #[allow(clippy::ptr_arg)]
        pub fn serialize<S: Serializer>(ops: &Vec<Arc<dyn Op>>, s: S) -> Result<S::Ok, S::Error> {
            let mut seq = s.serialize_seq(Some(ops.len()))?;
            for op in ops {
                let value = encode_op(op.as_ref()).map_err(S::Error::custom)?;
                seq.serialize_element(&value)?;
            }
            seq.end()
        }

        /// Deserialize a list of tagged objects into ops.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Vec<Arc<dyn Op>>, D::Error> {
            let raw = Vec::<serde_json::Value>::deserialize(d)?;
            raw.into_iter()
                .map(|value| decode_op(value).map(Arc::from).map_err(D::Error::custom))
                .collect()
        }
    }
}
