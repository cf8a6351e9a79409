//! Payload type registry
//!
//! Maps `(event type, version)` to the concrete payload shape a consumer wants
//! on decode. Built once during startup (`&mut self` registration) and then
//! shared read-only behind an `Arc`, so lookups need no locking.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use crate::deserializer::TypedPayload;

type DecodeFn = fn(Value) -> Result<Box<dyn Any + Send + Sync>, serde_json::Error>;

/// Descriptor of a concrete payload type
#[derive(Clone, Copy)]
pub struct PayloadShape {
    type_id: TypeId,
    type_name: &'static str,
    decode: DecodeFn,
}

impl PayloadShape {
    pub fn of<T>() -> Self
    where
        T: DeserializeOwned + Any + Send + Sync,
    {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            decode: decode_as::<T>,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    pub(crate) fn decode(&self, payload: Value) -> Result<TypedPayload, serde_json::Error> {
        let value = (self.decode)(payload)?;
        Ok(TypedPayload::new(self.type_name, value))
    }
}

impl PartialEq for PayloadShape {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for PayloadShape {}

impl fmt::Debug for PayloadShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadShape")
            .field("type_name", &self.type_name)
            .finish()
    }
}

fn decode_as<T>(payload: Value) -> Result<Box<dyn Any + Send + Sync>, serde_json::Error>
where
    T: DeserializeOwned + Any + Send + Sync,
{
    let typed: T = serde_json::from_value(payload)?;
    Ok(Box::new(typed))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PayloadKey {
    event_type: String,
    version: i32,
}

/// `(type, version)` → [`PayloadShape`]; the last registration for a key wins
#[derive(Debug, Default)]
pub struct PayloadTypeRegistry {
    shapes: HashMap<PayloadKey, PayloadShape>,
}

impl PayloadTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` as the payload of `(event_type, version)`
    ///
    /// Returns `true` when the mapping changed. Registering the same type
    /// again for a key is a no-op; a different type replaces the old one.
    pub fn register<T>(&mut self, event_type: impl Into<String>, version: i32) -> bool
    where
        T: DeserializeOwned + Any + Send + Sync,
    {
        self.register_shape(event_type, version, PayloadShape::of::<T>())
    }

    pub fn register_shape(
        &mut self,
        event_type: impl Into<String>,
        version: i32,
        shape: PayloadShape,
    ) -> bool {
        let key = PayloadKey {
            event_type: event_type.into(),
            version,
        };
        match self.shapes.insert(key, shape) {
            Some(previous) => previous != shape,
            None => true,
        }
    }

    pub fn find(&self, event_type: &str, version: i32) -> Option<&PayloadShape> {
        self.shapes.get(&PayloadKey {
            event_type: event_type.to_string(),
            version,
        })
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}
