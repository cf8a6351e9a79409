//! Consumer-side envelope decoding
//!
//! Decoding degrades instead of dropping messages:
//!
//! 1. generic decode (payload as a JSON object) to learn `type` and `version`
//! 2. registry hit → payload decoded into the registered type
//! 3. registry miss, or the typed decode fails → the generic map is kept
//! 4. generic decode fails → payload kept as its raw JSON text
//! 5. nothing decodes → [`DecodeError`]

use serde_json::value::RawValue;
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::envelope::Envelope;
use crate::registry::PayloadTypeRegistry;
use crate::BusMessage;

/// Payload recovered into a registered concrete type
pub struct TypedPayload {
    type_name: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

impl TypedPayload {
    pub(crate) fn new(type_name: &'static str, value: Box<dyn Any + Send + Sync>) -> Self {
        Self { type_name, value }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Take ownership of the concrete payload, handing `self` back on a type mismatch
    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        let type_name = self.type_name;
        self.value
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|value| Self { type_name, value })
    }
}

impl fmt::Debug for TypedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedPayload")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum DecodedPayload {
    Typed(TypedPayload),
    Generic(Map<String, Value>),
    /// Payload as the raw JSON text it arrived with
    Raw(String),
}

impl DecodedPayload {
    pub fn as_typed(&self) -> Option<&TypedPayload> {
        match self {
            DecodedPayload::Typed(typed) => Some(typed),
            _ => None,
        }
    }

    pub fn as_generic(&self) -> Option<&Map<String, Value>> {
        match self {
            DecodedPayload::Generic(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> Option<&str> {
        match self {
            DecodedPayload::Raw(raw) => Some(raw),
            _ => None,
        }
    }
}

pub type DecodedEnvelope = Envelope<DecodedPayload>;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("message body is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Decodes envelopes against a shared [`PayloadTypeRegistry`]
#[derive(Debug, Clone)]
pub struct EnvelopeDeserializer {
    registry: Arc<PayloadTypeRegistry>,
}

impl EnvelopeDeserializer {
    pub fn new(registry: Arc<PayloadTypeRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &PayloadTypeRegistry {
        &self.registry
    }

    pub fn deserialize(&self, json: &str) -> Result<DecodedEnvelope, DecodeError> {
        let generic = match serde_json::from_str::<Envelope<Map<String, Value>>>(json) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "Envelope decode failed, falling back to raw payload");
                let raw: Envelope<Box<RawValue>> = serde_json::from_str(json)?;
                return Ok(raw.map_payload(|p| DecodedPayload::Raw(p.get().to_string())));
            }
        };

        let Some(shape) = self
            .registry
            .find(generic.event_type(), generic.version())
            .copied()
        else {
            return Ok(generic.map_payload(DecodedPayload::Generic));
        };

        match shape.decode(Value::Object(generic.payload().clone())) {
            Ok(typed) => Ok(generic.map_payload(|_| DecodedPayload::Typed(typed))),
            Err(e) => {
                tracing::warn!(
                    event_type = %generic.event_type(),
                    version = generic.version(),
                    payload_type = shape.type_name(),
                    error = %e,
                    "Typed payload decode failed, keeping generic map"
                );
                Ok(generic.map_payload(DecodedPayload::Generic))
            }
        }
    }

    pub fn deserialize_message(&self, msg: &BusMessage) -> Result<DecodedEnvelope, DecodeError> {
        let json = std::str::from_utf8(&msg.payload)?;
        self.deserialize(json)
    }
}
