//! # Event Envelope
//!
//! Versioned wrapper for every domain event handed to a broker.
//!
//! ## Wire Format
//!
//! ```json
//! {
//!   "id": "1f0c…",
//!   "type": "UserRegisteredEvent",
//!   "version": 1,
//!   "occurredAt": "2026-10-18T09:30:00Z",
//!   "producer": { "service": "user-service", "host": "pod-1", "env": "prod" },
//!   "trace": { "traceId": "…", "correlationId": "…" },
//!   "routing": {
//!     "broker": "KAFKA",
//!     "kafka": { "topic": "user.registered.v1", "key": "user-1" },
//!     "rabbit": { "exchange": "user.registered.v1", "routingKey": null }
//!   },
//!   "payload": { "userId": "user-1" }
//! }
//! ```
//!
//! An envelope is immutable once built: fields are only reachable through
//! accessors, and the only transformation is [`Envelope::map_payload`], which
//! produces a new envelope with the same metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Broker family a message is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BrokerKind {
    Kafka,
    Rabbit,
}

impl BrokerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerKind::Kafka => "KAFKA",
            BrokerKind::Rabbit => "RABBIT",
        }
    }
}

impl fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown broker kind: {0}")]
pub struct ParseBrokerKindError(pub String);

impl FromStr for BrokerKind {
    type Err = ParseBrokerKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "KAFKA" => Ok(BrokerKind::Kafka),
            "RABBIT" | "RABBITMQ" => Ok(BrokerKind::Rabbit),
            other => Err(ParseBrokerKindError(other.to_string())),
        }
    }
}

/// Static description of the service that produced an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerInfo {
    pub service: String,
    pub host: String,
    pub env: String,
}

impl ProducerInfo {
    pub fn new(
        service: impl Into<String>,
        host: impl Into<String>,
        env: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            host: host.into(),
            env: env.into(),
        }
    }
}

/// Trace and correlation identifiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceInfo {
    pub trace_id: String,
    pub correlation_id: String,
}

impl TraceInfo {
    /// Fresh, random trace and correlation ids
    pub fn generate() -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            correlation_id: Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KafkaRouting {
    pub topic: String,
    /// Partition key
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RabbitRouting {
    pub exchange: String,
    pub routing_key: Option<String>,
}

/// Broker routing metadata carried inside the envelope
///
/// `broker` says where the message actually goes. Both sections are filled
/// from the same destination name so a consumer can read either one; a
/// section may still be `null` in envelopes from other producers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routing {
    pub broker: BrokerKind,
    #[serde(default)]
    pub kafka: Option<KafkaRouting>,
    #[serde(default)]
    pub rabbit: Option<RabbitRouting>,
}

impl Routing {
    /// `destination` is the Kafka topic and the Rabbit exchange
    pub fn new(
        broker: BrokerKind,
        destination: impl Into<String>,
        partition_key: Option<String>,
        routing_key: Option<String>,
    ) -> Self {
        let destination = destination.into();
        Self {
            broker,
            kafka: Some(KafkaRouting {
                topic: destination.clone(),
                key: partition_key,
            }),
            rabbit: Some(RabbitRouting {
                exchange: destination,
                routing_key,
            }),
        }
    }

    pub fn kafka(topic: impl Into<String>, key: Option<String>) -> Self {
        Self::new(BrokerKind::Kafka, topic, key, None)
    }

    pub fn rabbit(exchange: impl Into<String>, routing_key: Option<String>) -> Self {
        Self::new(BrokerKind::Rabbit, exchange, None, routing_key)
    }
}

/// Standard event envelope
///
/// # Examples
///
/// ```rust
/// use event_bus::{Envelope, ProducerInfo, Routing};
/// use serde_json::json;
///
/// let envelope = Envelope::new(
///     "UserRegisteredEvent",
///     1,
///     ProducerInfo::new("user-service", "host-1", "local"),
///     Routing::kafka("user.registered.v1", Some("user-1".to_string())),
///     json!({"userId": "user-1"}),
/// );
///
/// assert_eq!(envelope.event_type(), "UserRegisteredEvent");
/// assert_eq!(envelope.version(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<P> {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    version: i32,
    occurred_at: DateTime<Utc>,
    producer: ProducerInfo,
    trace: TraceInfo,
    routing: Routing,
    payload: P,
}

impl<P> Envelope<P> {
    /// Build an envelope with a new id, `occurred_at = now` and fresh trace ids
    pub fn new(
        event_type: impl Into<String>,
        version: i32,
        producer: ProducerInfo,
        routing: Routing,
        payload: P,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            version,
            occurred_at: Utc::now(),
            producer,
            trace: TraceInfo::generate(),
            routing,
            payload,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn producer(&self) -> &ProducerInfo {
        &self.producer
    }

    pub fn trace(&self) -> &TraceInfo {
        &self.trace
    }

    pub fn routing(&self) -> &Routing {
        &self.routing
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Same metadata, different payload representation
    pub fn map_payload<Q>(self, f: impl FnOnce(P) -> Q) -> Envelope<Q> {
        Envelope {
            id: self.id,
            event_type: self.event_type,
            version: self.version,
            occurred_at: self.occurred_at,
            producer: self.producer,
            trace: self.trace,
            routing: self.routing,
            payload: f(self.payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn producer() -> ProducerInfo {
        ProducerInfo::new("user-service", "host-1", "local")
    }

    #[test]
    fn test_envelope_creation() {
        let envelope = Envelope::new(
            "UserRegisteredEvent",
            2,
            producer(),
            Routing::kafka("user.registered.v1", None),
            json!({"userId": "u-1"}),
        );

        assert_eq!(envelope.event_type(), "UserRegisteredEvent");
        assert_eq!(envelope.version(), 2);
        assert!(Uuid::parse_str(envelope.id()).is_ok());
        assert!(Uuid::parse_str(&envelope.trace().trace_id).is_ok());
        assert_ne!(envelope.trace().trace_id, envelope.trace().correlation_id);
    }

    #[test]
    fn test_ids_are_unique_per_envelope() {
        let a = Envelope::new("E", 1, producer(), Routing::kafka("t", None), ());
        let b = Envelope::new("E", 1, producer(), Routing::kafka("t", None), ());
        assert_ne!(a.id(), b.id());
        assert_ne!(a.trace().trace_id, b.trace().trace_id);
    }

    #[test]
    fn test_wire_field_names() {
        let envelope = Envelope::new(
            "UserRegisteredEvent",
            1,
            producer(),
            Routing::rabbit("user.events", Some("user.registered".to_string())),
            json!({"userId": "u-1"}),
        );

        let value: Value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["type"], "UserRegisteredEvent");
        assert_eq!(value["version"], 1);
        assert!(value["occurredAt"].is_string());
        assert_eq!(value["producer"]["service"], "user-service");
        assert!(value["trace"]["traceId"].is_string());
        assert!(value["trace"]["correlationId"].is_string());
        assert_eq!(value["routing"]["broker"], "RABBIT");
        assert_eq!(value["routing"]["rabbit"]["exchange"], "user.events");
        assert_eq!(value["routing"]["rabbit"]["routingKey"], "user.registered");
        assert_eq!(value["routing"]["kafka"]["topic"], "user.events");
        assert!(value["routing"]["kafka"]["key"].is_null());
        assert_eq!(value["payload"]["userId"], "u-1");
    }

    #[test]
    fn test_routing_fills_both_sections() {
        let routing = Routing::new(
            BrokerKind::Kafka,
            "user.registered.v1",
            Some("user-1".to_string()),
            Some("user.registered".to_string()),
        );
        assert_eq!(routing.broker, BrokerKind::Kafka);
        assert_eq!(
            routing.kafka,
            Some(KafkaRouting {
                topic: "user.registered.v1".to_string(),
                key: Some("user-1".to_string()),
            })
        );
        assert_eq!(
            routing.rabbit,
            Some(RabbitRouting {
                exchange: "user.registered.v1".to_string(),
                routing_key: Some("user.registered".to_string()),
            })
        );
    }

    #[test]
    fn test_routing_tolerates_missing_section() {
        let routing: Routing = serde_json::from_value(json!({
            "broker": "KAFKA",
            "kafka": {"topic": "t1", "key": null}
        }))
        .unwrap();
        assert_eq!(routing.kafka.unwrap().topic, "t1");
        assert!(routing.rabbit.is_none());
    }

    #[test]
    fn test_map_payload_keeps_metadata() {
        let envelope = Envelope::new("E", 3, producer(), Routing::kafka("t", None), 41);
        let id = envelope.id().to_string();
        let trace = envelope.trace().clone();

        let mapped = envelope.map_payload(|n| n + 1);
        assert_eq!(mapped.id(), id);
        assert_eq!(mapped.trace(), &trace);
        assert_eq!(mapped.version(), 3);
        assert_eq!(*mapped.payload(), 42);
    }

    #[test]
    fn test_broker_kind_parsing() {
        assert_eq!("KAFKA".parse::<BrokerKind>().unwrap(), BrokerKind::Kafka);
        assert_eq!("rabbit".parse::<BrokerKind>().unwrap(), BrokerKind::Rabbit);
        assert_eq!("RabbitMQ".parse::<BrokerKind>().unwrap(), BrokerKind::Rabbit);
        assert!("sqs".parse::<BrokerKind>().is_err());
        assert_eq!(BrokerKind::Kafka.to_string(), "KAFKA");
    }
}
