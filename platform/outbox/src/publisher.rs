//! Domain event publisher
//!
//! Wraps a domain event in an [`Envelope`], serializes it and stages exactly
//! one outbox record. Nothing is sent to a broker here; the processor does
//! that later.

use event_bus::{BrokerKind, Envelope, ProducerInfo, Routing};
use serde::Serialize;
use std::sync::Arc;

use crate::error::OutboxResult;
use crate::record::{Destination, NewOutboxRecord, OutboxRecord};
use crate::store::OutboxStore;

/// An event that can go through the outbox
///
/// The whole event value becomes the envelope payload.
pub trait DomainEvent: Serialize + Send + Sync {
    fn broker_kind(&self) -> BrokerKind;

    /// Kafka topic or Rabbit exchange
    fn destination(&self) -> &str;

    /// Bumped on breaking payload changes
    fn version(&self) -> i32;

    /// Envelope `type`; the type's own name unless overridden
    fn event_type(&self) -> String
    where
        Self: Sized,
    {
        short_type_name::<Self>().to_string()
    }
}

/// Per-call routing overrides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingOptions {
    /// Kafka partition key; stored as the record's message key
    pub partition_key: Option<String>,
    pub routing_key: Option<String>,
}

impl RoutingOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    pub fn with_routing_key(mut self, key: impl Into<String>) -> Self {
        self.routing_key = Some(key.into());
        self
    }
}

pub struct DomainEventPublisher {
    store: Arc<dyn OutboxStore>,
    producer: ProducerInfo,
}

impl DomainEventPublisher {
    pub fn new(store: Arc<dyn OutboxStore>, producer: ProducerInfo) -> Self {
        Self { store, producer }
    }

    pub fn producer(&self) -> &ProducerInfo {
        &self.producer
    }

    pub async fn publish<E: DomainEvent>(&self, event: &E) -> OutboxResult<OutboxRecord> {
        self.publish_with(event, &RoutingOptions::default()).await
    }

    /// Stage the event and insert it into the store
    ///
    /// A serialization failure is not an error here: it is persisted as a
    /// FAILED record without an envelope.
    pub async fn publish_with<E: DomainEvent>(
        &self,
        event: &E,
        options: &RoutingOptions,
    ) -> OutboxResult<OutboxRecord> {
        let record = self.stage(event, options);
        self.store.insert(record).await
    }

    /// Build the outbox record for `event` without persisting it
    ///
    /// Use with `enqueue_in_tx` to commit the record in the same transaction
    /// as the business change.
    pub fn stage<E: DomainEvent>(&self, event: &E, options: &RoutingOptions) -> NewOutboxRecord {
        let event_type = event.event_type();
        let destination = match event.broker_kind() {
            BrokerKind::Kafka => Destination::kafka(event.destination()),
            BrokerKind::Rabbit => {
                Destination::rabbit(event.destination(), options.routing_key.clone())
            }
        };
        let routing = Routing::new(
            event.broker_kind(),
            event.destination(),
            options.partition_key.clone(),
            options.routing_key.clone(),
        );

        let envelope = Envelope::new(
            event_type.as_str(),
            event.version(),
            self.producer.clone(),
            routing,
            event,
        );

        match serde_json::to_string(&envelope) {
            Ok(json) => {
                tracing::debug!(
                    envelope_id = %envelope.id(),
                    event_type = %event_type,
                    destination = %destination,
                    "Event staged for outbox"
                );
                NewOutboxRecord::pending(destination, options.partition_key.clone(), json)
            }
            Err(e) => {
                tracing::error!(
                    event_type = %event_type,
                    destination = %destination,
                    error = %e,
                    "Envelope serialization failed, recording FAILED outbox entry"
                );
                NewOutboxRecord::serialization_failed(destination, options.partition_key.clone(), e)
            }
        }
    }
}

/// Last path segment of a type name, without generic arguments
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
