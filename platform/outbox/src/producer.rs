//! Broker producers used by the outbox processor
//!
//! A send either completes (the broker accepted the message) or fails as a
//! whole; the processor treats every implementation the same way.

use async_trait::async_trait;
use event_bus::headers::MESSAGE_KEY;
use event_bus::{EventBus, Headers};
use std::sync::Arc;

use crate::error::ProducerError;
use crate::record::Destination;

const CONTENT_TYPE: &str = "Content-Type";

#[async_trait]
pub trait EventProducer: Send + Sync {
    async fn send_kafka(
        &self,
        topic: &str,
        key: Option<&str>,
        body: &str,
        headers: &Headers,
    ) -> Result<(), ProducerError>;

    async fn send_rabbit(
        &self,
        exchange: &str,
        routing_key: Option<&str>,
        body: &str,
        headers: &Headers,
    ) -> Result<(), ProducerError>;

    /// Route to `send_kafka` or `send_rabbit` by destination
    async fn send(
        &self,
        destination: &Destination,
        key: Option<&str>,
        body: &str,
        headers: &Headers,
    ) -> Result<(), ProducerError> {
        match destination {
            Destination::Kafka { topic } => self.send_kafka(topic, key, body, headers).await,
            Destination::Rabbit {
                exchange,
                routing_key,
            } => {
                self.send_rabbit(exchange, routing_key.as_deref(), body, headers)
                    .await
            }
        }
    }
}

/// Accepts everything and logs it; for local runs without a broker
#[derive(Debug, Clone, Default)]
pub struct LoggingEventProducer;

impl LoggingEventProducer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventProducer for LoggingEventProducer {
    async fn send_kafka(
        &self,
        topic: &str,
        key: Option<&str>,
        body: &str,
        headers: &Headers,
    ) -> Result<(), ProducerError> {
        tracing::info!(
            broker = "KAFKA",
            topic = %topic,
            key = ?key,
            headers = ?headers,
            body = %body,
            "LoggingProducer send"
        );
        Ok(())
    }

    async fn send_rabbit(
        &self,
        exchange: &str,
        routing_key: Option<&str>,
        body: &str,
        headers: &Headers,
    ) -> Result<(), ProducerError> {
        tracing::info!(
            broker = "RABBIT",
            exchange = %exchange,
            routing_key = ?routing_key,
            headers = ?headers,
            body = %body,
            "LoggingProducer send"
        );
        Ok(())
    }
}

/// Publishes through an [`EventBus`]
///
/// Kafka topics map to a subject of the same name. A Rabbit exchange and
/// routing key map to `exchange.routing_key`, or just `exchange` when there
/// is no key. The message key travels in the `X-Message-Key` header.
#[derive(Clone)]
pub struct BusEventProducer {
    bus: Arc<dyn EventBus>,
}

impl BusEventProducer {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    pub fn rabbit_subject(exchange: &str, routing_key: Option<&str>) -> String {
        match routing_key.filter(|rk| !rk.is_empty()) {
            Some(rk) => format!("{exchange}.{rk}"),
            None => exchange.to_string(),
        }
    }

    async fn publish(
        &self,
        subject: &str,
        key: Option<&str>,
        body: &str,
        headers: &Headers,
    ) -> Result<(), ProducerError> {
        let mut headers = headers.clone();
        headers.insert(CONTENT_TYPE.to_string(), "application/json".to_string());
        if let Some(key) = key {
            headers.insert(MESSAGE_KEY.to_string(), key.to_string());
        }

        self.bus
            .publish_with_headers(subject, body.as_bytes().to_vec(), headers)
            .await?;

        tracing::debug!(subject = %subject, key = ?key, "Outbox message published to bus");
        Ok(())
    }
}

#[async_trait]
impl EventProducer for BusEventProducer {
    async fn send_kafka(
        &self,
        topic: &str,
        key: Option<&str>,
        body: &str,
        headers: &Headers,
    ) -> Result<(), ProducerError> {
        self.publish(topic, key, body, headers).await
    }

    async fn send_rabbit(
        &self,
        exchange: &str,
        routing_key: Option<&str>,
        body: &str,
        headers: &Headers,
    ) -> Result<(), ProducerError> {
        let subject = Self::rabbit_subject(exchange, routing_key);
        self.publish(&subject, None, body, headers).await
    }
}
