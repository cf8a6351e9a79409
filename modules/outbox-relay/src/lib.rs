//! Outbox relay service
//!
//! Wires a Postgres outbox store, an event bus and the outbox processor
//! together and runs the processor until shutdown.

pub mod config;

use event_bus::{EventBus, InMemoryBus, NatsBus};
use outbox::{BusEventProducer, EventProducer, LoggingEventProducer};
use std::sync::Arc;

use crate::config::{BusType, Config, ProducerType};

/// Connect the configured event bus
pub async fn connect_bus(config: &Config) -> Result<Arc<dyn EventBus>, async_nats::ConnectError> {
    match config.bus_type {
        BusType::InMemory => {
            tracing::info!("Using InMemory event bus");
            Ok(Arc::new(InMemoryBus::new()))
        }
        BusType::Nats => {
            tracing::info!("Connecting to NATS at {}", config.nats_url);
            let client = async_nats::connect(&config.nats_url).await?;
            Ok(Arc::new(NatsBus::new(client)))
        }
    }
}

pub fn build_producer(config: &Config, bus: Arc<dyn EventBus>) -> Arc<dyn EventProducer> {
    match config.producer_type {
        ProducerType::Logging => {
            tracing::warn!("Using logging producer; records will not reach a broker");
            Arc::new(LoggingEventProducer::new())
        }
        ProducerType::Bus => Arc::new(BusEventProducer::new(bus)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(producer_type: ProducerType) -> Config {
        Config {
            database_url: "postgres://localhost/outbox".to_string(),
            bus_type: BusType::InMemory,
            producer_type,
            nats_url: "nats://localhost:4222".to_string(),
        }
    }

    #[tokio::test]
    async fn test_inmemory_bus_needs_no_connection() {
        let bus = connect_bus(&config(ProducerType::Bus)).await.unwrap();
        bus.publish("outbox.test", b"{}".to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn test_bus_producer_publishes_to_topic() {
        use futures::StreamExt;
        use std::collections::HashMap;

        let config = config(ProducerType::Bus);
        let bus = connect_bus(&config).await.unwrap();
        let mut stream = bus.subscribe("user.registered.v1").await.unwrap();

        let producer = build_producer(&config, bus);
        producer
            .send_kafka("user.registered.v1", Some("k1"), "{}", &HashMap::new())
            .await
            .unwrap();

        let msg = stream.next().await.unwrap();
        assert_eq!(msg.payload, b"{}".to_vec());
    }
}
