//! # Transactional Outbox
//!
//! Events are written to an outbox table in the same transaction as the
//! business change, then relayed to the broker by a background processor.
//! Delivery is at-least-once; consumers must tolerate duplicates.
//!
//! - [`DomainEventPublisher`]: envelope + serialize + stage one record per event
//! - [`OutboxStore`]: durable records; [`PgOutboxStore`] for Postgres,
//!   [`InMemoryOutboxStore`] for tests and local runs
//! - [`OutboxProcessor`]: polls, sends, retries with [`BackoffPolicy`],
//!   dead-letters exhausted records
//! - [`EventProducer`]: the broker seam; [`BusEventProducer`] publishes through
//!   an `event_bus::EventBus`, [`LoggingEventProducer`] only logs
//!
//! ## Usage
//!
//! ```rust,no_run
//! use outbox::{
//!     DomainEvent, DomainEventPublisher, InMemoryOutboxStore, LoggingEventProducer,
//!     OutboxConfig, OutboxProcessor, RoutingOptions,
//! };
//! use event_bus::{BrokerKind, ProducerInfo};
//! use std::sync::Arc;
//!
//! #[derive(serde::Serialize)]
//! struct UserRegisteredEvent { user_id: String }
//!
//! impl DomainEvent for UserRegisteredEvent {
//!     fn broker_kind(&self) -> BrokerKind { BrokerKind::Kafka }
//!     fn destination(&self) -> &str { "user.registered.v1" }
//!     fn version(&self) -> i32 { 1 }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryOutboxStore::new());
//! let publisher = DomainEventPublisher::new(
//!     store.clone(),
//!     ProducerInfo::new("user-service", "host-1", "local"),
//! );
//! let event = UserRegisteredEvent { user_id: "u-1".into() };
//! publisher
//!     .publish_with(&event, &RoutingOptions::new().with_partition_key("u-1"))
//!     .await?;
//!
//! let processor = OutboxProcessor::new(
//!     store,
//!     Arc::new(LoggingEventProducer::new()),
//!     OutboxConfig::default(),
//! )?;
//! processor.tick().await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod db;
pub mod error;
pub mod pg_store;
pub mod processor;
pub mod producer;
pub mod publisher;
pub mod record;
pub mod store;

pub use backoff::{BackoffPolicy, MAX_BACKOFF_SECS};
pub use config::{producer_info_from_env, BackoffConfig, DeadLetterConfig, OutboxConfig};
pub use error::{OutboxError, OutboxResult, ProducerError};
pub use pg_store::{enqueue_in_tx, PgOutboxStore};
pub use processor::{OutboxProcessor, TickSummary};
pub use producer::{BusEventProducer, EventProducer, LoggingEventProducer};
pub use publisher::{DomainEvent, DomainEventPublisher, RoutingOptions};
pub use record::{Destination, NewOutboxRecord, OutboxId, OutboxRecord, OutboxStatus};
pub use store::{InMemoryOutboxStore, OutboxStore, SaveOutcome};
