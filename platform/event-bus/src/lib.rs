//! # Event Bus and Envelope Contract
//!
//! Shared messaging primitives used on both sides of the outbox:
//!
//! - **Envelope**: the versioned wrapper every domain event travels in
//! - **Headers**: best-effort per-message headers derived from an envelope
//! - **PayloadTypeRegistry**: `(type, version)` → payload shape, consulted on decode
//! - **EnvelopeDeserializer**: typed → generic map → raw text decode with graceful fallback
//! - **EventBus**: transport abstraction with NATS (production) and in-memory (dev/test) backends
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{EnvelopeDeserializer, EventBus, InMemoryBus, PayloadTypeRegistry};
//! use std::sync::Arc;
//!
//! # #[derive(serde::Deserialize)]
//! # struct UserRegistered { user_id: String }
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = PayloadTypeRegistry::new();
//! registry.register::<UserRegistered>("UserRegisteredEvent", 1);
//! let deserializer = EnvelopeDeserializer::new(Arc::new(registry));
//!
//! let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
//! let mut stream = bus.subscribe("user.registered.>").await?;
//! while let Some(msg) = futures::StreamExt::next(&mut stream).await {
//!     let envelope = deserializer.deserialize_message(&msg)?;
//!     println!("{} v{}", envelope.event_type(), envelope.version());
//! }
//! # Ok(())
//! # }
//! ```

mod deserializer;
mod envelope;
pub mod headers;
mod inmemory_bus;
mod nats_bus;
mod registry;

pub use deserializer::{DecodeError, DecodedEnvelope, DecodedPayload, EnvelopeDeserializer, TypedPayload};
pub use envelope::{
    BrokerKind, Envelope, KafkaRouting, ParseBrokerKindError, ProducerInfo, RabbitRouting, Routing,
    TraceInfo,
};
pub use headers::Headers;
pub use inmemory_bus::InMemoryBus;
pub use nats_bus::NatsBus;
pub use registry::{PayloadShape, PayloadTypeRegistry};

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;

/// A message received from the event bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The subject/topic this message was published to
    pub subject: String,
    /// The message payload (raw bytes)
    pub payload: Vec<u8>,
    /// Optional headers
    pub headers: Option<Headers>,
    /// Optional reply-to subject (for request-response patterns)
    pub reply_to: Option<String>,
}

impl BusMessage {
    /// Create a new bus message
    pub fn new(subject: String, payload: Vec<u8>) -> Self {
        Self {
            subject,
            payload,
            headers: None,
            reply_to: None,
        }
    }

    /// Add headers to the message
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Add a reply-to subject
    pub fn with_reply_to(mut self, reply_to: String) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    /// Look up a single header value
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|h| h.get(name))
            .map(String::as_str)
    }
}

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to subscribe to subject: {0}")]
    SubscribeError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Core event bus abstraction for publish-subscribe messaging
///
/// Implementations either accept a message as a whole or return an error;
/// there is no partial publish.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a message to a subject
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()>;

    /// Publish a message to a subject together with string headers
    async fn publish_with_headers(
        &self,
        subject: &str,
        payload: Vec<u8>,
        headers: Headers,
    ) -> BusResult<()>;

    /// Subscribe to messages matching a subject pattern
    ///
    /// Patterns support NATS wildcards:
    /// - `*` matches a single token (e.g., `user.*.created`)
    /// - `>` matches one or more tokens (e.g., `user.events.>`)
    async fn subscribe(&self, subject: &str) -> BusResult<BoxStream<'static, BusMessage>>;
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}
