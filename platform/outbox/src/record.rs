//! Outbox record and its dispatch state machine
//!
//! ```text
//!            send ok
//! PENDING ─────────────► SENT
//!    │                    ▲
//!    │ send failed        │ send ok
//!    ▼                    │
//!  FAILED ────────────────┘
//!    │ ▲
//!    │ └── send failed, retry_count < max_attempts
//!    ▼
//!  DEAD      (send failed, retry_count ≥ max_attempts)
//! ```
//!
//! SENT and DEAD are terminal. Records are only mutated through
//! [`OutboxRecord::mark_sent`] and [`OutboxRecord::record_failure`], which
//! refuse to touch a terminal record. The envelope has no setter at all.

use chrono::{DateTime, Utc};
use event_bus::BrokerKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::backoff::BackoffPolicy;
use crate::config::DeadLetterConfig;
use crate::error::{OutboxError, OutboxResult};

pub type OutboxId = i64;

/// Upper bound for the stored error summary, in characters
pub const MAX_ERROR_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Sent,
    Failed,
    Dead,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Sent => "SENT",
            OutboxStatus::Failed => "FAILED",
            OutboxStatus::Dead => "DEAD",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Sent | OutboxStatus::Dead)
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = OutboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "SENT" => Ok(OutboxStatus::Sent),
            "FAILED" => Ok(OutboxStatus::Failed),
            "DEAD" => Ok(OutboxStatus::Dead),
            other => Err(OutboxError::InvalidRecord(format!("unknown status {other:?}"))),
        }
    }
}

/// Where a record is sent; exactly one broker's fields exist
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Kafka {
        topic: String,
    },
    Rabbit {
        exchange: String,
        routing_key: Option<String>,
    },
}

impl Destination {
    pub fn kafka(topic: impl Into<String>) -> Self {
        Destination::Kafka {
            topic: topic.into(),
        }
    }

    pub fn rabbit(exchange: impl Into<String>, routing_key: Option<String>) -> Self {
        Destination::Rabbit {
            exchange: exchange.into(),
            routing_key,
        }
    }

    pub fn broker(&self) -> BrokerKind {
        match self {
            Destination::Kafka { .. } => BrokerKind::Kafka,
            Destination::Rabbit { .. } => BrokerKind::Rabbit,
        }
    }

    /// Original destination with the dead-letter suffix appended
    ///
    /// Kafka suffixes the topic. Rabbit keeps the exchange and suffixes the
    /// routing key, treating a missing key as empty.
    pub fn dead_letter(&self, config: &DeadLetterConfig) -> Destination {
        match self {
            Destination::Kafka { topic } => Destination::Kafka {
                topic: format!("{topic}{}", config.kafka_suffix),
            },
            Destination::Rabbit {
                exchange,
                routing_key,
            } => Destination::Rabbit {
                exchange: exchange.clone(),
                routing_key: Some(format!(
                    "{}{}",
                    routing_key.as_deref().unwrap_or_default(),
                    config.rabbit_suffix
                )),
            },
        }
    }

    /// Rebuild from the flat storage columns, enforcing the broker/column pairing
    pub fn from_columns(
        broker: BrokerKind,
        kafka_topic: Option<String>,
        rabbit_exchange: Option<String>,
        rabbit_routing_key: Option<String>,
    ) -> OutboxResult<Self> {
        match (broker, kafka_topic, rabbit_exchange) {
            (BrokerKind::Kafka, Some(topic), None) if rabbit_routing_key.is_none() => {
                Ok(Destination::Kafka { topic })
            }
            (BrokerKind::Rabbit, None, Some(exchange)) => Ok(Destination::Rabbit {
                exchange,
                routing_key: rabbit_routing_key,
            }),
            (broker, topic, exchange) => Err(OutboxError::InvalidRecord(format!(
                "{broker} record has kafka_topic={topic:?} rabbit_exchange={exchange:?}"
            ))),
        }
    }

    pub fn kafka_topic(&self) -> Option<&str> {
        match self {
            Destination::Kafka { topic } => Some(topic),
            Destination::Rabbit { .. } => None,
        }
    }

    pub fn rabbit_exchange(&self) -> Option<&str> {
        match self {
            Destination::Rabbit { exchange, .. } => Some(exchange),
            Destination::Kafka { .. } => None,
        }
    }

    pub fn rabbit_routing_key(&self) -> Option<&str> {
        match self {
            Destination::Rabbit { routing_key, .. } => routing_key.as_deref(),
            Destination::Kafka { .. } => None,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Kafka { topic } => write!(f, "kafka:{topic}"),
            Destination::Rabbit {
                exchange,
                routing_key,
            } => write!(
                f,
                "rabbit:{exchange}/{}",
                routing_key.as_deref().unwrap_or_default()
            ),
        }
    }
}

/// A record about to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxRecord {
    pub destination: Destination,
    pub message_key: Option<String>,
    pub envelope: Option<String>,
    pub status: OutboxStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewOutboxRecord {
    pub fn pending(
        destination: Destination,
        message_key: Option<String>,
        envelope_json: String,
    ) -> Self {
        Self {
            destination,
            message_key,
            envelope: Some(envelope_json),
            status: OutboxStatus::Pending,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    /// The envelope could not be encoded; keep a trace of the attempt
    pub fn serialization_failed(
        destination: Destination,
        message_key: Option<String>,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            destination,
            message_key,
            envelope: None,
            status: OutboxStatus::Failed,
            last_error: Some(truncate_error(&error.to_string())),
            created_at: Utc::now(),
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// A persisted outbox row
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRecord {
    pub(crate) id: OutboxId,
    pub(crate) destination: Destination,
    pub(crate) message_key: Option<String>,
    pub(crate) envelope: Option<String>,
    pub(crate) status: OutboxStatus,
    pub(crate) retry_count: i32,
    pub(crate) next_attempt_at: Option<DateTime<Utc>>,
    pub(crate) last_error: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) sent_at: Option<DateTime<Utc>>,
    pub(crate) version: i32,
}

impl OutboxRecord {
    pub(crate) fn from_new(id: OutboxId, new: NewOutboxRecord) -> Self {
        Self {
            id,
            destination: new.destination,
            message_key: new.message_key,
            envelope: new.envelope,
            status: new.status,
            retry_count: 0,
            next_attempt_at: None,
            last_error: new.last_error,
            created_at: new.created_at,
            updated_at: new.created_at,
            sent_at: None,
            version: 0,
        }
    }

    pub fn id(&self) -> OutboxId {
        self.id
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn broker(&self) -> BrokerKind {
        self.destination.broker()
    }

    pub fn message_key(&self) -> Option<&str> {
        self.message_key.as_deref()
    }

    pub fn envelope(&self) -> Option<&str> {
        self.envelope.as_deref()
    }

    pub fn status(&self) -> OutboxStatus {
        self.status
    }

    pub fn retry_count(&self) -> i32 {
        self.retry_count
    }

    pub fn next_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.next_attempt_at
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }

    /// Optimistic concurrency counter, bumped by every successful save
    pub fn version(&self) -> i32 {
        self.version
    }

    /// PENDING or FAILED, and due
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    fn ensure_open(&self) -> OutboxResult<()> {
        if self.status.is_terminal() {
            return Err(OutboxError::InvalidRecord(format!(
                "record {} is {} and cannot transition",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// PENDING/FAILED → SENT
    pub fn mark_sent(&mut self, now: DateTime<Utc>) -> OutboxResult<()> {
        self.ensure_open()?;
        self.status = OutboxStatus::Sent;
        self.sent_at = Some(now.max(self.created_at));
        self.updated_at = now;
        Ok(())
    }

    /// Count a failed attempt and schedule the next one
    ///
    /// Returns `true` when this failure exhausted the attempts and the record
    /// is now DEAD.
    pub fn record_failure(
        &mut self,
        now: DateTime<Utc>,
        error: &str,
        max_attempts: i32,
        backoff: &BackoffPolicy,
    ) -> OutboxResult<bool> {
        self.ensure_open()?;
        self.retry_count += 1;
        let dead = self.retry_count >= max_attempts;
        self.status = if dead {
            OutboxStatus::Dead
        } else {
            OutboxStatus::Failed
        };
        self.last_error = Some(truncate_error(error));
        // Saturate at the end of time rather than overflow.
        let next = now
            .checked_add_signed(backoff.delay(self.retry_count))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.next_attempt_at = Some(next);
        self.updated_at = now;
        Ok(dead)
    }
}

pub(crate) fn truncate_error(error: &str) -> String {
    error.chars().take(MAX_ERROR_LEN).collect()
}
