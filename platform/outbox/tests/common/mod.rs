//! Shared fixtures for outbox integration tests
//!
//! `ScriptedProducer` records every send attempt and fails on demand.
//! `RacingStore` simulates a second processor instance saving the same
//! records between selection and persistence.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_bus::Headers;
use outbox::{
    Destination, InMemoryOutboxStore, NewOutboxRecord, OutboxId, OutboxRecord, OutboxResult,
    OutboxStore, ProducerError, SaveOutcome,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct SendAttempt {
    pub destination: Destination,
    pub key: Option<String>,
    pub body: String,
    pub headers: Headers,
    pub accepted: bool,
}

pub fn is_dead_letter(destination: &Destination) -> bool {
    match destination {
        Destination::Kafka { topic } => topic.ends_with(".DLQ"),
        Destination::Rabbit { routing_key, .. } => routing_key
            .as_deref()
            .map_or(false, |rk| rk.ends_with(".dlq")),
    }
}

#[derive(Debug, Default)]
pub struct ScriptedProducer {
    /// The first N calls fail
    failures_left: AtomicUsize,
    fail_always: bool,
    /// Fail only sends to primary (non dead-letter) destinations
    fail_primary_only: bool,
    attempts: Mutex<Vec<SendAttempt>>,
}

impl ScriptedProducer {
    pub fn always_ok() -> Self {
        Self::default()
    }

    pub fn always_failing() -> Self {
        Self {
            fail_always: true,
            ..Self::default()
        }
    }

    pub fn failing_first(n: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(n),
            ..Self::default()
        }
    }

    /// Primary sends fail, dead-letter forwards succeed
    pub fn failing_primary() -> Self {
        Self {
            fail_primary_only: true,
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> Vec<SendAttempt> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempts_to(&self, destination: &Destination) -> Vec<SendAttempt> {
        self.attempts()
            .into_iter()
            .filter(|a| &a.destination == destination)
            .collect()
    }

    pub fn accepted(&self) -> Vec<SendAttempt> {
        self.attempts().into_iter().filter(|a| a.accepted).collect()
    }

    fn should_fail(&self, destination: &Destination) -> bool {
        if self.fail_always {
            return true;
        }
        if self.fail_primary_only {
            return !is_dead_letter(destination);
        }
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn attempt(
        &self,
        destination: Destination,
        key: Option<&str>,
        body: &str,
        headers: &Headers,
    ) -> Result<(), ProducerError> {
        let fail = self.should_fail(&destination);
        self.attempts.lock().unwrap().push(SendAttempt {
            destination: destination.clone(),
            key: key.map(str::to_string),
            body: body.to_string(),
            headers: headers.clone(),
            accepted: !fail,
        });
        if fail {
            Err(ProducerError::Rejected(format!("broker unavailable for {destination}")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl outbox::EventProducer for ScriptedProducer {
    async fn send_kafka(
        &self,
        topic: &str,
        key: Option<&str>,
        body: &str,
        headers: &Headers,
    ) -> Result<(), ProducerError> {
        self.attempt(Destination::kafka(topic), key, body, headers)
    }

    async fn send_rabbit(
        &self,
        exchange: &str,
        routing_key: Option<&str>,
        body: &str,
        headers: &Headers,
    ) -> Result<(), ProducerError> {
        self.attempt(
            Destination::rabbit(exchange, routing_key.map(str::to_string)),
            None,
            body,
            headers,
        )
    }
}

/// Store whose records are re-saved by a "rival" right after selection
#[derive(Debug, Default)]
pub struct RacingStore {
    pub inner: InMemoryOutboxStore,
    pub racing: AtomicBool,
}

impl RacingStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryOutboxStore::new(),
            racing: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl OutboxStore for RacingStore {
    async fn insert(&self, record: NewOutboxRecord) -> OutboxResult<OutboxRecord> {
        self.inner.insert(record).await
    }

    async fn find_processable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> OutboxResult<Vec<OutboxRecord>> {
        let selected = self.inner.find_processable(now, limit).await?;
        if self.racing.load(Ordering::SeqCst) {
            self.inner.save_all(&selected).await?;
        }
        Ok(selected)
    }

    async fn save_all(&self, records: &[OutboxRecord]) -> OutboxResult<Vec<SaveOutcome>> {
        self.inner.save_all(records).await
    }

    async fn get(&self, id: OutboxId) -> OutboxResult<Option<OutboxRecord>> {
        self.inner.get(id).await
    }
}

pub fn kafka_record(topic: &str, key: Option<&str>, body: &str) -> NewOutboxRecord {
    NewOutboxRecord::pending(Destination::kafka(topic), key.map(str::to_string), body.to_string())
}
