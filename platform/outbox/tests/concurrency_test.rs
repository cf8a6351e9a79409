//! Single-flight ticks, optimistic conflicts and the status invariants under
//! randomized failures.

mod common;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::{kafka_record, RacingStore, ScriptedProducer};
use event_bus::Headers;
use outbox::{
    EventProducer, InMemoryOutboxStore, OutboxConfig, OutboxProcessor, OutboxStatus, OutboxStore,
    ProducerError,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Blocks inside the first send until released
struct GateProducer {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl EventProducer for GateProducer {
    async fn send_kafka(
        &self,
        _topic: &str,
        _key: Option<&str>,
        _body: &str,
        _headers: &Headers,
    ) -> Result<(), ProducerError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }

    async fn send_rabbit(
        &self,
        exchange: &str,
        _routing_key: Option<&str>,
        body: &str,
        headers: &Headers,
    ) -> Result<(), ProducerError> {
        self.send_kafka(exchange, None, body, headers).await
    }
}

/// Fails at random with a fixed seed
struct CoinFlipProducer {
    rng: Mutex<StdRng>,
    failure_rate: f64,
}

#[async_trait]
impl EventProducer for CoinFlipProducer {
    async fn send_kafka(
        &self,
        topic: &str,
        _key: Option<&str>,
        _body: &str,
        _headers: &Headers,
    ) -> Result<(), ProducerError> {
        let fail = self.rng.lock().unwrap().gen_bool(self.failure_rate);
        if fail {
            Err(ProducerError::Rejected(format!("{topic} unavailable")))
        } else {
            Ok(())
        }
    }

    async fn send_rabbit(
        &self,
        exchange: &str,
        _routing_key: Option<&str>,
        body: &str,
        headers: &Headers,
    ) -> Result<(), ProducerError> {
        self.send_kafka(exchange, None, body, headers).await
    }
}

#[tokio::test]
async fn test_overlapping_tick_is_skipped() {
    let store = Arc::new(InMemoryOutboxStore::new());
    store.insert(kafka_record("t1", None, "{}")).await.unwrap();
    let producer = Arc::new(GateProducer {
        entered: Notify::new(),
        release: Notify::new(),
    });
    let processor = Arc::new(
        OutboxProcessor::new(store.clone(), producer.clone(), OutboxConfig::default()).unwrap(),
    );

    let running = {
        let processor = processor.clone();
        tokio::spawn(async move { processor.tick().await })
    };
    producer.entered.notified().await;

    let overlapping = processor.tick().await.unwrap();
    assert!(overlapping.is_none(), "second tick must not run while the first is in flight");

    producer.release.notify_one();
    let first = running.await.unwrap().unwrap().expect("first tick ran");
    assert_eq!(first.selected, 1);
    assert_eq!(first.sent, 1);

    let after = processor.tick().await.unwrap().expect("guard released");
    assert!(after.is_idle());
}

#[tokio::test]
async fn test_conflicting_save_leaves_record_for_next_tick() {
    let store = Arc::new(RacingStore::new());
    let record = store.insert(kafka_record("t1", None, "{}")).await.unwrap();
    let producer = Arc::new(ScriptedProducer::always_ok());
    let processor =
        OutboxProcessor::new(store.clone(), producer.clone(), OutboxConfig::default()).unwrap();

    let lost = processor.tick().await.unwrap().unwrap();
    assert_eq!(lost.sent, 1);
    assert_eq!(lost.conflicts, 1);

    let untouched = store.get(record.id()).await.unwrap().unwrap();
    assert_eq!(untouched.status(), OutboxStatus::Pending);
    assert_eq!(untouched.retry_count(), 0);

    store.racing.store(false, Ordering::SeqCst);
    let won = processor.tick().await.unwrap().unwrap();
    assert_eq!(won.sent, 1);
    assert_eq!(won.conflicts, 0);
    assert_eq!(
        store.get(record.id()).await.unwrap().unwrap().status(),
        OutboxStatus::Sent
    );

    // At-least-once: the lost race already reached the broker once.
    assert_eq!(producer.accepted().len(), 2);
}

#[tokio::test]
async fn test_status_invariants_hold_under_random_failures() {
    let store = Arc::new(InMemoryOutboxStore::new());
    for i in 0..40 {
        store
            .insert(kafka_record(&format!("topic-{i}"), None, "{}"))
            .await
            .unwrap();
    }
    let producer = Arc::new(CoinFlipProducer {
        rng: Mutex::new(StdRng::seed_from_u64(2026)),
        failure_rate: 0.6,
    });
    let config = OutboxConfig {
        max_attempts: 4,
        batch_size: 15,
        ..OutboxConfig::default()
    };
    let max_attempts = config.max_attempts;
    let processor = OutboxProcessor::new(store.clone(), producer, config).unwrap();

    let mut now = Utc::now();
    let mut terminal = HashMap::new();

    for _ in 0..60 {
        processor.tick_at(now).await.unwrap();
        // Past the backoff cap, so every FAILED record is due again.
        now += Duration::seconds(400);

        for record in store.snapshot().await {
            assert_eq!(
                record.retry_count() >= max_attempts,
                record.status() == OutboxStatus::Dead,
                "record {} violates the dead-iff-exhausted rule",
                record.id()
            );
            assert!(record.retry_count() >= 0 && record.retry_count() <= max_attempts);
            if record.status() == OutboxStatus::Sent {
                let sent_at = record.sent_at().expect("SENT records have sent_at");
                assert!(sent_at >= record.created_at());
            } else {
                assert!(record.sent_at().is_none());
            }

            if let Some(previous) = terminal.get(&record.id()) {
                assert_eq!(&record, previous, "terminal record {} changed", record.id());
            } else if record.status().is_terminal() {
                terminal.insert(record.id(), record.clone());
            }
        }
    }

    assert_eq!(terminal.len(), 40, "every record reaches SENT or DEAD");
}
