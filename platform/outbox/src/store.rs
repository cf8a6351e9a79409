//! Outbox persistence
//!
//! Stores hand out [`OutboxRecord`] snapshots. Writes go through
//! [`OutboxStore::save_all`], a compare-and-swap on the record version: a
//! record changed by someone else since it was read is reported as
//! [`SaveOutcome::Conflict`] and left untouched for a later tick.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use crate::error::OutboxResult;
use crate::record::{NewOutboxRecord, OutboxId, OutboxRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// Version moved on since the record was read
    Conflict,
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn insert(&self, record: NewOutboxRecord) -> OutboxResult<OutboxRecord>;

    /// Eligible records, oldest first, at most `limit`
    async fn find_processable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> OutboxResult<Vec<OutboxRecord>>;

    /// One outcome per input record, in input order
    async fn save_all(&self, records: &[OutboxRecord]) -> OutboxResult<Vec<SaveOutcome>>;

    async fn get(&self, id: OutboxId) -> OutboxResult<Option<OutboxRecord>>;
}

#[derive(Debug, Default)]
struct Inner {
    next_id: OutboxId,
    records: BTreeMap<OutboxId, OutboxRecord>,
}

/// Process-local store for tests and broker-less development
#[derive(Debug, Default)]
pub struct InMemoryOutboxStore {
    inner: Mutex<Inner>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record, by id
    pub async fn snapshot(&self) -> Vec<OutboxRecord> {
        self.inner.lock().await.records.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn insert(&self, record: NewOutboxRecord) -> OutboxResult<OutboxRecord> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let stored = OutboxRecord::from_new(inner.next_id, record);
        inner.records.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_processable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> OutboxResult<Vec<OutboxRecord>> {
        let inner = self.inner.lock().await;
        let mut due: Vec<OutboxRecord> = inner
            .records
            .values()
            .filter(|r| r.is_eligible(now))
            .cloned()
            .collect();
        due.sort_by_key(|r| (r.created_at, r.id));
        due.truncate(limit);
        Ok(due)
    }

    async fn save_all(&self, records: &[OutboxRecord]) -> OutboxResult<Vec<SaveOutcome>> {
        let mut inner = self.inner.lock().await;
        let outcomes = records
            .iter()
            .map(|record| match inner.records.get_mut(&record.id) {
                Some(stored) if stored.version == record.version => {
                    // Mutable columns only; the envelope stays as first written.
                    stored.status = record.status;
                    stored.retry_count = record.retry_count;
                    stored.next_attempt_at = record.next_attempt_at;
                    stored.last_error = record.last_error.clone();
                    stored.updated_at = record.updated_at;
                    stored.sent_at = record.sent_at;
                    stored.version += 1;
                    SaveOutcome::Saved
                }
                _ => SaveOutcome::Conflict,
            })
            .collect();
        Ok(outcomes)
    }

    async fn get(&self, id: OutboxId) -> OutboxResult<Option<OutboxRecord>> {
        Ok(self.inner.lock().await.records.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;
    use crate::record::{Destination, OutboxStatus};
    use chrono::Duration;

    fn new_record(topic: &str, created_at: DateTime<Utc>) -> NewOutboxRecord {
        NewOutboxRecord::pending(Destination::kafka(topic), None, "{}".to_string())
            .with_created_at(created_at)
    }

    #[tokio::test]
    async fn test_insert_assigns_ids() {
        let store = InMemoryOutboxStore::new();
        let a = store.insert(new_record("a", Utc::now())).await.unwrap();
        let b = store.insert(new_record("b", Utc::now())).await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(store.get(a.id()).await.unwrap(), Some(a));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_find_processable_orders_oldest_first_and_limits() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        store.insert(new_record("newest", now)).await.unwrap();
        store.insert(new_record("oldest", now - Duration::minutes(2))).await.unwrap();
        store.insert(new_record("middle", now - Duration::minutes(1))).await.unwrap();

        let due = store.find_processable(now, 2).await.unwrap();
        let topics: Vec<_> = due.iter().map(|r| r.destination().kafka_topic().unwrap()).collect();
        assert_eq!(topics, vec!["oldest", "middle"]);
    }

    #[tokio::test]
    async fn test_find_processable_skips_terminal_and_not_yet_due() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let policy = BackoffPolicy::new(60, 60, 0.0);

        let mut sent = store.insert(new_record("sent", now)).await.unwrap();
        sent.mark_sent(now).unwrap();
        let mut waiting = store.insert(new_record("waiting", now)).await.unwrap();
        waiting.record_failure(now, "down", 5, &policy).unwrap();
        store.save_all(&[sent, waiting]).await.unwrap();
        store.insert(new_record("fresh", now)).await.unwrap();

        let due = store.find_processable(now, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].destination().kafka_topic(), Some("fresh"));

        let later = store.find_processable(now + Duration::seconds(60), 10).await.unwrap();
        assert_eq!(later.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let record = store.insert(new_record("t", now)).await.unwrap();

        let mut first = record.clone();
        first.mark_sent(now).unwrap();
        let mut second = record;
        second
            .record_failure(now, "late", 5, &BackoffPolicy::default())
            .unwrap();

        assert_eq!(store.save_all(&[first]).await.unwrap(), vec![SaveOutcome::Saved]);
        assert_eq!(store.save_all(&[second]).await.unwrap(), vec![SaveOutcome::Conflict]);

        let stored = store.snapshot().await.remove(0);
        assert_eq!(stored.status(), OutboxStatus::Sent);
        assert_eq!(stored.retry_count(), 0);
        assert_eq!(stored.version(), 1);
    }

    #[tokio::test]
    async fn test_unknown_record_is_a_conflict() {
        let store = InMemoryOutboxStore::new();
        let ghost = OutboxRecord::from_new(99, new_record("t", Utc::now()));
        assert_eq!(store.save_all(&[ghost]).await.unwrap(), vec![SaveOutcome::Conflict]);
    }
}
