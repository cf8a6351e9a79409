//! Postgres-backed outbox store
//!
//! Table `event_outbox`, created by `db/migrations`. Updates are conditional
//! on the row version and never touch the `envelope` column.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_bus::BrokerKind;
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use crate::error::{OutboxError, OutboxResult};
use crate::record::{Destination, NewOutboxRecord, OutboxId, OutboxRecord};
use crate::store::{OutboxStore, SaveOutcome};

const COLUMNS: &str = "id, broker_type, kafka_topic, rabbit_exchange, rabbit_routing_key, \
     message_key, envelope, status, retry_count, next_attempt_at, last_error_message, \
     created_at, updated_at, sent_at, version";

#[derive(Debug, FromRow)]
struct OutboxRow {
    id: i64,
    broker_type: String,
    kafka_topic: Option<String>,
    rabbit_exchange: Option<String>,
    rabbit_routing_key: Option<String>,
    message_key: Option<String>,
    envelope: Option<String>,
    status: String,
    retry_count: i32,
    next_attempt_at: Option<DateTime<Utc>>,
    last_error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    version: i32,
}

impl TryFrom<OutboxRow> for OutboxRecord {
    type Error = OutboxError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let broker: BrokerKind = row
            .broker_type
            .parse()
            .map_err(|e| OutboxError::InvalidRecord(format!("row {}: {e}", row.id)))?;
        let destination = Destination::from_columns(
            broker,
            row.kafka_topic,
            row.rabbit_exchange,
            row.rabbit_routing_key,
        )?;

        Ok(OutboxRecord {
            id: row.id,
            destination,
            message_key: row.message_key,
            envelope: row.envelope,
            status: row.status.parse()?,
            retry_count: row.retry_count,
            next_attempt_at: row.next_attempt_at,
            last_error: row.last_error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            sent_at: row.sent_at,
            version: row.version,
        })
    }
}

async fn insert_record<'e, E>(executor: E, record: &NewOutboxRecord) -> OutboxResult<OutboxRecord>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let sql = format!(
        r#"
        INSERT INTO event_outbox
            (broker_type, kafka_topic, rabbit_exchange, rabbit_routing_key, message_key,
             envelope, status, retry_count, last_error_message, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $9, $9)
        RETURNING {COLUMNS}
        "#
    );

    let row = sqlx::query_as::<_, OutboxRow>(&sql)
        .bind(record.destination.broker().as_str())
        .bind(record.destination.kafka_topic())
        .bind(record.destination.rabbit_exchange())
        .bind(record.destination.rabbit_routing_key())
        .bind(record.message_key.as_deref())
        .bind(record.envelope.as_deref())
        .bind(record.status.as_str())
        .bind(record.last_error.as_deref())
        .bind(record.created_at)
        .fetch_one(executor)
        .await?;

    let stored = OutboxRecord::try_from(row)?;
    tracing::debug!(
        outbox_id = stored.id,
        destination = %stored.destination,
        status = %stored.status,
        "Outbox record inserted"
    );
    Ok(stored)
}

/// Insert an outbox record inside a caller-owned transaction
///
/// The record becomes visible to the processor only when the caller commits,
/// together with whatever business rows the transaction also wrote.
pub async fn enqueue_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    record: NewOutboxRecord,
) -> OutboxResult<OutboxRecord> {
    insert_record(&mut **tx, &record).await
}

#[derive(Debug, Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn insert(&self, record: NewOutboxRecord) -> OutboxResult<OutboxRecord> {
        insert_record(&self.pool, &record).await
    }

    async fn find_processable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> OutboxResult<Vec<OutboxRecord>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM event_outbox
            WHERE status IN ('PENDING', 'FAILED')
              AND (next_attempt_at IS NULL OR next_attempt_at <= $1)
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#
        );

        let rows = sqlx::query_as::<_, OutboxRow>(&sql)
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(OutboxRecord::try_from).collect()
    }

    async fn save_all(&self, records: &[OutboxRecord]) -> OutboxResult<Vec<SaveOutcome>> {
        let mut tx = self.pool.begin().await?;
        let mut outcomes = Vec::with_capacity(records.len());

        for record in records {
            let result = sqlx::query(
                r#"
                UPDATE event_outbox
                SET status = $3,
                    retry_count = $4,
                    next_attempt_at = $5,
                    last_error_message = $6,
                    updated_at = $7,
                    sent_at = $8,
                    version = version + 1
                WHERE id = $1 AND version = $2
                "#,
            )
            .bind(record.id)
            .bind(record.version)
            .bind(record.status.as_str())
            .bind(record.retry_count)
            .bind(record.next_attempt_at)
            .bind(record.last_error.as_deref())
            .bind(record.updated_at)
            .bind(record.sent_at)
            .execute(&mut *tx)
            .await?;

            outcomes.push(if result.rows_affected() == 1 {
                SaveOutcome::Saved
            } else {
                SaveOutcome::Conflict
            });
        }

        tx.commit().await?;
        Ok(outcomes)
    }

    async fn get(&self, id: OutboxId) -> OutboxResult<Option<OutboxRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM event_outbox WHERE id = $1");
        sqlx::query_as::<_, OutboxRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(OutboxRecord::try_from)
            .transpose()
    }
}
