//! # Outbox Processor
//!
//! Polls the store on a fixed interval and pushes due records to the broker.
//!
//! Per tick:
//! 1. select up to `batch_size` eligible records, oldest first
//! 2. for each record: derive headers, send, then mark SENT or count the
//!    failure (FAILED with backoff, or DEAD once attempts run out)
//! 3. a record that just went DEAD is copied to its dead-letter destination
//!    when dead-lettering is enabled; that copy is best-effort
//! 4. persist the whole batch; version conflicts are left for a later tick
//!
//! Ticks never overlap inside one processor. Several processors may share a
//! store; the version check keeps bookkeeping consistent but the same record
//! can still be sent twice, so delivery is at-least-once.

use chrono::{DateTime, Utc};
use event_bus::headers::{dead_letter_headers, derive_headers};
use event_bus::Headers;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;

use crate::backoff::BackoffPolicy;
use crate::config::OutboxConfig;
use crate::error::{OutboxResult, ProducerError};
use crate::producer::EventProducer;
use crate::record::{Destination, OutboxRecord};
use crate::store::{OutboxStore, SaveOutcome};

/// Counters for one tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub selected: usize,
    pub sent: usize,
    /// Failed, rescheduled
    pub retried: usize,
    pub dead: usize,
    pub dead_lettered: usize,
    pub dead_letter_failures: usize,
    /// Results discarded because another writer got there first
    pub conflicts: usize,
}

impl TickSummary {
    pub fn is_idle(&self) -> bool {
        self.selected == 0
    }
}

pub struct OutboxProcessor {
    store: Arc<dyn OutboxStore>,
    producer: Arc<dyn EventProducer>,
    config: OutboxConfig,
    backoff: BackoffPolicy,
    tick_guard: Mutex<()>,
}

impl OutboxProcessor {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        producer: Arc<dyn EventProducer>,
        config: OutboxConfig,
    ) -> OutboxResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            producer,
            backoff: BackoffPolicy::from_config(&config.backoff),
            config,
            tick_guard: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    pub async fn tick(&self) -> OutboxResult<Option<TickSummary>> {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick as of `now`
    ///
    /// Returns `None` without doing anything when another tick is still
    /// running on this processor.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> OutboxResult<Option<TickSummary>> {
        let Ok(_guard) = self.tick_guard.try_lock() else {
            tracing::debug!("Outbox tick still running, skipping");
            return Ok(None);
        };

        let mut batch = self
            .store
            .find_processable(now, self.config.batch_size)
            .await?;

        let mut summary = TickSummary {
            selected: batch.len(),
            ..TickSummary::default()
        };
        if batch.is_empty() {
            return Ok(Some(summary));
        }

        for record in batch.iter_mut() {
            self.dispatch(record, now, &mut summary).await;
        }

        let outcomes = self.store.save_all(&batch).await?;
        for (record, outcome) in batch.iter().zip(outcomes) {
            if outcome == SaveOutcome::Conflict {
                summary.conflicts += 1;
                tracing::warn!(
                    outbox_id = record.id(),
                    status = %record.status(),
                    "Outbox record changed concurrently, result discarded until next tick"
                );
            }
        }

        tracing::debug!(
            selected = summary.selected,
            sent = summary.sent,
            retried = summary.retried,
            dead = summary.dead,
            conflicts = summary.conflicts,
            "Outbox tick complete"
        );
        Ok(Some(summary))
    }

    async fn dispatch(&self, record: &mut OutboxRecord, now: DateTime<Utc>, summary: &mut TickSummary) {
        let headers = derive_headers(record.envelope());

        let result = match record.envelope() {
            Some(body) => {
                self.send(record.destination(), record.message_key(), body, &headers)
                    .await
            }
            None => Err(ProducerError::MissingBody(record.id())),
        };

        let error = match result {
            Ok(()) => match record.mark_sent(now) {
                Ok(()) => {
                    summary.sent += 1;
                    return;
                }
                Err(e) => e.to_string(),
            },
            Err(e) => e.to_string(),
        };

        let dead = match record.record_failure(now, &error, self.config.max_attempts, &self.backoff) {
            Ok(dead) => dead,
            Err(e) => {
                tracing::error!(outbox_id = record.id(), error = %e, "Outbox record in unexpected state");
                return;
            }
        };

        tracing::warn!(
            outbox_id = record.id(),
            destination = %record.destination(),
            attempts = record.retry_count(),
            status = %record.status(),
            error = %error,
            "Outbox send failed"
        );

        if !dead {
            summary.retried += 1;
            return;
        }

        summary.dead += 1;
        tracing::error!(
            outbox_id = record.id(),
            destination = %record.destination(),
            attempts = record.retry_count(),
            error = %error,
            "Outbox record is DEAD after exhausting retries"
        );

        if self.config.dead_letter.enabled {
            if let Some(body) = record.envelope() {
                if self.forward_dead_letter(record, body, &headers).await {
                    summary.dead_lettered += 1;
                } else {
                    summary.dead_letter_failures += 1;
                }
            }
        }
    }

    async fn send(
        &self,
        destination: &Destination,
        key: Option<&str>,
        body: &str,
        headers: &Headers,
    ) -> Result<(), ProducerError> {
        let send = self.producer.send(destination, key, body, headers);
        match self.config.send_timeout() {
            Some(limit) => tokio::time::timeout(limit, send)
                .await
                .map_err(|_| ProducerError::Timeout(limit))?,
            None => send.await,
        }
    }

    /// Copy a DEAD record to its dead-letter destination; never retried
    async fn forward_dead_letter(&self, record: &OutboxRecord, body: &str, headers: &Headers) -> bool {
        let target = record.destination().dead_letter(&self.config.dead_letter);
        let headers = dead_letter_headers(headers, record.last_error());

        match self.send(&target, record.message_key(), body, &headers).await {
            Ok(()) => {
                tracing::info!(
                    outbox_id = record.id(),
                    dead_letter = %target,
                    key = ?record.message_key(),
                    "Outbox record forwarded to dead-letter destination"
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    outbox_id = record.id(),
                    dead_letter = %target,
                    error = %e,
                    "Dead-letter forward failed"
                );
                false
            }
        }
    }

    /// Tick every `poll_interval` until `shutdown` resolves
    ///
    /// The interval is measured between tick starts; a tick that overruns
    /// delays the next one instead of bunching them up. A failing tick is
    /// logged and the loop keeps going.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        if !self.config.enabled {
            tracing::info!("Outbox processor disabled by configuration");
            return;
        }

        tracing::info!(
            poll_interval_ms = self.config.poll_interval_ms,
            batch_size = self.config.batch_size,
            max_attempts = self.config.max_attempts,
            dead_letter = self.config.dead_letter.enabled,
            "Starting outbox processor"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        let mut tick_count: u64 = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(ticks = tick_count, "Outbox processor stopping");
                    break;
                }
                _ = interval.tick() => {
                    tick_count += 1;
                    match self.tick().await {
                        Ok(Some(summary)) if !summary.is_idle() => {
                            tracing::info!(
                                tick = tick_count,
                                selected = summary.selected,
                                sent = summary.sent,
                                retried = summary.retried,
                                dead = summary.dead,
                                "Outbox tick processed records"
                            );
                        }
                        Ok(_) => {
                            if tick_count <= 3 || tick_count % 60 == 0 {
                                tracing::info!(tick = tick_count, "Outbox tick: nothing due");
                            }
                        }
                        Err(e) => {
                            tracing::error!(tick = tick_count, error = %e, "Outbox tick failed");
                        }
                    }
                }
            }
        }
    }
}
