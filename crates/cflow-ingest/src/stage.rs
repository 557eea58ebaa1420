//! Normalize → dedup → publish, shared by pulled and pushed records.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

use cflow_core::{BusConfig, RawRecord};

use crate::bus::{partition_for, BusHandle};
use crate::dead_letter::{DeadLetter, DeadLetterSink};
use crate::dedup::DedupWindow;
use crate::error::RejectReason;
use crate::normalizer::normalize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum IngestOutcome {
    Published,
    Duplicate,
    Quarantined(RejectReason),
    BusClosed,
}

#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicU64,
    published: AtomicU64,
    duplicates: AtomicU64,
    quarantined: AtomicU64,
    dead_letter_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestStatsSnapshot {
    pub received: u64,
    pub published: u64,
    pub duplicates: u64,
    pub quarantined: u64,
    pub dead_letter_failures: u64,
}

impl IngestStats {
    #[must_use]
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            quarantined: self.quarantined.load(Ordering::Relaxed),
            dead_letter_failures: self.dead_letter_failures.load(Ordering::Relaxed),
        }
    }
}

pub struct IngestStage {
    /// Striped by `source_event_id`, one stripe per bus partition.
    dedup: Vec<Mutex<DedupWindow>>,
    dead_letters: Arc<dyn DeadLetterSink>,
    bus: BusHandle,
    stats: Arc<IngestStats>,
}

impl IngestStage {
    #[must_use]
    pub fn new(config: &BusConfig, dead_letters: Arc<dyn DeadLetterSink>, bus: BusHandle) -> Self {
        Self {
            dedup: (0..bus.partitions())
                .map(|_| Mutex::new(DedupWindow::new(config.dedup_window_secs)))
                .collect(),
            dead_letters,
            bus,
            stats: Arc::new(IngestStats::default()),
        }
    }

    #[must_use]
    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    /// Run one raw record through the stage. Never fails: malformed records
    /// are quarantined and duplicates discarded.
    pub async fn ingest(&self, raw: RawRecord) -> IngestOutcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let record = match normalize(&raw) {
            Ok(record) => record,
            Err(rejected) => {
                self.stats.quarantined.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    source = %raw.source,
                    reason = %rejected.reason,
                    detail = %rejected.detail,
                    "record rejected, quarantining"
                );
                let reason = rejected.reason;
                if let Err(e) = self
                    .dead_letters
                    .quarantine(DeadLetter::new(&raw, &rejected))
                    .await
                {
                    self.stats
                        .dead_letter_failures
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        source = %raw.source,
                        reason = %reason,
                        payload = %raw.payload,
                        error = %e,
                        "failed to write dead letter"
                    );
                }
                return IngestOutcome::Quarantined(reason);
            }
        };

        let stripe = partition_for(&record.event.source_event_id, self.dedup.len());
        let fresh = self.dedup[stripe].lock().await.check_and_insert(
            record.event.platform,
            &record.event.source_event_id,
            Utc::now(),
        );
        if !fresh {
            self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                platform = %record.event.platform,
                source_event_id = %record.event.source_event_id,
                "duplicate event discarded"
            );
            return IngestOutcome::Duplicate;
        }

        if self.bus.publish(record).await.is_err() {
            tracing::warn!(source = %raw.source, "ingestion bus closed, record not published");
            return IngestOutcome::BusClosed;
        }
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        IngestOutcome::Published
    }

    /// Consume the collector queue until every sender is gone. Records
    /// already queued at shutdown are still published.
    pub async fn run(self: Arc<Self>, mut input: mpsc::Receiver<RawRecord>) {
        tracing::info!("ingest stage started");
        while let Some(raw) = input.recv().await {
            if self.ingest(raw).await == IngestOutcome::BusClosed {
                break;
            }
        }
        tracing::info!(stats = ?self.stats.snapshot(), "ingest stage stopped");
    }
}
