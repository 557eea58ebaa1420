//! Partitioned ingestion bus.
//!
//! One bounded queue and one worker per partition. A record's partition is
//! a stable hash of its `content_id`, so every record for one content item
//! passes through the same worker and reaches each consumer in publish
//! order. Different content ids interleave freely.
//!
//! [`BusWorkers::close`] stops intake and waits until every record already
//! queued has been offered to every consumer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use cflow_core::{BusConfig, NormalizedRecord};

use crate::error::{BusClosed, ConsumeError};

const REDELIVERY_BACKOFF_MS: u64 = 50;

/// A downstream stage fed by the bus. Delivery is at-least-once, so
/// implementations must tolerate seeing a record twice.
#[async_trait]
pub trait BusConsumer: Send + Sync {
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Returns [`ConsumeError`] when the record could not be applied; the
    /// bus redelivers it.
    async fn consume(&self, record: &NormalizedRecord) -> Result<(), ConsumeError>;
}

#[derive(Debug, Default)]
pub struct BusStats {
    published: AtomicU64,
    delivered: AtomicU64,
    redelivered: AtomicU64,
    undeliverable: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BusStatsSnapshot {
    pub published: u64,
    pub delivered: u64,
    pub redelivered: u64,
    pub undeliverable: u64,
}

impl BusStats {
    #[must_use]
    pub fn snapshot(&self) -> BusStatsSnapshot {
        BusStatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            redelivered: self.redelivered.load(Ordering::Relaxed),
            undeliverable: self.undeliverable.load(Ordering::Relaxed),
        }
    }
}

/// FNV-1a. Stable across processes and releases, unlike `DefaultHasher`.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn partition_for(content_id: &str, partitions: usize) -> usize {
    (fnv1a(content_id.as_bytes()) % partitions.max(1) as u64) as usize
}

/// Producer side. Cloneable; the bus also shuts down once every handle is
/// dropped and the queues drain.
#[derive(Clone)]
pub struct BusHandle {
    queues: Arc<Vec<mpsc::Sender<NormalizedRecord>>>,
    stats: Arc<BusStats>,
}

impl BusHandle {
    #[must_use]
    pub fn partitions(&self) -> usize {
        self.queues.len()
    }

    #[must_use]
    pub fn stats(&self) -> Arc<BusStats> {
        Arc::clone(&self.stats)
    }

    /// Enqueue a record on its partition, suspending while that partition's
    /// queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`BusClosed`] once the bus is closing or its worker stopped.
    pub async fn publish(&self, record: NormalizedRecord) -> Result<(), BusClosed> {
        let idx = partition_for(&record.event.content_id, self.queues.len());
        let queue = self.queues.get(idx).ok_or(BusClosed)?;
        queue.send(record).await.map_err(|_| BusClosed)?;
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// The partition workers. Dropping this detaches them.
pub struct BusWorkers {
    closing: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BusWorkers {
    /// Refuse further publishes, drain every queue, then wait for the
    /// workers to exit.
    pub async fn close(self) {
        self.closing.send_replace(true);
        self.join().await;
    }

    /// Wait for the workers without closing the queues. They exit once
    /// every [`BusHandle`] is dropped.
    pub async fn join(self) {
        for (partition, handle) in self.handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                tracing::error!(partition, error = %e, "bus worker panicked");
            }
        }
    }
}

pub struct IngestionBus;

impl IngestionBus {
    /// Spawn one worker per partition and return the producer handle.
    #[must_use]
    pub fn start(
        config: &BusConfig,
        consumers: Vec<Arc<dyn BusConsumer>>,
    ) -> (BusHandle, BusWorkers) {
        let consumers: Arc<[Arc<dyn BusConsumer>]> = consumers.into();
        let stats = Arc::new(BusStats::default());
        let (closing, closing_rx) = watch::channel(false);
        let partitions = config.partitions.max(1);
        let mut queues = Vec::with_capacity(partitions);
        let mut handles = Vec::with_capacity(partitions);

        for partition in 0..partitions {
            let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
            queues.push(tx);
            handles.push(tokio::spawn(run_partition(
                partition,
                rx,
                closing_rx.clone(),
                Arc::clone(&consumers),
                Arc::clone(&stats),
                config.max_redeliveries,
            )));
        }

        tracing::info!(
            partitions,
            queue_capacity = config.queue_capacity,
            consumers = consumers.len(),
            "ingestion bus started"
        );
        (
            BusHandle {
                queues: Arc::new(queues),
                stats,
            },
            BusWorkers { closing, handles },
        )
    }
}

async fn run_partition(
    partition: usize,
    mut rx: mpsc::Receiver<NormalizedRecord>,
    mut closing: watch::Receiver<bool>,
    consumers: Arc<[Arc<dyn BusConsumer>]>,
    stats: Arc<BusStats>,
    max_redeliveries: u32,
) {
    let mut watching = true;
    loop {
        let next = if watching {
            tokio::select! {
                record = rx.recv() => record,
                changed = closing.changed() => {
                    watching = false;
                    if changed.is_ok() {
                        // Buffered records still drain after close.
                        rx.close();
                    }
                    continue;
                }
            }
        } else {
            rx.recv().await
        };
        let Some(record) = next else {
            break;
        };
        for consumer in consumers.iter() {
            deliver(consumer.as_ref(), &record, &stats, max_redeliveries).await;
        }
    }
    tracing::debug!(partition, "bus partition drained");
}

async fn deliver(
    consumer: &dyn BusConsumer,
    record: &NormalizedRecord,
    stats: &BusStats,
    max_redeliveries: u32,
) {
    let mut attempt: u32 = 0;
    loop {
        match consumer.consume(record).await {
            Ok(()) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(e) if attempt < max_redeliveries => {
                attempt += 1;
                stats.redelivered.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    consumer = consumer.name(),
                    content_id = %record.event.content_id,
                    source_event_id = %record.event.source_event_id,
                    attempt,
                    max_redeliveries,
                    error = %e,
                    "consumer failed, redelivering"
                );
                tokio::time::sleep(Duration::from_millis(
                    REDELIVERY_BACKOFF_MS * u64::from(attempt),
                ))
                .await;
            }
            Err(e) => {
                stats.undeliverable.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    consumer = consumer.name(),
                    content_id = %record.event.content_id,
                    source_event_id = %record.event.source_event_id,
                    error = %e,
                    "record undeliverable after redeliveries"
                );
                return;
            }
        }
    }
}
