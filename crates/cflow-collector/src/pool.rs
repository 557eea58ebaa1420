//! Collector pool: one independent task per source.
//!
//! Each task owns its source's circuit breaker, runs every fetch under a
//! deadline, and pushes records into the shared bounded queue. A full queue
//! suspends the task; a slow or broken source never blocks the others.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use cflow_core::{BreakerConfig, RawRecord, SourceConfig};

use crate::breaker::CircuitBreaker;
use crate::cursor::CursorStore;
use crate::error::CollectorError;
use crate::source::Source;

/// Scheduling parameters for one source.
#[derive(Debug, Clone, Copy)]
pub struct SourceSchedule {
    pub poll_interval: Duration,
    pub fetch_deadline: Duration,
    pub breaker: BreakerConfig,
}

impl From<&SourceConfig> for SourceSchedule {
    fn from(config: &SourceConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            fetch_deadline: Duration::from_secs(config.fetch_deadline_secs),
            breaker: config.breaker,
        }
    }
}

/// Per-source counters.
#[derive(Debug, Default)]
pub struct CollectorStats {
    fetches: AtomicU64,
    records: AtomicU64,
    failures: AtomicU64,
    breaker_trips: AtomicU64,
    skipped_open: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CollectorStatsSnapshot {
    pub fetches: u64,
    pub records: u64,
    pub failures: u64,
    pub breaker_trips: u64,
    pub skipped_open: u64,
}

impl CollectorStats {
    #[must_use]
    pub fn snapshot(&self) -> CollectorStatsSnapshot {
        CollectorStatsSnapshot {
            fetches: self.fetches.load(Ordering::Relaxed),
            records: self.records.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            breaker_trips: self.breaker_trips.load(Ordering::Relaxed),
            skipped_open: self.skipped_open.load(Ordering::Relaxed),
        }
    }
}

/// What one collection cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Collected { records: usize },
    /// Breaker open; no request was made.
    Skipped { remaining: Duration },
    Failed { tripped: bool },
    /// The downstream queue was closed; the task should stop.
    Closed,
}

/// Mutable state of one source's collector task.
pub struct SourceRunner {
    source: Arc<dyn Source>,
    schedule: SourceSchedule,
    breaker: CircuitBreaker,
    stats: Arc<CollectorStats>,
}

impl SourceRunner {
    #[must_use]
    pub fn new(source: Arc<dyn Source>, schedule: SourceSchedule) -> Self {
        Self {
            breaker: CircuitBreaker::new(schedule.breaker),
            source,
            schedule,
            stats: Arc::new(CollectorStats::default()),
        }
    }

    #[must_use]
    pub fn stats(&self) -> Arc<CollectorStats> {
        Arc::clone(&self.stats)
    }

    /// Run one fetch-and-forward cycle.
    ///
    /// Failures are contained: they are logged, counted, and fed to the
    /// breaker, but never returned.
    pub async fn run_cycle(
        &mut self,
        cursors: &CursorStore,
        output: &mpsc::Sender<RawRecord>,
    ) -> CycleOutcome {
        let name = self.source.name().to_owned();

        if let Err(remaining) = self.breaker.check(Instant::now()) {
            self.stats.skipped_open.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                source = %name,
                remaining_secs = remaining.as_secs(),
                "circuit open, skipping cycle"
            );
            return CycleOutcome::Skipped { remaining };
        }

        let since = cursors.get(&name).await;
        self.stats.fetches.fetch_add(1, Ordering::Relaxed);
        let deadline = self.schedule.fetch_deadline;
        let fetched = match tokio::time::timeout(deadline, self.source.fetch(since.as_deref())).await
        {
            Ok(result) => result,
            Err(_) => Err(CollectorError::DeadlineExceeded {
                name: name.clone(),
                deadline_secs: deadline.as_secs(),
            }),
        };

        let page = match fetched {
            Ok(page) => page,
            Err(e) => return self.record_failure(&name, &e),
        };
        self.breaker.record_success();

        let count = page.records.len();
        for record in page.records {
            if output.send(record).await.is_err() {
                tracing::info!(source = %name, "record queue closed, stopping collector");
                return CycleOutcome::Closed;
            }
        }
        self.stats.records.fetch_add(count as u64, Ordering::Relaxed);

        if let Some(cursor) = page.next_cursor {
            if let Err(e) = cursors.commit(&name, &cursor).await {
                tracing::warn!(source = %name, error = %e, "failed to commit cursor");
            }
        }

        tracing::info!(source = %name, records = count, pages = page.pages, "collection cycle complete");
        CycleOutcome::Collected { records: count }
    }

    fn record_failure(&mut self, name: &str, error: &CollectorError) -> CycleOutcome {
        self.stats.failures.fetch_add(1, Ordering::Relaxed);
        let tripped = matches!(error, CollectorError::SourceUnavailable { .. })
            && self.breaker.record_failure(Instant::now());
        if tripped {
            self.stats.breaker_trips.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                source = name,
                error = %error,
                cooldown_secs = self.schedule.breaker.cooldown_secs,
                "source unavailable, circuit opened"
            );
        } else {
            tracing::warn!(source = name, error = %error, "collection cycle failed");
        }
        CycleOutcome::Failed { tripped }
    }

    /// Poll until shutdown is signalled or the output queue closes.
    pub async fn run(
        mut self,
        cursors: Arc<CursorStore>,
        output: mpsc::Sender<RawRecord>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let name = self.source.name().to_owned();
        tracing::info!(
            source = %name,
            platform = %self.source.platform(),
            rate_budget = ?self.source.describe_rate_budget(),
            "collector started"
        );
        while !*shutdown.borrow() {
            let outcome = tokio::select! {
                outcome = self.run_cycle(&cursors, &output) => outcome,
                _ = shutdown.changed() => break,
            };
            if outcome == CycleOutcome::Closed {
                break;
            }
            tokio::select! {
                () = tokio::time::sleep(self.schedule.poll_interval) => {}
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!(source = %name, "collector stopped");
    }
}

/// All configured sources, ready to be spawned.
#[derive(Default)]
pub struct CollectorPool {
    runners: Vec<SourceRunner>,
}

impl CollectorPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, source: Arc<dyn Source>, schedule: SourceSchedule) -> Arc<CollectorStats> {
        let runner = SourceRunner::new(source, schedule);
        let stats = runner.stats();
        self.runners.push(runner);
        stats
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.runners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }

    /// Spawn one task per source.
    pub fn spawn(
        self,
        cursors: &Arc<CursorStore>,
        output: &mpsc::Sender<RawRecord>,
        shutdown: &watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        self.runners
            .into_iter()
            .map(|runner| {
                tokio::spawn(runner.run(
                    Arc::clone(cursors),
                    output.clone(),
                    shutdown.clone(),
                ))
            })
            .collect()
    }
}
