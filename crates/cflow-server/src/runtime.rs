//! Wires the pipeline stages together and exposes the periodic work the
//! scheduler drives.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use cflow_collector::{CollectorStats, CollectorStatsSnapshot};
use cflow_core::{JsonCheckpointStore, PipelineConfig, RecommendationResult};
use cflow_features::{FeatureStatsSnapshot, FeatureStore};
use cflow_ingest::{
    BusConsumer, BusStats, BusStatsSnapshot, BusWorkers, DeadLetterSink, IngestStage,
    IngestStatsSnapshot, IngestionBus,
};
use cflow_recommend::{InteractionModel, Origin, RecommendationEngine};
use cflow_trends::{AlertDispatcher, TrendBoard, TrendService};

use crate::sink::{emit, RecordKind, RecordSink};

/// Everything the HTTP handlers and scheduled jobs share.
pub struct Runtime {
    pub pipeline: PipelineConfig,
    pub store: Arc<FeatureStore>,
    pub model: Arc<InteractionModel>,
    pub board: Arc<TrendBoard>,
    pub trends: TrendService,
    pub engine: RecommendationEngine,
    pub ingest: Arc<IngestStage>,
    pub checkpoints: JsonCheckpointStore,
    sink: Arc<dyn RecordSink>,
    bus_stats: Arc<BusStats>,
    collectors: BTreeMap<String, Arc<CollectorStats>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStats {
    pub ingest: IngestStatsSnapshot,
    pub bus: BusStatsSnapshot,
    pub features: FeatureStatsSnapshot,
    pub collectors: BTreeMap<String, CollectorStatsSnapshot>,
    pub model_version: u64,
    pub last_detection: Option<DateTime<Utc>>,
}

pub struct RuntimeParts {
    pub checkpoints: JsonCheckpointStore,
    pub sink: Arc<dyn RecordSink>,
    pub dead_letters: Arc<dyn DeadLetterSink>,
    pub dispatchers: Vec<Box<dyn AlertDispatcher>>,
    pub collectors: BTreeMap<String, Arc<CollectorStats>>,
}

impl Runtime {
    /// Build every stage and start the bus workers.
    ///
    /// # Errors
    ///
    /// Returns an error if the trend or recommendation window is not a
    /// configured feature window.
    pub fn start(
        pipeline: PipelineConfig,
        parts: RuntimeParts,
    ) -> anyhow::Result<(Self, BusWorkers)> {
        let store = Arc::new(FeatureStore::from_config(&pipeline));
        let model = Arc::new(InteractionModel::new(
            pipeline.event_weights,
            pipeline.recommend.shards,
            pipeline.bus.dedup_window_secs,
        ));
        let board = Arc::new(TrendBoard::new());

        let trends = TrendService::new(
            pipeline.trend.clone(),
            Arc::clone(&store),
            Arc::clone(&board),
            parts.dispatchers,
        )?;
        let engine = RecommendationEngine::new(
            pipeline.recommend.clone(),
            Arc::clone(&store),
            Arc::clone(&board),
            Arc::clone(&model),
        )?;

        let consumers: Vec<Arc<dyn BusConsumer>> = vec![store.clone(), model.clone()];
        let (bus, workers) = IngestionBus::start(&pipeline.bus, consumers);
        let bus_stats = bus.stats();
        let ingest = Arc::new(IngestStage::new(&pipeline.bus, parts.dead_letters, bus));

        Ok((
            Self {
                pipeline,
                store,
                model,
                board,
                trends,
                engine,
                ingest,
                checkpoints: parts.checkpoints,
                sink: parts.sink,
                bus_stats,
                collectors: parts.collectors,
            },
            workers,
        ))
    }

    /// Load feature and model checkpoints, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if a checkpoint exists but cannot be decoded.
    pub async fn restore(&self) -> anyhow::Result<()> {
        self.store.restore(&self.checkpoints).await?;
        self.model.restore(&self.checkpoints).await?;
        Ok(())
    }

    pub async fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            ingest: self.ingest.stats().snapshot(),
            bus: self.bus_stats.snapshot(),
            features: self.store.stats(),
            collectors: self
                .collectors
                .iter()
                .map(|(name, stats)| (name.clone(), stats.snapshot()))
                .collect(),
            model_version: self.model.version(),
            last_detection: self.board.latest().await.map(|p| p.detected_at),
        }
    }

    pub async fn run_detection(&self, now: DateTime<Utc>) {
        match self.trends.run_pass(now).await {
            Ok(outcome) => {
                self.emit(RecordKind::TrendSignal, &outcome.pass.signals).await;
            }
            Err(e) => tracing::warn!(error = %e, "trend detection pass failed"),
        }
    }

    pub async fn flush_model(&self) {
        let report = self.model.flush().await;
        let purged = self.engine.cache().purge(report.version).await;
        if report.applied > 0 {
            tracing::info!(
                version = report.version,
                applied = report.applied,
                purged,
                "recommendation model updated"
            );
        }
    }

    /// Serve a recommendation. Only freshly scored results go downstream.
    pub async fn recommend(
        &self,
        subject_id: &str,
        limit: Option<usize>,
        now: DateTime<Utc>,
    ) -> RecommendationResult {
        let served = self.engine.serve(subject_id, limit, now).await;
        if served.origin == Origin::Computed {
            self.emit(RecordKind::Recommendation, std::slice::from_ref(&served.result))
                .await;
        }
        served.result
    }

    /// Persist state and emit the current vectors of every window.
    pub async fn checkpoint(&self, now: DateTime<Utc>) {
        if let Err(e) = self.store.checkpoint(&self.checkpoints).await {
            tracing::error!(error = %e, "feature checkpoint failed");
        }
        if let Err(e) = self.model.checkpoint(&self.checkpoints).await {
            tracing::error!(error = %e, "model checkpoint failed");
        }
        for spec in self.store.windows() {
            match self.store.snapshot(&spec.name, now).await {
                Ok(snapshot) => {
                    let vectors: Vec<_> = snapshot.vectors.values().collect();
                    self.emit(RecordKind::FeatureVector, &vectors).await;
                }
                Err(e) => tracing::warn!(window = %spec.name, error = %e, "snapshot failed"),
            }
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) {
        let report = self.store.sweep(now).await;
        tracing::debug!(report = ?report, "feature sweep complete");
    }

    async fn emit<T: Serialize + Sync>(&self, kind: RecordKind, items: &[T]) {
        if let Err(e) = emit(self.sink.as_ref(), kind, items).await {
            tracing::warn!(kind = ?kind, error = %e, "failed to emit downstream records");
        }
    }
}
