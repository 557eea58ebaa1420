//! The feature store.
//!
//! State is sharded by `content_id`; each content item sits behind its own
//! mutex, so writers to one content id are serialized while different ids
//! proceed independently. Readers take an immutable [`FeatureSnapshot`]
//! built one content at a time and never hold a shard lock while doing so.
//!
//! A sweep that unlinks an emptied content item marks its state retired
//! under the item's own lock; writers that raced the sweep retry against a
//! fresh state.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use cflow_core::{
    ContentItem, Creator, EventWeights, FeatureVector, JsonCheckpointStore, NormalizedRecord,
    PipelineConfig, Platform, ScoredContent, WindowConfig, WindowKind,
};
use cflow_ingest::{BusConsumer, ConsumeError};

use crate::catalog::ContentCatalog;
use crate::error::FeatureError;
use crate::segments::{SegmentAggregates, SegmentTable};
use crate::shard::Striped;
use crate::window::{WindowApply, WindowSpec, WindowState};

pub const CHECKPOINT_NAMESPACE: &str = "features/state";
const CHECKPOINT_VERSION: u32 = 1;

/// Point-in-time copy of one window across all content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureSnapshot {
    pub window: String,
    pub taken_at: DateTime<Utc>,
    pub vectors: BTreeMap<String, FeatureVector>,
}

impl FeatureSnapshot {
    #[must_use]
    pub fn get(&self, content_id: &str) -> Option<&FeatureVector> {
        self.vectors.get(content_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Sum of `engagement` over one platform's vectors.
    #[must_use]
    pub fn platform_volume(&self, platform: Platform) -> f64 {
        self.vectors
            .values()
            .filter(|v| v.platform == platform)
            .map(FeatureVector::engagement)
            .sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    pub applied_windows: usize,
    /// Vectors of the windows the event was newly applied to.
    pub vectors: Vec<FeatureVector>,
    pub duplicate_windows: usize,
    pub expired_windows: usize,
}

impl ApplyReport {
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        self.applied_windows == 0 && self.duplicate_windows > 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub ids_evicted: usize,
    pub buckets_evicted: usize,
    pub windows_evicted: usize,
    pub contents_evicted: usize,
    pub catalog_entries_evicted: usize,
    pub segment_entries_evicted: usize,
}

#[derive(Debug, Default)]
pub struct FeatureStats {
    applied: AtomicU64,
    duplicates: AtomicU64,
    expired: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureStatsSnapshot {
    pub applied: u64,
    pub duplicates: u64,
    pub expired: u64,
}

impl FeatureStats {
    #[must_use]
    pub fn snapshot(&self) -> FeatureStatsSnapshot {
        FeatureStatsSnapshot {
            applied: self.applied.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentCheckpoint {
    pub content_id: String,
    pub platform: Platform,
    pub windows: BTreeMap<String, WindowState>,
}

/// Serializable copy of the whole store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCheckpoint {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub contents: Vec<ContentCheckpoint>,
    #[serde(default)]
    pub catalog: Vec<ContentItem>,
    #[serde(default)]
    pub creators: Vec<Creator>,
    #[serde(default)]
    pub segments: SegmentTable,
}

#[derive(Debug)]
struct ContentState {
    platform: Platform,
    windows: BTreeMap<String, WindowState>,
    /// Unlinked by a sweep. Never written again.
    retired: bool,
}

type Contents = HashMap<String, Arc<Mutex<ContentState>>>;

pub struct FeatureStore {
    windows: Vec<WindowSpec>,
    weights: EventWeights,
    shards: Striped<Contents>,
    catalog: ContentCatalog,
    segments: SegmentAggregates,
    /// Decayed window whose fresh applications feed the segment aggregates.
    segment_window: Option<String>,
    stats: FeatureStats,
}

impl FeatureStore {
    #[must_use]
    pub fn new(windows: &[WindowConfig], weights: EventWeights, shards: usize) -> Self {
        let windows: Vec<WindowSpec> = windows.iter().map(WindowSpec::from).collect();
        let (segment_window, segment_half_life) = windows
            .iter()
            .find_map(|w| match &w.kind {
                WindowKind::Decayed { half_life_secs, .. } => {
                    Some((Some(w.name.clone()), *half_life_secs))
                }
                WindowKind::Tumbling { .. } => None,
            })
            .unwrap_or((None, f64::INFINITY));
        Self {
            windows,
            weights,
            shards: Striped::new(shards),
            catalog: ContentCatalog::new(shards),
            segments: SegmentAggregates::new(segment_half_life, shards),
            segment_window,
            stats: FeatureStats::default(),
        }
    }

    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(&config.windows, config.event_weights, config.bus.partitions)
    }

    #[must_use]
    pub fn windows(&self) -> &[WindowSpec] {
        &self.windows
    }

    #[must_use]
    pub fn window(&self, name: &str) -> Option<&WindowSpec> {
        self.windows.iter().find(|w| w.name == name)
    }

    #[must_use]
    pub fn catalog(&self) -> &ContentCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn stats(&self) -> FeatureStatsSnapshot {
        self.stats.snapshot()
    }

    async fn content_state(
        &self,
        content_id: &str,
        platform: Platform,
    ) -> Arc<Mutex<ContentState>> {
        let shard = self.shards.get(content_id);
        if let Some(state) = shard.read().await.get(content_id) {
            return Arc::clone(state);
        }
        let mut guard = shard.write().await;
        Arc::clone(guard.entry(content_id.to_owned()).or_insert_with(|| {
            Arc::new(Mutex::new(ContentState {
                platform,
                windows: BTreeMap::new(),
                retired: false,
            }))
        }))
    }

    /// Lock the live state for `content_id`, creating it if needed.
    async fn lock_content(
        &self,
        content_id: &str,
        platform: Platform,
    ) -> OwnedMutexGuard<ContentState> {
        loop {
            let state = self
                .content_state(content_id, platform)
                .await
                .lock_owned()
                .await;
            if !state.retired {
                return state;
            }
        }
    }

    /// Apply one event to every window. Re-applying an event already seen
    /// by a window leaves that window unchanged.
    pub async fn apply(&self, record: &NormalizedRecord) -> ApplyReport {
        let event = &record.event;
        let mut report = ApplyReport::default();
        let mut segment_fresh = false;
        {
            let mut state = self.lock_content(&event.content_id, event.platform).await;
            self.catalog.observe(&record.content).await;
            for spec in &self.windows {
                let window = state
                    .windows
                    .entry(spec.name.clone())
                    .or_insert_with(|| WindowState::new(spec));
                match window.apply(spec, &self.weights, event) {
                    WindowApply::Applied => {
                        report.applied_windows += 1;
                        if self.segment_window.as_deref() == Some(spec.name.as_str()) {
                            segment_fresh = true;
                        }
                        if let Some(vector) = window.as_of.and_then(|t| {
                            vector_of(&event.content_id, event.platform, spec, window, t)
                        }) {
                            report.vectors.push(vector);
                        }
                    }
                    WindowApply::Duplicate => report.duplicate_windows += 1,
                    WindowApply::Expired => report.expired_windows += 1,
                }
            }
        }

        if report.applied_windows > 0 {
            self.stats.applied.fetch_add(1, Ordering::Relaxed);
            let weighted = self.weights.weight(event.event_type) * event.magnitude;
            self.catalog.record_engagement(event, weighted).await;
            if let (true, Some(segment)) = (segment_fresh, &event.segment) {
                self.segments
                    .record(segment, &event.content_id, weighted, event.timestamp)
                    .await;
            }
        } else if report.duplicate_windows > 0 {
            self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
        }
        if report.expired_windows > 0 {
            self.stats.expired.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                content_id = %event.content_id,
                source_event_id = %event.source_event_id,
                windows = report.expired_windows,
                "event older than retention for some windows"
            );
        }
        report
    }

    /// One content item's vector in one window, as seen at `now`.
    pub async fn vector(
        &self,
        content_id: &str,
        window: &str,
        now: DateTime<Utc>,
    ) -> Option<FeatureVector> {
        let spec = self.window(window)?;
        let state = self
            .shards
            .get(content_id)
            .read()
            .await
            .get(content_id)
            .cloned()?;
        let state = state.lock().await;
        vector_of(content_id, state.platform, spec, state.windows.get(window)?, now)
    }

    /// Copy every content item's vector for `window` at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::UnknownWindow`] if no window has that name.
    pub async fn snapshot(
        &self,
        window: &str,
        now: DateTime<Utc>,
    ) -> Result<Arc<FeatureSnapshot>, FeatureError> {
        let spec = self
            .window(window)
            .ok_or_else(|| FeatureError::UnknownWindow(window.to_owned()))?;
        let mut vectors = BTreeMap::new();
        for shard in self.shards.iter() {
            let entries: Vec<(String, Arc<Mutex<ContentState>>)> = shard
                .read()
                .await
                .iter()
                .map(|(id, state)| (id.clone(), Arc::clone(state)))
                .collect();
            for (content_id, state) in entries {
                let state = state.lock().await;
                if let Some(vector) = state
                    .windows
                    .get(window)
                    .and_then(|w| vector_of(&content_id, state.platform, spec, w, now))
                {
                    vectors.insert(content_id, vector);
                }
            }
        }
        Ok(Arc::new(FeatureSnapshot {
            window: window.to_owned(),
            taken_at: now,
            vectors,
        }))
    }

    pub async fn segment_top(
        &self,
        segment: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Vec<ScoredContent> {
        self.segments.top(segment, limit, now).await
    }

    pub async fn segments(&self) -> Vec<String> {
        self.segments.segments().await
    }

    /// Evict ids, buckets and windows past their retention horizon.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        for shard in self.shards.iter() {
            let entries: Vec<(String, Arc<Mutex<ContentState>>)> = shard
                .read()
                .await
                .iter()
                .map(|(id, state)| (id.clone(), Arc::clone(state)))
                .collect();

            let mut emptied = Vec::new();
            for (content_id, state) in entries {
                let mut state = state.lock().await;
                for spec in &self.windows {
                    let cutoff = now - spec.retention;
                    let Some(window) = state.windows.get_mut(&spec.name) else {
                        continue;
                    };
                    let evicted = window.evict(spec, Some(cutoff));
                    report.ids_evicted += evicted.ids;
                    report.buckets_evicted += evicted.buckets;
                    if window.is_stale(cutoff) {
                        state.windows.remove(&spec.name);
                        report.windows_evicted += 1;
                    }
                }
                if state.windows.is_empty() {
                    emptied.push(content_id);
                }
            }

            if emptied.is_empty() {
                continue;
            }
            let mut guard = shard.write().await;
            for content_id in emptied {
                // Skip entries a writer holds or refilled since the first pass.
                let Some(mut state) = guard
                    .get(&content_id)
                    .and_then(|s| Arc::clone(s).try_lock_owned().ok())
                else {
                    continue;
                };
                if !state.windows.is_empty() {
                    continue;
                }
                state.retired = true;
                guard.remove(&content_id);
                if self.catalog.remove(&content_id).await.is_some() {
                    report.catalog_entries_evicted += 1;
                }
                report.contents_evicted += 1;
            }
        }

        if let Some(spec) = self.segment_window.as_deref().and_then(|w| self.window(w)) {
            report.segment_entries_evicted = self.segments.evict(now - spec.retention).await;
        }
        tracing::debug!(?report, "feature store swept");
        report
    }

    pub async fn export(&self) -> FeatureCheckpoint {
        let mut contents = Vec::new();
        for shard in self.shards.iter() {
            let entries: Vec<(String, Arc<Mutex<ContentState>>)> = shard
                .read()
                .await
                .iter()
                .map(|(id, state)| (id.clone(), Arc::clone(state)))
                .collect();
            for (content_id, state) in entries {
                let state = state.lock().await;
                contents.push(ContentCheckpoint {
                    content_id,
                    platform: state.platform,
                    windows: state.windows.clone(),
                });
            }
        }
        contents.sort_by(|a, b| a.content_id.cmp(&b.content_id));
        FeatureCheckpoint {
            version: CHECKPOINT_VERSION,
            saved_at: Utc::now(),
            contents,
            catalog: self.catalog.items().await,
            creators: self.catalog.creators().await,
            segments: self.segments.export().await,
        }
    }

    /// Merge a checkpoint into live state.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::UnsupportedCheckpoint`] for an unknown
    /// checkpoint version.
    pub async fn import(&self, checkpoint: FeatureCheckpoint) -> Result<usize, FeatureError> {
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(FeatureError::UnsupportedCheckpoint {
                found: checkpoint.version,
                expected: CHECKPOINT_VERSION,
            });
        }
        let count = checkpoint.contents.len();
        let known: BTreeSet<String> = checkpoint
            .contents
            .iter()
            .map(|c| c.content_id.clone())
            .collect();
        for content in checkpoint.contents {
            let mut state = self
                .lock_content(&content.content_id, content.platform)
                .await;
            for (name, saved) in content.windows {
                let Some(spec) = self.window(&name) else {
                    tracing::debug!(window = %name, "dropping checkpointed window no longer configured");
                    continue;
                };
                state
                    .windows
                    .entry(name)
                    .or_insert_with(|| WindowState::new(spec))
                    .merge(saved);
            }
        }
        // Keep only entries backed by window state.
        let mut catalog = checkpoint.catalog;
        catalog.retain(|item| known.contains(&item.id));
        self.catalog.restore(catalog, checkpoint.creators).await;
        self.segments.restore(checkpoint.segments).await;
        Ok(count)
    }

    /// Persist the store under [`CHECKPOINT_NAMESPACE`]. Returns the number
    /// of content items written.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::Checkpoint`] if the file cannot be written.
    pub async fn checkpoint(&self, store: &JsonCheckpointStore) -> Result<usize, FeatureError> {
        let checkpoint = self.export().await;
        store.save(CHECKPOINT_NAMESPACE, &checkpoint).await?;
        tracing::info!(contents = checkpoint.contents.len(), "feature store checkpointed");
        Ok(checkpoint.contents.len())
    }

    /// Load the last checkpoint, if any. Returns the number of content
    /// items restored.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError`] if the checkpoint exists but cannot be read.
    pub async fn restore(&self, store: &JsonCheckpointStore) -> Result<usize, FeatureError> {
        let Some(checkpoint) = store
            .load::<FeatureCheckpoint>(CHECKPOINT_NAMESPACE)
            .await?
        else {
            tracing::info!("no feature checkpoint found, starting empty");
            return Ok(0);
        };
        let restored = self.import(checkpoint).await?;
        tracing::info!(contents = restored, "feature store restored from checkpoint");
        Ok(restored)
    }
}

fn vector_of(
    content_id: &str,
    platform: Platform,
    spec: &WindowSpec,
    window: &WindowState,
    now: DateTime<Utc>,
) -> Option<FeatureVector> {
    let as_of = window.as_of?;
    let metrics = window.metrics_at(spec, now)?;
    Some(FeatureVector {
        content_id: content_id.to_owned(),
        platform,
        window: spec.name.clone(),
        metrics,
        as_of,
    })
}

#[async_trait]
impl BusConsumer for FeatureStore {
    fn name(&self) -> &str {
        "feature-store"
    }

    async fn consume(&self, record: &NormalizedRecord) -> Result<(), ConsumeError> {
        self.apply(record).await;
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
