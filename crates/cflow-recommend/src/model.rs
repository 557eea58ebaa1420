//! Collaborative interaction model with batched updates.
//!
//! Bus deliveries only append to a pending buffer owned by the subject's
//! shard. [`InteractionModel::flush`] drains every buffer, applies the batch
//! to a copy of the committed state and swaps it in under a new
//! `model_version`. Readers always hold one complete committed state.
//!
//! The committed state also remembers which events it has absorbed, for one
//! dedup window, so a redelivery after a restart is not counted twice.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use cflow_core::{EventWeights, JsonCheckpointStore, NormalizedRecord, Platform};
use cflow_ingest::{partition_for, BusConsumer, ConsumeError, DedupWindow};

use crate::error::RecommendError;
use crate::similarity::cosine;

pub const MODEL_NAMESPACE: &str = "recommend/model";

#[derive(Debug, Clone, PartialEq)]
struct Interaction {
    event_key: String,
    seen_at: DateTime<Utc>,
    subject_id: String,
    content_id: String,
    weight: f64,
    tags: Vec<String>,
}

#[derive(Debug)]
struct PendingShard {
    buffer: Vec<Interaction>,
    seen: DedupWindow,
}

/// Committed model state. Replaced wholesale on every flush.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub version: u64,
    /// subject → content → accumulated weighted engagement.
    pub interactions: BTreeMap<String, BTreeMap<String, f64>>,
    /// subject → tag → accumulated weight.
    pub profiles: BTreeMap<String, BTreeMap<String, f64>>,
    /// content → subjects who engaged with it.
    pub audience: BTreeMap<String, BTreeSet<String>>,
    /// `platform/source_event_id` → when it was first buffered. Bounded by
    /// the dedup window, measured back from the newest entry.
    #[serde(default)]
    pub applied: BTreeMap<String, DateTime<Utc>>,
}

fn event_key(platform: Platform, source_event_id: &str) -> String {
    format!("{}/{source_event_id}", platform.as_str())
}

impl ModelState {
    #[must_use]
    pub fn history(&self, subject_id: &str) -> Option<&BTreeMap<String, f64>> {
        self.interactions.get(subject_id).filter(|h| !h.is_empty())
    }

    /// Up to `k` other subjects with positive cosine similarity, most
    /// similar first, ties by subject id.
    #[must_use]
    pub fn neighbors(&self, subject_id: &str, k: usize) -> Vec<(String, f64)> {
        let Some(history) = self.history(subject_id) else {
            return Vec::new();
        };
        let candidates: BTreeSet<&String> = history
            .keys()
            .filter_map(|content_id| self.audience.get(content_id))
            .flatten()
            .filter(|other| other.as_str() != subject_id)
            .collect();

        let mut scored: Vec<(String, f64)> = candidates
            .into_iter()
            .filter_map(|other| {
                let sim = cosine(history, self.interactions.get(other)?);
                (sim > 0.0).then(|| (other.clone(), sim))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }

    /// Neighbour-weighted engagement for content the subject has not
    /// touched yet. Unnormalized.
    #[must_use]
    pub fn collaborative_scores(&self, subject_id: &str, k: usize) -> BTreeMap<String, f64> {
        let mut scores = BTreeMap::new();
        let Some(history) = self.history(subject_id) else {
            return scores;
        };
        for (neighbor, sim) in self.neighbors(subject_id, k) {
            let Some(theirs) = self.interactions.get(&neighbor) else {
                continue;
            };
            for (content_id, weight) in theirs {
                if history.contains_key(content_id) {
                    continue;
                }
                *scores.entry(content_id.clone()).or_insert(0.0) += sim * weight;
            }
        }
        scores
    }

    /// Returns `false` without touching the state when the event was
    /// already absorbed.
    fn apply(&mut self, interaction: Interaction) -> bool {
        let Interaction {
            event_key,
            seen_at,
            subject_id,
            content_id,
            weight,
            tags,
        } = interaction;
        if self.applied.contains_key(&event_key) {
            return false;
        }
        self.applied.insert(event_key, seen_at);
        *self
            .interactions
            .entry(subject_id.clone())
            .or_default()
            .entry(content_id.clone())
            .or_insert(0.0) += weight;
        let profile = self.profiles.entry(subject_id.clone()).or_default();
        for tag in tags {
            *profile.entry(tag).or_insert(0.0) += weight;
        }
        self.audience.entry(content_id).or_default().insert(subject_id);
        true
    }

    fn forget_applied_before(&mut self, window: Duration) {
        let Some(newest) = self.applied.values().max().copied() else {
            return;
        };
        let Some(cutoff) = newest.checked_sub_signed(window) else {
            return;
        };
        self.applied.retain(|_, seen_at| *seen_at > cutoff);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub version: u64,
    pub applied: usize,
}

pub struct InteractionModel {
    weights: EventWeights,
    dedup_window: Duration,
    shards: Vec<Mutex<PendingShard>>,
    state: RwLock<Arc<ModelState>>,
    /// Mirrors `state.version` so cache lookups never wait on a swap.
    version: AtomicU64,
    flushing: Mutex<()>,
}

impl InteractionModel {
    /// `dedup_window_secs` bounds how long a redelivered event is
    /// recognised before it is counted again.
    #[must_use]
    pub fn new(weights: EventWeights, shards: usize, dedup_window_secs: u64) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| {
                Mutex::new(PendingShard {
                    buffer: Vec::new(),
                    seen: DedupWindow::new(dedup_window_secs),
                })
            })
            .collect();
        Self {
            weights,
            dedup_window: i64::try_from(dedup_window_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX),
            shards,
            state: RwLock::new(Arc::new(ModelState::default())),
            version: AtomicU64::new(0),
            flushing: Mutex::new(()),
        }
    }

    pub async fn current(&self) -> Arc<ModelState> {
        Arc::clone(&*self.state.read().await)
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Hold the committed state so readers queue behind a pending swap.
    #[cfg(test)]
    pub(crate) async fn hold_commits(&self) -> tokio::sync::RwLockWriteGuard<'_, Arc<ModelState>> {
        self.state.write().await
    }

    pub async fn pending(&self) -> usize {
        let mut total = 0;
        for shard in &self.shards {
            total += shard.lock().await.buffer.len();
        }
        total
    }

    /// Buffer one engagement. Returns `false` when the event carries no
    /// subject, has no weight, or was already buffered or applied.
    pub async fn record(&self, record: &NormalizedRecord, now: DateTime<Utc>) -> bool {
        let event = &record.event;
        let Some(subject_id) = event.subject_id.as_deref() else {
            return false;
        };
        let weight = self.weights.weight(event.event_type) * event.magnitude;
        if weight <= 0.0 {
            return false;
        }
        let key = event_key(event.platform, &event.source_event_id);
        if self.state.read().await.applied.contains_key(&key) {
            return false;
        }
        let index = partition_for(subject_id, self.shards.len());
        let mut shard = self.shards[index].lock().await;
        if !shard
            .seen
            .check_and_insert(event.platform, &event.source_event_id, now)
        {
            return false;
        }
        shard.buffer.push(Interaction {
            event_key: key,
            seen_at: now,
            subject_id: subject_id.to_owned(),
            content_id: event.content_id.clone(),
            weight,
            tags: record.content.tags.iter().cloned().collect(),
        });
        true
    }

    /// Apply every pending interaction atomically. Events the committed
    /// state already absorbed are dropped. The version only moves when
    /// something was applied.
    pub async fn flush(&self) -> FlushReport {
        let _guard = self.flushing.lock().await;

        let mut batch = Vec::new();
        for shard in &self.shards {
            batch.append(&mut shard.lock().await.buffer);
        }
        if batch.is_empty() {
            return FlushReport {
                version: self.version(),
                applied: 0,
            };
        }

        let mut next = (*self.current().await).clone();
        let mut applied = 0;
        for interaction in batch {
            if next.apply(interaction) {
                applied += 1;
            }
        }
        if applied == 0 {
            return FlushReport {
                version: next.version,
                applied,
            };
        }
        next.forget_applied_before(self.dedup_window);
        next.version += 1;
        let version = next.version;
        *self.state.write().await = Arc::new(next);
        self.version.store(version, Ordering::Release);

        tracing::debug!(version, applied, "recommendation model flushed");
        FlushReport { version, applied }
    }

    /// # Errors
    ///
    /// Returns [`RecommendError::Checkpoint`] if the file cannot be written.
    pub async fn checkpoint(&self, store: &JsonCheckpointStore) -> Result<u64, RecommendError> {
        let state = self.current().await;
        store.save(MODEL_NAMESPACE, state.as_ref()).await?;
        tracing::info!(
            version = state.version,
            subjects = state.interactions.len(),
            "recommendation model checkpointed"
        );
        Ok(state.version)
    }

    /// Replace the committed state with the last checkpoint, if any.
    /// Pending interactions are kept and land on the next flush.
    ///
    /// # Errors
    ///
    /// Returns [`RecommendError::Checkpoint`] if the checkpoint exists but
    /// cannot be read.
    pub async fn restore(&self, store: &JsonCheckpointStore) -> Result<Option<u64>, RecommendError> {
        let Some(state) = store.load::<ModelState>(MODEL_NAMESPACE).await? else {
            tracing::info!("no recommendation model checkpoint found, starting empty");
            return Ok(None);
        };
        let version = state.version;
        let _guard = self.flushing.lock().await;
        *self.state.write().await = Arc::new(state);
        self.version.store(version, Ordering::Release);
        tracing::info!(version, "recommendation model restored from checkpoint");
        Ok(Some(version))
    }
}

#[async_trait]
impl BusConsumer for InteractionModel {
    fn name(&self) -> &'static str {
        "recommend-model"
    }

    async fn consume(&self, record: &NormalizedRecord) -> Result<(), ConsumeError> {
        self.record(record, Utc::now()).await;
        Ok(())
    }
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
