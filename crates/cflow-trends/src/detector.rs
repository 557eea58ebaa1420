//! Velocity spikes against a per-content rolling baseline, plus
//! cross-platform correlation by topic tag.
//!
//! The detector only reads snapshots. Its own state is the previous
//! observation and the velocity history of each content id in the latest
//! snapshot; ids that leave the snapshot are forgotten.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use cflow_core::{CorrelationSet, Platform, TrendConfig, TrendSignal, ENGAGEMENT_METRIC};
use cflow_features::FeatureSnapshot;

use crate::baseline::Baseline;

/// Why a content id produced no score in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoPreviousObservation,
    MissingBaseline,
    NonPositiveElapsed,
    MissingMetric,
    /// The vector is newer than the snapshot time.
    Lookahead,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skipped {
    pub content_id: String,
    pub reason: SkipReason,
}

/// Result of one detection pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionPass {
    pub window: String,
    pub detected_at: DateTime<Utc>,
    /// Vectors in the snapshot this pass read.
    pub vectors: usize,
    /// Content ids above their platform's threshold, by score descending.
    pub signals: Vec<TrendSignal>,
    /// Anomaly score of every content id that could be scored.
    pub scores: BTreeMap<String, f64>,
    pub skipped: Vec<Skipped>,
    pub thresholds: BTreeMap<Platform, f64>,
}

impl DetectionPass {
    #[must_use]
    pub fn empty(window: &str, detected_at: DateTime<Utc>) -> Self {
        Self {
            window: window.to_owned(),
            detected_at,
            vectors: 0,
            signals: Vec::new(),
            scores: BTreeMap::new(),
            skipped: Vec::new(),
            thresholds: BTreeMap::new(),
        }
    }

    /// Signals matching the filters, by score descending then content id.
    #[must_use]
    pub fn signals_for(&self, window: Option<&str>, platform: Option<Platform>) -> Vec<TrendSignal> {
        let mut signals: Vec<TrendSignal> = self
            .signals
            .iter()
            .filter(|s| window.is_none_or(|w| s.window == w))
            .filter(|s| platform.is_none_or(|p| s.platform == p))
            .cloned()
            .collect();
        signals.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.content_id.cmp(&b.content_id))
        });
        signals
    }

    #[must_use]
    pub fn skip_counts(&self) -> BTreeMap<SkipReason, usize> {
        let mut counts = BTreeMap::new();
        for skip in &self.skipped {
            *counts.entry(skip.reason).or_insert(0) += 1;
        }
        counts
    }
}

/// `base × (1 + sensitivity × ln(1 + volume / reference))`.
#[must_use]
pub fn adaptive_threshold(config: &TrendConfig, platform_volume: f64) -> f64 {
    let volume = platform_volume.max(0.0);
    config.base_threshold
        * (1.0 + config.volume_sensitivity * (volume / config.reference_volume).ln_1p())
}

/// z-score of `velocity` against `baseline`, or `None` while the baseline
/// is too short.
#[must_use]
pub fn anomaly_score(velocity: f64, baseline: &Baseline, config: &TrendConfig) -> Option<f64> {
    if baseline.len() < config.min_baseline_samples {
        return None;
    }
    let mean = baseline.mean()?;
    let std = baseline.std(config.min_std)?;
    Some((velocity - mean) / std)
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    value: f64,
    at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct RecentSignal {
    content_id: String,
    platform: Platform,
    score: f64,
    detected_at: DateTime<Utc>,
}

pub struct TrendDetector {
    config: TrendConfig,
    previous: HashMap<String, Observation>,
    baselines: HashMap<String, Baseline>,
    recent: VecDeque<RecentSignal>,
}

impl TrendDetector {
    #[must_use]
    pub fn new(config: TrendConfig) -> Self {
        Self {
            config,
            previous: HashMap::new(),
            baselines: HashMap::new(),
            recent: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &TrendConfig {
        &self.config
    }

    /// Score every vector in `snapshot`. `tags` maps content ids to their
    /// topic tags for correlation; content without tags is never correlated.
    pub fn detect(
        &mut self,
        snapshot: &FeatureSnapshot,
        tags: &HashMap<String, BTreeSet<String>>,
    ) -> DetectionPass {
        let now = snapshot.taken_at;
        let mut pass = DetectionPass::empty(&snapshot.window, now);
        pass.vectors = snapshot.len();

        for platform in Platform::all() {
            let volume = snapshot.platform_volume(platform);
            pass.thresholds
                .insert(platform, adaptive_threshold(&self.config, volume));
        }

        for (content_id, vector) in &snapshot.vectors {
            let skip = |reason| Skipped {
                content_id: content_id.clone(),
                reason,
            };
            if vector.as_of > now {
                pass.skipped.push(skip(SkipReason::Lookahead));
                continue;
            }
            let Some(value) = vector.metric(ENGAGEMENT_METRIC) else {
                pass.skipped.push(skip(SkipReason::MissingMetric));
                continue;
            };
            let current = Observation { value, at: now };
            let Some(previous) = self.previous.get(content_id).copied() else {
                self.previous.insert(content_id.clone(), current);
                pass.skipped.push(skip(SkipReason::NoPreviousObservation));
                continue;
            };

            #[allow(clippy::cast_precision_loss)]
            let elapsed = (now - previous.at).num_milliseconds() as f64 / 1000.0;
            if elapsed <= 0.0 {
                pass.skipped.push(skip(SkipReason::NonPositiveElapsed));
                continue;
            }
            self.previous.insert(content_id.clone(), current);

            let velocity = (value - previous.value) / elapsed;
            let baseline = self
                .baselines
                .entry(content_id.clone())
                .or_insert_with(|| Baseline::new(self.config.baseline_samples));
            let score = anomaly_score(velocity, baseline, &self.config);
            baseline.push(velocity);
            let Some(score) = score else {
                pass.skipped.push(skip(SkipReason::MissingBaseline));
                continue;
            };

            pass.scores.insert(content_id.clone(), score);
            let threshold = pass
                .thresholds
                .get(&vector.platform)
                .copied()
                .unwrap_or(self.config.base_threshold);
            if score > threshold {
                pass.signals.push(TrendSignal {
                    content_id: content_id.clone(),
                    platform: vector.platform,
                    window: snapshot.window.clone(),
                    score,
                    velocity,
                    threshold,
                    correlation_set: None,
                    detected_at: now,
                });
            }
        }

        self.forget_missing(snapshot);
        self.correlate(&mut pass, tags);
        pass.signals.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.content_id.cmp(&b.content_id))
        });

        if !pass.skipped.is_empty() {
            tracing::debug!(
                window = %pass.window,
                skipped = pass.skipped.len(),
                reasons = ?pass.skip_counts(),
                "detection skipped some content"
            );
        }
        pass
    }

    /// Drop history for content the store has swept.
    fn forget_missing(&mut self, snapshot: &FeatureSnapshot) {
        let before = self.previous.len() + self.baselines.len();
        self.previous.retain(|id, _| snapshot.vectors.contains_key(id));
        self.baselines.retain(|id, _| snapshot.vectors.contains_key(id));
        let forgotten = before - self.previous.len() - self.baselines.len();
        if forgotten > 0 {
            tracing::debug!(forgotten, "detector history pruned");
        }
    }

    /// Group this pass's signals, and recent ones inside the correlation
    /// window, by tag. Groups spanning two or more platforms become the
    /// correlation set of each member signal in this pass.
    fn correlate(&mut self, pass: &mut DetectionPass, tags: &HashMap<String, BTreeSet<String>>) {
        let now = pass.detected_at;
        let horizon = now
            - i64::try_from(self.config.correlation_window_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::zero());
        while self.recent.front().is_some_and(|s| s.detected_at < horizon) {
            self.recent.pop_front();
        }
        // A content id's newest signal supersedes older ones.
        let current: BTreeSet<&str> = pass.signals.iter().map(|s| s.content_id.as_str()).collect();
        self.recent.retain(|s| !current.contains(s.content_id.as_str()));
        for signal in &pass.signals {
            self.recent.push_back(RecentSignal {
                content_id: signal.content_id.clone(),
                platform: signal.platform,
                score: signal.score,
                detected_at: signal.detected_at,
            });
        }

        let mut groups: BTreeMap<&str, CorrelationSet> = BTreeMap::new();
        for signal in &self.recent {
            let Some(topics) = tags.get(&signal.content_id) else {
                continue;
            };
            for topic in topics {
                let set = groups.entry(topic.as_str()).or_insert_with(|| CorrelationSet {
                    topic: topic.clone(),
                    platforms: BTreeSet::new(),
                    content_ids: BTreeSet::new(),
                    strength: 0.0,
                });
                set.platforms.insert(signal.platform);
                if set.content_ids.insert(signal.content_id.clone()) {
                    set.strength += signal.score;
                }
            }
        }

        for signal in &mut pass.signals {
            let Some(topics) = tags.get(&signal.content_id) else {
                continue;
            };
            signal.correlation_set = topics
                .iter()
                .filter_map(|t| groups.get(t.as_str()))
                .filter(|set| set.is_cross_platform())
                .max_by(|a, b| {
                    a.strength
                        .total_cmp(&b.strength)
                        .then_with(|| b.topic.cmp(&a.topic))
                })
                .cloned();
        }
    }
}

#[cfg(test)]
#[path = "detector_test.rs"]
mod tests;
