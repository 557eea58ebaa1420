//! Per (content, window) aggregation state.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use cflow_core::{EngagementEvent, EventWeights, WindowConfig, WindowKind, ENGAGEMENT_METRIC};

use crate::decay::DecayedValue;

/// Resolved window definition.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSpec {
    pub name: String,
    pub kind: WindowKind,
    pub retention: Duration,
}

impl From<&WindowConfig> for WindowSpec {
    fn from(config: &WindowConfig) -> Self {
        Self {
            name: config.name.clone(),
            kind: config.kind.clone(),
            retention: i64::try_from(config.retention_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX),
        }
    }
}

impl WindowSpec {
    /// Half-life for one metric in a decayed window.
    #[must_use]
    pub fn half_life(&self, metric: &str) -> Option<f64> {
        match &self.kind {
            WindowKind::Decayed {
                half_life_secs,
                metric_half_lives,
            } => Some(
                metric_half_lives
                    .get(metric)
                    .copied()
                    .unwrap_or(*half_life_secs),
            ),
            WindowKind::Tumbling { .. } => None,
        }
    }

    /// Start of the tumbling bucket containing `ts`, as epoch seconds.
    #[must_use]
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> Option<i64> {
        match self.kind {
            WindowKind::Tumbling { size_secs } => {
                let size = i64::try_from(size_secs).ok()?.max(1);
                Some(ts.timestamp().div_euclid(size) * size)
            }
            WindowKind::Decayed { .. } => None,
        }
    }

    fn bucket_end(&self, start: i64) -> i64 {
        match self.kind {
            WindowKind::Tumbling { size_secs } => {
                start.saturating_add(i64::try_from(size_secs).unwrap_or(i64::MAX))
            }
            WindowKind::Decayed { .. } => start,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub metrics: BTreeMap<String, f64>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Aggregate {
    Tumbling { buckets: BTreeMap<i64, Bucket> },
    Decayed { values: BTreeMap<String, DecayedValue> },
}

/// What applying one event to one window did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowApply {
    Applied,
    Duplicate,
    /// Older than the retention horizon; its id can no longer be checked.
    Expired,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Evicted {
    pub ids: usize,
    pub buckets: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowState {
    /// source_event_id → event time, kept for the retention horizon.
    pub applied: BTreeMap<String, DateTime<Utc>>,
    pub aggregate: Aggregate,
    pub as_of: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expired: u64,
}

impl WindowState {
    #[must_use]
    pub fn new(spec: &WindowSpec) -> Self {
        let aggregate = match spec.kind {
            WindowKind::Tumbling { .. } => Aggregate::Tumbling {
                buckets: BTreeMap::new(),
            },
            WindowKind::Decayed { .. } => Aggregate::Decayed {
                values: BTreeMap::new(),
            },
        };
        Self {
            applied: BTreeMap::new(),
            aggregate,
            as_of: None,
            expired: 0,
        }
    }

    pub fn apply(
        &mut self,
        spec: &WindowSpec,
        weights: &EventWeights,
        event: &EngagementEvent,
    ) -> WindowApply {
        if self.applied.contains_key(&event.source_event_id) {
            return WindowApply::Duplicate;
        }
        if let Some(as_of) = self.as_of {
            let horizon = as_of - spec.retention;
            if event.timestamp < horizon {
                self.expired += 1;
                return WindowApply::Expired;
            }
        }

        let metric = event.event_type.metric_name();
        let engagement = weights.weight(event.event_type) * event.magnitude;
        match &mut self.aggregate {
            Aggregate::Tumbling { buckets } => {
                if let Some(start) = spec.bucket_start(event.timestamp) {
                    let bucket = buckets.entry(start).or_default();
                    *bucket.metrics.entry(metric.to_owned()).or_insert(0.0) += event.magnitude;
                    *bucket
                        .metrics
                        .entry(ENGAGEMENT_METRIC.to_owned())
                        .or_insert(0.0) += engagement;
                    bucket.updated_at = bucket.updated_at.max(Some(event.timestamp));
                }
            }
            Aggregate::Decayed { values } => {
                for (name, amount) in [(metric, event.magnitude), (ENGAGEMENT_METRIC, engagement)] {
                    let half_life = spec.half_life(name).unwrap_or(f64::INFINITY);
                    values
                        .entry(name.to_owned())
                        .or_insert_with(|| DecayedValue::new(0.0, event.timestamp))
                        .add(amount, event.timestamp, half_life);
                }
            }
        }

        self.applied
            .insert(event.source_event_id.clone(), event.timestamp);
        self.as_of = self.as_of.max(Some(event.timestamp));
        self.evict(spec, self.as_of.map(|t| t - spec.retention));
        WindowApply::Applied
    }

    /// Metric values as seen at `now`.
    ///
    /// Decayed windows decay every metric to `now`; tumbling windows report
    /// the bucket containing `now`, or `None` when that bucket is empty.
    #[must_use]
    pub fn metrics_at(
        &self,
        spec: &WindowSpec,
        now: DateTime<Utc>,
    ) -> Option<BTreeMap<String, f64>> {
        match &self.aggregate {
            Aggregate::Tumbling { buckets } => {
                let start = spec.bucket_start(now)?;
                buckets.get(&start).map(|b| b.metrics.clone())
            }
            Aggregate::Decayed { values } => {
                if values.is_empty() {
                    return None;
                }
                Some(
                    values
                        .iter()
                        .map(|(name, v)| {
                            let half_life = spec.half_life(name).unwrap_or(f64::INFINITY);
                            (name.clone(), v.value_at(now, half_life))
                        })
                        .collect(),
                )
            }
        }
    }

    /// Drop applied ids and tumbling buckets older than `cutoff`.
    pub fn evict(&mut self, spec: &WindowSpec, cutoff: Option<DateTime<Utc>>) -> Evicted {
        let Some(cutoff) = cutoff else {
            return Evicted::default();
        };
        let before = self.applied.len();
        self.applied.retain(|_, ts| *ts >= cutoff);
        let mut evicted = Evicted {
            ids: before - self.applied.len(),
            buckets: 0,
        };
        if let Aggregate::Tumbling { buckets } = &mut self.aggregate {
            let before = buckets.len();
            let cutoff_secs = cutoff.timestamp();
            buckets.retain(|start, _| spec.bucket_end(*start) > cutoff_secs);
            evicted.buckets = before - buckets.len();
        }
        evicted
    }

    /// True once nothing inside the retention horizon remains.
    #[must_use]
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.applied.is_empty() && self.as_of.is_none_or(|as_of| as_of < cutoff)
    }

    /// Fold a checkpointed copy into this state. Highest timestamp wins per
    /// metric (per bucket for tumbling windows); applied ids are unioned.
    pub fn merge(&mut self, other: WindowState) {
        for (id, ts) in other.applied {
            self.applied.entry(id).or_insert(ts);
        }
        self.as_of = self.as_of.max(other.as_of);
        self.expired = self.expired.max(other.expired);

        match (&mut self.aggregate, other.aggregate) {
            (Aggregate::Decayed { values }, Aggregate::Decayed { values: incoming }) => {
                for (name, value) in incoming {
                    match values.get(&name) {
                        Some(current) if current.updated_at >= value.updated_at => {}
                        _ => {
                            values.insert(name, value);
                        }
                    }
                }
            }
            (Aggregate::Tumbling { buckets }, Aggregate::Tumbling { buckets: incoming }) => {
                for (start, bucket) in incoming {
                    match buckets.get(&start) {
                        Some(current) if current.updated_at >= bucket.updated_at => {}
                        _ => {
                            buckets.insert(start, bucket);
                        }
                    }
                }
            }
            _ => {
                tracing::warn!(
                    "checkpointed window kind differs from configuration, keeping current"
                );
            }
        }
    }
}
