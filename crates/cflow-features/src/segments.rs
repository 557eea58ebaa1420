//! Decayed engagement per (audience segment, content), striped by content
//! id so a busy segment does not serialize every writer.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use cflow_core::{AudienceSegment, ScoredContent};

use crate::decay::DecayedValue;
use crate::shard::Striped;

pub type SegmentTable = BTreeMap<String, BTreeMap<String, DecayedValue>>;

type SegmentValues = HashMap<AudienceSegment, HashMap<String, DecayedValue>>;

#[derive(Debug)]
pub struct SegmentAggregates {
    half_life_secs: f64,
    values: Striped<SegmentValues>,
}

impl SegmentAggregates {
    #[must_use]
    pub fn new(half_life_secs: f64, shards: usize) -> Self {
        Self {
            half_life_secs,
            values: Striped::new(shards),
        }
    }

    pub async fn record(
        &self,
        segment: &str,
        content_id: &str,
        engagement: f64,
        at: DateTime<Utc>,
    ) {
        let mut values = self.values.get(content_id).write().await;
        values
            .entry(AudienceSegment(segment.to_owned()))
            .or_default()
            .entry(content_id.to_owned())
            .or_insert_with(|| DecayedValue::new(0.0, at))
            .add(engagement, at, self.half_life_secs);
    }

    /// Highest decayed engagement within one segment; ties by content id.
    pub async fn top(&self, segment: &str, limit: usize, now: DateTime<Utc>) -> Vec<ScoredContent> {
        let key = AudienceSegment(segment.to_owned());
        let mut scored = Vec::new();
        for stripe in self.values.iter() {
            let values = stripe.read().await;
            let Some(contents) = values.get(&key) else {
                continue;
            };
            scored.extend(contents.iter().map(|(content_id, value)| ScoredContent {
                content_id: content_id.clone(),
                score: value.value_at(now, self.half_life_secs),
            }));
        }
        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.content_id.cmp(&b.content_id))
        });
        scored.truncate(limit);
        scored
    }

    pub async fn segments(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        for stripe in self.values.iter() {
            names.extend(stripe.read().await.keys().map(|s| s.as_str().to_owned()));
        }
        names.into_iter().collect()
    }

    pub async fn export(&self) -> SegmentTable {
        let mut table = SegmentTable::new();
        for stripe in self.values.iter() {
            for (segment, contents) in stripe.read().await.iter() {
                table
                    .entry(segment.as_str().to_owned())
                    .or_default()
                    .extend(contents.iter().map(|(id, v)| (id.clone(), *v)));
            }
        }
        table
    }

    /// Merge checkpointed values; the more recently updated value wins.
    pub async fn restore(&self, table: SegmentTable) {
        for (segment, contents) in table {
            for (content_id, value) in contents {
                let mut values = self.values.get(&content_id).write().await;
                let live = values.entry(AudienceSegment(segment.clone())).or_default();
                match live.get(&content_id) {
                    Some(current) if current.updated_at >= value.updated_at => {}
                    _ => {
                        live.insert(content_id, value);
                    }
                }
            }
        }
    }

    /// Drop entries last touched before `cutoff`.
    pub async fn evict(&self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for stripe in self.values.iter() {
            stripe.write().await.retain(|_, contents| {
                let before = contents.len();
                contents.retain(|_, v| v.updated_at >= cutoff);
                removed += before - contents.len();
                !contents.is_empty()
            });
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn top_orders_by_score_then_id() {
        let segments = SegmentAggregates::new(3600.0, 4);
        segments.record("gen-z", "b", 5.0, at(0)).await;
        segments.record("gen-z", "a", 5.0, at(0)).await;
        segments.record("gen-z", "c", 9.0, at(0)).await;
        segments.record("boomer", "d", 100.0, at(0)).await;

        let top = segments.top("gen-z", 2, at(0)).await;
        let ids: Vec<&str> = top.iter().map(|s| s.content_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
        assert!(segments.top("unknown", 5, at(0)).await.is_empty());
    }

    #[tokio::test]
    async fn evict_removes_stale_entries() {
        let segments = SegmentAggregates::new(3600.0, 4);
        segments.record("s", "old", 1.0, at(0)).await;
        segments.record("s", "new", 1.0, at(500)).await;
        assert_eq!(segments.evict(at(100)).await, 1);
        assert_eq!(segments.top("s", 10, at(500)).await.len(), 1);
    }

    #[tokio::test]
    async fn one_segment_spans_every_stripe() {
        let segments = SegmentAggregates::new(3600.0, 8);
        for (i, id) in ["a", "b", "c", "d", "e", "f"].into_iter().enumerate() {
            segments.record("fans", id, f64::from(u8::try_from(i).unwrap()), at(0)).await;
        }
        segments.record("other", "a", 1.0, at(0)).await;

        let top = segments.top("fans", 10, at(0)).await;
        assert_eq!(top.len(), 6);
        assert_eq!(top[0].content_id, "f");
        assert_eq!(segments.segments().await, vec!["fans", "other"]);
        assert_eq!(segments.export().await["fans"].len(), 6);
    }
}
