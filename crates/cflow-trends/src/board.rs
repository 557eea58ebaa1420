//! Latest detection pass, shared read-only with queries and the
//! recommendation engine.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use cflow_core::{Platform, ResultStatus, TrendConfig, TrendSignal};

use crate::detector::DetectionPass;

/// How far a trend answer can be trusted at the moment it is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoardHealth {
    pub status: ResultStatus,
    /// The latest pass is older than two detection cadences.
    pub stale: bool,
}

impl BoardHealth {
    /// No pass, or a pass over an empty snapshot, is insufficient data. A
    /// stale pass, or one that could not score anything yet, is degraded.
    #[must_use]
    pub fn assess(pass: Option<&DetectionPass>, now: DateTime<Utc>, stale_after: Duration) -> Self {
        let Some(pass) = pass else {
            return Self {
                status: ResultStatus::InsufficientData,
                stale: false,
            };
        };
        let stale = now.signed_duration_since(pass.detected_at) > stale_after;
        let status = if pass.vectors == 0 {
            ResultStatus::InsufficientData
        } else if stale || pass.scores.is_empty() {
            ResultStatus::Degraded
        } else {
            ResultStatus::Ok
        };
        Self { status, stale }
    }
}

/// Age past which the latest pass counts as stale.
#[must_use]
pub fn stale_after(config: &TrendConfig) -> Duration {
    i64::try_from(config.cadence_secs.saturating_mul(2))
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

#[derive(Debug, Default)]
pub struct TrendBoard {
    latest: RwLock<Option<Arc<DetectionPass>>>,
}

impl TrendBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current pass. Signals are superseded, never amended.
    pub async fn publish(&self, pass: DetectionPass) -> Arc<DetectionPass> {
        let pass = Arc::new(pass);
        *self.latest.write().await = Some(Arc::clone(&pass));
        pass
    }

    pub async fn latest(&self) -> Option<Arc<DetectionPass>> {
        self.latest.read().await.clone()
    }

    /// Signals of the latest pass, filtered, by score descending then
    /// content id.
    pub async fn query(&self, window: Option<&str>, platform: Option<Platform>) -> Vec<TrendSignal> {
        self.latest()
            .await
            .map(|pass| pass.signals_for(window, platform))
            .unwrap_or_default()
    }

    /// content id → score for every active signal.
    pub async fn active_scores(&self) -> HashMap<String, f64> {
        self.latest()
            .await
            .map(|pass| {
                pass.signals
                    .iter()
                    .map(|s| (s.content_id.clone(), s.score))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(id: &str, platform: Platform, score: f64) -> TrendSignal {
        TrendSignal {
            content_id: id.to_owned(),
            platform,
            window: "decayed_1h".to_owned(),
            score,
            velocity: 1.0,
            threshold: 3.0,
            correlation_set: None,
            detected_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[tokio::test]
    async fn query_filters_and_orders() {
        let board = TrendBoard::new();
        assert!(board.query(None, None).await.is_empty());

        let mut pass = DetectionPass::empty("decayed_1h", DateTime::<Utc>::UNIX_EPOCH);
        pass.signals = vec![
            signal("b", Platform::Youtube, 5.0),
            signal("a", Platform::Youtube, 5.0),
            signal("c", Platform::Twitter, 9.0),
        ];
        board.publish(pass).await;

        let all: Vec<String> = board
            .query(Some("decayed_1h"), None)
            .await
            .into_iter()
            .map(|s| s.content_id)
            .collect();
        assert_eq!(all, vec!["c", "a", "b"]);
        assert_eq!(board.query(None, Some(Platform::Youtube)).await.len(), 2);
        assert!(board.query(Some("hourly"), None).await.is_empty());
        assert!((board.active_scores().await["c"] - 9.0).abs() < f64::EPSILON);
    }

    fn scored_pass(detected_at: DateTime<Utc>, vectors: usize, scored: bool) -> DetectionPass {
        let mut pass = DetectionPass::empty("decayed_1h", detected_at);
        pass.vectors = vectors;
        if scored {
            pass.scores.insert("a".to_owned(), 1.5);
        }
        pass
    }

    #[test]
    fn health_reflects_missing_empty_stale_and_cold_passes() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let limit = Duration::seconds(600);
        let health = |pass: Option<&DetectionPass>| BoardHealth::assess(pass, now, limit);

        assert_eq!(health(None).status, ResultStatus::InsufficientData);
        let empty = scored_pass(now, 0, false);
        assert_eq!(health(Some(&empty)).status, ResultStatus::InsufficientData);

        let fresh = scored_pass(now - Duration::seconds(60), 3, true);
        assert_eq!(
            health(Some(&fresh)),
            BoardHealth {
                status: ResultStatus::Ok,
                stale: false
            }
        );

        let old = scored_pass(now - Duration::seconds(601), 3, true);
        assert_eq!(
            health(Some(&old)),
            BoardHealth {
                status: ResultStatus::Degraded,
                stale: true
            }
        );

        let cold = scored_pass(now, 3, false);
        assert_eq!(health(Some(&cold)).status, ResultStatus::Degraded);
    }

    #[test]
    fn staleness_allows_two_cadences() {
        let mut config = TrendConfig::for_window("decayed_1h");
        config.cadence_secs = 300;
        assert_eq!(stale_after(&config), Duration::seconds(600));
        config.cadence_secs = u64::MAX;
        assert_eq!(stale_after(&config), Duration::MAX);
    }
}
