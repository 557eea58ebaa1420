//! Trend alerts and the notification channels they are pushed to.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use cflow_core::TrendSignal;

use crate::detector::DetectionPass;
use crate::error::AlertError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Single-content score above the alert floor.
    Spike,
    /// The signal belongs to a topic trending on two or more platforms.
    CrossPlatform,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendAlert {
    pub alert_id: Uuid,
    pub kind: AlertKind,
    pub signal: TrendSignal,
    pub emitted_at: DateTime<Utc>,
}

/// Decides which signals of a pass deserve an alert.
///
/// A content id alerts once when it starts trending and again only after
/// it dropped off the board. A correlation topic alerts once per episode
/// in the same way.
#[derive(Debug)]
pub struct AlertPolicy {
    min_score: f64,
    trending: BTreeSet<String>,
    topics: BTreeSet<String>,
}

impl AlertPolicy {
    #[must_use]
    pub fn new(min_score: f64) -> Self {
        Self {
            min_score,
            trending: BTreeSet::new(),
            topics: BTreeSet::new(),
        }
    }

    pub fn select(&mut self, pass: &DetectionPass) -> Vec<TrendAlert> {
        let mut alerts = Vec::new();
        let mut trending = BTreeSet::new();
        let mut topics = BTreeSet::new();

        for signal in &pass.signals {
            let cross_topic = signal
                .correlation_set
                .as_ref()
                .filter(|set| set.is_cross_platform())
                .map(|set| set.topic.clone());

            let kind = match &cross_topic {
                Some(topic) if !self.topics.contains(topic) && !topics.contains(topic) => {
                    Some(AlertKind::CrossPlatform)
                }
                _ if signal.score >= self.min_score
                    && !self.trending.contains(&signal.content_id) =>
                {
                    Some(AlertKind::Spike)
                }
                _ => None,
            };

            if signal.score >= self.min_score {
                trending.insert(signal.content_id.clone());
            }
            if let Some(kind) = kind {
                alerts.push(TrendAlert {
                    alert_id: Uuid::new_v4(),
                    kind,
                    signal: signal.clone(),
                    emitted_at: pass.detected_at,
                });
            }
            if let Some(topic) = cross_topic {
                topics.insert(topic);
            }
        }

        self.trending = trending;
        self.topics = topics;
        alerts
    }
}

#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    fn name(&self) -> &str;

    async fn dispatch(&self, alert: &TrendAlert) -> Result<(), AlertError>;
}

/// Writes alerts to the log. Always available, never fails.
#[derive(Debug, Default)]
pub struct LogAlertDispatcher;

#[async_trait]
impl AlertDispatcher for LogAlertDispatcher {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn dispatch(&self, alert: &TrendAlert) -> Result<(), AlertError> {
        let signal = &alert.signal;
        tracing::warn!(
            alert_id = %alert.alert_id,
            kind = ?alert.kind,
            content_id = %signal.content_id,
            platform = %signal.platform,
            score = signal.score,
            threshold = signal.threshold,
            topic = signal.correlation_set.as_ref().map(|s| s.topic.as_str()),
            "trend alert"
        );
        Ok(())
    }
}

/// POSTs each alert as JSON to a webhook.
pub struct WebhookAlertDispatcher {
    url: String,
    http: reqwest::Client,
}

impl WebhookAlertDispatcher {
    #[must_use]
    pub fn new(url: String, http: reqwest::Client) -> Self {
        Self { url, http }
    }
}

#[async_trait]
impl AlertDispatcher for WebhookAlertDispatcher {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn dispatch(&self, alert: &TrendAlert) -> Result<(), AlertError> {
        let resp = self.http.post(&self.url).json(alert).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "alert webhook returned non-success");
            return Err(AlertError::Status {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Send every alert to every dispatcher. Failures are logged and counted,
/// never propagated.
pub async fn fan_out(dispatchers: &[Box<dyn AlertDispatcher>], alerts: &[TrendAlert]) -> usize {
    let mut failures = 0;
    for alert in alerts {
        for dispatcher in dispatchers {
            if let Err(e) = dispatcher.dispatch(alert).await {
                failures += 1;
                tracing::warn!(
                    dispatcher = dispatcher.name(),
                    alert_id = %alert.alert_id,
                    content_id = %alert.signal.content_id,
                    error = %e,
                    "failed to dispatch trend alert"
                );
            }
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeSet;

    use cflow_core::{CorrelationSet, Platform};

    fn signal(id: &str, platform: Platform, score: f64, topic: Option<&str>) -> TrendSignal {
        TrendSignal {
            content_id: id.to_owned(),
            platform,
            window: "decayed_1h".to_owned(),
            score,
            velocity: 1.0,
            threshold: 3.0,
            correlation_set: topic.map(|t| CorrelationSet {
                topic: t.to_owned(),
                platforms: BTreeSet::from([Platform::Youtube, Platform::Twitter]),
                content_ids: BTreeSet::from(["yt".to_owned(), "tw".to_owned()]),
                strength: 10.0,
            }),
            detected_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    fn pass(signals: Vec<TrendSignal>) -> DetectionPass {
        let mut pass = DetectionPass::empty("decayed_1h", DateTime::<Utc>::UNIX_EPOCH);
        pass.signals = signals;
        pass
    }

    #[test]
    fn low_scores_without_correlation_stay_quiet() {
        let mut policy = AlertPolicy::new(6.0);
        let alerts = policy.select(&pass(vec![signal("a", Platform::Youtube, 4.0, None)]));
        assert!(alerts.is_empty());
    }

    #[test]
    fn spikes_alert_once_per_episode() {
        let mut policy = AlertPolicy::new(6.0);
        let hot = || pass(vec![signal("a", Platform::Youtube, 8.0, None)]);

        let first = policy.select(&hot());
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind, AlertKind::Spike);
        assert!(policy.select(&hot()).is_empty());

        assert!(policy.select(&pass(Vec::new())).is_empty());
        assert_eq!(policy.select(&hot()).len(), 1);
    }

    #[test]
    fn correlated_topics_alert_below_the_score_floor() {
        let mut policy = AlertPolicy::new(100.0);
        let alerts = policy.select(&pass(vec![
            signal("yt", Platform::Youtube, 5.0, Some("worldcup")),
            signal("tw", Platform::Twitter, 4.0, Some("worldcup")),
        ]));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::CrossPlatform);
        assert_eq!(alerts[0].signal.content_id, "yt");

        let again = policy.select(&pass(vec![signal(
            "yt",
            Platform::Youtube,
            5.0,
            Some("worldcup"),
        )]));
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn log_dispatcher_never_fails() {
        let dispatchers: Vec<Box<dyn AlertDispatcher>> = vec![Box::new(LogAlertDispatcher)];
        let alerts = AlertPolicy::new(1.0).select(&pass(vec![signal(
            "a",
            Platform::Spotify,
            2.0,
            None,
        )]));
        assert_eq!(fan_out(&dispatchers, &alerts).await, 0);
    }
}
