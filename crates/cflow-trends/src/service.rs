use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use cflow_core::TrendConfig;
use cflow_features::{FeatureError, FeatureStore};

use crate::alert::{fan_out, AlertDispatcher, AlertPolicy, TrendAlert};
use crate::board::TrendBoard;
use crate::detector::{DetectionPass, TrendDetector};
use crate::error::TrendError;

#[derive(Debug, Clone)]
pub struct PassOutcome {
    pub pass: Arc<DetectionPass>,
    pub alerts: Vec<TrendAlert>,
    pub alert_failures: usize,
}

/// Runs detection passes over the feature store on demand and publishes
/// each result to the board.
pub struct TrendService {
    store: Arc<FeatureStore>,
    board: Arc<TrendBoard>,
    detector: Mutex<TrendDetector>,
    policy: Mutex<AlertPolicy>,
    dispatchers: Vec<Box<dyn AlertDispatcher>>,
    window: String,
    deadline: Duration,
}

impl TrendService {
    /// # Errors
    ///
    /// Returns [`TrendError::Features`] if the configured window is not a
    /// feature-store window.
    pub fn new(
        config: TrendConfig,
        store: Arc<FeatureStore>,
        board: Arc<TrendBoard>,
        dispatchers: Vec<Box<dyn AlertDispatcher>>,
    ) -> Result<Self, TrendError> {
        if store.window(&config.window).is_none() {
            return Err(FeatureError::UnknownWindow(config.window).into());
        }
        Ok(Self {
            store,
            board,
            window: config.window.clone(),
            deadline: Duration::from_secs(config.deadline_secs),
            policy: Mutex::new(AlertPolicy::new(config.alert_min_score)),
            detector: Mutex::new(TrendDetector::new(config)),
            dispatchers,
        })
    }

    #[must_use]
    pub fn board(&self) -> &Arc<TrendBoard> {
        &self.board
    }

    #[must_use]
    pub fn window(&self) -> &str {
        &self.window
    }

    /// Snapshot, detect, publish, then alert.
    ///
    /// Alert delivery happens after the board is updated and outside the
    /// deadline; dispatcher failures are logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns [`TrendError::DeadlineExceeded`] if the pass did not finish
    /// in time. The board keeps the previous pass in that case.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> Result<PassOutcome, TrendError> {
        let pass = tokio::time::timeout(self.deadline, self.detect(now))
            .await
            .map_err(|_| TrendError::DeadlineExceeded {
                deadline_secs: self.deadline.as_secs(),
            })??;

        let alerts = self.policy.lock().await.select(&pass);
        let alert_failures = fan_out(&self.dispatchers, &alerts).await;

        tracing::info!(
            window = %pass.window,
            signals = pass.signals.len(),
            scored = pass.scores.len(),
            skipped = pass.skipped.len(),
            alerts = alerts.len(),
            alert_failures,
            "trend detection pass complete"
        );
        Ok(PassOutcome {
            pass,
            alerts,
            alert_failures,
        })
    }

    async fn detect(&self, now: DateTime<Utc>) -> Result<Arc<DetectionPass>, TrendError> {
        let tags: HashMap<String, BTreeSet<String>> = self
            .store
            .catalog()
            .items()
            .await
            .into_iter()
            .filter(|item| !item.tags.is_empty())
            .map(|item| (item.id, item.tags))
            .collect();
        let snapshot = self.store.snapshot(&self.window, now).await?;
        let pass = self.detector.lock().await.detect(&snapshot, &tags);
        Ok(self.board.publish(pass).await)
    }
}
