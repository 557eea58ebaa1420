//! Hybrid recommendation scoring.
//!
//! `(w_c·collaborative + w_t·content + w_p·popularity) × trend boost`, with
//! every term read from one feature snapshot and one committed model state.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use cflow_core::{
    RecommendConfig, RecommendationResult, ResultStatus, ScoredContent, TrendBoostConfig,
};
use cflow_features::{FeatureError, FeatureSnapshot, FeatureStore};
use cflow_trends::TrendBoard;

use crate::cache::ResultCache;
use crate::error::RecommendError;
use crate::model::{InteractionModel, ModelState};
use crate::similarity::{normalize_by_max, tag_affinity};

/// Multiplier for a candidate with an active trend signal of `score`.
#[must_use]
pub fn trend_boost(config: &TrendBoostConfig, score: f64) -> f64 {
    (1.0 + config.per_score * score.max(0.0)).min(config.max_multiplier)
}

/// Where a served result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Scored on this request.
    Computed,
    /// Served from the result cache.
    Cached,
    /// Computation failed or ran out of time.
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Served {
    pub result: RecommendationResult,
    pub origin: Origin,
}

impl Served {
    fn new(result: RecommendationResult, origin: Origin) -> Self {
        Self { result, origin }
    }
}

pub struct RecommendationEngine {
    config: RecommendConfig,
    store: Arc<FeatureStore>,
    board: Arc<TrendBoard>,
    model: Arc<InteractionModel>,
    cache: ResultCache,
}

impl RecommendationEngine {
    /// # Errors
    ///
    /// Returns [`RecommendError::Features`] if the configured window is not
    /// a feature-store window.
    pub fn new(
        config: RecommendConfig,
        store: Arc<FeatureStore>,
        board: Arc<TrendBoard>,
        model: Arc<InteractionModel>,
    ) -> Result<Self, RecommendError> {
        if store.window(&config.window).is_none() {
            return Err(FeatureError::UnknownWindow(config.window).into());
        }
        Ok(Self {
            cache: ResultCache::new(Duration::from_secs(config.cache_ttl_secs)),
            config,
            store,
            board,
            model,
        })
    }

    #[must_use]
    pub fn model(&self) -> &Arc<InteractionModel> {
        &self.model
    }

    #[must_use]
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Clamp a requested limit to `1..=max_limit`, defaulting when absent.
    #[must_use]
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.config.default_limit)
            .clamp(1, self.config.max_limit)
    }

    /// Recommend for `subject_id`. Never fails: missing inputs and timeouts
    /// produce flagged results instead.
    pub async fn recommend(
        &self,
        subject_id: &str,
        limit: Option<usize>,
        now: DateTime<Utc>,
    ) -> RecommendationResult {
        self.serve(subject_id, limit, now).await.result
    }

    /// Like [`Self::recommend`], also saying where the result came from.
    pub async fn serve(&self, subject_id: &str, limit: Option<usize>, now: DateTime<Utc>) -> Served {
        let limit = self.effective_limit(limit);
        let version = self.model.version();
        if let Some(hit) = self.cache.get(subject_id, limit, version).await {
            return Served::new(hit, Origin::Cached);
        }

        let deadline = Duration::from_secs(self.config.deadline_secs);
        match tokio::time::timeout(deadline, self.compute(subject_id, limit, now)).await {
            Ok(Ok(result)) => {
                self.cache.put(limit, result.clone()).await;
                Served::new(result, Origin::Computed)
            }
            Ok(Err(e)) => {
                tracing::warn!(subject_id, error = %e, "recommendation failed");
                Served::new(insufficient(subject_id, now, version), Origin::Fallback)
            }
            Err(_) => {
                tracing::warn!(
                    subject_id,
                    deadline_secs = deadline.as_secs(),
                    "recommendation exceeded deadline"
                );
                let result = match self.cache.last(subject_id, limit).await {
                    Some(mut last) => {
                        last.status = ResultStatus::Degraded;
                        last.stale_snapshot = true;
                        last
                    }
                    None => insufficient(subject_id, now, version),
                };
                Served::new(result, Origin::Fallback)
            }
        }
    }

    async fn compute(
        &self,
        subject_id: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<RecommendationResult, FeatureError> {
        let snapshot = self.store.snapshot(&self.config.window, now).await?;
        let model = self.model.current().await;
        if snapshot.is_empty() {
            return Ok(insufficient(subject_id, now, model.version));
        }

        let stale_snapshot = self.is_stale(&snapshot, now);
        let trends = self.board.active_scores().await;
        let popularity = normalize_by_max(
            snapshot
                .vectors
                .iter()
                .map(|(id, v)| (id.clone(), v.engagement()))
                .collect(),
        );

        let personal = match model.history(subject_id) {
            Some(history) => {
                self.personalized(subject_id, history, &model, &popularity, &trends)
                    .await
            }
            None => None,
        };
        let personalized = personal.is_some();
        let scores = personal.unwrap_or_else(|| self.popularity_fallback(&popularity, &trends));

        let mut items: Vec<ScoredContent> = scores
            .into_iter()
            .map(|(content_id, score)| ScoredContent { content_id, score })
            .collect();
        items.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.content_id.cmp(&b.content_id))
        });
        items.truncate(limit);

        let status = if personalized && !stale_snapshot {
            ResultStatus::Ok
        } else {
            ResultStatus::Degraded
        };
        tracing::debug!(
            subject_id,
            items = items.len(),
            personalized,
            stale_snapshot,
            model_version = model.version,
            "recommendation computed"
        );
        Ok(RecommendationResult {
            subject_id: subject_id.to_owned(),
            items,
            generated_at: now,
            model_version: model.version,
            personalized,
            status,
            stale_snapshot,
        })
    }

    /// Hybrid scores for unseen candidates, or `None` when neither the
    /// collaborative nor the content signal says anything about them.
    async fn personalized(
        &self,
        subject_id: &str,
        history: &BTreeMap<String, f64>,
        model: &ModelState,
        popularity: &BTreeMap<String, f64>,
        trends: &HashMap<String, f64>,
    ) -> Option<BTreeMap<String, f64>> {
        let weights = self.config.weights;
        let collaborative =
            normalize_by_max(model.collaborative_scores(subject_id, self.config.neighbors));
        let tags: HashMap<String, BTreeSet<String>> = self
            .store
            .catalog()
            .items()
            .await
            .into_iter()
            .map(|item| (item.id, item.tags))
            .collect();
        let empty_profile = BTreeMap::new();
        let profile = model.profiles.get(subject_id).unwrap_or(&empty_profile);

        let mut informed = false;
        let mut scores = BTreeMap::new();
        for (content_id, pop) in popularity {
            if history.contains_key(content_id) {
                continue;
            }
            let collab = collaborative.get(content_id).copied().unwrap_or(0.0);
            let content = tags
                .get(content_id)
                .map_or(0.0, |t| tag_affinity(profile, t));
            informed |= collab > 0.0 || content > 0.0;
            let base = weights.collaborative * collab
                + weights.content * content
                + weights.popularity * pop;
            scores.insert(content_id.clone(), base * self.boost(content_id, trends));
        }
        informed.then_some(scores)
    }

    fn popularity_fallback(
        &self,
        popularity: &BTreeMap<String, f64>,
        trends: &HashMap<String, f64>,
    ) -> BTreeMap<String, f64> {
        popularity
            .iter()
            .map(|(id, pop)| (id.clone(), pop * self.boost(id, trends)))
            .collect()
    }

    fn boost(&self, content_id: &str, trends: &HashMap<String, f64>) -> f64 {
        trends
            .get(content_id)
            .map_or(1.0, |score| trend_boost(&self.config.trend_boost, *score))
    }

    fn is_stale(&self, snapshot: &FeatureSnapshot, now: DateTime<Utc>) -> bool {
        let horizon = i64::try_from(self.config.stale_after_secs).unwrap_or(i64::MAX);
        snapshot
            .vectors
            .values()
            .map(|v| v.as_of)
            .max()
            .is_none_or(|newest| now.signed_duration_since(newest).num_seconds() > horizon)
    }
}

fn insufficient(subject_id: &str, now: DateTime<Utc>, model_version: u64) -> RecommendationResult {
    RecommendationResult {
        subject_id: subject_id.to_owned(),
        items: Vec::new(),
        generated_at: now,
        model_version,
        personalized: false,
        status: ResultStatus::InsufficientData,
        stale_snapshot: false,
    }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod tests;
