use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use cflow_core::RecommendationResult;

#[derive(Debug, Clone)]
struct Entry {
    result: RecommendationResult,
    stored_at: Instant,
}

/// Results keyed by `(subject_id, limit)`.
///
/// An entry is served only while it is younger than the TTL and was
/// computed under the current model version.
#[derive(Debug)]
pub struct ResultCache {
    ttl: Duration,
    entries: Mutex<HashMap<(String, usize), Entry>>,
}

impl ResultCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(
        &self,
        subject_id: &str,
        limit: usize,
        model_version: u64,
    ) -> Option<RecommendationResult> {
        let entries = self.entries.lock().await;
        let entry = entries.get(&(subject_id.to_owned(), limit))?;
        let fresh = entry.stored_at.elapsed() < self.ttl
            && entry.result.model_version == model_version;
        fresh.then(|| entry.result.clone())
    }

    /// Last stored result regardless of age or version.
    pub async fn last(&self, subject_id: &str, limit: usize) -> Option<RecommendationResult> {
        self.entries
            .lock()
            .await
            .get(&(subject_id.to_owned(), limit))
            .map(|e| e.result.clone())
    }

    pub async fn put(&self, limit: usize, result: RecommendationResult) {
        self.entries.lock().await.insert(
            (result.subject_id.clone(), limit),
            Entry {
                result,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop entries that can no longer be served. Returns how many went.
    pub async fn purge(&self, model_version: u64) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, e| {
            e.stored_at.elapsed() < self.ttl && e.result.model_version == model_version
        });
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
