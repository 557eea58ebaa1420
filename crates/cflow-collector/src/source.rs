//! The capability contract every platform source implements.

use async_trait::async_trait;
use serde::Serialize;

use cflow_core::{Platform, RawRecord};

use crate::error::CollectorError;

/// Result of one `fetch`: records plus the cursor to resume from.
///
/// `next_cursor == None` means the source made no progress and the previous
/// cursor stays in effect.
#[derive(Debug, Clone, Default)]
pub struct FetchPage {
    pub records: Vec<RawRecord>,
    pub next_cursor: Option<String>,
    pub pages: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateBudget {
    pub requests_per_sec: f64,
    pub burst: u32,
}

#[async_trait]
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    fn platform(&self) -> Platform;

    fn describe_rate_budget(&self) -> RateBudget;

    /// Fetch everything after `since` (at most the configured page limit).
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::SourceUnavailable`] when transient failures
    /// exhaust the retry budget, or another [`CollectorError`] for
    /// non-retriable failures.
    async fn fetch(&self, since: Option<&str>) -> Result<FetchPage, CollectorError>;
}
