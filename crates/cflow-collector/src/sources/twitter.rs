//! Twitter/X engagement source (bearer token).
//!
//! Pages with `meta.next_token`; the cursor is `since_id`, taken from the
//! first page's `meta.newest_id` (the newest id across the whole result).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use cflow_core::{Credentials, Platform, RawRecord, SourceConfig};

use crate::error::CollectorError;
use crate::http::SourceHttp;
use crate::source::{FetchPage, RateBudget, Source};

const MAX_RESULTS: &str = "100";

#[derive(Debug, Deserialize)]
struct Meta {
    newest_id: Option<String>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EngagementPage {
    #[serde(default)]
    data: Vec<Value>,
    meta: Option<Meta>,
}

pub struct TwitterSource {
    http: SourceHttp,
    base_url: String,
    bearer_token: String,
    page_limit: usize,
}

impl TwitterSource {
    /// # Errors
    ///
    /// Returns [`CollectorError::InvalidConfig`] unless the source carries a
    /// bearer token, or [`CollectorError::Http`] if the client cannot be built.
    pub fn new(
        config: &SourceConfig,
        timeout_secs: u64,
        user_agent: &str,
    ) -> Result<Self, CollectorError> {
        let Credentials::Bearer(token) = &config.credentials else {
            return Err(CollectorError::InvalidConfig {
                name: config.name.clone(),
                reason: "twitter sources require a bearer token".to_owned(),
            });
        };
        Ok(Self {
            http: SourceHttp::new(config, timeout_secs, user_agent)?,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            bearer_token: token.clone(),
            page_limit: config.page_limit,
        })
    }
}

#[async_trait]
impl Source for TwitterSource {
    fn name(&self) -> &str {
        self.http.name()
    }

    fn platform(&self) -> Platform {
        Platform::Twitter
    }

    fn describe_rate_budget(&self) -> RateBudget {
        self.http.budget()
    }

    async fn fetch(&self, since: Option<&str>) -> Result<FetchPage, CollectorError> {
        let url = format!("{}/engagements/recent", self.base_url);
        let mut next_token: Option<String> = None;
        let mut out = FetchPage::default();

        while out.pages < self.page_limit {
            let body = self
                .http
                .send_json(|client| {
                    let mut req = client
                        .get(&url)
                        .bearer_auth(&self.bearer_token)
                        .query(&[("max_results", MAX_RESULTS)]);
                    if let Some(since) = since {
                        req = req.query(&[("since_id", since)]);
                    }
                    if let Some(token) = &next_token {
                        req = req.query(&[("pagination_token", token.as_str())]);
                    }
                    req
                })
                .await?;
            out.pages += 1;

            let page: EngagementPage =
                serde_json::from_value(body).map_err(|e| CollectorError::Deserialize {
                    context: format!("{} engagements page", self.name()),
                    source: e,
                })?;
            out.records.extend(
                page.data
                    .into_iter()
                    .map(|item| RawRecord::tagged(self.name(), Platform::Twitter, item)),
            );

            let Some(meta) = page.meta else { break };
            if out.next_cursor.is_none() {
                out.next_cursor = meta.newest_id;
            }
            match meta.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        tracing::debug!(
            source = self.name(),
            records = out.records.len(),
            pages = out.pages,
            "fetched twitter engagements"
        );
        Ok(out)
    }
}
