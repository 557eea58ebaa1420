//! `YouTube` engagement activity source.
//!
//! API-key query auth, `pageToken`/`nextPageToken` pagination. The cursor is
//! the newest `observedAt` seen so far; the API returns activities in
//! ascending `observedAt` order when `observedAfter` is given, so stopping at
//! the page limit never skips older items.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use cflow_core::{Credentials, Platform, RawRecord, SourceConfig};

use crate::error::CollectorError;
use crate::http::SourceHttp;
use crate::source::{FetchPage, RateBudget, Source};

const MAX_RESULTS: &str = "50";

static ISO_DURATION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$").ok()
});

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityPage {
    #[serde(default)]
    items: Vec<Value>,
    next_page_token: Option<String>,
}

pub struct YoutubeSource {
    http: SourceHttp,
    base_url: String,
    api_key: String,
    page_limit: usize,
}

impl YoutubeSource {
    /// # Errors
    ///
    /// Returns [`CollectorError::InvalidConfig`] unless the source carries
    /// API-key credentials, or [`CollectorError::Http`] if the client cannot
    /// be built.
    pub fn new(
        config: &SourceConfig,
        timeout_secs: u64,
        user_agent: &str,
    ) -> Result<Self, CollectorError> {
        let Credentials::ApiKey(api_key) = &config.credentials else {
            return Err(CollectorError::InvalidConfig {
                name: config.name.clone(),
                reason: "youtube sources require api_key credentials".to_owned(),
            });
        };
        Ok(Self {
            http: SourceHttp::new(config, timeout_secs, user_agent)?,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.clone(),
            page_limit: config.page_limit,
        })
    }
}

#[async_trait]
impl Source for YoutubeSource {
    fn name(&self) -> &str {
        self.http.name()
    }

    fn platform(&self) -> Platform {
        Platform::Youtube
    }

    fn describe_rate_budget(&self) -> RateBudget {
        self.http.budget()
    }

    async fn fetch(&self, since: Option<&str>) -> Result<FetchPage, CollectorError> {
        let url = format!("{}/activities", self.base_url);
        let mut page_token: Option<String> = None;
        let mut watermark: Option<DateTime<Utc>> = since.and_then(parse_rfc3339);
        let mut out = FetchPage::default();

        while out.pages < self.page_limit {
            let body = self
                .http
                .send_json(|client| {
                    let mut req = client
                        .get(&url)
                        .query(&[("key", self.api_key.as_str()), ("maxResults", MAX_RESULTS)]);
                    if let Some(since) = since {
                        req = req.query(&[("observedAfter", since)]);
                    }
                    if let Some(token) = &page_token {
                        req = req.query(&[("pageToken", token.as_str())]);
                    }
                    req
                })
                .await?;
            out.pages += 1;

            let page: ActivityPage =
                serde_json::from_value(body).map_err(|e| CollectorError::Deserialize {
                    context: format!("{} activities page", self.name()),
                    source: e,
                })?;

            for mut item in page.items {
                if let Some(observed) = item.get("observedAt").and_then(Value::as_str) {
                    if let Some(ts) = parse_rfc3339(observed) {
                        watermark = Some(watermark.map_or(ts, |w| w.max(ts)));
                    }
                }
                let duration = item
                    .get("duration")
                    .and_then(Value::as_str)
                    .and_then(parse_iso8601_duration);
                if let (Some(secs), Some(map)) = (duration, item.as_object_mut()) {
                    map.insert("durationSecs".to_owned(), json!(secs));
                }
                out.records
                    .push(RawRecord::tagged(self.name(), Platform::Youtube, item));
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        out.next_cursor = watermark.map(|w| w.to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
        tracing::debug!(
            source = self.name(),
            records = out.records.len(),
            pages = out.pages,
            "fetched youtube activities"
        );
        Ok(out)
    }
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an ISO-8601 duration such as `PT1H2M3S` into seconds.
#[must_use]
pub fn parse_iso8601_duration(raw: &str) -> Option<u64> {
    let caps = ISO_DURATION.as_ref()?.captures(raw.trim())?;
    if raw.trim() == "P" || raw.trim() == "PT" {
        return None;
    }
    let part = |i: usize| -> u64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0)
    };
    Some(part(1) * 86_400 + part(2) * 3_600 + part(3) * 60 + part(4))
}
