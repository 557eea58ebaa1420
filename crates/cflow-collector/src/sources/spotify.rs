//! Spotify listening-engagement source (client-credentials OAuth).
//!
//! Exchanges the client id/secret for a bearer token, caches it until shortly
//! before expiry, and pages with `cursors.after`. The cursor is the last
//! `after` value returned.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use cflow_core::{Credentials, Platform, RawRecord, SourceConfig};

use crate::error::CollectorError;
use crate::http::SourceHttp;
use crate::source::{FetchPage, RateBudget, Source};

const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const PAGE_SIZE: &str = "50";
const EXPIRY_MARGIN_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3_600
}

#[derive(Debug, Deserialize)]
struct Cursors {
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EngagementPage {
    #[serde(default)]
    items: Vec<Value>,
    cursors: Option<Cursors>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct SpotifySource {
    http: SourceHttp,
    base_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    page_limit: usize,
    token: Mutex<Option<CachedToken>>,
}

impl SpotifySource {
    /// # Errors
    ///
    /// Returns [`CollectorError::InvalidConfig`] unless the source carries
    /// client-credentials, or [`CollectorError::Http`] if the client cannot
    /// be built.
    pub fn new(
        config: &SourceConfig,
        timeout_secs: u64,
        user_agent: &str,
    ) -> Result<Self, CollectorError> {
        let Credentials::ClientCredentials {
            client_id,
            client_secret,
        } = &config.credentials
        else {
            return Err(CollectorError::InvalidConfig {
                name: config.name.clone(),
                reason: "spotify sources require client_credentials".to_owned(),
            });
        };
        Ok(Self {
            http: SourceHttp::new(config, timeout_secs, user_agent)?,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            token_url: config
                .token_url
                .clone()
                .unwrap_or_else(|| DEFAULT_TOKEN_URL.to_owned()),
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
            page_limit: config.page_limit,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, CollectorError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let body = self
            .http
            .send_json(|client| {
                client
                    .post(&self.token_url)
                    .basic_auth(&self.client_id, Some(&self.client_secret))
                    .form(&[("grant_type", "client_credentials")])
            })
            .await?;
        let token: TokenResponse =
            serde_json::from_value(body).map_err(|e| CollectorError::Deserialize {
                context: format!("{} token response", self.name()),
                source: e,
            })?;

        let ttl = token.expires_in.saturating_sub(EXPIRY_MARGIN_SECS);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(ttl),
        });
        tracing::debug!(source = self.name(), ttl_secs = ttl, "refreshed spotify token");
        Ok(token.access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }
}

#[async_trait]
impl Source for SpotifySource {
    fn name(&self) -> &str {
        self.http.name()
    }

    fn platform(&self) -> Platform {
        Platform::Spotify
    }

    fn describe_rate_budget(&self) -> RateBudget {
        self.http.budget()
    }

    async fn fetch(&self, since: Option<&str>) -> Result<FetchPage, CollectorError> {
        let url = format!("{}/engagements", self.base_url);
        let mut after = since.map(str::to_owned);
        let mut out = FetchPage::default();

        while out.pages < self.page_limit {
            let token = self.access_token().await?;
            let result = self
                .http
                .send_json(|client| {
                    let mut req = client
                        .get(&url)
                        .bearer_auth(&token)
                        .query(&[("limit", PAGE_SIZE)]);
                    if let Some(after) = &after {
                        req = req.query(&[("after", after.as_str())]);
                    }
                    req
                })
                .await;
            let body = match result {
                Err(CollectorError::UnexpectedStatus { status: 401, .. }) => {
                    // Token revoked early; refresh on the next cycle.
                    self.invalidate_token().await;
                    return Err(CollectorError::UnexpectedStatus {
                        name: self.name().to_owned(),
                        status: 401,
                        url,
                    });
                }
                other => other?,
            };
            out.pages += 1;

            let page: EngagementPage =
                serde_json::from_value(body).map_err(|e| CollectorError::Deserialize {
                    context: format!("{} engagements page", self.name()),
                    source: e,
                })?;
            let fetched = page.items.len();
            out.records.extend(
                page.items
                    .into_iter()
                    .map(|item| RawRecord::tagged(self.name(), Platform::Spotify, item)),
            );

            match page.cursors.and_then(|c| c.after) {
                Some(next) if fetched > 0 && !next.is_empty() => {
                    out.next_cursor = Some(next.clone());
                    after = Some(next);
                }
                _ => break,
            }
        }

        tracing::debug!(
            source = self.name(),
            records = out.records.len(),
            pages = out.pages,
            "fetched spotify engagements"
        );
        Ok(out)
    }
}
