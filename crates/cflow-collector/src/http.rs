use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;

use cflow_core::{RetryConfig, SourceConfig};

use crate::error::CollectorError;
use crate::rate_limit::TokenBucket;
use crate::retry::retry_with_backoff;
use crate::source::RateBudget;

/// HTTP plumbing shared by all platform sources: one client, one token
/// bucket, one retry policy per source.
///
/// Every attempt (including retries) takes a token before it is sent.
#[derive(Debug)]
pub struct SourceHttp {
    name: String,
    client: Client,
    limiter: TokenBucket,
    retry: RetryConfig,
    budget: RateBudget,
}

impl SourceHttp {
    /// # Errors
    ///
    /// Returns [`CollectorError::Http`] if the `reqwest::Client` cannot be built.
    pub fn new(
        config: &SourceConfig,
        timeout_secs: u64,
        user_agent: &str,
    ) -> Result<Self, CollectorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(user_agent)
            .build()?;
        let budget = RateBudget {
            requests_per_sec: config.rate_limit.requests_per_sec,
            burst: config.rate_limit.effective_burst(),
        };
        Ok(Self {
            name: config.name.clone(),
            client,
            limiter: TokenBucket::new(budget.requests_per_sec, budget.burst),
            retry: config.retry,
            budget,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn budget(&self) -> RateBudget {
        self.budget
    }

    /// Send the request built by `request`, retrying transient failures, and
    /// decode the body as JSON.
    ///
    /// # Errors
    ///
    /// See [`crate::retry`]: transient failures become
    /// [`CollectorError::SourceUnavailable`] once retries are exhausted.
    pub async fn send_json<F>(&self, request: F) -> Result<Value, CollectorError>
    where
        F: Fn(&Client) -> RequestBuilder + Sync,
    {
        let request = &request;
        retry_with_backoff(&self.name, self.retry, move || async move {
            self.limiter.acquire().await;
            let response = request(&self.client)
                .send()
                .await
                .map_err(|e| CollectorError::Http(e.without_url()))?;
            self.read_json(response).await
        })
        .await
    }

    async fn read_json(&self, response: Response) -> Result<Value, CollectorError> {
        let status = response.status();
        let url = response.url().to_string();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(1);
            return Err(CollectorError::RateLimited {
                name: self.name.clone(),
                retry_after_secs,
            });
        }
        if status.is_server_error() {
            return Err(CollectorError::ServerError {
                name: self.name.clone(),
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(CollectorError::UnexpectedStatus {
                name: self.name.clone(),
                status: status.as_u16(),
                url: strip_query(&url),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| CollectorError::Http(e.without_url()))?;
        serde_json::from_str(&body).map_err(|e| CollectorError::Deserialize {
            context: format!("{} response from {}", self.name, strip_query(&url)),
            source: e,
        })
    }
}

/// Drop the query string so API keys never reach logs or error messages.
fn strip_query(url: &str) -> String {
    url.split('?').next().unwrap_or(url).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_query_removes_api_key() {
        assert_eq!(
            strip_query("https://api.example.com/v3/activities?key=secret&pageToken=x"),
            "https://api.example.com/v3/activities"
        );
        assert_eq!(strip_query("https://api.example.com"), "https://api.example.com");
    }
}
