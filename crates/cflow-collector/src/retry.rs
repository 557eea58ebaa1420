//! Retry with exponential back-off and jitter for source requests.
//!
//! Transient failures (network, 5xx, 429) are retried up to the configured
//! attempt count. Exhausting the retries turns the last error into
//! [`CollectorError::SourceUnavailable`], which the collector pool feeds to the
//! source's circuit breaker.

use std::future::Future;
use std::time::Duration;

use cflow_core::RetryConfig;

use crate::error::CollectorError;

const MAX_DELAY_MS: u64 = 60_000;

/// Returns `true` for errors that are worth retrying after a back-off delay.
///
/// **Retriable:** timeouts, connect failures, HTTP 5xx, HTTP 429.
///
/// **Not retriable:** other 4xx, malformed bodies, configuration errors.
pub(crate) fn is_retriable(err: &CollectorError) -> bool {
    match err {
        CollectorError::Http(e) => {
            e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
        }
        CollectorError::RateLimited { .. } | CollectorError::ServerError { .. } => true,
        CollectorError::UnexpectedStatus { .. }
        | CollectorError::Deserialize { .. }
        | CollectorError::SourceUnavailable { .. }
        | CollectorError::CircuitOpen { .. }
        | CollectorError::DeadlineExceeded { .. }
        | CollectorError::InvalidConfig { .. }
        | CollectorError::Checkpoint(_) => false,
    }
}

/// Runs `operation` with up to `policy.max_retries` additional attempts.
///
/// Back-off before retry `n` is `backoff_base_ms × 2^(n-1)` ± 25 % jitter,
/// capped at 60 s. A 429 with `Retry-After` waits at least that long.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    name: &str,
    policy: RetryConfig,
    mut operation: F,
) -> Result<T, CollectorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollectorError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retriable(&err) {
                    return Err(err);
                }
                if attempt >= policy.max_retries {
                    return Err(CollectorError::SourceUnavailable {
                        name: name.to_owned(),
                        attempts: attempt + 1,
                        last_error: err.to_string(),
                    });
                }
                attempt += 1;
                let computed = policy
                    .backoff_base_ms
                    .saturating_mul(1u64 << (attempt - 1).min(10));
                let capped = computed.min(MAX_DELAY_MS);
                #[allow(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    clippy::cast_precision_loss
                )]
                let mut delay_ms = (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
                if let CollectorError::RateLimited {
                    retry_after_secs, ..
                } = &err
                {
                    delay_ms = delay_ms.max(retry_after_secs.saturating_mul(1_000));
                }
                tracing::warn!(
                    source = name,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms,
                    error = %err,
                    "transient source error, retrying after back-off"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}
