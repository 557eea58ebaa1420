use cflow_core::CheckpointError;
use thiserror::Error;

/// Errors raised while collecting from an external source.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Network or TLS failure from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP 429. `retry_after_secs` is the minimum wait before the next try.
    #[error("{name}: rate limited by upstream, retry after {retry_after_secs}s")]
    RateLimited { name: String, retry_after_secs: u64 },

    /// HTTP 5xx from the upstream API.
    #[error("{name}: upstream returned {status}")]
    ServerError { name: String, status: u16 },

    /// Non-retriable non-2xx status (4xx other than 429).
    #[error("{name}: unexpected status {status} from {url}")]
    UnexpectedStatus {
        name: String,
        status: u16,
        url: String,
    },

    /// The response body could not be deserialized into the expected type.
    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// Retries exhausted on transient failures. Trips the circuit breaker.
    #[error("source {name} unavailable after {attempts} attempts: {last_error}")]
    SourceUnavailable {
        name: String,
        attempts: u32,
        last_error: String,
    },

    #[error("source {name}: circuit open for another {remaining_secs}s")]
    CircuitOpen { name: String, remaining_secs: u64 },

    #[error("source {name}: fetch exceeded {deadline_secs}s deadline")]
    DeadlineExceeded { name: String, deadline_secs: u64 },

    #[error("source {name}: invalid configuration: {reason}")]
    InvalidConfig { name: String, reason: String },

    #[error("cursor checkpoint failed: {0}")]
    Checkpoint(#[from] CheckpointError),
}
