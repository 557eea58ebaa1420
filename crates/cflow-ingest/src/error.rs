use serde::Serialize;
use thiserror::Error;

/// Why a raw record was quarantined instead of normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MalformedPayload,
    UnknownPlatform,
    MissingField,
    InvalidNumber,
    NegativeMagnitude,
    InvalidTimestamp,
    UnknownMetric,
}

impl RejectReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::MalformedPayload => "malformed_payload",
            RejectReason::UnknownPlatform => "unknown_platform",
            RejectReason::MissingField => "missing_field",
            RejectReason::InvalidNumber => "invalid_number",
            RejectReason::NegativeMagnitude => "negative_magnitude",
            RejectReason::InvalidTimestamp => "invalid_timestamp",
            RejectReason::UnknownMetric => "unknown_metric",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A malformed record. Quarantined to the dead-letter sink, never dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}: {detail}")]
pub struct Rejected {
    pub reason: RejectReason,
    pub detail: String,
}

impl Rejected {
    pub(crate) fn new(reason: RejectReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }

    pub(crate) fn missing(field: &str) -> Self {
        Self::new(RejectReason::MissingField, format!("missing field `{field}`"))
    }
}

/// A bus consumer failed to process a record. Redelivered up to the
/// configured limit.
#[derive(Debug, Error)]
#[error("consumer {consumer} failed: {message}")]
pub struct ConsumeError {
    pub consumer: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("dead-letter I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("dead-letter serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The bus has shut down and no longer accepts records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("ingestion bus is closed")]
pub struct BusClosed;
