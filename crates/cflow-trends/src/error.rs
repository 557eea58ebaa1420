use thiserror::Error;

use cflow_features::FeatureError;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("alert webhook returned HTTP {status}")]
    Status { status: u16 },
}

#[derive(Debug, Error)]
pub enum TrendError {
    #[error(transparent)]
    Features(#[from] FeatureError),

    #[error("detection pass exceeded its {deadline_secs}s deadline")]
    DeadlineExceeded { deadline_secs: u64 },
}
