use thiserror::Error;

use cflow_core::CheckpointError;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("unknown window \"{0}\"")]
    UnknownWindow(String),

    #[error("feature checkpoint version {found} is not supported (expected {expected})")]
    UnsupportedCheckpoint { found: u32, expected: u32 },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}
