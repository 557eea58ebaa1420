use thiserror::Error;

use cflow_core::CheckpointError;
use cflow_features::FeatureError;

#[derive(Debug, Error)]
pub enum RecommendError {
    #[error(transparent)]
    Features(#[from] FeatureError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}
