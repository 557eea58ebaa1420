//! Feature store: tumbling and exponentially decayed windows per content
//! item, the content catalog, and audience-segment aggregates.

pub mod catalog;
pub mod decay;
pub mod error;
pub mod segments;
mod shard;
pub mod store;
pub mod window;

pub use catalog::{CatalogUpdate, ContentCatalog};
pub use decay::{decay_factor, DecayedValue};
pub use error::FeatureError;
pub use segments::SegmentAggregates;
pub use store::{
    ApplyReport, ContentCheckpoint, FeatureCheckpoint, FeatureSnapshot, FeatureStatsSnapshot,
    FeatureStore, SweepReport, CHECKPOINT_NAMESPACE,
};
pub use window::{Aggregate, Bucket, WindowApply, WindowSpec, WindowState};
