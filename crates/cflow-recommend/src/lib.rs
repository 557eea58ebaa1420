//! Hybrid recommendations: a batched collaborative model, tag-profile
//! content similarity, popularity and a bounded trend boost.

pub mod cache;
pub mod engine;
pub mod error;
pub mod model;
pub mod similarity;

pub use cache::ResultCache;
pub use engine::{trend_boost, Origin, RecommendationEngine, Served};
pub use error::RecommendError;
pub use model::{FlushReport, InteractionModel, ModelState, MODEL_NAMESPACE};
pub use similarity::{cosine, normalize_by_max, tag_affinity};
