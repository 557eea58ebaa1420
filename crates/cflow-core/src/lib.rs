//! Shared data model, configuration and checkpoint storage for the
//! ContentFlow engagement pipeline.

pub mod app_config;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod types;

pub use app_config::{AppConfig, Environment};
pub use checkpoint::JsonCheckpointStore;
pub use config::{load_app_config, load_app_config_from_env};
pub use error::{CheckpointError, ConfigError};
pub use pipeline::{
    load_pipeline_config, parse_pipeline_config, BreakerConfig, BusConfig, CredentialRef,
    Credentials, EventWeights, PipelineConfig, RateLimitConfig, RecommendConfig,
    RecommendWeights, RetryConfig, SourceConfig, TrendBoostConfig, TrendConfig, WindowConfig,
    WindowKind,
};
pub use types::{
    normalize_tag, AudienceSegment, ContentItem, CorrelationSet, Creator, EngagementEvent,
    EventType, FeatureVector, NormalizedRecord, Platform, RawRecord, RecommendationResult,
    ResultStatus, ScoredContent, TrendSignal, ENGAGEMENT_METRIC,
};
