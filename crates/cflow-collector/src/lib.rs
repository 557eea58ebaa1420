//! Source collection: per-platform clients behind one [`Source`] contract,
//! each gated by its own token bucket, retry policy and circuit breaker.

pub mod breaker;
pub mod cursor;
pub mod error;
pub mod http;
pub mod pool;
pub mod rate_limit;
pub(crate) mod retry;
pub mod source;
pub mod sources;

pub use breaker::{BreakerState, CircuitBreaker};
pub use cursor::CursorStore;
pub use error::CollectorError;
pub use http::SourceHttp;
pub use pool::{
    CollectorPool, CollectorStats, CollectorStatsSnapshot, CycleOutcome, SourceRunner,
    SourceSchedule,
};
pub use rate_limit::TokenBucket;
pub use cflow_core::RawRecord;
pub use source::{FetchPage, RateBudget, Source};
pub use sources::{
    build_source, parse_iso8601_duration, SpotifySource, StreamingSource, TwitterSource,
    YoutubeSource,
};
