//! Trend and anomaly detection over feature-store snapshots, the trend
//! board, and alert dispatch.

pub mod alert;
pub mod baseline;
pub mod board;
pub mod detector;
pub mod error;
pub mod service;

pub use alert::{
    fan_out, AlertDispatcher, AlertKind, AlertPolicy, LogAlertDispatcher, TrendAlert,
    WebhookAlertDispatcher,
};
pub use baseline::Baseline;
pub use board::{stale_after, BoardHealth, TrendBoard};
pub use detector::{
    adaptive_threshold, anomaly_score, DetectionPass, SkipReason, Skipped, TrendDetector,
};
pub use error::{AlertError, TrendError};
pub use service::{PassOutcome, TrendService};
