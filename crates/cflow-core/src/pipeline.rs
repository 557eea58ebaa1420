//! Pipeline configuration file (`config/pipeline.yaml`).
//!
//! Declares the sources to collect from, the feature windows, event weights,
//! bus sizing, and the trend/recommendation tuning knobs. Everything is
//! validated once at startup; components receive the already-validated
//! structs and never re-read the environment.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{EventType, Platform};
use crate::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    pub windows: Vec<WindowConfig>,
    #[serde(default)]
    pub event_weights: EventWeights,
    #[serde(default)]
    pub bus: BusConfig,
    pub trend: TrendConfig,
    pub recommend: RecommendConfig,
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub platform: Platform,
    pub base_url: String,
    /// Where the credentials come from. Resolved into `credentials` at load.
    #[serde(default)]
    pub auth: CredentialRef,
    #[serde(skip)]
    pub credentials: Credentials,
    /// OAuth token endpoint for `client_credentials` auth.
    #[serde(default)]
    pub token_url: Option<String>,
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default = "default_fetch_deadline_secs")]
    pub fetch_deadline_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Env-var references for a source's credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialRef {
    #[default]
    None,
    ApiKey {
        api_key_env: String,
    },
    Bearer {
        token_env: String,
    },
    ClientCredentials {
        client_id_env: String,
        client_secret_env: String,
    },
    Header {
        header: String,
        value_env: String,
    },
}

/// Resolved credential material. `Debug` never prints secrets.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Credentials {
    #[default]
    None,
    ApiKey(String),
    Bearer(String),
    ClientCredentials {
        client_id: String,
        client_secret: String,
    },
    Header {
        name: String,
        value: String,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::None => write!(f, "None"),
            Credentials::ApiKey(_) => write!(f, "ApiKey([redacted])"),
            Credentials::Bearer(_) => write!(f, "Bearer([redacted])"),
            Credentials::ClientCredentials { client_id, .. } => f
                .debug_struct("ClientCredentials")
                .field("client_id", client_id)
                .field("client_secret", &"[redacted]")
                .finish(),
            Credentials::Header { name, .. } => f
                .debug_struct("Header")
                .field("name", name)
                .field("value", &"[redacted]")
                .finish(),
        }
    }
}

impl CredentialRef {
    /// Resolve env-var references through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] for the first referenced
    /// variable that is unset or blank.
    pub fn resolve<F>(&self, lookup: F) -> Result<Credentials, ConfigError>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let require = |var: &str| -> Result<String, ConfigError> {
            lookup(var)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))
        };

        Ok(match self {
            CredentialRef::None => Credentials::None,
            CredentialRef::ApiKey { api_key_env } => Credentials::ApiKey(require(api_key_env)?),
            CredentialRef::Bearer { token_env } => Credentials::Bearer(require(token_env)?),
            CredentialRef::ClientCredentials {
                client_id_env,
                client_secret_env,
            } => Credentials::ClientCredentials {
                client_id: require(client_id_env)?,
                client_secret: require(client_secret_env)?,
            },
            CredentialRef::Header { header, value_env } => Credentials::Header {
                name: header.clone(),
                value: require(value_env)?,
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct RateLimitConfig {
    pub requests_per_sec: f64,
    /// Bucket capacity. Defaults to `ceil(requests_per_sec)`.
    #[serde(default)]
    pub burst: Option<u32>,
}

impl RateLimitConfig {
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn effective_burst(&self) -> u32 {
        self.burst
            .unwrap_or_else(|| self.requests_per_sec.ceil().max(1.0) as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive `SourceUnavailable` outcomes before the breaker opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Windows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WindowConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: WindowKind,
    /// How long applied-event ids and tumbling buckets are retained.
    pub retention_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WindowKind {
    Tumbling {
        size_secs: u64,
    },
    Decayed {
        half_life_secs: f64,
        /// Per-metric overrides keyed by metric name (`view`, `share`, …).
        #[serde(default)]
        metric_half_lives: BTreeMap<String, f64>,
    },
}

impl WindowConfig {
    #[must_use]
    pub fn is_decayed(&self) -> bool {
        matches!(self.kind, WindowKind::Decayed { .. })
    }
}

// ---------------------------------------------------------------------------
// Weights, bus, trend, recommend
// ---------------------------------------------------------------------------

/// Contribution of one unit of each event type to the `engagement` metric.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct EventWeights {
    #[serde(default = "one")]
    pub view: f64,
    #[serde(default = "default_like_weight")]
    pub like: f64,
    #[serde(default = "default_comment_weight")]
    pub comment: f64,
    #[serde(default = "default_share_weight")]
    pub share: f64,
    #[serde(default = "default_watch_time_weight")]
    pub watch_time: f64,
}

impl Default for EventWeights {
    fn default() -> Self {
        Self {
            view: one(),
            like: default_like_weight(),
            comment: default_comment_weight(),
            share: default_share_weight(),
            watch_time: default_watch_time_weight(),
        }
    }
}

impl EventWeights {
    #[must_use]
    pub fn weight(&self, event_type: EventType) -> f64 {
        match event_type {
            EventType::View => self.view,
            EventType::Like => self.like,
            EventType::Comment => self.comment,
            EventType::Share => self.share,
            EventType::WatchTime => self.watch_time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_partitions")]
    pub partitions: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            queue_capacity: default_queue_capacity(),
            dedup_window_secs: default_dedup_window_secs(),
            max_redeliveries: default_max_redeliveries(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrendConfig {
    /// Decayed window whose `engagement` metric is scored.
    pub window: String,
    #[serde(default = "default_trend_cadence_secs")]
    pub cadence_secs: u64,
    #[serde(default = "default_trend_deadline_secs")]
    pub deadline_secs: u64,
    #[serde(default = "default_base_threshold")]
    pub base_threshold: f64,
    #[serde(default = "default_volume_sensitivity")]
    pub volume_sensitivity: f64,
    #[serde(default = "default_reference_volume")]
    pub reference_volume: f64,
    #[serde(default = "default_baseline_samples")]
    pub baseline_samples: usize,
    #[serde(default = "default_min_baseline_samples")]
    pub min_baseline_samples: usize,
    #[serde(default = "default_min_std")]
    pub min_std: f64,
    #[serde(default = "default_correlation_window_secs")]
    pub correlation_window_secs: u64,
    #[serde(default = "default_alert_min_score")]
    pub alert_min_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RecommendWeights {
    pub collaborative: f64,
    pub content: f64,
    pub popularity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TrendBoostConfig {
    /// Multiplier increase per unit of trend score.
    pub per_score: f64,
    /// Upper bound on the multiplier; must be ≥ 1.
    pub max_multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecommendConfig {
    pub window: String,
    pub weights: RecommendWeights,
    pub trend_boost: TrendBoostConfig,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_flush_secs")]
    pub flush_secs: u64,
    #[serde(default = "default_neighbors")]
    pub neighbors: usize,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    #[serde(default = "default_recommend_deadline_secs")]
    pub deadline_secs: u64,
    /// Snapshots older than this are served but flagged stale.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_model_shards")]
    pub shards: usize,
}

impl TrendConfig {
    /// Defaults for every tunable, scoring `window`.
    #[must_use]
    pub fn for_window(window: &str) -> Self {
        Self {
            window: window.to_owned(),
            cadence_secs: default_trend_cadence_secs(),
            deadline_secs: default_trend_deadline_secs(),
            base_threshold: default_base_threshold(),
            volume_sensitivity: default_volume_sensitivity(),
            reference_volume: default_reference_volume(),
            baseline_samples: default_baseline_samples(),
            min_baseline_samples: default_min_baseline_samples(),
            min_std: default_min_std(),
            correlation_window_secs: default_correlation_window_secs(),
            alert_min_score: default_alert_min_score(),
        }
    }
}

impl RecommendConfig {
    /// Defaults for every tunable except the signal weights and boost.
    #[must_use]
    pub fn for_window(
        window: &str,
        weights: RecommendWeights,
        trend_boost: TrendBoostConfig,
    ) -> Self {
        Self {
            window: window.to_owned(),
            weights,
            trend_boost,
            cache_ttl_secs: default_cache_ttl_secs(),
            flush_secs: default_flush_secs(),
            neighbors: default_neighbors(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            deadline_secs: default_recommend_deadline_secs(),
            stale_after_secs: default_stale_after_secs(),
            shards: default_model_shards(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading and validation
// ---------------------------------------------------------------------------

/// Load, validate and resolve credentials for the pipeline configuration.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed, fails
/// validation, or references a credential env var that is not set.
pub fn load_pipeline_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::PipelineFileIo {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_pipeline_config(&content, |key| std::env::var(key))
}

/// Parse and validate pipeline YAML, resolving credentials through `lookup`.
///
/// # Errors
///
/// Same as [`load_pipeline_config`], minus file I/O.
pub fn parse_pipeline_config<F>(yaml: &str, lookup: F) -> Result<PipelineConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let mut config: PipelineConfig = serde_yaml::from_str(yaml)?;
    validate_pipeline(&config)?;
    for source in config.sources.iter_mut().filter(|s| s.enabled) {
        source.credentials = source.auth.resolve(&lookup)?;
    }
    Ok(config)
}

impl PipelineConfig {
    #[must_use]
    pub fn window(&self, name: &str) -> Option<&WindowConfig> {
        self.windows.iter().find(|w| w.name == name)
    }

    #[must_use]
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation(reason.into())
}

fn require_positive(value: f64, what: &str) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{what} must be a positive number, got {value}")))
    }
}

fn require_non_negative(value: f64, what: &str) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{what} must be non-negative, got {value}")))
    }
}

fn validate_pipeline(config: &PipelineConfig) -> Result<(), ConfigError> {
    let mut source_names = HashSet::new();
    for source in &config.sources {
        validate_source(source)?;
        if !source_names.insert(source.name.as_str()) {
            return Err(invalid(format!("duplicate source name \"{}\"", source.name)));
        }
    }

    if config.windows.is_empty() {
        return Err(invalid("at least one window must be configured"));
    }
    let mut window_names = HashSet::new();
    for window in &config.windows {
        validate_window(window)?;
        if !window_names.insert(window.name.as_str()) {
            return Err(invalid(format!("duplicate window name \"{}\"", window.name)));
        }
    }

    let w = &config.event_weights;
    for event_type in EventType::all() {
        require_non_negative(w.weight(event_type), &format!("event_weights.{event_type}"))?;
    }

    let bus = &config.bus;
    if bus.partitions == 0 {
        return Err(invalid("bus.partitions must be at least 1"));
    }
    if bus.queue_capacity == 0 {
        return Err(invalid("bus.queue_capacity must be at least 1"));
    }
    if bus.dedup_window_secs == 0 {
        return Err(invalid("bus.dedup_window_secs must be greater than zero"));
    }

    validate_trend(config)?;
    validate_recommend(config)?;
    Ok(())
}

fn validate_source(source: &SourceConfig) -> Result<(), ConfigError> {
    if source.name.trim().is_empty() {
        return Err(invalid("source name must not be empty"));
    }
    if !(source.base_url.starts_with("http://") || source.base_url.starts_with("https://")) {
        return Err(invalid(format!(
            "source \"{}\": base_url must be an http(s) URL",
            source.name
        )));
    }
    require_positive(
        source.rate_limit.requests_per_sec,
        &format!("source \"{}\" rate_limit.requests_per_sec", source.name),
    )?;
    if source.rate_limit.effective_burst() == 0 {
        return Err(invalid(format!(
            "source \"{}\": rate_limit.burst must be at least 1",
            source.name
        )));
    }
    if source.breaker.failure_threshold == 0 {
        return Err(invalid(format!(
            "source \"{}\": breaker.failure_threshold must be at least 1",
            source.name
        )));
    }
    if source.fetch_deadline_secs == 0 || source.poll_interval_secs == 0 {
        return Err(invalid(format!(
            "source \"{}\": fetch_deadline_secs and poll_interval_secs must be greater than zero",
            source.name
        )));
    }
    if source.page_limit == 0 {
        return Err(invalid(format!(
            "source \"{}\": page_limit must be at least 1",
            source.name
        )));
    }
    Ok(())
}

/// Ten years; keeps `as_of - retention` inside chrono's range.
const MAX_RETENTION_SECS: u64 = 10 * 365 * 86_400;

fn validate_window(window: &WindowConfig) -> Result<(), ConfigError> {
    if window.name.trim().is_empty() {
        return Err(invalid("window name must not be empty"));
    }
    if window.retention_secs == 0 || window.retention_secs > MAX_RETENTION_SECS {
        return Err(invalid(format!(
            "window \"{}\": retention_secs must be between 1 and {MAX_RETENTION_SECS}",
            window.name
        )));
    }
    match &window.kind {
        WindowKind::Tumbling { size_secs } => {
            if *size_secs == 0 {
                return Err(invalid(format!(
                    "window \"{}\": size_secs must be greater than zero",
                    window.name
                )));
            }
        }
        WindowKind::Decayed {
            half_life_secs,
            metric_half_lives,
        } => {
            require_positive(*half_life_secs, &format!("window \"{}\" half_life_secs", window.name))?;
            for (metric, half_life) in metric_half_lives {
                require_positive(
                    *half_life,
                    &format!("window \"{}\" half life for {metric}", window.name),
                )?;
            }
        }
    }
    Ok(())
}

fn validate_trend(config: &PipelineConfig) -> Result<(), ConfigError> {
    let trend = &config.trend;
    match config.window(&trend.window) {
        Some(window) if window.is_decayed() => {}
        Some(_) => {
            return Err(invalid(format!(
                "trend.window \"{}\" must reference a decayed window",
                trend.window
            )))
        }
        None => {
            return Err(invalid(format!(
                "trend.window \"{}\" is not a configured window",
                trend.window
            )))
        }
    }
    require_positive(trend.base_threshold, "trend.base_threshold")?;
    require_non_negative(trend.volume_sensitivity, "trend.volume_sensitivity")?;
    require_positive(trend.reference_volume, "trend.reference_volume")?;
    require_positive(trend.min_std, "trend.min_std")?;
    if trend.min_baseline_samples < 2 {
        return Err(invalid("trend.min_baseline_samples must be at least 2"));
    }
    if trend.baseline_samples < trend.min_baseline_samples {
        return Err(invalid(
            "trend.baseline_samples must be >= trend.min_baseline_samples",
        ));
    }
    if trend.cadence_secs == 0 || trend.deadline_secs == 0 {
        return Err(invalid(
            "trend.cadence_secs and trend.deadline_secs must be greater than zero",
        ));
    }
    Ok(())
}

fn validate_recommend(config: &PipelineConfig) -> Result<(), ConfigError> {
    let rec = &config.recommend;
    if config.window(&rec.window).is_none() {
        return Err(invalid(format!(
            "recommend.window \"{}\" is not a configured window",
            rec.window
        )));
    }
    let w = rec.weights;
    require_non_negative(w.collaborative, "recommend.weights.collaborative")?;
    require_non_negative(w.content, "recommend.weights.content")?;
    require_non_negative(w.popularity, "recommend.weights.popularity")?;
    if w.collaborative + w.content + w.popularity <= 0.0 {
        return Err(invalid("recommend.weights must not all be zero"));
    }
    require_non_negative(rec.trend_boost.per_score, "recommend.trend_boost.per_score")?;
    if !(rec.trend_boost.max_multiplier.is_finite() && rec.trend_boost.max_multiplier >= 1.0) {
        return Err(invalid("recommend.trend_boost.max_multiplier must be >= 1"));
    }
    if rec.default_limit == 0 || rec.max_limit < rec.default_limit {
        return Err(invalid(
            "recommend.default_limit must be >= 1 and <= recommend.max_limit",
        ));
    }
    if rec.neighbors == 0 || rec.shards == 0 {
        return Err(invalid("recommend.neighbors and recommend.shards must be at least 1"));
    }
    if rec.cache_ttl_secs == 0 || rec.flush_secs == 0 || rec.deadline_secs == 0 {
        return Err(invalid(
            "recommend.cache_ttl_secs, flush_secs and deadline_secs must be greater than zero",
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}
fn one() -> f64 {
    1.0
}
fn default_fetch_deadline_secs() -> u64 {
    30
}
fn default_poll_interval_secs() -> u64 {
    60
}
fn default_page_limit() -> usize {
    5
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_failure_threshold() -> u32 {
    1
}
fn default_cooldown_secs() -> u64 {
    300
}
fn default_like_weight() -> f64 {
    2.0
}
fn default_comment_weight() -> f64 {
    4.0
}
fn default_share_weight() -> f64 {
    10.0
}
fn default_watch_time_weight() -> f64 {
    0.1
}
fn default_partitions() -> usize {
    8
}
fn default_queue_capacity() -> usize {
    1024
}
fn default_dedup_window_secs() -> u64 {
    86_400
}
fn default_max_redeliveries() -> u32 {
    3
}
fn default_trend_cadence_secs() -> u64 {
    60
}
fn default_trend_deadline_secs() -> u64 {
    20
}
fn default_base_threshold() -> f64 {
    3.0
}
fn default_volume_sensitivity() -> f64 {
    0.25
}
fn default_reference_volume() -> f64 {
    10_000.0
}
fn default_baseline_samples() -> usize {
    24
}
fn default_min_baseline_samples() -> usize {
    3
}
fn default_min_std() -> f64 {
    0.01
}
fn default_correlation_window_secs() -> u64 {
    900
}
fn default_alert_min_score() -> f64 {
    6.0
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_flush_secs() -> u64 {
    30
}
fn default_neighbors() -> usize {
    50
}
fn default_limit() -> usize {
    20
}
fn default_max_limit() -> usize {
    100
}
fn default_recommend_deadline_secs() -> u64 {
    5
}
fn default_stale_after_secs() -> u64 {
    900
}
fn default_model_shards() -> usize {
    8
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod tests;
