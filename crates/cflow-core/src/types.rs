//! Shared data model for the ingestion, feature, trend and recommendation
//! pipeline.
//!
//! Everything here is plain data: no I/O, no locking. Components exchange
//! these types across crate boundaries and the server serializes them as-is.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the derived, weighted engagement metric stored in every
/// [`FeatureVector`].
pub const ENGAGEMENT_METRIC: &str = "engagement";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Youtube,
    Spotify,
    Twitter,
    Streaming,
}

impl Platform {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Youtube => "youtube",
            Platform::Spotify => "spotify",
            Platform::Twitter => "twitter",
            Platform::Streaming => "streaming",
        }
    }

    #[must_use]
    pub fn all() -> [Platform; 4] {
        [
            Platform::Youtube,
            Platform::Spotify,
            Platform::Twitter,
            Platform::Streaming,
        ]
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "youtube" => Ok(Platform::Youtube),
            "spotify" => Ok(Platform::Spotify),
            "twitter" => Ok(Platform::Twitter),
            "streaming" => Ok(Platform::Streaming),
            other => Err(format!("unknown platform \"{other}\"")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    View,
    Like,
    Comment,
    Share,
    WatchTime,
}

impl EventType {
    /// Metric name used for this event type inside a [`FeatureVector`].
    #[must_use]
    pub fn metric_name(self) -> &'static str {
        match self {
            EventType::View => "view",
            EventType::Like => "like",
            EventType::Comment => "comment",
            EventType::Share => "share",
            EventType::WatchTime => "watch_time",
        }
    }

    #[must_use]
    pub fn all() -> [EventType; 5] {
        [
            EventType::View,
            EventType::Like,
            EventType::Comment,
            EventType::Share,
            EventType::WatchTime,
        ]
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.metric_name())
    }
}

/// A piece of content on one platform.
///
/// Identity fields never change after creation; only `tags` may be enriched.
/// Items first seen through an engagement event are `provisional` until the
/// platform supplies real metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub platform: Platform,
    pub creator_id: Option<String>,
    pub tags: BTreeSet<String>,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub provisional: bool,
}

impl ContentItem {
    #[must_use]
    pub fn provisional(id: &str, platform: Platform) -> Self {
        Self {
            id: id.to_owned(),
            platform,
            creator_id: None,
            tags: BTreeSet::new(),
            published_at: None,
            provisional: true,
        }
    }

    /// Adds tags (lowercased, trimmed, empty dropped). Returns the number of
    /// tags that were not already present.
    pub fn enrich_tags<I, S>(&mut self, tags: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let before = self.tags.len();
        for tag in tags {
            let tag = normalize_tag(tag.as_ref());
            if !tag.is_empty() {
                self.tags.insert(tag);
            }
        }
        self.tags.len() - before
    }
}

/// Canonical tag form: trimmed, lowercase, leading `#` removed.
#[must_use]
pub fn normalize_tag(raw: &str) -> String {
    raw.trim().trim_start_matches('#').trim().to_lowercase()
}

/// One immutable engagement observation. `source_event_id` is the dedup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementEvent {
    pub content_id: String,
    pub platform: Platform,
    pub event_type: EventType,
    pub magnitude: f64,
    pub timestamp: DateTime<Utc>,
    pub source_event_id: String,
    /// Who engaged, when the platform exposes it.
    #[serde(default)]
    pub subject_id: Option<String>,
    /// Audience segment bucket, when the platform exposes it.
    #[serde(default)]
    pub segment: Option<String>,
}

/// Loosely-typed record handed from a collector (or the push endpoint) to
/// the normalizer.
///
/// `payload` is the platform item as received, with a `platform`
/// discriminator injected so the normalizer can dispatch on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub source: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl RawRecord {
    /// Wrap a platform item, tagging object payloads with `platform` unless
    /// they already carry one.
    ///
    /// Non-object payloads pass through untouched; the normalizer rejects them.
    #[must_use]
    pub fn tagged(source: &str, platform: Platform, mut payload: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = &mut payload {
            map.entry("platform")
                .or_insert_with(|| serde_json::Value::String(platform.as_str().to_owned()));
        }
        Self {
            source: source.to_owned(),
            payload,
            received_at: Utc::now(),
        }
    }
}

/// Normalizer output: the event plus the content metadata seen alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub event: EngagementEvent,
    pub content: ContentItem,
}

/// Derived creator reach. Never authoritative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Creator {
    pub id: String,
    pub platform: Option<Platform>,
    pub total_views: f64,
    pub total_engagement: f64,
    pub content_count: usize,
}

/// Audience segment grouping key (demographic or behavioral bucket).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AudienceSegment(pub String);

impl AudienceSegment {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Per (content, window) metric values. Recomputed, never hand-edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub content_id: String,
    pub platform: Platform,
    pub window: String,
    pub metrics: BTreeMap<String, f64>,
    pub as_of: DateTime<Utc>,
}

impl FeatureVector {
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    #[must_use]
    pub fn engagement(&self) -> f64 {
        self.metric(ENGAGEMENT_METRIC).unwrap_or(0.0)
    }
}

/// Trend signals for the same topic across several platforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationSet {
    pub topic: String,
    pub platforms: BTreeSet<Platform>,
    pub content_ids: BTreeSet<String>,
    /// Sum of member scores.
    pub strength: f64,
}

impl CorrelationSet {
    #[must_use]
    pub fn is_cross_platform(&self) -> bool {
        self.platforms.len() >= 2
    }
}

/// Output of one detection pass for one content item. Superseded, never amended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSignal {
    pub content_id: String,
    pub platform: Platform,
    pub window: String,
    pub score: f64,
    pub velocity: f64,
    pub threshold: f64,
    pub correlation_set: Option<CorrelationSet>,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredContent {
    pub content_id: String,
    pub score: f64,
}

/// Quality flag on query answers: recommendations and trend listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Ok,
    /// Best-effort answer: fallback path or stale inputs.
    Degraded,
    /// Required inputs are entirely absent.
    InsufficientData,
}

/// Ranked recommendations for one subject. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationResult {
    pub subject_id: String,
    pub items: Vec<ScoredContent>,
    pub generated_at: DateTime<Utc>,
    pub model_version: u64,
    pub personalized: bool,
    pub status: ResultStatus,
    pub stale_snapshot: bool,
}
