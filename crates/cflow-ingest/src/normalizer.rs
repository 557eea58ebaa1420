//! Raw platform payload to [`NormalizedRecord`].
//!
//! Dispatch is by the `platform` discriminator the collector injects (or the
//! push endpoint supplies). Each platform is one variant of
//! [`PlatformPayload`] with its own field names and event vocabulary; adding
//! a platform adds a variant and leaves the others untouched.
//!
//! Coercion rules shared by every platform:
//! - numbers may arrive as JSON numbers or numeric strings,
//! - timestamps may be RFC 3339 strings or epoch seconds/milliseconds,
//! - identifiers may be strings or integers.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use cflow_core::{ContentItem, EngagementEvent, EventType, NormalizedRecord, Platform, RawRecord};

use crate::error::{RejectReason, Rejected};

/// Epoch values above this are taken as milliseconds.
const EPOCH_MILLIS_CUTOFF: f64 = 100_000_000_000.0;

#[derive(Debug, Deserialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
enum PlatformPayload {
    Youtube(YoutubeActivity),
    Spotify(SpotifyEngagement),
    Twitter(TwitterEngagement),
    Streaming(StreamingEvent),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YoutubeActivity {
    id: Option<Value>,
    video_id: Option<Value>,
    activity: Option<String>,
    count: Option<Value>,
    observed_at: Option<Value>,
    viewer_id: Option<Value>,
    segment: Option<String>,
    tags: Option<Vec<String>>,
    published_at: Option<Value>,
    channel_id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    id: Option<Value>,
    artists: Option<Vec<SpotifyArtist>>,
    genres: Option<Vec<String>>,
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpotifyEngagement {
    id: Option<Value>,
    #[serde(rename = "type")]
    kind: Option<String>,
    track: Option<SpotifyTrack>,
    played_at: Option<Value>,
    listener_id: Option<Value>,
    segment: Option<String>,
    value: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct TwitterEngagement {
    id: Option<Value>,
    tweet_id: Option<Value>,
    kind: Option<String>,
    created_at: Option<Value>,
    user_id: Option<Value>,
    author_id: Option<Value>,
    hashtags: Option<Vec<String>>,
    segment: Option<String>,
    count: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamingEvent {
    event_id: Option<Value>,
    content_id: Option<Value>,
    creator: Option<Value>,
    #[serde(rename = "type")]
    kind: Option<String>,
    value: Option<Value>,
    ts: Option<Value>,
    user: Option<Value>,
    segment: Option<String>,
    categories: Option<Vec<String>>,
    published_at: Option<Value>,
}

/// Validate and map one raw record.
///
/// # Errors
///
/// Returns [`Rejected`] with a reason code when the payload cannot be mapped.
/// Callers quarantine rejected records; they are never silently dropped.
pub fn normalize(raw: &RawRecord) -> Result<NormalizedRecord, Rejected> {
    let Value::Object(map) = &raw.payload else {
        return Err(Rejected::new(
            RejectReason::MalformedPayload,
            "payload is not a JSON object",
        ));
    };
    let platform = match map.get("platform") {
        None | Some(Value::Null) => return Err(Rejected::missing("platform")),
        Some(Value::String(tag)) => tag
            .parse::<Platform>()
            .map_err(|e| Rejected::new(RejectReason::UnknownPlatform, e))?,
        Some(other) => {
            return Err(Rejected::new(
                RejectReason::MalformedPayload,
                format!("`platform` must be a string, got {other}"),
            ))
        }
    };

    // Canonicalize the tag so "YouTube" and "youtube" reach the same variant.
    let mut map = map.clone();
    map.insert(
        "platform".to_owned(),
        Value::String(platform.as_str().to_owned()),
    );
    let payload: PlatformPayload = serde_json::from_value(Value::Object(map))
        .map_err(|e| Rejected::new(RejectReason::MalformedPayload, e.to_string()))?;

    match payload {
        PlatformPayload::Youtube(item) => item.into_record(),
        PlatformPayload::Spotify(item) => item.into_record(),
        PlatformPayload::Twitter(item) => item.into_record(),
        PlatformPayload::Streaming(item) => item.into_record(),
    }
}

impl YoutubeActivity {
    fn into_record(self) -> Result<NormalizedRecord, Rejected> {
        let content_id = required_id(self.video_id.as_ref(), "videoId")?;
        let activity = self.activity.ok_or_else(|| Rejected::missing("activity"))?;
        let event_type = match activity.trim() {
            "view" | "views" => EventType::View,
            "like" | "likes" => EventType::Like,
            "comment" | "comments" => EventType::Comment,
            "share" | "shares" => EventType::Share,
            "watchTime" | "watch_time" => EventType::WatchTime,
            other => return Err(unknown_metric(Platform::Youtube, other)),
        };
        let Some(count) = self.count.as_ref() else {
            return Err(Rejected::missing("count"));
        };
        let magnitude = magnitude(count, "count")?;
        let observed_at = self
            .observed_at
            .as_ref()
            .ok_or_else(|| Rejected::missing("observedAt"))?;
        let timestamp = timestamp(observed_at, "observedAt")?;

        let source_event_id = match optional_id(self.id.as_ref(), "id")? {
            Some(id) => id,
            None => format!(
                "{content_id}_{}_{}",
                event_type.metric_name(),
                timestamp.timestamp()
            ),
        };

        let content = content_item(
            &content_id,
            Platform::Youtube,
            optional_id(self.channel_id.as_ref(), "channelId")?,
            self.tags.unwrap_or_default(),
            optional_timestamp(self.published_at.as_ref(), "publishedAt")?,
        );
        Ok(NormalizedRecord {
            event: EngagementEvent {
                content_id,
                platform: Platform::Youtube,
                event_type,
                magnitude,
                timestamp,
                source_event_id,
                subject_id: optional_id(self.viewer_id.as_ref(), "viewerId")?,
                segment: clean_segment(self.segment),
            },
            content,
        })
    }
}

impl SpotifyEngagement {
    fn into_record(self) -> Result<NormalizedRecord, Rejected> {
        let track = self.track.ok_or_else(|| Rejected::missing("track"))?;
        let content_id = required_id(track.id.as_ref(), "track.id")?;
        let source_event_id = required_id(self.id.as_ref(), "id")?;
        let kind = self.kind.ok_or_else(|| Rejected::missing("type"))?;

        let (event_type, magnitude) = match kind.trim() {
            "play" | "stream" => (EventType::View, count_or_one(self.value.as_ref(), "value")?),
            "save" | "like" => (EventType::Like, count_or_one(self.value.as_ref(), "value")?),
            "share" => (EventType::Share, count_or_one(self.value.as_ref(), "value")?),
            "comment" => (EventType::Comment, count_or_one(self.value.as_ref(), "value")?),
            "listen_ms" => {
                let millis = self
                    .value
                    .as_ref()
                    .ok_or_else(|| Rejected::missing("value"))?;
                (EventType::WatchTime, magnitude(millis, "value")? / 1000.0)
            }
            other => return Err(unknown_metric(Platform::Spotify, other)),
        };

        let played_at = self
            .played_at
            .as_ref()
            .ok_or_else(|| Rejected::missing("played_at"))?;
        let timestamp = timestamp(played_at, "played_at")?;

        let creator_id = match track.artists.as_deref() {
            Some([first, ..]) => optional_id(first.id.as_ref(), "track.artists[0].id")?,
            _ => None,
        };
        // Release dates carry year, month or day precision; anything else is
        // metadata noise, not grounds for rejecting the engagement.
        let published_at = track.release_date.as_deref().and_then(parse_release_date);

        let content = content_item(
            &content_id,
            Platform::Spotify,
            creator_id,
            track.genres.unwrap_or_default(),
            published_at,
        );
        Ok(NormalizedRecord {
            event: EngagementEvent {
                content_id,
                platform: Platform::Spotify,
                event_type,
                magnitude,
                timestamp,
                source_event_id,
                subject_id: optional_id(self.listener_id.as_ref(), "listener_id")?,
                segment: clean_segment(self.segment),
            },
            content,
        })
    }
}

impl TwitterEngagement {
    fn into_record(self) -> Result<NormalizedRecord, Rejected> {
        let content_id = required_id(self.tweet_id.as_ref(), "tweet_id")?;
        let source_event_id = required_id(self.id.as_ref(), "id")?;
        let kind = self.kind.ok_or_else(|| Rejected::missing("kind"))?;
        let event_type = match kind.trim() {
            "impression" | "view" => EventType::View,
            "like" | "favorite" => EventType::Like,
            "reply" => EventType::Comment,
            "retweet" | "quote" => EventType::Share,
            other => return Err(unknown_metric(Platform::Twitter, other)),
        };
        let magnitude = count_or_one(self.count.as_ref(), "count")?;
        let created_at = self
            .created_at
            .as_ref()
            .ok_or_else(|| Rejected::missing("created_at"))?;
        let timestamp = timestamp(created_at, "created_at")?;

        let content = content_item(
            &content_id,
            Platform::Twitter,
            optional_id(self.author_id.as_ref(), "author_id")?,
            self.hashtags.unwrap_or_default(),
            None,
        );
        Ok(NormalizedRecord {
            event: EngagementEvent {
                content_id,
                platform: Platform::Twitter,
                event_type,
                magnitude,
                timestamp,
                source_event_id,
                subject_id: optional_id(self.user_id.as_ref(), "user_id")?,
                segment: clean_segment(self.segment),
            },
            content,
        })
    }
}

impl StreamingEvent {
    fn into_record(self) -> Result<NormalizedRecord, Rejected> {
        let content_id = required_id(self.content_id.as_ref(), "content_id")?;
        let source_event_id = required_id(self.event_id.as_ref(), "event_id")?;
        let kind = self.kind.ok_or_else(|| Rejected::missing("type"))?;
        let event_type = match kind.trim() {
            "view" => EventType::View,
            "like" => EventType::Like,
            "comment" => EventType::Comment,
            "share" => EventType::Share,
            "watch_time" => EventType::WatchTime,
            other => return Err(unknown_metric(Platform::Streaming, other)),
        };
        let magnitude = count_or_one(self.value.as_ref(), "value")?;
        let ts = self.ts.as_ref().ok_or_else(|| Rejected::missing("ts"))?;
        let timestamp = timestamp(ts, "ts")?;

        let content = content_item(
            &content_id,
            Platform::Streaming,
            optional_id(self.creator.as_ref(), "creator")?,
            self.categories.unwrap_or_default(),
            optional_timestamp(self.published_at.as_ref(), "published_at")?,
        );
        Ok(NormalizedRecord {
            event: EngagementEvent {
                content_id,
                platform: Platform::Streaming,
                event_type,
                magnitude,
                timestamp,
                source_event_id,
                subject_id: optional_id(self.user.as_ref(), "user")?,
                segment: clean_segment(self.segment),
            },
            content,
        })
    }
}

fn unknown_metric(platform: Platform, name: &str) -> Rejected {
    Rejected::new(
        RejectReason::UnknownMetric,
        format!("unknown {platform} event type \"{name}\""),
    )
}

/// Content metadata seen alongside the event. Marked provisional when the
/// payload carried none.
fn content_item(
    id: &str,
    platform: Platform,
    creator_id: Option<String>,
    tags: Vec<String>,
    published_at: Option<DateTime<Utc>>,
) -> ContentItem {
    let mut item = ContentItem::provisional(id, platform);
    item.enrich_tags(tags);
    item.provisional = creator_id.is_none() && item.tags.is_empty() && published_at.is_none();
    item.creator_id = creator_id;
    item.published_at = published_at;
    item
}

fn clean_segment(segment: Option<String>) -> Option<String> {
    segment
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
}

fn required_id(value: Option<&Value>, field: &str) -> Result<String, Rejected> {
    optional_id(value, field)?.ok_or_else(|| Rejected::missing(field))
}

fn optional_id(value: Option<&Value>, field: &str) -> Result<Option<String>, Rejected> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_owned()))
        }
        Some(Value::Number(n)) if n.is_u64() || n.is_i64() => Ok(Some(n.to_string())),
        Some(other) => Err(Rejected::new(
            RejectReason::MalformedPayload,
            format!("`{field}` must be a string or integer, got {other}"),
        )),
    }
}

fn number(value: &Value, field: &str) -> Result<f64, Rejected> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(Rejected::new(
            RejectReason::InvalidNumber,
            format!("`{field}` is not a number: {value}"),
        )),
    }
}

fn magnitude(value: &Value, field: &str) -> Result<f64, Rejected> {
    let n = number(value, field)?;
    if n < 0.0 {
        return Err(Rejected::new(
            RejectReason::NegativeMagnitude,
            format!("`{field}` is negative: {n}"),
        ));
    }
    Ok(n)
}

/// Platforms that report one event per item default the count to 1.
fn count_or_one(value: Option<&Value>, field: &str) -> Result<f64, Rejected> {
    match value {
        None | Some(Value::Null) => Ok(1.0),
        Some(v) => magnitude(v, field),
    }
}

fn timestamp(value: &Value, field: &str) -> Result<DateTime<Utc>, Rejected> {
    let invalid = || {
        Rejected::new(
            RejectReason::InvalidTimestamp,
            format!("`{field}` is not a valid timestamp: {value}"),
        )
    };
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.with_timezone(&Utc));
            }
            s.parse::<f64>()
                .ok()
                .and_then(from_epoch)
                .ok_or_else(invalid)
        }
        Value::Number(n) => n.as_f64().and_then(from_epoch).ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

fn optional_timestamp(
    value: Option<&Value>,
    field: &str,
) -> Result<Option<DateTime<Utc>>, Rejected> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => timestamp(v, field).map(Some),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn from_epoch(raw: f64) -> Option<DateTime<Utc>> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    let millis = if raw > EPOCH_MILLIS_CUTOFF {
        raw
    } else {
        raw * 1000.0
    };
    Utc.timestamp_millis_opt(millis.round() as i64).single()
}

fn parse_release_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d"))
        .or_else(|_| NaiveDate::parse_from_str(&format!("{raw}-01-01"), "%Y-%m-%d"))
        .ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

#[cfg(test)]
#[path = "normalizer_test.rs"]
mod tests;
