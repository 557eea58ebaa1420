use super::*;

use serde_json::json;

fn raw(payload: Value) -> RawRecord {
    RawRecord {
        source: "test".to_owned(),
        payload,
        received_at: Utc::now(),
    }
}

fn reason(payload: Value) -> RejectReason {
    normalize(&raw(payload)).unwrap_err().reason
}

#[test]
fn youtube_activity_maps_to_event_and_content() {
    let record = normalize(&raw(json!({
        "platform": "youtube",
        "id": "act-1",
        "videoId": "vid-1",
        "activity": "view",
        "count": "1200",
        "observedAt": "2026-01-01T00:05:00Z",
        "viewerId": "viewer-9",
        "segment": " Gen-Z ",
        "tags": ["#Music", "Live"],
        "channelId": "chan-1",
        "publishedAt": "2025-12-31T12:00:00Z"
    })))
    .unwrap();

    assert_eq!(record.event.content_id, "vid-1");
    assert_eq!(record.event.platform, Platform::Youtube);
    assert_eq!(record.event.event_type, EventType::View);
    assert!((record.event.magnitude - 1200.0).abs() < f64::EPSILON);
    assert_eq!(record.event.source_event_id, "act-1");
    assert_eq!(record.event.subject_id.as_deref(), Some("viewer-9"));
    assert_eq!(record.event.segment.as_deref(), Some("gen-z"));
    assert_eq!(
        record.event.timestamp.to_rfc3339(),
        "2026-01-01T00:05:00+00:00"
    );
    assert_eq!(record.content.creator_id.as_deref(), Some("chan-1"));
    assert!(record.content.tags.contains("music"));
    assert!(record.content.tags.contains("live"));
    assert!(!record.content.provisional);
}

#[test]
fn youtube_without_id_gets_a_stable_fallback_key() {
    let payload = json!({
        "platform": "youtube",
        "videoId": "vid-2",
        "activity": "likes",
        "count": 4,
        "observedAt": "2026-01-01T00:00:00Z"
    });
    let first = normalize(&raw(payload.clone())).unwrap();
    let second = normalize(&raw(payload)).unwrap();
    assert_eq!(first.event.source_event_id, "vid-2_like_1767225600");
    assert_eq!(first.event.source_event_id, second.event.source_event_id);
    assert!(first.content.provisional);
}

#[test]
fn youtube_requires_a_count() {
    let reason = reason(json!({
        "platform": "youtube",
        "videoId": "vid-1",
        "activity": "view",
        "observedAt": "2026-01-01T00:00:00Z"
    }));
    assert_eq!(reason, RejectReason::MissingField);
}

#[test]
fn platform_tag_is_case_insensitive() {
    let record = normalize(&raw(json!({
        "platform": "Twitter",
        "id": 1001,
        "tweet_id": 77,
        "kind": "retweet",
        "created_at": 1_767_225_600
    })))
    .unwrap();
    assert_eq!(record.event.platform, Platform::Twitter);
    assert_eq!(record.event.content_id, "77");
    assert_eq!(record.event.source_event_id, "1001");
    assert_eq!(record.event.event_type, EventType::Share);
    assert!((record.event.magnitude - 1.0).abs() < f64::EPSILON);
}

#[test]
fn twitter_hashtags_become_tags() {
    let record = normalize(&raw(json!({
        "platform": "twitter",
        "id": "e1",
        "tweet_id": "t1",
        "kind": "reply",
        "created_at": "2026-01-01T00:00:00Z",
        "author_id": "u-author",
        "user_id": "u-reader",
        "hashtags": ["WorldCup"]
    })))
    .unwrap();
    assert_eq!(record.event.event_type, EventType::Comment);
    assert_eq!(record.event.subject_id.as_deref(), Some("u-reader"));
    assert!(record.content.tags.contains("worldcup"));
    assert_eq!(record.content.creator_id.as_deref(), Some("u-author"));
}

#[test]
fn spotify_listen_ms_becomes_watch_time_seconds() {
    let record = normalize(&raw(json!({
        "platform": "spotify",
        "id": "s1",
        "type": "listen_ms",
        "value": 90_500,
        "played_at": "2026-01-01T00:00:00Z",
        "track": {
            "id": "t1",
            "artists": [{ "id": "artist-1" }],
            "genres": ["Indie Pop"],
            "release_date": "2024"
        }
    })))
    .unwrap();
    assert_eq!(record.event.event_type, EventType::WatchTime);
    assert!((record.event.magnitude - 90.5).abs() < 1e-9);
    assert_eq!(record.content.creator_id.as_deref(), Some("artist-1"));
    assert!(record.content.tags.contains("indie pop"));
    assert_eq!(
        record.content.published_at.map(|d| d.to_rfc3339()),
        Some("2024-01-01T00:00:00+00:00".to_owned())
    );
}

#[test]
fn spotify_save_counts_as_like() {
    let record = normalize(&raw(json!({
        "platform": "spotify",
        "id": "s2",
        "type": "save",
        "played_at": "2026-01-01T00:01:00Z",
        "track": { "id": "t2", "release_date": "not a date" }
    })))
    .unwrap();
    assert_eq!(record.event.event_type, EventType::Like);
    assert!(record.content.published_at.is_none());
}

#[test]
fn streaming_event_accepts_epoch_millis() {
    let record = normalize(&raw(json!({
        "platform": "streaming",
        "event_id": "e1",
        "content_id": "c1",
        "type": "watch_time",
        "value": "42.5",
        "ts": 1_767_225_600_000_i64,
        "creator": "creator-1",
        "categories": ["gaming"]
    })))
    .unwrap();
    assert_eq!(record.event.timestamp.timestamp(), 1_767_225_600);
    assert!((record.event.magnitude - 42.5).abs() < 1e-9);
    assert!(record.content.tags.contains("gaming"));
}

#[test]
fn reason_codes_cover_each_failure() {
    assert_eq!(reason(json!([1, 2, 3])), RejectReason::MalformedPayload);
    assert_eq!(reason(json!({ "id": "x" })), RejectReason::MissingField);
    assert_eq!(
        reason(json!({ "platform": "myspace", "id": "x" })),
        RejectReason::UnknownPlatform
    );
    assert_eq!(
        reason(json!({ "platform": 7 })),
        RejectReason::MalformedPayload
    );
    assert_eq!(
        reason(json!({
            "platform": "streaming", "event_id": "e", "content_id": "c",
            "type": "view", "value": "lots", "ts": 1_700_000_000
        })),
        RejectReason::InvalidNumber
    );
    assert_eq!(
        reason(json!({
            "platform": "streaming", "event_id": "e", "content_id": "c",
            "type": "view", "value": -3, "ts": 1_700_000_000
        })),
        RejectReason::NegativeMagnitude
    );
    assert_eq!(
        reason(json!({
            "platform": "streaming", "event_id": "e", "content_id": "c",
            "type": "view", "ts": "yesterday"
        })),
        RejectReason::InvalidTimestamp
    );
    assert_eq!(
        reason(json!({
            "platform": "streaming", "event_id": "e", "content_id": "c",
            "type": "dislike", "ts": 1_700_000_000
        })),
        RejectReason::UnknownMetric
    );
    assert_eq!(
        reason(json!({
            "platform": "twitter", "id": "e", "kind": "like",
            "created_at": "2026-01-01T00:00:00Z"
        })),
        RejectReason::MissingField
    );
}

#[test]
fn wrong_field_types_are_malformed() {
    assert_eq!(
        reason(json!({
            "platform": "twitter", "id": "e", "tweet_id": "t",
            "kind": "like", "created_at": "2026-01-01T00:00:00Z",
            "hashtags": "not-a-list"
        })),
        RejectReason::MalformedPayload
    );
    assert_eq!(
        reason(json!({
            "platform": "streaming", "event_id": { "nested": true },
            "content_id": "c", "type": "view", "ts": 1_700_000_000
        })),
        RejectReason::MalformedPayload
    );
}

#[test]
fn rejected_display_includes_reason_code() {
    let err = normalize(&raw(json!("just a string"))).unwrap_err();
    assert!(err.to_string().starts_with("malformed_payload:"));
}
