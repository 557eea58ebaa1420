//! Integration tests for the platform sources.
//!
//! Each test stands up a `wiremock` server so no real network traffic is made.

use serde_json::json;
use wiremock::matchers::{
    basic_auth, bearer_token, header, method, path, query_param, query_param_is_missing,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cflow_collector::{
    build_source, CollectorError, Source, SpotifySource, StreamingSource, TwitterSource,
    YoutubeSource,
};
use cflow_core::{
    BreakerConfig, CredentialRef, Credentials, Platform, RateLimitConfig, RetryConfig,
    SourceConfig,
};

fn source_config(
    name: &str,
    platform: Platform,
    base_url: &str,
    credentials: Credentials,
) -> SourceConfig {
    SourceConfig {
        name: name.to_owned(),
        platform,
        base_url: base_url.to_owned(),
        auth: CredentialRef::None,
        credentials,
        token_url: None,
        rate_limit: RateLimitConfig {
            requests_per_sec: 100.0,
            burst: Some(100),
        },
        retry: RetryConfig {
            max_retries: 2,
            backoff_base_ms: 0,
        },
        breaker: BreakerConfig::default(),
        fetch_deadline_secs: 5,
        poll_interval_secs: 60,
        page_limit: 5,
        enabled: true,
    }
}

fn youtube(server: &MockServer) -> YoutubeSource {
    let cfg = source_config(
        "yt",
        Platform::Youtube,
        &server.uri(),
        Credentials::ApiKey("test-key".to_owned()),
    );
    YoutubeSource::new(&cfg, 5, "cflow-test/0.1").expect("youtube source")
}

// ---------------------------------------------------------------------------
// YouTube
// ---------------------------------------------------------------------------

#[tokio::test]
async fn youtube_follows_page_tokens_and_advances_watermark() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/activities"))
        .and(query_param("key", "test-key"))
        .and(query_param("observedAfter", "2026-01-01T00:00:00Z"))
        .and(query_param_is_missing("pageToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{
                "id": "a1",
                "videoId": "vid-1",
                "activity": "view",
                "count": "12",
                "observedAt": "2026-01-01T00:05:00Z",
                "duration": "PT4M13S"
            }],
            "nextPageToken": "p2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/activities"))
        .and(query_param("pageToken", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{
                "id": "a2",
                "videoId": "vid-1",
                "activity": "like",
                "count": 3,
                "observedAt": "2026-01-01T00:09:30Z"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let page = youtube(&server)
        .fetch(Some("2026-01-01T00:00:00Z"))
        .await
        .expect("fetch should succeed");

    assert_eq!(page.pages, 2);
    assert_eq!(page.records.len(), 2);
    assert_eq!(page.next_cursor.as_deref(), Some("2026-01-01T00:09:30Z"));
    let first = &page.records[0];
    assert_eq!(first.source, "yt");
    assert_eq!(first.payload["platform"], "youtube");
    assert_eq!(first.payload["durationSecs"], 253);
}

#[tokio::test]
async fn youtube_without_new_items_keeps_previous_cursor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/activities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .mount(&server)
        .await;

    let page = youtube(&server)
        .fetch(Some("2026-01-01T00:00:00Z"))
        .await
        .unwrap();
    assert!(page.records.is_empty());
    assert_eq!(page.next_cursor.as_deref(), Some("2026-01-01T00:00:00Z"));
}

#[tokio::test]
async fn youtube_stops_at_page_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/activities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "id": "x", "observedAt": "2026-01-01T00:00:00Z" }],
            "nextPageToken": "again"
        })))
        .expect(2)
        .mount(&server)
        .await;

    let mut cfg = source_config(
        "yt",
        Platform::Youtube,
        &server.uri(),
        Credentials::ApiKey("k".to_owned()),
    );
    cfg.page_limit = 2;
    let source = YoutubeSource::new(&cfg, 5, "cflow-test/0.1").unwrap();
    let page = source.fetch(None).await.unwrap();
    assert_eq!(page.pages, 2);
}

#[tokio::test]
async fn youtube_server_errors_exhaust_into_source_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/activities"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let err = youtube(&server).fetch(None).await.unwrap_err();
    match err {
        CollectorError::SourceUnavailable { name, attempts, .. } => {
            assert_eq!(name, "yt");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected SourceUnavailable, got: {other:?}"),
    }
}

#[tokio::test]
async fn youtube_retries_after_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/activities"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/activities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "id": "a1", "observedAt": "2026-01-01T00:00:00Z" }]
        })))
        .mount(&server)
        .await;

    let page = youtube(&server).fetch(None).await.unwrap();
    assert_eq!(page.records.len(), 1);
}

#[tokio::test]
async fn youtube_forbidden_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/activities"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let err = youtube(&server).fetch(None).await.unwrap_err();
    match err {
        CollectorError::UnexpectedStatus { status, url, .. } => {
            assert_eq!(status, 403);
            assert!(!url.contains("test-key"), "api key leaked into error: {url}");
        }
        other => panic!("expected UnexpectedStatus, got: {other:?}"),
    }
}

#[tokio::test]
async fn youtube_malformed_body_is_deserialize_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/activities"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let err = youtube(&server).fetch(None).await.unwrap_err();
    assert!(matches!(err, CollectorError::Deserialize { .. }), "got: {err:?}");
}

// ---------------------------------------------------------------------------
// Spotify
// ---------------------------------------------------------------------------

#[tokio::test]
async fn spotify_exchanges_client_credentials_and_pages_by_cursor() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(basic_auth("client", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-1",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/engagements"))
        .and(bearer_token("tok-1"))
        .and(query_param("after", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                { "id": "s1", "track": { "id": "t1" }, "type": "play", "played_at": "2026-01-01T00:00:00Z" },
                { "id": "s2", "track": { "id": "t2" }, "type": "save", "played_at": "2026-01-01T00:01:00Z" }
            ],
            "cursors": { "after": "200" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/engagements"))
        .and(query_param("after", "200"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [],
            "cursors": { "after": null }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut cfg = source_config(
        "sp",
        Platform::Spotify,
        &server.uri(),
        Credentials::ClientCredentials {
            client_id: "client".to_owned(),
            client_secret: "secret".to_owned(),
        },
    );
    cfg.token_url = Some(format!("{}/token", server.uri()));
    let source = SpotifySource::new(&cfg, 5, "cflow-test/0.1").unwrap();

    let page = source.fetch(Some("100")).await.unwrap();
    assert_eq!(page.records.len(), 2);
    assert_eq!(page.next_cursor.as_deref(), Some("200"));
    assert_eq!(page.records[1].payload["platform"], "spotify");
}

// ---------------------------------------------------------------------------
// Twitter
// ---------------------------------------------------------------------------

#[tokio::test]
async fn twitter_uses_since_id_and_newest_id_cursor() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/engagements/recent"))
        .and(bearer_token("bearer-1"))
        .and(query_param("since_id", "1000"))
        .and(query_param_is_missing("pagination_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "id": "1002", "tweet_id": "t9", "kind": "like", "created_at": "2026-01-01T00:00:00Z" }],
            "meta": { "newest_id": "1002", "next_token": "n1", "result_count": 1 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/engagements/recent"))
        .and(query_param("pagination_token", "n1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "id": "1001", "tweet_id": "t9", "kind": "retweet", "created_at": "2026-01-01T00:00:00Z" }],
            "meta": { "newest_id": "1001", "result_count": 1 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = source_config(
        "tw",
        Platform::Twitter,
        &server.uri(),
        Credentials::Bearer("bearer-1".to_owned()),
    );
    let source = TwitterSource::new(&cfg, 5, "cflow-test/0.1").unwrap();
    let page = source.fetch(Some("1000")).await.unwrap();
    assert_eq!(page.records.len(), 2);
    assert_eq!(page.next_cursor.as_deref(), Some("1002"));
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

#[tokio::test]
async fn streaming_sends_api_key_header_and_walks_pages() {
    let server = MockServer::start().await;

    for page in 1..=2 {
        Mock::given(method("GET"))
            .and(path("/events"))
            .and(header("X-Api-Key", "stream-key"))
            .and(query_param("page", page.to_string().as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "events": [{ "event_id": format!("e{page}"), "content_id": "c1", "type": "view", "value": 1, "ts": 1_700_000_000 + page }],
                "page": page,
                "total_pages": 2
            })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let cfg = source_config(
        "st",
        Platform::Streaming,
        &server.uri(),
        Credentials::Header {
            name: "X-Api-Key".to_owned(),
            value: "stream-key".to_owned(),
        },
    );
    let source = StreamingSource::new(&cfg, 5, "cflow-test/0.1").unwrap();
    let page = source.fetch(None).await.unwrap();
    assert_eq!(page.pages, 2);
    assert_eq!(page.records.len(), 2);
    assert_eq!(page.next_cursor.as_deref(), Some("1700000002"));
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

#[test]
fn mismatched_credentials_are_rejected() {
    let cfg = source_config(
        "tw",
        Platform::Twitter,
        "https://api.example.com",
        Credentials::ApiKey("k".to_owned()),
    );
    let err = build_source(&cfg, 5, "cflow-test/0.1").err().expect("should fail");
    assert!(matches!(err, CollectorError::InvalidConfig { .. }));
}

#[test]
fn build_source_dispatches_on_platform() {
    let cfg = source_config(
        "yt",
        Platform::Youtube,
        "https://api.example.com",
        Credentials::ApiKey("k".to_owned()),
    );
    let source = build_source(&cfg, 5, "cflow-test/0.1").unwrap();
    assert_eq!(source.platform(), Platform::Youtube);
    assert_eq!(source.name(), "yt");
    assert_eq!(source.describe_rate_budget().burst, 100);
}
