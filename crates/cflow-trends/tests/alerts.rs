use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cflow_core::{
    ContentItem, EngagementEvent, EventType, EventWeights, NormalizedRecord, Platform,
    TrendConfig, WindowConfig, WindowKind,
};
use cflow_features::FeatureStore;
use cflow_trends::{
    AlertDispatcher, LogAlertDispatcher, TrendBoard, TrendError, TrendService,
    WebhookAlertDispatcher,
};

const WINDOW: &str = "decayed";

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

fn store() -> Arc<FeatureStore> {
    // Half-life long enough that decay between passes is negligible.
    let windows = vec![WindowConfig {
        name: WINDOW.into(),
        kind: WindowKind::Decayed {
            half_life_secs: 1.0e12,
            metric_half_lives: BTreeMap::new(),
        },
        retention_secs: 86_400,
    }];
    Arc::new(FeatureStore::new(&windows, EventWeights::default(), 2))
}

fn record(content_id: &str, platform: Platform, seq: usize, views: f64, ts: DateTime<Utc>) -> NormalizedRecord {
    NormalizedRecord {
        event: EngagementEvent {
            content_id: content_id.into(),
            platform,
            event_type: EventType::View,
            magnitude: views,
            timestamp: ts,
            source_event_id: format!("{content_id}-{seq}"),
            subject_id: None,
            segment: None,
        },
        content: ContentItem {
            id: content_id.into(),
            platform,
            creator_id: None,
            tags: BTreeSet::from(["worldcup".to_owned()]),
            published_at: None,
            provisional: false,
        },
    }
}

/// Steady growth for five passes, then a tenfold jump on the sixth.
async fn drive(store: &FeatureStore, service: &TrendService) -> Vec<usize> {
    let increments = [1.0, 60.0, 60.0, 60.0, 60.0, 600.0];
    let mut alerts_per_pass = Vec::new();
    for (seq, views) in increments.into_iter().enumerate() {
        let now = at(60 * i64::try_from(seq).unwrap());
        store.apply(&record("yt", Platform::Youtube, seq, views, now)).await;
        store.apply(&record("tw", Platform::Twitter, seq, views, now)).await;
        let outcome = service.run_pass(now).await.unwrap();
        alerts_per_pass.push(outcome.alerts.len());
    }
    alerts_per_pass
}

#[tokio::test]
async fn cross_platform_spike_is_posted_to_the_webhook() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/trends"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let store = store();
    let board = Arc::new(TrendBoard::new());
    let dispatchers: Vec<Box<dyn AlertDispatcher>> = vec![
        Box::new(LogAlertDispatcher),
        Box::new(WebhookAlertDispatcher::new(
            format!("{}/hooks/trends", server.uri()),
            reqwest::Client::new(),
        )),
    ];
    let service = TrendService::new(
        TrendConfig::for_window(WINDOW),
        Arc::clone(&store),
        Arc::clone(&board),
        dispatchers,
    )
    .unwrap();

    assert_eq!(drive(&store, &service).await, vec![0, 0, 0, 0, 0, 2]);

    let trending = board.query(Some(WINDOW), None).await;
    assert_eq!(trending.len(), 2);
    assert!(trending.iter().all(|s| s.correlation_set.is_some()));

    let mut kinds: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|req| {
            let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
            body["kind"].as_str().unwrap().to_owned()
        })
        .collect();
    kinds.sort();
    assert_eq!(kinds, vec!["cross_platform", "spike"]);
}

#[tokio::test]
async fn webhook_failures_are_counted_not_raised() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("down"))
        .mount(&server)
        .await;

    let store = store();
    let dispatchers: Vec<Box<dyn AlertDispatcher>> = vec![Box::new(WebhookAlertDispatcher::new(
        server.uri(),
        reqwest::Client::new(),
    ))];
    let service = TrendService::new(
        TrendConfig::for_window(WINDOW),
        Arc::clone(&store),
        Arc::new(TrendBoard::new()),
        dispatchers,
    )
    .unwrap();

    let increments = [1.0, 60.0, 60.0, 60.0, 60.0, 600.0];
    let mut last = None;
    for (seq, views) in increments.into_iter().enumerate() {
        let now = at(60 * i64::try_from(seq).unwrap());
        store.apply(&record("yt", Platform::Youtube, seq, views, now)).await;
        last = Some(service.run_pass(now).await.unwrap());
    }
    let last = last.unwrap();
    assert_eq!(last.alerts.len(), 1);
    assert_eq!(last.alert_failures, 1);
}

#[tokio::test]
async fn unknown_trend_window_is_rejected() {
    let result = TrendService::new(
        TrendConfig::for_window("nope"),
        store(),
        Arc::new(TrendBoard::new()),
        Vec::new(),
    );
    assert!(matches!(result, Err(TrendError::Features(_))));
}
