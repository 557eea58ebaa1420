use super::*;

use cflow_core::{ContentItem, EngagementEvent, EventType, Platform};

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

fn like(subject: Option<&str>, content_id: &str, id: &str, tags: &[&str]) -> NormalizedRecord {
    let mut content = ContentItem::provisional(content_id, Platform::Spotify);
    content.enrich_tags(tags.iter().copied());
    NormalizedRecord {
        event: EngagementEvent {
            content_id: content_id.into(),
            platform: Platform::Spotify,
            event_type: EventType::Like,
            magnitude: 1.0,
            timestamp: at(0),
            source_event_id: id.into(),
            subject_id: subject.map(str::to_owned),
            segment: None,
        },
        content,
    }
}

fn model() -> InteractionModel {
    InteractionModel::new(EventWeights::default(), 4, 3600)
}

#[tokio::test]
async fn events_wait_for_flush() {
    let model = model();
    assert!(model.record(&like(Some("u1"), "c1", "e1", &[]), at(0)).await);
    assert_eq!(model.pending().await, 1);
    assert_eq!(model.version(), 0);
    assert!(model.current().await.history("u1").is_none());

    let report = model.flush().await;
    assert_eq!(report, FlushReport { version: 1, applied: 1 });
    assert_eq!(model.pending().await, 0);
    let state = model.current().await;
    assert!((state.history("u1").unwrap()["c1"] - 2.0).abs() < 1e-12);
}

#[tokio::test]
async fn empty_flush_keeps_version() {
    let model = model();
    assert_eq!(model.flush().await, FlushReport { version: 0, applied: 0 });
    model.record(&like(Some("u1"), "c1", "e1", &[]), at(0)).await;
    model.flush().await;
    assert_eq!(model.flush().await, FlushReport { version: 1, applied: 0 });
}

#[tokio::test]
async fn anonymous_and_redelivered_events_are_ignored() {
    let model = model();
    assert!(!model.record(&like(None, "c1", "e1", &[]), at(0)).await);
    assert!(model.record(&like(Some("u1"), "c1", "e2", &[]), at(0)).await);
    assert!(!model.record(&like(Some("u1"), "c1", "e2", &[]), at(1)).await);
    assert_eq!(model.flush().await.applied, 1);
}

#[tokio::test]
async fn readers_keep_their_state_across_flushes() {
    let model = model();
    model.record(&like(Some("u1"), "c1", "e1", &[]), at(0)).await;
    model.flush().await;
    let before = model.current().await;

    model.record(&like(Some("u1"), "c2", "e2", &[]), at(0)).await;
    model.flush().await;

    assert_eq!(before.version, 1);
    assert_eq!(before.history("u1").unwrap().len(), 1);
    assert_eq!(model.current().await.history("u1").unwrap().len(), 2);
}

#[tokio::test]
async fn profiles_accumulate_tags() {
    let model = model();
    model.record(&like(Some("u1"), "c1", "e1", &["Rock"]), at(0)).await;
    model.record(&like(Some("u1"), "c2", "e2", &["rock", "indie"]), at(0)).await;
    model.flush().await;
    let state = model.current().await;
    let profile = &state.profiles["u1"];
    assert!((profile["rock"] - 4.0).abs() < 1e-12);
    assert!((profile["indie"] - 2.0).abs() < 1e-12);
}

#[tokio::test]
async fn neighbors_recommend_what_they_liked() {
    let model = model();
    let events = [
        ("alice", "c1", "e1"),
        ("alice", "c2", "e2"),
        ("bob", "c1", "e3"),
        ("bob", "c2", "e4"),
        ("bob", "c3", "e5"),
        ("carol", "c9", "e6"),
    ];
    for (subject, content, id) in events {
        model.record(&like(Some(subject), content, id, &[]), at(0)).await;
    }
    model.flush().await;
    let state = model.current().await;

    let neighbors = state.neighbors("alice", 10);
    assert_eq!(neighbors.len(), 1);
    assert_eq!(neighbors[0].0, "bob");

    let scores = state.collaborative_scores("alice", 10);
    assert_eq!(scores.keys().collect::<Vec<_>>(), vec!["c3"]);
    assert!(state.collaborative_scores("nobody", 10).is_empty());
}

#[tokio::test]
async fn checkpoint_round_trip_keeps_version() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonCheckpointStore::new(dir.path());

    let model = model();
    model.record(&like(Some("u1"), "c1", "e1", &["pop"]), at(0)).await;
    model.flush().await;
    assert_eq!(model.checkpoint(&store).await.unwrap(), 1);

    let restored = self::model();
    assert_eq!(restored.restore(&store).await.unwrap(), Some(1));
    assert_eq!(*restored.current().await, *model.current().await);

    let empty = JsonCheckpointStore::new(dir.path().join("none"));
    assert_eq!(self::model().restore(&empty).await.unwrap(), None);
}

#[tokio::test]
async fn redelivery_after_restore_is_not_counted_twice() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonCheckpointStore::new(dir.path());

    let model = model();
    model.record(&like(Some("u1"), "c1", "e1", &[]), at(0)).await;
    model.flush().await;
    model.checkpoint(&store).await.unwrap();

    let restored = self::model();
    restored.restore(&store).await.unwrap();
    assert!(!restored.record(&like(Some("u1"), "c1", "e1", &[]), at(5)).await);
    assert!(restored.record(&like(Some("u1"), "c1", "e2", &[]), at(5)).await);
    assert_eq!(restored.flush().await, FlushReport { version: 2, applied: 1 });
    assert!((restored.current().await.history("u1").unwrap()["c1"] - 4.0).abs() < 1e-12);
}

#[tokio::test]
async fn flush_skips_events_the_committed_state_already_holds() {
    let model = model();
    model.record(&like(Some("u1"), "c1", "e1", &[]), at(0)).await;
    model.flush().await;

    // Buffered before the first flush committed, as a racing bus redelivery would be.
    let index = partition_for("u1", model.shards.len());
    model.shards[index].lock().await.buffer.push(Interaction {
        event_key: event_key(Platform::Spotify, "e1"),
        seen_at: at(1),
        subject_id: "u1".into(),
        content_id: "c1".into(),
        weight: 2.0,
        tags: Vec::new(),
    });
    assert_eq!(model.flush().await, FlushReport { version: 1, applied: 0 });
    assert!((model.current().await.history("u1").unwrap()["c1"] - 2.0).abs() < 1e-12);
}

#[tokio::test]
async fn applied_keys_are_bounded_by_the_dedup_window() {
    let model = InteractionModel::new(EventWeights::default(), 4, 60);
    model.record(&like(Some("u1"), "c1", "e1", &[]), at(0)).await;
    model.flush().await;
    model.record(&like(Some("u1"), "c1", "e2", &[]), at(120)).await;
    model.flush().await;

    let state = model.current().await;
    assert_eq!(state.applied.len(), 1);
    assert!(state.applied.contains_key("spotify/e2"));
}
