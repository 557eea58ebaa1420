use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Serialize;
use serde_json::Value;

use cflow_core::{Platform, RawRecord};
use cflow_ingest::IngestOutcome;

use crate::middleware::RequestId;

use super::{ApiError, ApiResponse, AppState, ResponseMeta};

/// Largest batch accepted by one push.
const MAX_BATCH: usize = 1_000;

#[derive(Debug, Default, Serialize)]
pub(super) struct IngestSummary {
    pub received: usize,
    pub published: usize,
    pub duplicates: usize,
    pub quarantined: BTreeMap<&'static str, usize>,
}

/// Accept webhook pushes: one platform payload or an array of them.
pub(super) async fn push_events(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(platform): Path<String>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<ApiResponse<IngestSummary>>), ApiError> {
    let platform = platform
        .parse::<Platform>()
        .map_err(|e| ApiError::new(req_id.0.clone(), "not_found", e))?;

    let payloads = match body {
        Value::Array(items) => items,
        single => vec![single],
    };
    if payloads.len() > MAX_BATCH {
        return Err(ApiError::new(
            req_id.0,
            "validation_error",
            format!("batch exceeds {MAX_BATCH} payloads"),
        ));
    }

    let mut summary = IngestSummary::default();
    for payload in payloads {
        summary.received += 1;
        let raw = RawRecord::tagged("push", platform, payload);
        match state.runtime.ingest.ingest(raw).await {
            IngestOutcome::Published => summary.published += 1,
            IngestOutcome::Duplicate => summary.duplicates += 1,
            IngestOutcome::Quarantined(reason) => {
                *summary.quarantined.entry(reason.as_str()).or_insert(0) += 1;
            }
            IngestOutcome::BusClosed => {
                return Err(ApiError::new(
                    req_id.0,
                    "unavailable",
                    "ingestion is shutting down",
                ));
            }
        }
    }

    tracing::debug!(
        %platform,
        received = summary.received,
        published = summary.published,
        "push batch ingested"
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse {
            data: summary,
            meta: ResponseMeta::new(req_id.0),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::json;

    use crate::api::test_support::{send, TestApp};

    fn post(uri: &str, body: &serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn batch_outcomes_are_counted() {
        let app = TestApp::new();
        let event = json!({
            "event_id": "s1", "user": "ana", "content_id": "show-1",
            "type": "view", "ts": 1_700_000_000
        });
        let body = json!([event, event, {"event_id": "s2", "type": "view"}]);

        let (status, json) = send(app.open_router(), post("/api/v1/ingest/streaming", &body)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["data"]["received"], 3);
        assert_eq!(json["data"]["published"], 1);
        assert_eq!(json["data"]["duplicates"], 1);
        assert_eq!(json["data"]["quarantined"]["missing_field"], 1);

        let letters = app.dead_letters.letters().await;
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].source, "push");
    }

    #[tokio::test]
    async fn unknown_platform_path_is_not_found() {
        let app = TestApp::new();
        let (status, json) = send(
            app.open_router(),
            post("/api/v1/ingest/myspace", &json!({"id": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "not_found");
    }
}
