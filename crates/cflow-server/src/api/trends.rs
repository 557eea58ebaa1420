use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cflow_core::{Platform, ResultStatus, TrendSignal};
use cflow_trends::{stale_after, BoardHealth};

use crate::middleware::RequestId;

use super::{ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Deserialize)]
pub(super) struct TrendsQuery {
    pub window: Option<String>,
    pub platform: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct TrendsData {
    pub status: ResultStatus,
    pub stale: bool,
    pub detected_at: Option<DateTime<Utc>>,
    pub signals: Vec<TrendSignal>,
}

pub(super) async fn list_trends(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<TrendsQuery>,
) -> Result<Json<ApiResponse<TrendsData>>, ApiError> {
    let platform = query
        .platform
        .as_deref()
        .map(str::parse::<Platform>)
        .transpose()
        .map_err(|e| ApiError::new(req_id.0.clone(), "validation_error", e))?;

    if let Some(window) = query.window.as_deref() {
        if state.runtime.store.window(window).is_none() {
            return Err(ApiError::new(
                req_id.0,
                "not_found",
                format!("unknown window \"{window}\""),
            ));
        }
    }

    let latest = state.runtime.board.latest().await;
    let health = BoardHealth::assess(
        latest.as_deref(),
        Utc::now(),
        stale_after(&state.runtime.pipeline.trend),
    );
    let signals = latest
        .as_deref()
        .map(|pass| pass.signals_for(query.window.as_deref(), platform))
        .unwrap_or_default();

    Ok(Json(ApiResponse {
        data: TrendsData {
            status: health.status,
            stale: health.stale,
            detected_at: latest.map(|pass| pass.detected_at),
            signals,
        },
        meta: ResponseMeta::new(req_id.0),
    }))
}
