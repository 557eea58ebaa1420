use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;

use cflow_core::RecommendationResult;

use crate::middleware::RequestId;

use super::{ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Deserialize)]
pub(super) struct RecommendationsQuery {
    pub subject_id: Option<String>,
    pub limit: Option<usize>,
}

pub(super) async fn get_recommendations(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<RecommendationsQuery>,
) -> Result<Json<ApiResponse<RecommendationResult>>, ApiError> {
    let subject_id = query
        .subject_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ApiError::new(
                req_id.0.clone(),
                "validation_error",
                "subject_id is required",
            )
        })?;

    let result = state
        .runtime
        .recommend(subject_id, query.limit, Utc::now())
        .await;

    Ok(Json(ApiResponse {
        data: result,
        meta: ResponseMeta::new(req_id.0),
    }))
}
