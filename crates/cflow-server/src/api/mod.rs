mod ingest;
mod recommendations;
mod trends;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderName, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::middleware::{
    enforce_rate_limit, request_id, require_bearer_auth, AuthState, RateLimitState, RequestId,
    REQUEST_ID_HEADER,
};
use crate::runtime::{Runtime, RuntimeStats};

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorBody,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
struct HealthData {
    status: &'static str,
    #[serde(flatten)]
    stats: RuntimeStats,
}

impl ResponseMeta {
    pub(super) fn new(request_id: String) -> Self {
        Self {
            request_id,
            timestamp: Utc::now(),
        }
    }
}

impl ApiError {
    pub fn new(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
            meta: ResponseMeta::new(request_id.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.error.code.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "bad_request" | "validation_error" => StatusCode::BAD_REQUEST,
            "rate_limited" => StatusCode::TOO_MANY_REQUESTS,
            "unavailable" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
}

fn protected_router(auth: AuthState, rate_limit: RateLimitState) -> Router<AppState> {
    Router::new()
        .route("/api/v1/trends", get(trends::list_trends))
        .route(
            "/api/v1/recommendations",
            get(recommendations::get_recommendations),
        )
        .route("/api/v1/ingest/{platform}", post(ingest::push_events))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn_with_state(
                    auth,
                    require_bearer_auth,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    rate_limit,
                    enforce_rate_limit,
                )),
        )
}

pub fn build_app(state: AppState, auth: AuthState, rate_limit: RateLimitState) -> Router {
    let public_routes = Router::new().route("/api/v1/health", get(health));

    Router::new()
        .merge(public_routes)
        .merge(protected_router(auth, rate_limit))
        .layer(
            ServiceBuilder::new()
                .layer(tower_http::trace::TraceLayer::new_for_http())
                .layer(build_cors())
                .layer(axum::middleware::from_fn(request_id)),
        )
        .with_state(state)
}

async fn health(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> impl IntoResponse {
    let stats = state.runtime.stats().await;
    let status = if stats.bus.undeliverable > 0 || stats.ingest.dead_letter_failures > 0 {
        "degraded"
    } else {
        "ok"
    };
    Json(ApiResponse {
        data: HealthData { status, stats },
        meta: ResponseMeta::new(req_id.0),
    })
}

pub fn default_rate_limit_state() -> RateLimitState {
    RateLimitState::new(600, Duration::from_secs(60))
}


#[cfg(test)]
mod tests {
    use super::test_support::{get, send, TestApp};
    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    #[test]
    fn api_error_validation_error_maps_to_bad_request() {
        let response = ApiError::new("req-1", "validation_error", "invalid input").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_reports_pipeline_counters() {
        let app = TestApp::new();
        let (status, json) = send(app.open_router(), get("/api/v1/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["status"], "ok");
        assert_eq!(json["data"]["model_version"], 0);
        assert!(json["data"]["last_detection"].is_null());
        assert_eq!(json["data"]["ingest"]["received"], 0);
        assert!(json["meta"]["request_id"].is_string());
    }

    #[tokio::test]
    async fn request_id_header_is_echoed() {
        let app = TestApp::new();
        let response = tower::ServiceExt::oneshot(
            app.open_router(),
            Request::builder()
                .uri("/api/v1/health")
                .header("x-request-id", "req-42")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
        assert_eq!(
            response.headers().get("x-request-id").and_then(|v| v.to_str().ok()),
            Some("req-42")
        );
    }

    #[tokio::test]
    async fn protected_routes_require_a_bearer_token_when_keys_exist() {
        let app = TestApp::new();
        let auth = AuthState::from_keys("k1", false).expect("auth");

        let (status, json) = send(app.router(auth.clone()), get("/api/v1/trends")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"]["code"], "unauthorized");

        let (status, _) = send(
            app.router(auth.clone()),
            Request::builder()
                .uri("/api/v1/trends")
                .header("authorization", "Bearer k1")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(app.router(auth), get("/api/v1/health")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn each_key_is_rate_limited_on_its_own() {
        let app = TestApp::new();
        let router = || {
            build_app(
                AppState {
                    runtime: Arc::clone(&app.runtime),
                },
                AuthState::from_keys("k1,k2", false).expect("auth"),
                RateLimitState::new(1, Duration::from_secs(60)),
            )
        };
        let trends = |key: &str| {
            Request::builder()
                .uri("/api/v1/trends")
                .header("authorization", format!("Bearer {key}"))
                .body(Body::empty())
                .expect("request")
        };

        let limited = router();
        let (status, _) = send(limited.clone(), trends("k1")).await;
        assert_eq!(status, StatusCode::OK);
        let response = tower::ServiceExt::oneshot(limited.clone(), trends("k1"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("retry-after"));

        let (status, _) = send(limited, trends("k2")).await;
        assert_eq!(status, StatusCode::OK);
    }
}
