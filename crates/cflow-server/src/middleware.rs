//! Request correlation, bearer-key authentication and per-client rate
//! limiting for the HTTP surface.

use std::collections::HashMap;
use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, RETRY_AFTER},
        HeaderValue, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_REQUEST_ID_LEN: usize = 128;

/// Correlation id of the current request, echoed back to the caller.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Who is calling. Set by [`require_bearer_auth`] and read by the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiClient {
    /// Index of the matching configured key.
    Key(usize),
    /// Auth is off; every caller shares one budget.
    Open,
}

/// Configured bearer keys. Keys never appear in `Debug` output.
#[derive(Clone)]
pub struct AuthState {
    keys: Arc<Vec<String>>,
    pub enabled: bool,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("keys", &self.keys.len())
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl AuthState {
    /// Read `CFLOW_API_KEYS`, a comma-separated key list.
    ///
    /// # Errors
    ///
    /// Returns an error outside development when the variable holds no keys.
    pub fn from_env(is_development: bool) -> anyhow::Result<Self> {
        let raw = std::env::var("CFLOW_API_KEYS").unwrap_or_default();
        Self::from_keys(&raw, is_development)
    }

    /// An empty list turns auth off in development and is refused anywhere
    /// else.
    ///
    /// # Errors
    ///
    /// Returns an error outside development when `raw` holds no keys.
    pub fn from_keys(raw: &str, is_development: bool) -> anyhow::Result<Self> {
        let mut keys: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
            .collect();
        keys.sort();
        keys.dedup();

        match (keys.is_empty(), is_development) {
            (false, _) => Ok(Self {
                keys: Arc::new(keys),
                enabled: true,
            }),
            (true, true) => {
                tracing::warn!("no API keys configured, serving without authentication");
                Ok(Self {
                    keys: Arc::new(Vec::new()),
                    enabled: false,
                })
            }
            (true, false) => anyhow::bail!("CFLOW_API_KEYS must list at least one key"),
        }
    }

    /// Index of the key equal to `token`. Every key is compared, so the
    /// time taken does not depend on which one matched.
    fn authenticate(&self, token: &str) -> Option<usize> {
        self.keys
            .iter()
            .enumerate()
            .fold(None, |found, (index, key)| {
                let hit = bool::from(key.as_bytes().ct_eq(token.as_bytes()));
                found.or(hit.then_some(index))
            })
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// Token bucket per [`ApiClient`]. A client may burst up to the full
/// allowance, which then refills evenly over the period.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    burst: f64,
    per_sec: f64,
    buckets: Arc<Mutex<HashMap<ApiClient, Bucket>>>,
}

impl RateLimitState {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(requests: usize, period: Duration) -> Self {
        let burst = requests.max(1) as f64;
        Self {
            burst,
            per_sec: burst / period.as_secs_f64().max(f64::EPSILON),
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spend one token, or say how long until one is available.
    async fn take(&self, client: ApiClient) -> Result<(), Duration> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(client).or_insert(Bucket {
            tokens: self.burst,
            refilled_at: now,
        });
        let earned = now.duration_since(bucket.refilled_at).as_secs_f64() * self.per_sec;
        bucket.tokens = (bucket.tokens + earned).min(self.burst);
        bucket.refilled_at = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }
        Err(Duration::from_secs_f64((1.0 - bucket.tokens) / self.per_sec))
    }
}

#[derive(Debug, Serialize)]
struct RejectionBody {
    error: Rejection,
}

#[derive(Debug, Serialize)]
struct Rejection {
    code: &'static str,
    message: &'static str,
}

fn reject(status: StatusCode, code: &'static str, message: &'static str) -> Response {
    (
        status,
        Json(RejectionBody {
            error: Rejection { code, message },
        }),
    )
        .into_response()
}

/// Reuse the caller's `x-request-id` when it is usable, otherwise mint a
/// `UUIDv4`. Handlers read it as a [`RequestId`] extension.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map_or_else(|| Uuid::new_v4().to_string(), ToOwned::to_owned);
    req.extensions_mut().insert(RequestId(id.clone()));

    let mut res = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        res.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    res
}

/// Admit requests carrying a configured bearer key and tag them with the
/// matching [`ApiClient`].
pub async fn require_bearer_auth(
    State(auth): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Response {
    let client = if auth.enabled {
        let Some(index) = bearer_token(req.headers().get(AUTHORIZATION))
            .and_then(|token| auth.authenticate(token))
        else {
            return reject(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "missing or invalid bearer token",
            );
        };
        ApiClient::Key(index)
    } else {
        ApiClient::Open
    };
    req.extensions_mut().insert(client);
    next.run(req).await
}

/// Charge the request to its client's bucket. Runs after
/// [`require_bearer_auth`].
pub async fn enforce_rate_limit(
    State(limits): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    let client = req
        .extensions()
        .get::<ApiClient>()
        .copied()
        .unwrap_or(ApiClient::Open);
    match limits.take(client).await {
        Ok(()) => next.run(req).await,
        Err(wait) => {
            tracing::debug!(?client, wait_secs = wait.as_secs_f64(), "request rate limited");
            let mut res = reject(
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "rate limit exceeded",
            );
            let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            res.headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs.max(1)));
            res
        }
    }
}

fn bearer_token(value: Option<&HeaderValue>) -> Option<&str> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
