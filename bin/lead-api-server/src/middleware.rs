use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use axum::extract::{ConnectInfo, MatchedPath, State};
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::info;
use uuid::Uuid;

use crate::state::AppState;

const TRACEPARENT_HEADER: &str = "traceparent";

/// Ensures every request carries a trace context: echoes a valid incoming
/// `traceparent`, otherwise generates one and stamps it on both the request
/// (for downstream handlers) and the response (for client correlation).
pub async fn ensure_traceparent(mut req: Request<axum::body::Body>, next: Next) -> Response {
    let incoming = req
        .headers()
        .get(TRACEPARENT_HEADER)
        .and_then(|v| v.to_str().ok());
    let traceparent = lead_metrics::ensure_traceparent(incoming);

    req.extensions_mut().insert(Traceparent(traceparent.clone()));

    let mut resp = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&traceparent) {
        resp.headers_mut().insert(TRACEPARENT_HEADER, value);
    }
    resp
}

#[derive(Clone)]
pub struct Traceparent(pub String);

/// Structured access log plus per-request ID, mirroring the teacher's
/// request-id + access-log middleware pair as one combined layer.
pub async fn access_log(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let method = req.method().clone();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let traceparent = req
        .extensions()
        .get::<Traceparent>()
        .map(|t| t.0.clone())
        .unwrap_or_default();
    let start = Instant::now();

    let mut resp = next.run(req).await;
    let status = resp.status().as_u16();
    let dur_ms = start.elapsed().as_millis();

    info!(
        rid = %request_id,
        trace = %traceparent,
        method = %method,
        path = %path,
        status,
        dur_ms,
        ip = %addr.ip(),
        "http_request"
    );

    lead_metrics::observe_http_request(&path, method.as_str(), status, start.elapsed());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert("x-request-id", value);
    }
    resp
}

/// Stamps a small set of defensive headers onto every response, skipping
/// any the handler already set explicitly.
pub async fn security_headers(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    for (name, value) in [
        ("x-content-type-options", "nosniff"),
        ("x-frame-options", "DENY"),
        ("referrer-policy", "no-referrer"),
    ] {
        if !headers.contains_key(name) {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(name, value);
            }
        }
    }
    resp
}

/// Rejects write endpoints that don't send `Content-Type: application/json`.
pub async fn require_json_content_type(req: Request<axum::body::Body>, next: Next) -> Response {
    let is_json = req
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.to_ascii_lowercase().starts_with("application/json"))
        .unwrap_or(false);

    if is_json {
        next.run(req).await
    } else {
        (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Json(json!({ "error": "content_type_must_be_application_json" })),
        )
            .into_response()
    }
}

/// Constant-time admin token check against `X-Admin-Token` or a `Bearer`
/// `Authorization` header. Length differences aren't worth hiding (the
/// token is high-entropy either way) but we still avoid an early-return
/// comparison on the happy path.
pub async fn require_admin_token(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let header_token = req
        .headers()
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let bearer_token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let provided = header_token.or(bearer_token).unwrap_or("");

    if secure_equals(provided.as_bytes(), state.admin_token.as_bytes()) {
        next.run(req).await
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized" }))).into_response()
    }
}

fn secure_equals(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Per-IP fixed-window-ish rate limit (governor's GCRA). Returns 429 with no
/// retry hint beyond the status, matching the teacher's minimal limiter.
fn check_rate_limit(limiter: &crate::state::IpRateLimiter, addr: IpAddr) -> Result<(), Response> {
    match limiter.check_key(&addr) {
        Ok(()) => Ok(()),
        Err(_) => Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "rate_limited" })),
        )
            .into_response()),
    }
}

/// Rate-limits `/api/v1/leads` by source IP. Records the submission-result
/// metric itself when rejecting, since the rejection never reaches the
/// handler that would otherwise record it.
pub async fn lead_rate_limit(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match check_rate_limit(&state.lead_limiter, addr.ip()) {
        Ok(()) => next.run(req).await,
        Err(resp) => {
            lead_metrics::inc_lead_submission("rate_limited");
            resp
        }
    }
}

/// Rate-limits the telemetry endpoints (`/api/v1/events`, `/api/v1/rum`) by
/// source IP, at a fixed rate independent of the configurable lead limit.
pub async fn telemetry_rate_limit(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match check_rate_limit(&state.telemetry_limiter, addr.ip()) {
        Ok(()) => next.run(req).await,
        Err(resp) => resp,
    }
}
