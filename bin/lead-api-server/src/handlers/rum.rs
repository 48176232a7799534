use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::handlers::api_error;
use crate::state::AppState;

const MAX_METRIC_ID_LEN: usize = 128;
const ALLOWED_METRICS: &[&str] = &["LCP", "CLS", "INP"];

#[derive(Debug, Deserialize, Default)]
pub struct RumPayload {
    #[serde(default)]
    pub metric_id: String,
    #[serde(default)]
    pub metric_name: String,
    pub value: f64,
    #[serde(default)]
    pub rating: String,
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub page_url_current: String,
}

/// Accepts a single Web Vitals sample. Validation mirrors the CSV/field
/// shape the front end's `web-vitals` library reports; anything outside
/// the plausible range for a given metric is rejected rather than clamped,
/// since a wildly-out-of-range value usually means a client bug.
pub async fn report_vital(State(state): State<AppState>, axum::Json(body): axum::Json<RumPayload>) -> Response {
    if body.metric_id.is_empty() || body.metric_id.len() > MAX_METRIC_ID_LEN {
        return api_error(lead_domain::ApiErrorKind::InvalidInput, "metric_id is required");
    }
    if !ALLOWED_METRICS.contains(&body.metric_name.as_str()) {
        return api_error(lead_domain::ApiErrorKind::InvalidInput, "metric_name must be one of LCP, CLS, INP");
    }
    if body.page_url_current.is_empty() {
        return api_error(lead_domain::ApiErrorKind::InvalidInput, "page_url_current is required");
    }
    if !body.value.is_finite() || body.value < 0.0 {
        return api_error(lead_domain::ApiErrorKind::InvalidInput, "value must be a non-negative finite number");
    }
    let max_value = if body.metric_name == "CLS" { 10.0 } else { 600_000.0 };
    if body.value > max_value {
        return api_error(lead_domain::ApiErrorKind::InvalidInput, "value out of range for metric");
    }

    if state.rum_dedupe.seen(&body.metric_id, Instant::now()) {
        return StatusCode::NO_CONTENT.into_response();
    }

    let device_type = if body.device_type.is_empty() { "unknown" } else { &body.device_type };
    let rating = if body.rating.is_empty() { "unknown" } else { &body.rating };
    lead_metrics::observe_web_vital(&body.metric_name, body.value, device_type, rating);

    StatusCode::NO_CONTENT.into_response()
}
