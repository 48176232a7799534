use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;

use crate::state::AppState;

const ALLOWED_EVENTS: &[&str] = &[
    "cta_whatsapp_click",
    "cta_email_click",
    "lead_submit_success",
    "lead_submit_error",
];

#[derive(Debug, Deserialize, Default)]
pub struct WebsiteEventRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub device_type: String,
}

/// Fire-and-forget analytics event. Unknown event names are folded into
/// `"unknown"` rather than rejected, so a stale client never gets a 4xx for
/// telemetry.
pub async fn track_event(State(_state): State<AppState>, axum::Json(body): axum::Json<WebsiteEventRequest>) -> StatusCode {
    let name = if ALLOWED_EVENTS.contains(&body.name.as_str()) {
        body.name.as_str()
    } else {
        "unknown"
    };
    let device_type = if body.device_type.is_empty() { "unknown" } else { &body.device_type };

    lead_metrics::inc_website_event(name, device_type);
    StatusCode::NO_CONTENT
}
