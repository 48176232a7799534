use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use lead_domain::{lead, ApiErrorKind, DomainError, LeadInput};
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;

/// Intake payload. `name`/`phone` are accepted as legacy aliases for
/// `contact_name`/`phone_whatsapp`, resolved before normalization.
#[derive(Debug, Deserialize, Default)]
pub struct CreateLeadRequest {
    #[serde(default)]
    pub business_name: String,
    #[serde(default)]
    pub contact_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone_whatsapp: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub salon_type: String,
    #[serde(default)]
    pub consent: bool,
    pub chair_count: Option<i64>,
    pub specialization: Option<String>,
    pub current_brands_used: Option<String>,
    pub monthly_spend_range: Option<String>,
    pub email: Option<String>,
    pub message: Option<String>,
    pub page_url_initial: Option<String>,
    pub page_url_current: Option<String>,
    /// Honeypot. Real clients never populate this; real-world name is
    /// `company` on the wire.
    #[serde(default, rename = "company")]
    pub company_honeypot: String,
}

pub async fn create_lead(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    raw_body: axum::body::Bytes,
) -> Response {
    let body: CreateLeadRequest = match serde_json::from_slice(&raw_body) {
        Ok(body) => body,
        Err(err) => {
            tracing::debug!(error = %err, "lead_body_invalid_json");
            lead_metrics::inc_lead_submission(ApiErrorKind::InvalidJson.submission_result());
            return super::api_error(ApiErrorKind::InvalidJson, "invalid_json");
        }
    };

    let idempotency_key_hash = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .and_then(lead_domain::idempotency::hash_idempotency_key);

    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let ip_address = client_ip(&state, addr.ip(), &headers);

    let mut input = LeadInput {
        business_name: body.business_name,
        contact_name: if body.contact_name.is_empty() { body.name } else { body.contact_name },
        phone_whatsapp: if body.phone_whatsapp.is_empty() { body.phone } else { body.phone_whatsapp },
        city: body.city,
        salon_type_raw: body.salon_type,
        consent: body.consent,
        chair_count: body.chair_count,
        specialization: body.specialization,
        current_brands_used: body.current_brands_used,
        monthly_spend_range: body.monthly_spend_range,
        email: body.email,
        message: body.message,
        page_url_initial: body.page_url_initial,
        page_url_current: body.page_url_current,
        user_agent,
        ip_address: Some(ip_address.to_string()),
        idempotency_key_hash,
        company_honeypot: body.company_honeypot,
    };

    lead::normalize(&mut input);
    let salon_type = match lead::validate(&input) {
        Ok(salon_type) => salon_type,
        Err(DomainError::Spam) => {
            lead_metrics::inc_lead_submission("spam");
            return StatusCode::ACCEPTED.into_response();
        }
        Err(DomainError::Invalid { reason }) => {
            lead_metrics::inc_lead_submission(ApiErrorKind::InvalidInput.submission_result());
            return super::api_error(ApiErrorKind::InvalidInput, &reason);
        }
    };

    let created = match state.leads.create(input, salon_type).await {
        Ok(lead) => lead,
        Err(err) => {
            tracing::error!(error = %err, "lead_create_failed");
            lead_metrics::inc_lead_submission(ApiErrorKind::Internal.submission_result());
            return super::api_error(ApiErrorKind::Internal, "internal_error");
        }
    };

    for channel in enabled_channels(&state) {
        let start = Instant::now();
        match state.notifications.enqueue(created.id, channel).await {
            Ok(()) => {
                lead_metrics::observe_lead_notification_enqueue(channel.as_str(), "ok", start.elapsed());
            }
            Err(err) => {
                tracing::error!(error = %err, channel = channel.as_str(), lead_id = %created.id, "notify_enqueue_failed");
                lead_metrics::observe_lead_notification_enqueue(channel.as_str(), "error", start.elapsed());
            }
        }
    }

    lead_metrics::inc_lead_submission("accepted");
    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "accepted", "id": created.id })),
    )
        .into_response()
}

/// Resolves the client IP, honoring `X-Forwarded-For` only when the
/// immediate peer is one of the configured trusted proxies. Otherwise the
/// connection's own peer address is the client IP, since an untrusted peer
/// could set the header to anything.
fn client_ip(state: &AppState, peer_ip: IpAddr, headers: &HeaderMap) -> IpAddr {
    if !state.trusted_proxies.contains(&peer_ip) {
        return peer_ip;
    }

    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .unwrap_or(peer_ip)
}

fn enabled_channels(state: &AppState) -> Vec<lead_domain::Channel> {
    let mut channels = Vec::new();
    if state.notify_email_enabled {
        channels.push(lead_domain::Channel::Email);
    }
    if state.notify_webhook_enabled {
        channels.push(lead_domain::Channel::Webhook);
    }
    channels
}
