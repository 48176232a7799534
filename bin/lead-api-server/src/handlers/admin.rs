use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use lead_domain::{Channel, NotificationListQuery, Status};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::handlers::api_error;
use crate::state::AppState;

const DEFAULT_EXPORT_LIMIT: i64 = 500;
const MAX_EXPORT_LIMIT: i64 = 5000;

#[derive(Debug, Deserialize, Default)]
pub struct ExportLeadsQuery {
    pub limit: Option<i64>,
    pub before: Option<String>,
}

pub async fn export_leads_csv(State(state): State<AppState>, Query(q): Query<ExportLeadsQuery>) -> Response {
    let limit = q.limit.filter(|n| *n > 0).unwrap_or(DEFAULT_EXPORT_LIMIT).min(MAX_EXPORT_LIMIT);
    let before = match q.before.as_deref().map(parse_rfc3339) {
        Some(Ok(ts)) => Some(ts),
        Some(Err(_)) => {
            return api_error(lead_domain::ApiErrorKind::InvalidInput, "before must be RFC3339");
        }
        None => None,
    };

    let leads = match state.leads.list(limit, before).await {
        Ok(leads) => leads,
        Err(err) => {
            tracing::error!(error = %err, "export_leads_failed");
            return api_error(lead_domain::ApiErrorKind::Internal, "internal_error");
        }
    };

    let mut csv = String::from("id,created_at,business_name,contact_name,phone_whatsapp,city,email,message,page_url_initial,page_url_current\n");
    for lead in leads {
        csv.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{}\n",
            lead.id,
            lead.created_at.to_rfc3339(),
            csv_safe(&lead.business_name),
            csv_safe(&lead.contact_name),
            csv_safe(&lead.phone_whatsapp),
            csv_safe(&lead.city),
            csv_safe(lead.email.as_deref().unwrap_or("")),
            csv_safe(lead.message.as_deref().unwrap_or("")),
            csv_safe(lead.page_url_initial.as_deref().unwrap_or("")),
            csv_safe(lead.page_url_current.as_deref().unwrap_or("")),
        ));
    }

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, "attachment; filename=leads.csv".to_string()),
        ],
        csv,
    )
        .into_response()
}

/// Mitigates CSV formula injection: a cell starting with `=`, `+`, `-`, or
/// `@` is prefixed with an apostrophe so spreadsheet software treats it as
/// text rather than evaluating it as a formula.
fn csv_safe(raw: &str) -> String {
    let trimmed = raw.trim();
    let escaped = trimmed.replace('"', "\"\"");
    let needs_quotes = escaped.contains(',') || escaped.contains('"') || escaped.contains('\n');
    let guarded = match escaped.chars().next() {
        Some('=') | Some('+') | Some('-') | Some('@') => format!("'{escaped}"),
        _ => escaped,
    };
    if needs_quotes {
        format!("\"{guarded}\"")
    } else {
        guarded
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ListNotificationsQuery {
    pub status: Option<String>,
    pub channel: Option<String>,
    pub lead_id: Option<String>,
    pub limit: Option<i64>,
    pub before: Option<String>,
}

pub async fn list_notifications(State(state): State<AppState>, Query(q): Query<ListNotificationsQuery>) -> Response {
    let status = match q.status.as_deref().map(Status::parse) {
        Some(None) => return api_error(lead_domain::ApiErrorKind::InvalidInput, "invalid status"),
        Some(Some(s)) => Some(s),
        None => None,
    };
    let channel = match q.channel.as_deref().map(Channel::parse) {
        Some(None) => return api_error(lead_domain::ApiErrorKind::InvalidInput, "invalid channel"),
        Some(Some(c)) => Some(c),
        None => None,
    };
    let lead_id = match q.lead_id.as_deref().map(Uuid::parse_str) {
        Some(Ok(id)) => Some(id),
        Some(Err(_)) => return api_error(lead_domain::ApiErrorKind::InvalidInput, "invalid lead_id"),
        None => None,
    };
    let before = match q.before.as_deref().map(parse_rfc3339) {
        Some(Ok(ts)) => Some(ts),
        Some(Err(_)) => return api_error(lead_domain::ApiErrorKind::InvalidInput, "before must be RFC3339"),
        None => None,
    };

    let query = NotificationListQuery {
        status,
        channel,
        lead_id,
        before,
        limit: q.limit.unwrap_or(0),
    };

    match state.notifications.list(query).await {
        Ok(items) => Json(json!({ "items": items })).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "list_notifications_failed");
            api_error(lead_domain::ApiErrorKind::Internal, "internal_error")
        }
    }
}

pub async fn notification_stats(State(state): State<AppState>) -> Response {
    match state.notifications.stats().await {
        Ok(stats) => {
            let now = Utc::now();
            let age = stats.oldest_ready_pending_age_seconds(now);
            (
                [(header::CACHE_CONTROL, "no-store")],
                Json(json!({
                    "counts_by_status": stats.counts_by_status,
                    "pending_ready_count": stats.pending_ready_count,
                    "pending_delayed_count": stats.pending_delayed_count,
                    "oldest_ready_pending_created_at": stats.oldest_ready_pending_created_at,
                    "oldest_ready_pending_age_seconds": age,
                })),
            )
                .into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "notification_stats_failed");
            api_error(lead_domain::ApiErrorKind::Internal, "internal_error")
        }
    }
}

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}
