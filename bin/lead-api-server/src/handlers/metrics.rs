use std::time::Duration;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use crate::state::AppState;

/// Best-effort refresh of the backlog gauges before rendering: a slow or
/// unavailable store shouldn't block the scrape, just leave the previous
/// values in place.
pub async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let refresh = tokio::time::timeout(Duration::from_secs(2), state.notifications.stats());
    if let Ok(Ok(stats)) = refresh.await {
        lead_metrics::set_lead_notification_backlog(
            &stats.counts_by_status,
            stats.pending_ready_count,
            stats.pending_delayed_count,
            stats.oldest_ready_pending_created_at,
        );
    }

    (
        [
            (header::CONTENT_TYPE, "text/plain; version=0.0.4".to_string()),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        state.metrics.render(),
    )
}
