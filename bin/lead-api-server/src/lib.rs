pub mod handlers;
pub mod middleware;
pub mod state;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;

use state::AppState;

pub fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/leads.csv", get(handlers::admin::export_leads_csv))
        .route("/lead-notifications", get(handlers::admin::list_notifications))
        .route("/lead-notifications/stats", get(handlers::admin::notification_stats))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_admin_token));

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics::render_metrics))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_admin_token));

    let lead_routes = Router::new()
        .route("/api/v1/leads", post(handlers::leads::create_lead))
        .route_layer(from_fn(middleware::require_json_content_type))
        .route_layer(from_fn_with_state(state.clone(), middleware::lead_rate_limit));

    let telemetry_routes = Router::new()
        .route("/api/v1/events", post(handlers::events::track_event))
        .route("/api/v1/rum", post(handlers::rum::report_vital))
        .route_layer(from_fn(middleware::require_json_content_type))
        .route_layer(from_fn_with_state(state.clone(), middleware::telemetry_rate_limit));

    Router::new()
        .route("/health", get(handlers::health::health))
        .merge(metrics_routes)
        .merge(lead_routes)
        .merge(telemetry_routes)
        .nest("/api/v1/admin", admin_routes)
        .layer(from_fn(middleware::security_headers))
        .layer(from_fn(middleware::access_log))
        .layer(from_fn(middleware::ensure_traceparent))
        .with_state(state)
}
