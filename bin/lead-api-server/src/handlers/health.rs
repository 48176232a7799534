use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "env": state.env,
        "runtime": {
            "host": state.http_host,
            "port": state.http_port,
        },
        "features": {
            "notify_email_enabled": state.notify_email_enabled,
            "notify_webhook_enabled": state.notify_webhook_enabled,
        },
    }))
}
