pub mod admin;
pub mod events;
pub mod health;
pub mod leads;
pub mod metrics;
pub mod rum;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lead_domain::ApiErrorKind;
use serde_json::json;

/// Maps the stable API error vocabulary onto a status code and JSON body,
/// recording the submission-result metric for callers that pass `metric`.
pub fn api_error(kind: ApiErrorKind, message: &str) -> Response {
    let status = match kind {
        ApiErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ApiErrorKind::InvalidJson => StatusCode::BAD_REQUEST,
        ApiErrorKind::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ApiErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ApiErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ApiErrorKind::Spam => StatusCode::ACCEPTED,
        ApiErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": message }))).into_response()
}
