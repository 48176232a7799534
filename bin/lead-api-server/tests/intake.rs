use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use lead_api_server::state::{AppState, AppStateConfig};
use lead_store::memory::{InMemoryLeadRepository, InMemoryNotificationRepository};
use lead_store::{LeadRepository, NotificationRepository};
use serde_json::json;
use tower::ServiceExt;

fn testable(state: AppState) -> Router {
    lead_api_server::build_router(state).layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 0))))
}

fn test_state() -> AppState {
    AppState::new(
        Arc::new(InMemoryLeadRepository::new()),
        Arc::new(InMemoryNotificationRepository::new()),
        AppStateConfig {
            admin_token: "test-admin-token".into(),
            env: "test".into(),
            http_host: "127.0.0.1".into(),
            http_port: 8080,
            notify_email_enabled: true,
            notify_webhook_enabled: true,
            trusted_proxies: Vec::new(),
            lead_rate_limit_rps: 1000,
        },
    )
}

fn valid_lead_body() -> serde_json::Value {
    json!({
        "business_name": "Glow Salon",
        "contact_name": "Siti",
        "phone_whatsapp": "081234567890",
        "city": "Jakarta",
        "salon_type": "SALON",
        "consent": true,
    })
}

#[tokio::test]
async fn happy_path_creates_lead_and_enqueues_both_channels() {
    let state = test_state();
    let leads = state.leads.clone();
    let notifications = state.notifications.clone();
    let app = testable(state);

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/leads")
        .header("content-type", "application/json")
        .body(Body::from(valid_lead_body().to_string()))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let all_leads = leads.list(10, None).await.unwrap();
    assert_eq!(all_leads.len(), 1);

    let rows = notifications
        .list(lead_domain::NotificationListQuery {
            lead_id: Some(all_leads[0].id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.status == lead_domain::Status::Pending));
}

#[tokio::test]
async fn duplicate_idempotency_key_does_not_create_a_second_lead() {
    let state = test_state();
    let leads = state.leads.clone();
    let app = testable(state);

    for _ in 0..2 {
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/leads")
            .header("content-type", "application/json")
            .header("idempotency-key", "same-key-123")
            .body(Body::from(valid_lead_body().to_string()))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    let all_leads = leads.list(10, None).await.unwrap();
    assert_eq!(all_leads.len(), 1);
}

#[tokio::test]
async fn honeypot_field_is_silently_accepted_without_persisting() {
    let state = test_state();
    let leads = state.leads.clone();
    let app = testable(state);

    let mut body = valid_lead_body();
    body["company"] = json!("bots-fill-this-in");

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/leads")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    assert!(leads.list(10, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_required_field_is_rejected_with_400() {
    let state = test_state();
    let app = testable(state);

    let mut body = valid_lead_body();
    body["consent"] = json!(false);

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/leads")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_json_body_is_rejected_with_invalid_json_error() {
    let state = test_state();
    let app = testable(state);

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/leads")
        .header("content-type", "application/json")
        .body(Body::from("{not valid json"))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "invalid_json");
}

#[tokio::test]
async fn non_json_content_type_is_rejected() {
    let state = test_state();
    let app = testable(state);

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/leads")
        .header("content-type", "text/plain")
        .body(Body::from("not json"))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn admin_routes_require_the_admin_token() {
    let state = test_state();
    let app = testable(state);

    let req = Request::builder()
        .method("GET")
        .uri("/api/v1/admin/lead-notifications/stats")
        .body(Body::empty())
        .unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .method("GET")
        .uri("/api/v1/admin/lead-notifications/stats")
        .header("x-admin-token", "test-admin-token")
        .body(Body::empty())
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn lead_is_stamped_with_the_connecting_peer_ip_by_default() {
    let state = test_state();
    let leads = state.leads.clone();
    let app = testable(state);

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/leads")
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.9")
        .body(Body::from(valid_lead_body().to_string()))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let all_leads = leads.list(10, None).await.unwrap();
    assert_eq!(all_leads[0].ip_address.as_deref(), Some("127.0.0.1"));
}

#[tokio::test]
async fn lead_is_stamped_with_forwarded_ip_when_peer_is_a_trusted_proxy() {
    let mut state = test_state();
    state.trusted_proxies = vec!["127.0.0.1".parse().unwrap()];
    let leads = state.leads.clone();
    let app = testable(state);

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/leads")
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.9, 127.0.0.1")
        .body(Body::from(valid_lead_body().to_string()))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let all_leads = leads.list(10, None).await.unwrap();
    assert_eq!(all_leads[0].ip_address.as_deref(), Some("203.0.113.9"));
}

#[tokio::test]
async fn health_endpoint_reports_enabled_channels() {
    let state = test_state();
    let app = testable(state);

    let req = Request::builder().method("GET").uri("/health").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
