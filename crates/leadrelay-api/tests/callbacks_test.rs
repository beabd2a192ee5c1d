//! Delivery and validation callbacks over HTTP.

mod common;

use axum::body::Body;
use http::{Method, Request, StatusCode};
use leadrelay_core::{RecipientStatus, ValidationId};
use leadrelay_testing::{LeadBuilder, TestEnv, VALIDATION_RELAY_PATH, WHATSAPP_RELAY_PATH};
use serde_json::json;

use common::{app, call, call_raw, send};

/// Sends "Olá" to everyone and returns the delivery code.
async fn dispatched(env: &TestEnv) -> String {
    env.configure_whatsapp_relay().await;
    env.mock_relay(WHATSAPP_RELAY_PATH, 200, "ok").await;
    let reply = call(
        &app(env),
        Method::POST,
        "/api/messages/send",
        Some(json!({"type": "whatsapp", "content": "Olá", "filter_type": "all"})),
    )
    .await;
    reply.data()["delivery_code"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn delivery_callback_answers_with_the_resolved_lead() {
    let env = TestEnv::new().await;
    LeadBuilder::ana().insert(env.storage.as_ref()).await;
    let code = dispatched(&env).await;
    let app = app(&env);
    let body = json!({"delivery_code": code, "lead_identifier": "5582999999999", "status": "delivered"});

    let first = call(&app, Method::POST, "/api/callbacks/message-delivery", Some(body.clone())).await;
    let replay = call(&app, Method::POST, "/api/callbacks/message-delivery", Some(body)).await;

    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(
        *first.data(),
        json!({
            "delivery_code": code,
            "lead_identifier": "5582999999999",
            "lead_name": "Ana",
            "status": "delivered",
            "message_type": "whatsapp",
            "updated_recipients": 1,
        })
    );
    assert_eq!(replay.status, StatusCode::OK);
    assert_eq!(replay.body, first.body);
    assert_eq!(env.recipients().await[0].delivery_status, RecipientStatus::Delivered);
}

#[tokio::test]
async fn status_defaults_to_delivered() {
    let env = TestEnv::new().await;
    LeadBuilder::ana().insert(env.storage.as_ref()).await;
    let code = dispatched(&env).await;

    let reply = call(
        &app(&env),
        Method::POST,
        "/api/callbacks/message-delivery",
        Some(json!({"delivery_code": code, "lead_identifier": "5582999999999"})),
    )
    .await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.data()["status"], "delivered");
}

#[tokio::test]
async fn correlation_failures_are_not_found() {
    let env = TestEnv::new().await;
    LeadBuilder::ana().insert(env.storage.as_ref()).await;
    let code = dispatched(&env).await;
    let app = app(&env);

    let unknown_code = call(
        &app,
        Method::POST,
        "/api/callbacks/message-delivery",
        Some(json!({"delivery_code": "MSG-1-NOPE00000", "lead_identifier": "5582999999999"})),
    )
    .await;
    let unknown_lead = call(
        &app,
        Method::POST,
        "/api/callbacks/message-delivery",
        Some(json!({"delivery_code": code, "lead_identifier": "nobody@example.com"})),
    )
    .await;

    assert_eq!(unknown_code.status, StatusCode::NOT_FOUND);
    assert!(unknown_code.error().contains("MSG-1-NOPE00000"));
    assert_eq!(unknown_lead.status, StatusCode::NOT_FOUND);
    assert!(unknown_lead.error().contains("nobody@example.com"));
    assert_eq!(env.recipients().await[0].delivery_status, RecipientStatus::Sent);
}

#[tokio::test]
async fn malformed_callbacks_are_bad_requests() {
    let env = TestEnv::new().await;
    let app = app(&env);

    let missing_code = call(
        &app,
        Method::POST,
        "/api/callbacks/message-delivery",
        Some(json!({"lead_identifier": "5582999999999"})),
    )
    .await;
    let bad_status = call(
        &app,
        Method::POST,
        "/api/callbacks/message-delivery",
        Some(json!({"delivery_code": "MSG-1-X", "lead_identifier": "a", "status": "read"})),
    )
    .await;
    let not_json = call_raw(&app, Method::POST, "/api/callbacks/message-delivery", "delivered").await;

    assert_eq!(missing_code.status, StatusCode::BAD_REQUEST);
    assert!(missing_code.error().contains("delivery_code"), "{}", missing_code.error());
    assert_eq!(bad_status.status, StatusCode::BAD_REQUEST);
    assert_eq!(not_json.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn callbacks_accept_post_only() {
    let env = TestEnv::new().await;
    let app = app(&env);

    for uri in ["/api/callbacks/message-delivery", "/api/callbacks/whatsapp-validation"] {
        let reply = call(&app, Method::GET, uri, None).await;
        assert_eq!(reply.status, StatusCode::METHOD_NOT_ALLOWED, "{uri}");
    }
    let put = call(&app, Method::PUT, "/api/messages/send", Some(json!({}))).await;
    assert_eq!(put.status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn preflight_is_answered_with_permissive_cors() {
    let env = TestEnv::new().await;
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/callbacks/message-delivery")
        .header("origin", "https://relay.example.com")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "content-type")
        .body(Body::empty())
        .unwrap();

    let reply = send(&app(&env), request).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.headers.get("access-control-allow-origin").unwrap(), "*");
    assert!(reply.headers.contains_key("access-control-allow-methods"));
}

#[tokio::test]
async fn validation_callback_resolves_the_pending_row() {
    let env = TestEnv::new().await;
    env.configure_validation_relay().await;
    env.mock_relay(VALIDATION_RELAY_PATH, 200, "ok").await;
    let app = app(&env);
    let id = ValidationId::new();

    let requested = call(
        &app,
        Method::POST,
        "/api/whatsapp-validations",
        Some(json!({"id": id.to_string(), "whatsapp": "82 99999-1234"})),
    )
    .await;
    assert_eq!(requested.status, StatusCode::ACCEPTED);

    let body = json!({"validation_id": id.to_string(), "status": "valid", "message": "on whatsapp"});
    let first = call(&app, Method::POST, "/api/callbacks/whatsapp-validation", Some(body.clone())).await;
    let replay = call(&app, Method::POST, "/api/callbacks/whatsapp-validation", Some(body)).await;

    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.data()["updated"], true);
    assert_eq!(replay.data()["updated"], false);

    let polled = call(&app, Method::GET, &format!("/api/whatsapp-validations/{id}"), None).await;
    assert_eq!(polled.data()["status"], "valid");
    assert_eq!(polled.data()["response_message"], "on whatsapp");

    let flipped = call(
        &app,
        Method::POST,
        "/api/callbacks/whatsapp-validation",
        Some(json!({"validation_id": id.to_string(), "status": "invalid"})),
    )
    .await;
    assert_eq!(flipped.status, StatusCode::CONFLICT);
}
