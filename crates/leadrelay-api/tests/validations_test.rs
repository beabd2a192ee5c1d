//! Phone validation endpoints, including a poller reading the live API.

mod common;

use std::{future::IntoFuture, sync::Arc, time::Duration};

use http::{Method, StatusCode};
use leadrelay_core::ValidationId;
use leadrelay_delivery::{HttpStatusSource, PollOutcome, ValidationPoller};
use leadrelay_testing::{TestEnv, VALIDATION_RELAY_PATH};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use url::Url;

use common::{app, call};

async fn validation_env() -> TestEnv {
    let env = TestEnv::new().await;
    env.configure_validation_relay().await;
    env.mock_relay(VALIDATION_RELAY_PATH, 202, "").await;
    env
}

#[tokio::test]
async fn request_returns_the_pending_row() {
    let env = validation_env().await;
    let app = app(&env);

    let reply = call(
        &app,
        Method::POST,
        "/api/whatsapp-validations",
        Some(json!({"whatsapp": "(82) 99999-1234"})),
    )
    .await;

    assert_eq!(reply.status, StatusCode::ACCEPTED);
    assert_eq!(reply.data()["status"], "pending");
    assert_eq!(reply.data()["whatsapp"], "82999991234");

    let id = reply.data()["id"].as_str().unwrap();
    assert_eq!(env.relay_requests().await[0]["validation_id"], id);

    let polled = call(&app, Method::GET, &format!("/api/whatsapp-validations/{id}"), None).await;
    assert_eq!(polled.status, StatusCode::OK);
    assert_eq!(polled.data()["status"], "pending");
}

#[tokio::test]
async fn caller_chosen_id_is_honoured_and_reuse_conflicts() {
    let env = validation_env().await;
    let app = app(&env);
    let id = ValidationId::new();
    let body = json!({"validation_id": id.to_string(), "whatsapp": "82999991234"});

    let first = call(&app, Method::POST, "/api/whatsapp-validations", Some(body.clone())).await;
    let second = call(&app, Method::POST, "/api/whatsapp-validations", Some(body)).await;

    assert_eq!(first.data()["id"], id.to_string());
    assert_eq!(second.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn malformed_number_and_missing_config_are_bad_requests() {
    let env = TestEnv::new().await;
    let app = app(&env);

    let unconfigured = call(
        &app,
        Method::POST,
        "/api/whatsapp-validations",
        Some(json!({"whatsapp": "82999991234"})),
    )
    .await;
    assert_eq!(unconfigured.status, StatusCode::BAD_REQUEST);

    env.configure_validation_relay().await;
    let short =
        call(&app, Method::POST, "/api/whatsapp-validations", Some(json!({"whatsapp": "9999-1234"})))
            .await;
    assert_eq!(short.status, StatusCode::BAD_REQUEST);
    assert!(env.relay_requests().await.is_empty());
}

#[tokio::test]
async fn validation_service_outage_is_bad_gateway() {
    let env = TestEnv::new().await;
    env.configure_validation_relay().await;
    env.mock_relay(VALIDATION_RELAY_PATH, 503, "maintenance").await;

    let reply = call(
        &app(&env),
        Method::POST,
        "/api/whatsapp-validations",
        Some(json!({"whatsapp": "82999991234"})),
    )
    .await;

    assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn unknown_validation_is_not_found() {
    let env = TestEnv::new().await;

    let reply = call(
        &app(&env),
        Method::GET,
        &format!("/api/whatsapp-validations/{}", ValidationId::new()),
        None,
    )
    .await;

    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn http_poller_sees_callback_through_the_live_api() {
    let env = validation_env().await;
    let app = app(&env);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();
    let server = tokio::spawn(axum::serve(listener, app.clone()).into_future());

    let opened = call(
        &app,
        Method::POST,
        "/api/whatsapp-validations",
        Some(json!({"whatsapp": "82999991234"})),
    )
    .await;
    let id: ValidationId = serde_json::from_value(opened.data()["id"].clone()).unwrap();
    call(
        &app,
        Method::POST,
        "/api/callbacks/whatsapp-validation",
        Some(json!({
            "validation_id": id.to_string(),
            "status": "invalid",
            "message": "not on whatsapp",
        })),
    )
    .await;

    let source = HttpStatusSource::new(base, Duration::from_secs(5)).unwrap();
    let poller = ValidationPoller::new(Arc::new(source), Arc::new(env.clock.clone()));
    let outcome = poller.poll(id, &CancellationToken::new()).await.unwrap();

    assert_eq!(outcome, PollOutcome::Invalid { message: Some("not on whatsapp".into()) });
    server.abort();
}
