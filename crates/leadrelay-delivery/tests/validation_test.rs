//! Integration tests for WhatsApp number validation.

use std::{sync::Arc, time::Duration};

use leadrelay_core::{ValidationId, ValidationStatus};
use leadrelay_delivery::{
    DeliveryError, HttpStatusSource, PollOutcome, StorageStatusSource, ValidationPoller,
};
use leadrelay_testing::{TestEnv, VALIDATION_RELAY_PATH};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::{matchers, Mock, ResponseTemplate};

async fn validation_env() -> TestEnv {
    let env = TestEnv::new().await;
    env.configure_validation_relay().await;
    env
}

#[tokio::test]
async fn request_records_pending_row_and_forwards_normalized_number() {
    let env = validation_env().await;
    env.mock_relay(VALIDATION_RELAY_PATH, 202, "").await;
    let id = ValidationId::new();

    let row = env.validation_service().request(id, "(82) 99999-1234").await.unwrap();

    assert_eq!(row.status, ValidationStatus::Pending);
    assert_eq!(row.whatsapp, "82999991234");

    let requests = env.relay_requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0],
        json!({
            "whatsapp": "82999991234",
            "validation_id": id.to_string(),
            "callback_url": "http://leadrelay.test/api/callbacks/whatsapp-validation",
        })
    );
}

#[tokio::test]
async fn malformed_number_is_rejected_locally() {
    let env = validation_env().await;
    let id = ValidationId::new();

    let err = env.validation_service().request(id, "99999-1234").await.unwrap_err();

    assert!(matches!(err, DeliveryError::InvalidFormat { .. }), "{err:?}");
    assert!(env.relay_requests().await.is_empty());
    assert!(matches!(
        env.validation_service().status(id).await,
        Err(DeliveryError::NotFound { .. })
    ));
}

#[tokio::test]
async fn unconfigured_validation_webhook_is_a_configuration_error() {
    let env = TestEnv::new().await;

    let err = env.validation_service().request(ValidationId::new(), "82999991234").await.unwrap_err();

    assert!(matches!(err, DeliveryError::Configuration { .. }), "{err:?}");
}

#[tokio::test]
async fn reused_id_is_a_conflict() {
    let env = validation_env().await;
    env.mock_relay(VALIDATION_RELAY_PATH, 200, "ok").await;
    let service = env.validation_service();
    let id = ValidationId::new();

    service.request(id, "82999991234").await.unwrap();
    let err = service.request(id, "82988887777").await.unwrap_err();

    assert!(matches!(err, DeliveryError::Conflict { .. }), "{err:?}");
    assert_eq!(env.relay_requests().await.len(), 1);
    assert_eq!(service.status(id).await.unwrap().whatsapp, "82999991234");
}

#[tokio::test]
async fn failed_forward_moves_row_to_error() {
    let env = validation_env().await;
    env.mock_relay(VALIDATION_RELAY_PATH, 500, "validator down").await;
    let service = env.validation_service();
    let id = ValidationId::new();

    let err = service.request(id, "82999991234").await.unwrap_err();

    assert!(matches!(err, DeliveryError::RelayRejected { status_code: 500, .. }), "{err:?}");
    let row = service.status(id).await.unwrap();
    assert_eq!(row.status, ValidationStatus::Error);
    assert!(row.response_message.unwrap_or_default().contains("validator down"));
    assert!(row.validated_at.is_some());
}

#[tokio::test]
async fn callback_resolves_and_replays_safely() {
    let env = validation_env().await;
    env.mock_relay(VALIDATION_RELAY_PATH, 200, "ok").await;
    let service = env.validation_service();
    let id = ValidationId::new();
    service.request(id, "82999991234").await.unwrap();

    let valid = json!({"validation_id": id.to_string(), "status": "valid", "message": "on whatsapp"});
    let body = serde_json::to_vec(&valid).unwrap();

    let first = service.callback_body(&body).await.unwrap();
    let replay = service.callback_body(&body).await.unwrap();

    assert!(first.updated);
    assert!(!replay.updated);
    assert_eq!(replay.status, ValidationStatus::Valid);
    let row = service.status(id).await.unwrap();
    assert_eq!(row.response_message.as_deref(), Some("on whatsapp"));

    let flip = json!({"validation_id": id.to_string(), "status": "invalid"});
    let err = service.callback_body(&serde_json::to_vec(&flip).unwrap()).await.unwrap_err();
    assert!(matches!(err, DeliveryError::Conflict { .. }), "{err:?}");
    assert_eq!(service.status(id).await.unwrap().status, ValidationStatus::Valid);
}

#[tokio::test]
async fn callback_for_unknown_id_is_not_found() {
    let env = validation_env().await;
    let body = json!({"validation_id": ValidationId::new().to_string(), "status": "valid"});

    let err = env
        .validation_service()
        .callback_body(&serde_json::to_vec(&body).unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, DeliveryError::NotFound { .. }), "{err:?}");
}

#[tokio::test]
async fn poller_reports_callback_outcome() {
    let env = validation_env().await;
    env.mock_relay(VALIDATION_RELAY_PATH, 200, "ok").await;
    let service = env.validation_service();
    let id = ValidationId::new();
    service.request(id, "82999991234").await.unwrap();

    let body = json!({"validation_id": id.to_string(), "status": "invalid"});
    service.callback_body(&serde_json::to_vec(&body).unwrap()).await.unwrap();

    let poller = ValidationPoller::new(
        Arc::new(StorageStatusSource::new(env.storage_dyn())),
        Arc::new(env.clock.clone()),
    );
    let outcome = poller.poll(id, &CancellationToken::new()).await.unwrap();

    assert_eq!(outcome, PollOutcome::Invalid { message: None });
}

#[tokio::test]
async fn exhausted_poll_leaves_row_pending() {
    let env = validation_env().await;
    env.mock_relay(VALIDATION_RELAY_PATH, 200, "ok").await;
    let service = env.validation_service();
    let id = ValidationId::new();
    service.request(id, "82999991234").await.unwrap();

    let poller = ValidationPoller::new(
        Arc::new(StorageStatusSource::new(env.storage_dyn())),
        Arc::new(env.clock.clone()),
    );
    let outcome = poller.poll(id, &CancellationToken::new()).await.unwrap();

    assert_eq!(outcome, PollOutcome::TimedOut { attempts: 60 });
    assert_eq!(service.status(id).await.unwrap().status, ValidationStatus::Pending);
}

#[tokio::test]
async fn poller_reads_status_over_http() {
    let env = TestEnv::new().await;
    let id = ValidationId::new();
    Mock::given(matchers::method("GET"))
        .and(matchers::path(format!("/api/whatsapp-validations/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "id": id.to_string(),
                "whatsapp": "82999991234",
                "status": "valid",
                "response_message": "on whatsapp",
            },
        })))
        .mount(&env.relay)
        .await;

    let source = HttpStatusSource::new(Url::parse(&env.relay.uri()).unwrap(), Duration::from_secs(5))
        .unwrap();
    let poller = ValidationPoller::new(Arc::new(source), Arc::new(env.clock.clone()));
    let outcome = poller.poll(id, &CancellationToken::new()).await.unwrap();

    assert_eq!(outcome, PollOutcome::Valid { message: Some("on whatsapp".into()) });
}

#[tokio::test]
async fn http_poll_of_unknown_id_fails_fast() {
    let env = TestEnv::new().await;
    Mock::given(matchers::method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "success": false,
            "error": "not found",
        })))
        .mount(&env.relay)
        .await;

    let source = HttpStatusSource::new(Url::parse(&env.relay.uri()).unwrap(), Duration::from_secs(5))
        .unwrap();
    let poller = ValidationPoller::new(Arc::new(source), Arc::new(env.clock.clone()))
        .with_max_attempts(5);
    let err = poller.poll(ValidationId::new(), &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, DeliveryError::NotFound { .. }), "{err:?}");
}
