//! Inbound callbacks from the relay and the validation service.
//!
//! Both endpoints take the raw body so that a malformed payload is answered
//! with the failure envelope. Replays are safe: the receivers rewrite the
//! same values or report `updated: false`.

use axum::{body::Bytes, extract::State, http::StatusCode};
use tracing::{info, instrument};

use super::{success, ApiResult};
use crate::AppState;

/// `POST /api/callbacks/message-delivery`.
#[instrument(name = "message_delivery_callback", skip(state, body), fields(body_size = body.len()))]
pub async fn message_delivery_callback(State(state): State<AppState>, body: Bytes) -> ApiResult {
    let ack = state.callbacks.handle_body(&body).await?;
    info!(
        delivery_code = %ack.delivery_code,
        status = %ack.status,
        updated = ack.updated_recipients,
        "delivery callback applied"
    );
    Ok(success(StatusCode::OK, ack))
}

/// `POST /api/callbacks/whatsapp-validation`.
#[instrument(name = "whatsapp_validation_callback", skip(state, body), fields(body_size = body.len()))]
pub async fn whatsapp_validation_callback(State(state): State<AppState>, body: Bytes) -> ApiResult {
    let ack = state.validations.callback_body(&body).await?;
    info!(
        validation_id = %ack.validation_id,
        status = %ack.status,
        updated = ack.updated,
        "validation callback applied"
    );
    Ok(success(StatusCode::OK, ack))
}
