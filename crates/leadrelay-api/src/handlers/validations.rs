//! Phone validation request and poll target.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use leadrelay_core::ValidationId;
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use super::{parse_body, success, ApiResult};
use crate::AppState;

/// Body of `POST /api/whatsapp-validations`.
#[derive(Debug, Deserialize)]
pub struct ValidationRequest {
    /// Caller-chosen id to poll with; generated when absent.
    #[serde(default, alias = "validation_id")]
    pub id: Option<ValidationId>,
    /// Number to validate, in any punctuation.
    pub whatsapp: String,
}

/// Opens a pending validation and forwards it to the validation service.
#[instrument(name = "request_validation", skip(state, body), fields(validation_id))]
pub async fn request_validation(State(state): State<AppState>, body: Bytes) -> ApiResult {
    let request: ValidationRequest = parse_body(&body)?;
    let id = request.id.unwrap_or_default();
    tracing::Span::current().record("validation_id", tracing::field::display(id));

    let row = state.validations.request(id, &request.whatsapp).await?;

    Ok(success(StatusCode::ACCEPTED, row))
}

/// Current state of a validation.
#[instrument(name = "get_validation", skip(state))]
pub async fn get_validation(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult {
    let row = state.validations.status(ValidationId(id)).await?;
    Ok(success(StatusCode::OK, row))
}
