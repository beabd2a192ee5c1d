//! Manual sends and ledger inspection.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use leadrelay_core::{FilterType, MessageId, MessageKind};
use leadrelay_delivery::{CodePrefix, DeliveryError, RecipientFilter, SendRequest, SendResult};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{parse_body, success, ApiError, ApiResult};
use crate::AppState;

/// Body of `POST /api/messages/send`.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Channel.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Message text, sent verbatim.
    pub content: String,
    /// Recipient selection.
    pub filter_type: FilterType,
    /// Filter argument; required unless `filter_type` is `all`.
    #[serde(default)]
    pub filter_value: Option<String>,
    /// Skip leads that were ever contacted.
    #[serde(default)]
    pub send_only_to_new: bool,
}

/// Runs a manual send synchronously and reports its final ledger state.
///
/// A relay failure is still a 200: the ledger row was written and finalized,
/// and the diagnostic text is in the response for the operator.
#[instrument(
    name = "send_message",
    skip(state, body),
    fields(message_type, filter_type, delivery_code)
)]
pub async fn send_message(State(state): State<AppState>, body: Bytes) -> ApiResult {
    let request: SendMessageRequest = parse_body(&body)?;
    let span = tracing::Span::current();
    span.record("message_type", request.kind.as_str());
    span.record("filter_type", request.filter_type.as_str());

    if request.content.trim().is_empty() {
        return Err(ApiError::bad_request("content must not be empty"));
    }
    if matches!(request.filter_type, FilterType::AutoNewLead | FilterType::AutomaticConversion) {
        return Err(ApiError::bad_request(format!(
            "filter_type {} is reserved for automatic sends",
            request.filter_type
        )));
    }

    let filter = RecipientFilter::parse(request.filter_type, request.filter_value.as_deref())?;
    let settings = state.settings.load().await?;
    let webhook_url = settings.raw_webhook_url(request.kind).ok_or_else(|| {
        DeliveryError::configuration(format!("no webhook url configured for {}", request.kind))
    })?;

    let send = SendRequest {
        kind: request.kind,
        content: &request.content,
        filter,
        send_only_to_new: request.send_only_to_new,
        webhook_url,
        prefix: CodePrefix::Manual,
    };

    match state.dispatcher.send(&send).await? {
        SendResult::NoRecipients => {
            info!("manual send matched no recipients");
            Ok(success(StatusCode::OK, json!({ "outcome": "no_recipients", "recipients_count": 0 })))
        },
        SendResult::Dispatched(report) => {
            span.record("delivery_code", report.delivery_code.as_str());
            info!(status = %report.status, recipients = report.recipients_count, "manual send finished");
            let mut data = serde_json::to_value(&report)
                .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
            if let Some(object) = data.as_object_mut() {
                object.insert("outcome".into(), json!("dispatched"));
            }
            Ok(success(StatusCode::OK, data))
        },
    }
}

/// Returns a ledger entry with its recipient rows.
#[instrument(name = "get_message", skip(state))]
pub async fn get_message(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult {
    let id = MessageId(id);
    let message = state
        .storage
        .find_message(id)
        .await?
        .ok_or_else(|| DeliveryError::not_found(format!("message {id}")))?;
    let recipients = state.storage.list_recipients(id).await?;

    Ok(success(StatusCode::OK, json!({ "message": message, "recipients": recipients })))
}
