//! Lead capture and status updates.
//!
//! The write commits first; only then is the lead event handed to the
//! post-commit hook, whose report rides along in the response as
//! `auto_send_status`. A failed automatic send never fails the write.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use leadrelay_core::{LeadEvent, LeadId, NewLead, StatusId};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{parse_body, success, ApiError, ApiResult};
use crate::AppState;

/// Body of `PATCH /api/leads/{id}/status`.
#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    /// New status; `null` clears it.
    pub status_id: Option<StatusId>,
}

/// Captures a lead and runs the new-lead automatic send.
#[instrument(name = "create_lead", skip(state, body), fields(lead_id))]
pub async fn create_lead(State(state): State<AppState>, body: Bytes) -> ApiResult {
    let new_lead: NewLead = parse_body(&body)?;
    if new_lead.name.trim().is_empty() {
        return Err(ApiError::bad_request("name must not be empty"));
    }

    let id = LeadId::new();
    tracing::Span::current().record("lead_id", tracing::field::display(id));
    let lead = state.storage.insert_lead(id, &new_lead, state.clock.now_utc()).await?;
    info!("lead captured");

    let report = state.lead_events.handle_event(LeadEvent::Created { lead: lead.clone() }).await;

    Ok(success(StatusCode::CREATED, json!({ "lead": lead, "auto_send_status": report })))
}

/// Writes a lead's status and runs the conversion automatic send.
#[instrument(name = "update_lead_status", skip(state, body))]
pub async fn update_lead_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> ApiResult {
    let request: UpdateStatusRequest = parse_body(&body)?;

    let (previous_status_id, lead) =
        state.storage.update_lead_status(LeadId(id), request.status_id, state.clock.now_utc()).await?;
    info!(previous = ?previous_status_id, current = ?lead.status_id, "lead status written");

    let report = state
        .lead_events
        .handle_event(LeadEvent::StatusChanged { lead: lead.clone(), previous_status_id })
        .await;

    Ok(success(StatusCode::OK, json!({ "lead": lead, "auto_send_status": report })))
}
