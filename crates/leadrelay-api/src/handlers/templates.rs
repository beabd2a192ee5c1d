//! Default template assignment.

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use leadrelay_core::{DefaultSlot, TemplateId};
use tracing::{info, instrument};
use uuid::Uuid;

use super::{success, ApiResult};
use crate::AppState;

/// Makes the template the new-lead default.
#[instrument(name = "set_default_template", skip(state))]
pub async fn set_default_template(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult {
    assign(&state, TemplateId(id), DefaultSlot::NewLead).await
}

/// Makes the template the conversion default.
#[instrument(name = "set_conversion_default_template", skip(state))]
pub async fn set_conversion_default_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult {
    assign(&state, TemplateId(id), DefaultSlot::Conversion).await
}

async fn assign(state: &AppState, id: TemplateId, slot: DefaultSlot) -> ApiResult {
    let template = state.storage.set_default_template(id, slot, state.clock.now_utc()).await?;
    info!(template_id = %id, ?slot, "default template assigned");
    Ok(success(StatusCode::OK, template))
}
