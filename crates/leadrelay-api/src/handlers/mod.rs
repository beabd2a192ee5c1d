//! HTTP request handlers for the LeadRelay API.
//!
//! Every JSON endpoint answers with the same envelope:
//!
//! ```text
//! 2xx  { "success": true,  "data": { ... } }
//! 4xx  { "success": false, "error": "..." }
//! 5xx  { "success": false, "error": "..." }
//! ```
//!
//! Health probes are the exception and keep their own shape so orchestrators
//! can read them without unwrapping.

pub mod callbacks;
pub mod health;
pub mod leads;
pub mod messages;
pub mod settings;
pub mod templates;
pub mod validations;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use leadrelay_core::CoreError;
use leadrelay_delivery::{DeliveryError, ErrorCategory};
use serde::Serialize;
use serde_json::json;
use tracing::{error, warn};

pub use callbacks::{message_delivery_callback, whatsapp_validation_callback};
pub use health::{health_check, liveness_check, readiness_check};
pub use leads::{create_lead, update_lead_status};
pub use messages::{get_message, send_message};
pub use settings::{get_settings, update_settings};
pub use templates::{set_conversion_default_template, set_default_template};
pub use validations::{get_validation, request_validation};

/// Error rendered as the failure envelope.
#[derive(Debug, Clone)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Creates an error with an explicit status.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    /// 400 with `message`.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// HTTP status the error is reported with.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Operator-facing message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<DeliveryError> for ApiError {
    fn from(err: DeliveryError) -> Self {
        let status = StatusCode::from_u16(err.status_class().as_u16())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        match ErrorCategory::from(&err) {
            ErrorCategory::Storage => error!(error = %err, "request failed on storage"),
            category => warn!(error = %err, ?category, "request rejected"),
        }

        Self::new(status, err.to_string())
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        DeliveryError::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "success": false, "error": self.message }))).into_response()
    }
}

/// Result type for handlers.
pub type ApiResult = Result<Response, ApiError>;

/// Wraps `data` in the success envelope.
pub fn success<T: Serialize>(status: StatusCode, data: T) -> Response {
    (status, Json(json!({ "success": true, "data": data }))).into_response()
}

/// Parses a JSON body into `T`, reporting failures as 400.
///
/// Handlers take raw bytes instead of `Json<T>` so malformed bodies get the
/// failure envelope rather than axum's plain-text rejection.
pub(crate) fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))
}
