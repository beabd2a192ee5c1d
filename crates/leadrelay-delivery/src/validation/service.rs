use std::sync::Arc;

use leadrelay_core::{
    Clock, MessagingStorage, SettingsService, ValidationId, ValidationStatus, WhatsAppValidation,
};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::normalize_phone;
use crate::{
    client::WebhookClient,
    dispatcher::{describe_rejection, timeout_marker},
    error::{DeliveryError, Result},
    payload::ValidationRequestPayload,
};

#[derive(Debug, Deserialize)]
struct RawValidationCallback {
    validation_id: Option<String>,
    status: Option<String>,
    #[serde(alias = "message")]
    response_message: Option<String>,
}

/// A validated callback from the validation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationCallback {
    /// Correlation id.
    pub validation_id: ValidationId,
    /// Terminal status.
    pub status: ValidationStatus,
    /// Explanation from the service.
    pub response_message: Option<String>,
}

impl ValidationCallback {
    /// Parses and validates a callback body.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for malformed JSON, a missing or malformed id, or
    /// a status that is not `valid`, `invalid` or `error`.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let raw: RawValidationCallback = serde_json::from_slice(body)
            .map_err(|e| DeliveryError::bad_request(format!("invalid callback body: {e}")))?;

        let id = raw
            .validation_id
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| DeliveryError::bad_request("validation_id is required"))?;
        let validation_id = Uuid::parse_str(id)
            .map(ValidationId)
            .map_err(|e| DeliveryError::bad_request(format!("validation_id '{id}' is malformed: {e}")))?;

        let raw_status = raw
            .status
            .as_deref()
            .map(str::trim)
            .ok_or_else(|| DeliveryError::bad_request("status is required"))?;
        let status = raw_status
            .parse::<ValidationStatus>()
            .ok()
            .filter(ValidationStatus::is_terminal)
            .ok_or_else(|| {
                DeliveryError::bad_request(format!(
                    "status '{raw_status}' is not one of valid, invalid, error"
                ))
            })?;

        Ok(Self { validation_id, status, response_message: raw.response_message })
    }
}

/// Response data for an accepted validation callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationAck {
    /// Correlation id.
    pub validation_id: ValidationId,
    /// Status of the row after the callback.
    pub status: ValidationStatus,
    /// False when the callback replayed an already applied status.
    pub updated: bool,
}

/// Server side of phone validation.
#[derive(Debug, Clone)]
pub struct ValidationService {
    storage: Arc<dyn MessagingStorage>,
    settings: SettingsService,
    client: WebhookClient,
    callback_url: String,
    clock: Arc<dyn Clock>,
}

impl ValidationService {
    /// Creates the service; `callback_url` is advertised to the validation
    /// service.
    pub fn new(
        storage: Arc<dyn MessagingStorage>,
        settings: SettingsService,
        client: WebhookClient,
        callback_url: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { storage, settings, client, callback_url: callback_url.into(), clock }
    }

    /// Records a pending validation and forwards it to the validation
    /// service.
    ///
    /// Nothing is written when the number is malformed or the validation
    /// webhook is not configured. When the forward fails the row is moved to
    /// `error` with the diagnostic text.
    ///
    /// # Errors
    ///
    /// - `InvalidFormat` for a number that is not 11 digits
    /// - `Configuration` when no validation webhook is configured
    /// - `Conflict` when `id` was already used
    /// - `RelayRejected`, `Timeout` or `NetworkError` when the forward fails
    pub async fn request(&self, id: ValidationId, raw_phone: &str) -> Result<WhatsAppValidation> {
        let whatsapp = normalize_phone(raw_phone)?;
        let settings = self.settings.load().await?;
        let url = settings.validation_webhook_url().ok_or_else(|| {
            DeliveryError::configuration("whatsapp validation webhook URL is not configured")
        })?;

        let row = WhatsAppValidation {
            id,
            whatsapp: whatsapp.clone(),
            status: ValidationStatus::Pending,
            response_message: None,
            created_at: self.clock.now_utc(),
            validated_at: None,
        };
        self.storage.create_validation(&row).await?;

        let payload = ValidationRequestPayload {
            whatsapp,
            validation_id: id,
            callback_url: self.callback_url.clone(),
        };

        let span = info_span!("validation_request", validation_id = %id);
        async move {
            let failure = match self.client.post_json(url.as_str(), &payload).await {
                Ok(response) if response.is_success() => {
                    info!("validation request forwarded");
                    return Ok(row);
                },
                Ok(response) => (
                    describe_rejection(response.status_code, &response.body),
                    DeliveryError::relay_rejected(response.status_code, response.body),
                ),
                Err(DeliveryError::Timeout { timeout_seconds }) => {
                    (timeout_marker(timeout_seconds), DeliveryError::timeout(timeout_seconds))
                },
                Err(e) => (e.to_string(), e),
            };

            let (text, error) = failure;
            warn!(error = %error, "validation request failed");
            if let Err(e) = self
                .storage
                .resolve_validation(id, ValidationStatus::Error, Some(&text), self.clock.now_utc())
                .await
            {
                warn!(error = %e, "failed to record validation error");
            }
            Err(error)
        }
        .instrument(span)
        .await
    }

    /// Parses `body` and applies it.
    ///
    /// # Errors
    ///
    /// See [`ValidationCallback::from_slice`] and [`callback`](Self::callback).
    pub async fn callback_body(&self, body: &[u8]) -> Result<ValidationAck> {
        let callback = ValidationCallback::from_slice(body)?;
        self.callback(&callback).await
    }

    /// Moves a pending validation to the reported terminal status.
    ///
    /// Replaying the status a row already has is accepted without writing.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown id
    /// - `Conflict` when the row already holds a different terminal status
    pub async fn callback(&self, callback: &ValidationCallback) -> Result<ValidationAck> {
        let id = callback.validation_id;
        let updated = self
            .storage
            .resolve_validation(
                id,
                callback.status,
                callback.response_message.as_deref(),
                self.clock.now_utc(),
            )
            .await?;

        if updated {
            info!(validation_id = %id, status = %callback.status, "validation resolved");
            return Ok(ValidationAck { validation_id: id, status: callback.status, updated });
        }

        let current = self.status(id).await?;
        if current.status == callback.status {
            Ok(ValidationAck { validation_id: id, status: current.status, updated: false })
        } else {
            Err(DeliveryError::conflict(format!(
                "validation {id} is already {}, cannot become {}",
                current.status, callback.status
            )))
        }
    }

    /// Current row for a validation id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id.
    pub async fn status(&self, id: ValidationId) -> Result<WhatsAppValidation> {
        self.storage
            .find_validation(id)
            .await?
            .ok_or_else(|| DeliveryError::not_found(format!("validation {id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_requires_terminal_status() {
        let id = Uuid::new_v4();
        let body = format!(r#"{{"validation_id":"{id}","status":"pending"}}"#);
        assert!(matches!(
            ValidationCallback::from_slice(body.as_bytes()),
            Err(DeliveryError::BadRequest { .. })
        ));

        let body = format!(r#"{{"validation_id":"{id}","status":"valid","message":"on whatsapp"}}"#);
        let cb = ValidationCallback::from_slice(body.as_bytes()).unwrap();
        assert_eq!(cb.status, ValidationStatus::Valid);
        assert_eq!(cb.response_message.as_deref(), Some("on whatsapp"));
    }

    #[test]
    fn callback_requires_well_formed_id() {
        for body in [
            &br#"{"status":"valid"}"#[..],
            br#"{"validation_id":"nope","status":"valid"}"#,
            br#"{"validation_id":"#,
        ] {
            assert!(matches!(
                ValidationCallback::from_slice(body),
                Err(DeliveryError::BadRequest { .. })
            ));
        }
    }
}
