//! Inbound delivery confirmations from the relay.
//!
//! The delivery code is the only credential a callback carries: an unknown
//! code is rejected before anything else is looked up. Replays with the same
//! status rewrite the same values.

use std::sync::Arc;

use leadrelay_core::{Clock, Lead, MessageKind, MessagingStorage, RecipientStatus, RecipientUpdate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{DeliveryError, Result};

const DEFAULT_FAILURE_MESSAGE: &str = "delivery failed as reported by the relay";

#[derive(Debug, Deserialize)]
struct RawCallback {
    delivery_code: Option<String>,
    lead_identifier: Option<Value>,
    status: Option<String>,
    #[serde(alias = "error_message")]
    error: Option<String>,
}

/// A validated delivery confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryCallback {
    /// Correlation token from the dispatch payload.
    pub delivery_code: String,
    /// Email or whatsapp number of the recipient.
    pub lead_identifier: String,
    /// Reported status, `delivered` when omitted.
    pub status: RecipientStatus,
    /// Failure reason, kept only for `failed`.
    pub error_message: Option<String>,
}

impl DeliveryCallback {
    /// Parses and validates a callback body.
    ///
    /// A numeric `lead_identifier` is accepted and read as its decimal text,
    /// since relays commonly send phone numbers as JSON numbers.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for malformed JSON, a missing or blank
    /// `delivery_code` or `lead_identifier`, or an unknown status.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let raw: RawCallback = serde_json::from_slice(body)
            .map_err(|e| DeliveryError::bad_request(format!("invalid callback body: {e}")))?;

        let delivery_code = raw
            .delivery_code
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| DeliveryError::bad_request("delivery_code is required"))?;

        let lead_identifier = match raw.lead_identifier {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(DeliveryError::bad_request("lead_identifier is required")),
        };

        let status = match raw.status.as_deref().map(str::trim) {
            None | Some("") => RecipientStatus::Delivered,
            Some(s) => s.parse().map_err(|_| {
                DeliveryError::bad_request(format!(
                    "unknown status '{s}', expected pending, sent, delivered or failed"
                ))
            })?,
        };

        let error_message = match status {
            RecipientStatus::Failed => Some(
                raw.error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
            ),
            _ => None,
        };

        Ok(Self { delivery_code, lead_identifier, status, error_message })
    }
}

/// Response data for an accepted callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackAck {
    /// Correlation token.
    pub delivery_code: String,
    /// Identifier as received.
    pub lead_identifier: String,
    /// Name of the matched lead.
    pub lead_name: String,
    /// Status applied.
    pub status: RecipientStatus,
    /// Channel of the message.
    pub message_type: MessageKind,
    /// Recipient rows written.
    pub updated_recipients: u64,
}

/// Applies delivery confirmations to recipient rows.
#[derive(Debug, Clone)]
pub struct DeliveryCallbackReceiver {
    storage: Arc<dyn MessagingStorage>,
    clock: Arc<dyn Clock>,
}

impl DeliveryCallbackReceiver {
    /// Creates a receiver.
    pub fn new(storage: Arc<dyn MessagingStorage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Parses `body` and applies it.
    ///
    /// # Errors
    ///
    /// See [`DeliveryCallback::from_slice`] and [`handle`](Self::handle).
    pub async fn handle_body(&self, body: &[u8]) -> Result<CallbackAck> {
        let callback = DeliveryCallback::from_slice(body)?;
        self.handle(&callback).await
    }

    /// Applies a validated callback to the matching recipient row.
    ///
    /// # Errors
    ///
    /// - `InvalidDeliveryCode` if no message carries the code
    /// - `LeadNotFound` if no lead has the identifier as email or whatsapp
    /// - `Storage` if a lookup or the update fails
    pub async fn handle(&self, callback: &DeliveryCallback) -> Result<CallbackAck> {
        let message = self
            .storage
            .find_message_by_code(&callback.delivery_code)
            .await?
            .ok_or_else(|| {
                warn!(delivery_code = %callback.delivery_code, "callback for unknown delivery code");
                DeliveryError::InvalidDeliveryCode { code: callback.delivery_code.clone() }
            })?;

        let candidates = self.storage.find_leads_by_contact(&callback.lead_identifier).await?;
        if candidates.is_empty() {
            warn!(
                delivery_code = %callback.delivery_code,
                lead_identifier = %callback.lead_identifier,
                "callback for unknown lead"
            );
            return Err(DeliveryError::LeadNotFound {
                identifier: callback.lead_identifier.clone(),
            });
        }

        let recipients = self.storage.list_recipients(message.id).await?;
        let lead = pick_recipient(candidates, |lead| {
            recipients.iter().any(|r| r.lead_id == lead.id)
        });

        let update = RecipientUpdate {
            status: callback.status,
            at: self.clock.now_utc(),
            error_message: callback.error_message.clone(),
        };
        let updated = self.storage.update_recipient_status(message.id, lead.id, &update).await?;

        if updated == 0 {
            warn!(
                message_id = %message.id,
                lead_id = %lead.id,
                "lead matched the identifier but is not a recipient of this message"
            );
        } else {
            info!(
                message_id = %message.id,
                lead_id = %lead.id,
                status = %callback.status,
                "recipient status updated from callback"
            );
        }

        Ok(CallbackAck {
            delivery_code: callback.delivery_code.clone(),
            lead_identifier: callback.lead_identifier.clone(),
            lead_name: lead.name,
            status: callback.status,
            message_type: message.kind,
            updated_recipients: updated,
        })
    }
}

/// First lead that is a recipient, else the first match.
fn pick_recipient(mut candidates: Vec<Lead>, is_recipient: impl Fn(&Lead) -> bool) -> Lead {
    let index = candidates.iter().position(|l| is_recipient(l)).unwrap_or(0);
    if candidates.len() > 1 {
        debug!(matches = candidates.len(), index, "identifier matched several leads");
    }
    candidates.swap_remove(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_defaults_to_delivered() {
        let cb = DeliveryCallback::from_slice(br#"{"delivery_code":"MSG-1-A","lead_identifier":"ana@example.com"}"#)
            .unwrap();
        assert_eq!(cb.status, RecipientStatus::Delivered);
        assert_eq!(cb.error_message, None);
    }

    #[test]
    fn numeric_identifier_is_accepted() {
        let cb = DeliveryCallback::from_slice(br#"{"delivery_code":"MSG-1-A","lead_identifier":5582999999999}"#)
            .unwrap();
        assert_eq!(cb.lead_identifier, "5582999999999");
    }

    #[test]
    fn failed_status_always_carries_a_reason() {
        let cb = DeliveryCallback::from_slice(
            br#"{"delivery_code":"MSG-1-A","lead_identifier":"x","status":"failed"}"#,
        )
        .unwrap();
        assert_eq!(cb.error_message.as_deref(), Some(DEFAULT_FAILURE_MESSAGE));

        let cb = DeliveryCallback::from_slice(
            br#"{"delivery_code":"MSG-1-A","lead_identifier":"x","status":"failed","error":"blocked"}"#,
        )
        .unwrap();
        assert_eq!(cb.error_message.as_deref(), Some("blocked"));
    }

    #[test]
    fn error_text_dropped_for_non_failed_status() {
        let cb = DeliveryCallback::from_slice(
            br#"{"delivery_code":"MSG-1-A","lead_identifier":"x","status":"delivered","error":"stale"}"#,
        )
        .unwrap();
        assert_eq!(cb.error_message, None);
    }

    #[test]
    fn malformed_bodies_are_bad_requests() {
        for body in [
            &b"not json"[..],
            br#"{"lead_identifier":"x"}"#,
            br#"{"delivery_code":"  ","lead_identifier":"x"}"#,
            br#"{"delivery_code":"MSG-1-A"}"#,
            br#"{"delivery_code":"MSG-1-A","lead_identifier":"x","status":"read"}"#,
        ] {
            let err = DeliveryCallback::from_slice(body).unwrap_err();
            assert!(matches!(err, DeliveryError::BadRequest { .. }), "{err:?}");
        }
    }
}
