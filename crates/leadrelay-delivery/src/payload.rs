//! Wire contracts for outbound POSTs.
//!
//! The dispatch payload advertises the callback URLs so any relay can close
//! the loop without out-of-band configuration. `callback_url` is kept as an
//! alias of `callback_urls.message_delivery` for relays built against the
//! older single-URL shape.

use chrono::{DateTime, Utc};
use leadrelay_core::{FilterType, Lead, LeadId, MessageId, MessageKind, ValidationId};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DeliveryError, Result};

/// Path of the delivery confirmation endpoint.
pub const MESSAGE_DELIVERY_CALLBACK_PATH: &str = "/api/callbacks/message-delivery";
/// Path of the phone validation callback endpoint.
pub const WHATSAPP_VALIDATION_CALLBACK_PATH: &str = "/api/callbacks/whatsapp-validation";

/// Where the relay should report back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackUrls {
    /// Delivery confirmation endpoint.
    pub message_delivery: String,
    /// Phone validation callback endpoint.
    pub whatsapp_validation: String,
}

impl CallbackUrls {
    /// Builds both callback URLs under the public base URL, keeping any
    /// path prefix it carries.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the base URL cannot carry a path.
    pub fn from_base(base: &Url) -> Result<Self> {
        let join = |path: &str| {
            join_under(base, path).map(String::from).map_err(|e| {
                DeliveryError::configuration(format!(
                    "public base url '{base}' cannot join {path}: {e}"
                ))
            })
        };
        Ok(Self {
            message_delivery: join(MESSAGE_DELIVERY_CALLBACK_PATH)?,
            whatsapp_validation: join(WHATSAPP_VALIDATION_CALLBACK_PATH)?,
        })
    }
}

/// Resolves `path` below `base`. A service mounted at `https://host/crm`
/// keeps its `/crm` prefix whether or not the base ends with a slash.
pub(crate) fn join_under(base: &Url, path: &str) -> std::result::Result<Url, url::ParseError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let directory = format!("{}/", base.path());
        base.set_path(&directory);
    }
    base.join(path.trim_start_matches('/'))
}

/// One recipient as seen by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadLead {
    /// Lead id.
    pub id: LeadId,
    /// Contact name.
    pub name: String,
    /// Email address.
    pub email: Option<String>,
    /// WhatsApp number.
    pub whatsapp: Option<String>,
    /// Course or postgraduate course name.
    pub course: Option<String>,
    /// Event name.
    pub event: Option<String>,
    /// Status name.
    pub status: Option<String>,
    /// Status display color.
    pub status_color: Option<String>,
}

impl From<&Lead> for PayloadLead {
    fn from(lead: &Lead) -> Self {
        Self {
            id: lead.id,
            name: lead.name.clone(),
            email: lead.email.clone(),
            whatsapp: lead.whatsapp.clone(),
            course: lead.course_name.clone(),
            event: lead.event_name.clone(),
            status: lead.status_name.clone(),
            status_color: lead.status_color.clone(),
        }
    }
}

/// Body POSTed to the relay for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchPayload {
    /// Ledger entry id.
    pub message_id: MessageId,
    /// Correlation token for delivery callbacks.
    pub delivery_code: String,
    /// Channel.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Message body.
    pub content: String,
    /// How recipients were selected.
    pub filter_type: FilterType,
    /// Filter argument.
    pub filter_value: Option<String>,
    /// Whether previously contacted leads were excluded.
    pub send_only_to_new: bool,
    /// Number of entries in `leads`.
    pub total_recipients: usize,
    /// Recipients.
    pub leads: Vec<PayloadLead>,
    /// When the payload was built.
    pub timestamp: DateTime<Utc>,
    /// Callback endpoints.
    pub callback_urls: CallbackUrls,
    /// Alias of `callback_urls.message_delivery`.
    pub callback_url: String,
}

/// Everything about a dispatch except its ledger identity.
#[derive(Debug, Clone)]
pub struct DispatchSpec<'a> {
    /// Channel.
    pub kind: MessageKind,
    /// Message body.
    pub content: &'a str,
    /// How recipients were selected.
    pub filter_type: FilterType,
    /// Filter argument.
    pub filter_value: Option<&'a str>,
    /// Whether previously contacted leads were excluded.
    pub send_only_to_new: bool,
}

impl DispatchPayload {
    /// Builds the payload for an opened ledger entry.
    pub fn build(
        message_id: MessageId,
        delivery_code: &str,
        spec: &DispatchSpec<'_>,
        recipients: &[Lead],
        callbacks: &CallbackUrls,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id,
            delivery_code: delivery_code.to_string(),
            kind: spec.kind,
            content: spec.content.to_string(),
            filter_type: spec.filter_type,
            filter_value: spec.filter_value.map(ToString::to_string),
            send_only_to_new: spec.send_only_to_new,
            total_recipients: recipients.len(),
            leads: recipients.iter().map(PayloadLead::from).collect(),
            timestamp,
            callback_url: callbacks.message_delivery.clone(),
            callback_urls: callbacks.clone(),
        }
    }
}

/// Body POSTed to the phone validation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRequestPayload {
    /// Normalized phone number.
    pub whatsapp: String,
    /// Correlation id.
    pub validation_id: ValidationId,
    /// Where the service reports the outcome.
    pub callback_url: String,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::Value;

    use super::*;

    fn lead() -> Lead {
        Lead {
            id: LeadId::new(),
            name: "Ana".into(),
            whatsapp: Some("5582999999999".into()),
            email: Some("ana@example.com".into()),
            course_id: None,
            postgraduate_course_id: None,
            event_id: None,
            status_id: None,
            course_name: Some("Nursing".into()),
            event_name: Some("Open Day".into()),
            status_name: Some("New".into()),
            status_color: Some("#3366ff".into()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn callback_urls_join_public_base() {
        let base = Url::parse("https://crm.example.com/").unwrap();
        let urls = CallbackUrls::from_base(&base).unwrap();
        assert_eq!(urls.message_delivery, "https://crm.example.com/api/callbacks/message-delivery");
        assert_eq!(
            urls.whatsapp_validation,
            "https://crm.example.com/api/callbacks/whatsapp-validation"
        );
    }

    #[test]
    fn callback_urls_keep_a_path_prefix() {
        for raw in ["https://host.example.com/crm/", "https://host.example.com/crm"] {
            let urls = CallbackUrls::from_base(&Url::parse(raw).unwrap()).unwrap();
            assert_eq!(
                urls.message_delivery,
                "https://host.example.com/crm/api/callbacks/message-delivery",
                "{raw}"
            );
            assert_eq!(
                urls.whatsapp_validation,
                "https://host.example.com/crm/api/callbacks/whatsapp-validation",
                "{raw}"
            );
        }
    }

    #[test]
    fn payload_matches_relay_contract() {
        let base = Url::parse("https://crm.example.com").unwrap();
        let callbacks = CallbackUrls::from_base(&base).unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        let spec = DispatchSpec {
            kind: MessageKind::Whatsapp,
            content: "Olá {name}",
            filter_type: FilterType::AutoNewLead,
            filter_value: Some("lead-1"),
            send_only_to_new: false,
        };
        let payload =
            DispatchPayload::build(MessageId::new(), "AUTO-1-ABCDEFGHI", &spec, &[lead()], &callbacks, at);

        let json: Value = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "whatsapp");
        assert_eq!(json["filter_type"], "auto_new_lead");
        assert_eq!(json["total_recipients"], 1);
        assert_eq!(json["timestamp"], "2026-03-01T09:30:00Z");
        assert_eq!(json["callback_url"], json["callback_urls"]["message_delivery"]);
        assert_eq!(json["leads"][0]["course"], "Nursing");
        assert_eq!(json["leads"][0]["status_color"], "#3366ff");
        assert!(json["leads"][0].get("course_name").is_none());
    }
}
