//! Automatic sends on lead capture and on conversion.
//!
//! Each trigger is a guarded pipeline: the first unmet precondition ends it
//! with a `skipped` report. Nothing here returns an error; the lead write
//! that raised the event has already committed and its response only carries
//! the report.

use std::sync::Arc;

use async_trait::async_trait;
use leadrelay_core::{
    AutoSendReport, DefaultSlot, FilterType, Lead, LeadEvent, LeadEventHandler, MessageKind,
    MessageTemplate, MessagingStorage, SettingsService, StatusId, SystemSettings,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    dispatcher::{MessageDispatcher, SendRequest, SendResult},
    error::DeliveryError,
    ledger::CodePrefix,
    resolver::RecipientFilter,
};

/// Post-commit handler running the new-lead and conversion sends.
#[derive(Debug, Clone)]
pub struct AutoSendTriggers {
    settings: SettingsService,
    storage: Arc<dyn MessagingStorage>,
    dispatcher: MessageDispatcher,
}

impl AutoSendTriggers {
    /// Creates the trigger layer.
    pub fn new(
        settings: SettingsService,
        storage: Arc<dyn MessagingStorage>,
        dispatcher: MessageDispatcher,
    ) -> Self {
        Self { settings, storage, dispatcher }
    }

    /// Sends the default template to a freshly captured lead.
    pub async fn on_lead_created(&self, lead: &Lead) -> AutoSendReport {
        let settings = match self.load_settings().await {
            Ok(settings) => settings,
            Err(report) => return report,
        };
        if !settings.is_auto_send_enabled() {
            return skip(lead, "automatic messages are disabled");
        }
        let Some(url) = settings.webhook_url(MessageKind::Whatsapp) else {
            return skip(lead, "whatsapp webhook URL is not configured");
        };
        let template = match self.template(DefaultSlot::NewLead).await {
            Ok(Some(template)) => template,
            Ok(None) => return skip(lead, "no default template is set"),
            Err(report) => return report,
        };

        self.send(lead, &template, &url, FilterType::AutoNewLead, CodePrefix::NewLead).await
    }

    /// Sends the conversion template when a lead enters the conversion
    /// status.
    pub async fn on_status_changed(
        &self,
        lead: &Lead,
        previous_status_id: Option<StatusId>,
    ) -> AutoSendReport {
        if previous_status_id == lead.status_id {
            return skip(lead, "status did not change");
        }

        let settings = match self.load_settings().await {
            Ok(settings) => settings,
            Err(report) => return report,
        };
        if !settings.is_conversion_send_enabled() {
            return skip(lead, "conversion messages are disabled");
        }
        match (settings.conversion_status_id(), lead.status_id) {
            (Some(target), Some(current)) if target == current => {},
            (None, _) => return skip(lead, "conversion status is not configured"),
            _ => return skip(lead, "new status is not the conversion status"),
        }
        let template = match self.template(DefaultSlot::Conversion).await {
            Ok(Some(template)) => template,
            Ok(None) => return skip(lead, "no conversion template is set"),
            Err(report) => return report,
        };
        if !lead.has_whatsapp() {
            return skip(lead, "lead has no whatsapp number");
        }
        let Some(url) = settings.webhook_url(MessageKind::Whatsapp) else {
            return skip(lead, "whatsapp webhook URL is not configured");
        };

        self.send(lead, &template, &url, FilterType::AutomaticConversion, CodePrefix::Conversion)
            .await
    }

    async fn load_settings(&self) -> Result<SystemSettings, AutoSendReport> {
        self.settings.load().await.map_err(|e| {
            warn!(error = %e, "system settings unreadable, automatic send aborted");
            AutoSendReport::failed(format!("system settings unreadable: {e}"))
        })
    }

    async fn template(&self, slot: DefaultSlot) -> Result<Option<MessageTemplate>, AutoSendReport> {
        self.storage.find_default_template(slot).await.map_err(|e| {
            warn!(error = %e, slot = slot.column(), "default template lookup failed");
            AutoSendReport::failed(format!("template lookup failed: {e}"))
        })
    }

    async fn send(
        &self,
        lead: &Lead,
        template: &MessageTemplate,
        url: &Url,
        filter_type: FilterType,
        prefix: CodePrefix,
    ) -> AutoSendReport {
        let request = SendRequest {
            kind: MessageKind::Whatsapp,
            content: &template.content,
            filter: RecipientFilter::Single { lead_id: lead.id, filter_type },
            send_only_to_new: false,
            webhook_url: url.as_str(),
            prefix,
        };

        match self.dispatcher.send(&request).await {
            Ok(SendResult::Dispatched(report)) if report.is_sent() => {
                info!(
                    lead_id = %lead.id,
                    message_id = %report.message_id,
                    delivery_code = %report.delivery_code,
                    %filter_type,
                    "automatic message sent"
                );
                AutoSendReport::sent(report.message_id, report.delivery_code)
            },
            Ok(SendResult::Dispatched(report)) => {
                warn!(
                    lead_id = %lead.id,
                    message_id = %report.message_id,
                    %filter_type,
                    "automatic message not accepted by relay"
                );
                AutoSendReport::failed(format!("relay did not accept the message: {}", report.webhook_response))
                    .with_message(report.message_id, report.delivery_code)
            },
            Ok(SendResult::NoRecipients) => skip(lead, "lead is not eligible for this channel"),
            Err(DeliveryError::InvalidRecipient { message }) => skip(lead, &message),
            Err(e) => {
                warn!(lead_id = %lead.id, error = %e, %filter_type, "automatic send failed");
                AutoSendReport::failed(e.to_string())
            },
        }
    }
}

fn skip(lead: &Lead, reason: &str) -> AutoSendReport {
    debug!(lead_id = %lead.id, reason, "automatic send skipped");
    AutoSendReport::skipped(reason)
}

#[async_trait]
impl LeadEventHandler for AutoSendTriggers {
    async fn handle_event(&self, event: LeadEvent) -> AutoSendReport {
        match event {
            LeadEvent::Created { lead } => self.on_lead_created(&lead).await,
            LeadEvent::StatusChanged { lead, previous_status_id } => {
                self.on_status_changed(&lead, previous_status_id).await
            },
        }
    }
}
