//! In-memory storage for tests and local runs without PostgreSQL.
//!
//! Mirrors the guarded updates and unique keys of the SQL repositories so
//! tests observe the same conflicts. Supports injecting a failure into the
//! next write to exercise database-error paths.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::MessagingStorage;
use crate::{
    error::{CoreError, Result},
    models::{
        DefaultSlot, Lead, LeadFilter, LeadId, MessageHistory, MessageId, MessageRecipient,
        MessageStatus, MessageTemplate, NewLead, NewMessage, RecipientStatus, RecipientUpdate,
        SettingRow, StatusId, TemplateId, ValidationId, ValidationStatus, WhatsAppValidation,
    },
};

#[derive(Debug, Default)]
struct State {
    courses: HashMap<Uuid, String>,
    events: HashMap<Uuid, String>,
    statuses: HashMap<StatusId, (String, Option<String>)>,
    leads: Vec<Lead>,
    templates: Vec<MessageTemplate>,
    settings: BTreeMap<String, String>,
    messages: Vec<MessageHistory>,
    recipients: Vec<MessageRecipient>,
    validations: HashMap<ValidationId, WhatsAppValidation>,
}

impl State {
    fn labelled(&self, lead: &Lead) -> Lead {
        let mut lead = lead.clone();
        lead.course_name = lead
            .course_id
            .and_then(|id| self.courses.get(&id))
            .or_else(|| lead.postgraduate_course_id.and_then(|id| self.courses.get(&id)))
            .cloned();
        lead.event_name = lead.event_id.and_then(|id| self.events.get(&id)).cloned();
        let status = lead.status_id.and_then(|id| self.statuses.get(&id));
        lead.status_name = status.map(|(name, _)| name.clone());
        lead.status_color = status.and_then(|(_, color)| color.clone());
        lead
    }

    fn message_mut(&mut self, id: MessageId) -> Result<&mut MessageHistory> {
        self.messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| CoreError::NotFound(format!("message {id} not found")))
    }
}

/// Storage backed by in-process maps.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<RwLock<State>>,
    write_error: Arc<RwLock<Option<CoreError>>>,
    ping_error: Arc<RwLock<Option<CoreError>>>,
}

impl MemoryStorage {
    /// Creates empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a course (or postgraduate course) label.
    pub async fn add_course(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state.write().await.courses.insert(id, name.to_string());
        id
    }

    /// Registers an event label.
    pub async fn add_event(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state.write().await.events.insert(id, name.to_string());
        id
    }

    /// Registers a lead status.
    pub async fn add_status(&self, name: &str, color: Option<&str>) -> StatusId {
        let id = StatusId::new();
        self.state
            .write()
            .await
            .statuses
            .insert(id, (name.to_string(), color.map(ToString::to_string)));
        id
    }

    /// Makes the next write fail with `error`.
    pub async fn inject_write_error(&self, error: CoreError) {
        *self.write_error.write().await = Some(error);
    }

    /// Makes every health ping fail with `error` until cleared with `None`.
    pub async fn set_ping_error(&self, error: Option<CoreError>) {
        *self.ping_error.write().await = error;
    }

    /// Every ledger entry in creation order.
    pub async fn all_messages(&self) -> Vec<MessageHistory> {
        self.state.read().await.messages.clone()
    }

    /// Every recipient row in creation order.
    pub async fn all_recipients(&self) -> Vec<MessageRecipient> {
        self.state.read().await.recipients.clone()
    }

    /// Every template in insertion order.
    pub async fn all_templates(&self) -> Vec<MessageTemplate> {
        self.state.read().await.templates.clone()
    }

    async fn check_write(&self) -> Result<()> {
        match self.write_error.write().await.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MessagingStorage for MemoryStorage {
    async fn ping(&self) -> Result<()> {
        match self.ping_error.read().await.as_ref() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn find_lead(&self, id: LeadId) -> Result<Option<Lead>> {
        let state = self.state.read().await;
        Ok(state.leads.iter().find(|l| l.id == id).map(|l| state.labelled(l)))
    }

    async fn list_leads(&self, filter: LeadFilter, exclude_contacted: bool) -> Result<Vec<Lead>> {
        let state = self.state.read().await;
        let leads = state
            .leads
            .iter()
            .filter(|lead| match filter {
                LeadFilter::All => true,
                LeadFilter::Course(course_id) => lead.in_course(course_id),
                LeadFilter::Event(event_id) => lead.event_id == Some(event_id),
                LeadFilter::Status(status_id) => lead.status_id == Some(status_id),
            })
            .filter(|lead| {
                !exclude_contacted || !state.recipients.iter().any(|r| r.lead_id == lead.id)
            })
            .map(|lead| state.labelled(lead))
            .collect();
        Ok(leads)
    }

    async fn find_leads_by_contact(&self, identifier: &str) -> Result<Vec<Lead>> {
        let state = self.state.read().await;
        Ok(state
            .leads
            .iter()
            .filter(|l| l.matches_identifier(identifier))
            .map(|l| state.labelled(l))
            .collect())
    }

    async fn insert_lead(&self, id: LeadId, lead: &NewLead, now: DateTime<Utc>) -> Result<Lead> {
        self.check_write().await?;
        let mut state = self.state.write().await;

        if state.leads.iter().any(|l| l.id == id) {
            return Err(CoreError::ConstraintViolation(format!("lead {id} already exists")));
        }
        if let Some(status_id) = lead.status_id {
            if !state.statuses.contains_key(&status_id) {
                return Err(CoreError::ConstraintViolation(format!(
                    "status {status_id} does not exist"
                )));
            }
        }

        let row = Lead {
            id,
            name: lead.name.clone(),
            whatsapp: lead.whatsapp.clone(),
            email: lead.email.clone(),
            course_id: lead.course_id,
            postgraduate_course_id: lead.postgraduate_course_id,
            event_id: lead.event_id,
            status_id: lead.status_id,
            course_name: None,
            event_name: None,
            status_name: None,
            status_color: None,
            created_at: now,
            updated_at: now,
        };
        let labelled = state.labelled(&row);
        state.leads.push(row);
        Ok(labelled)
    }

    async fn update_lead_status(
        &self,
        id: LeadId,
        status_id: Option<StatusId>,
        now: DateTime<Utc>,
    ) -> Result<(Option<StatusId>, Lead)> {
        self.check_write().await?;
        let mut state = self.state.write().await;

        if let Some(status_id) = status_id {
            if !state.statuses.contains_key(&status_id) {
                return Err(CoreError::ConstraintViolation(format!(
                    "status {status_id} does not exist"
                )));
            }
        }

        let lead = state
            .leads
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| CoreError::NotFound(format!("lead {id} not found")))?;
        let previous = lead.status_id;
        lead.status_id = status_id;
        lead.updated_at = now;
        let lead = lead.clone();

        Ok((previous, state.labelled(&lead)))
    }

    async fn find_template(&self, id: TemplateId) -> Result<Option<MessageTemplate>> {
        Ok(self.state.read().await.templates.iter().find(|t| t.id == id).cloned())
    }

    async fn find_default_template(&self, slot: DefaultSlot) -> Result<Option<MessageTemplate>> {
        Ok(self.state.read().await.templates.iter().find(|t| slot.is_set_on(t)).cloned())
    }

    async fn insert_template(&self, template: &MessageTemplate) -> Result<()> {
        self.check_write().await?;
        let mut state = self.state.write().await;

        if state.templates.iter().any(|t| t.id == template.id) {
            return Err(CoreError::ConstraintViolation(format!(
                "template {} already exists",
                template.id
            )));
        }
        for slot in [DefaultSlot::NewLead, DefaultSlot::Conversion] {
            if slot.is_set_on(template) && state.templates.iter().any(|t| slot.is_set_on(t)) {
                return Err(CoreError::ConstraintViolation(format!(
                    "another template already holds {}",
                    slot.column()
                )));
            }
        }

        state.templates.push(template.clone());
        Ok(())
    }

    async fn set_default_template(
        &self,
        id: TemplateId,
        slot: DefaultSlot,
        now: DateTime<Utc>,
    ) -> Result<MessageTemplate> {
        self.check_write().await?;
        let mut state = self.state.write().await;

        if !state.templates.iter().any(|t| t.id == id) {
            return Err(CoreError::NotFound(format!("template {id} not found")));
        }

        let mut updated = None;
        for template in &mut state.templates {
            let holds = template.id == id;
            if !holds && !slot.is_set_on(template) {
                continue;
            }
            match slot {
                DefaultSlot::NewLead => template.is_default = holds,
                DefaultSlot::Conversion => template.is_conversion_default = holds,
            }
            template.updated_at = now;
            if holds {
                updated = Some(template.clone());
            }
        }

        updated.ok_or_else(|| CoreError::NotFound(format!("template {id} not found")))
    }

    async fn load_settings(&self) -> Result<Vec<SettingRow>> {
        Ok(self
            .state
            .read()
            .await
            .settings
            .iter()
            .map(|(key, value)| SettingRow { key: key.clone(), value: Some(value.clone()) })
            .collect())
    }

    async fn put_setting(&self, key: &str, value: &str, _now: DateTime<Utc>) -> Result<()> {
        self.check_write().await?;
        self.state.write().await.settings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn create_message(&self, message: &NewMessage) -> Result<MessageHistory> {
        self.check_write().await?;
        let mut state = self.state.write().await;

        if state.messages.iter().any(|m| m.delivery_code == message.delivery_code) {
            return Err(CoreError::ConstraintViolation(format!(
                "delivery code {} already exists",
                message.delivery_code
            )));
        }
        if state.messages.iter().any(|m| m.id == message.id) {
            return Err(CoreError::ConstraintViolation(format!(
                "message {} already exists",
                message.id
            )));
        }

        let row = MessageHistory {
            id: message.id,
            kind: message.kind,
            content: message.content.clone(),
            delivery_code: message.delivery_code.clone(),
            filter_type: message.filter_type,
            filter_value: message.filter_value.clone(),
            recipients_count: message.recipients_count,
            status: MessageStatus::Pending,
            webhook_response: None,
            sent_at: None,
            created_at: message.created_at,
        };
        state.messages.push(row.clone());
        Ok(row)
    }

    async fn attach_recipients(
        &self,
        id: MessageId,
        lead_ids: &[LeadId],
        now: DateTime<Utc>,
    ) -> Result<u64> {
        self.check_write().await?;
        let mut state = self.state.write().await;

        if !state.messages.iter().any(|m| m.id == id) {
            return Err(CoreError::ConstraintViolation(format!("message {id} does not exist")));
        }
        for (i, lead_id) in lead_ids.iter().enumerate() {
            let attached = state.recipients.iter().any(|r| r.message_history_id == id && r.lead_id == *lead_id);
            if attached || lead_ids[..i].contains(lead_id) {
                return Err(CoreError::ConstraintViolation(format!(
                    "lead {lead_id} already attached to message {id}"
                )));
            }
            if !state.leads.iter().any(|l| l.id == *lead_id) {
                return Err(CoreError::ConstraintViolation(format!("lead {lead_id} does not exist")));
            }
        }

        state.recipients.extend(lead_ids.iter().map(|lead_id| MessageRecipient {
            id: Uuid::new_v4(),
            message_history_id: id,
            lead_id: *lead_id,
            delivery_status: RecipientStatus::Pending,
            sent_at: None,
            delivered_at: None,
            error_message: None,
            created_at: now,
        }));
        Ok(lead_ids.len() as u64)
    }

    async fn mark_message_sending(&self, id: MessageId) -> Result<()> {
        self.check_write().await?;
        let mut state = self.state.write().await;
        let message = state.message_mut(id)?;

        if message.status != MessageStatus::Pending {
            return Err(CoreError::Conflict(format!("message {id} is not pending")));
        }
        message.status = MessageStatus::Sending;
        Ok(())
    }

    async fn finalize_message(
        &self,
        id: MessageId,
        status: MessageStatus,
        webhook_response: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<MessageHistory> {
        if !status.is_terminal() {
            return Err(CoreError::InvalidInput(format!("cannot finalize message as {status}")));
        }
        self.check_write().await?;
        let mut state = self.state.write().await;
        let message = state.message_mut(id)?;

        if message.status != MessageStatus::Sending {
            return Err(CoreError::Conflict(format!("message {id} is not sending")));
        }
        message.status = status;
        message.webhook_response = webhook_response.map(ToString::to_string);
        message.sent_at = (status == MessageStatus::Sent).then_some(now);
        Ok(message.clone())
    }

    async fn mark_recipients_sent(&self, id: MessageId, now: DateTime<Utc>) -> Result<u64> {
        self.check_write().await?;
        let mut state = self.state.write().await;
        let mut updated = 0;

        for recipient in state
            .recipients
            .iter_mut()
            .filter(|r| r.message_history_id == id && r.delivery_status == RecipientStatus::Pending)
        {
            recipient.delivery_status = RecipientStatus::Sent;
            recipient.sent_at = Some(now);
            updated += 1;
        }
        Ok(updated)
    }

    async fn find_message(&self, id: MessageId) -> Result<Option<MessageHistory>> {
        Ok(self.state.read().await.messages.iter().find(|m| m.id == id).cloned())
    }

    async fn find_message_by_code(&self, delivery_code: &str) -> Result<Option<MessageHistory>> {
        Ok(self
            .state
            .read()
            .await
            .messages
            .iter()
            .find(|m| m.delivery_code == delivery_code)
            .cloned())
    }

    async fn list_recipients(&self, id: MessageId) -> Result<Vec<MessageRecipient>> {
        Ok(self
            .state
            .read()
            .await
            .recipients
            .iter()
            .filter(|r| r.message_history_id == id)
            .cloned()
            .collect())
    }

    async fn update_recipient_status(
        &self,
        id: MessageId,
        lead_id: LeadId,
        update: &RecipientUpdate,
    ) -> Result<u64> {
        self.check_write().await?;
        let mut state = self.state.write().await;
        let Some(recipient) = state
            .recipients
            .iter_mut()
            .find(|r| r.message_history_id == id && r.lead_id == lead_id)
        else {
            return Ok(0);
        };

        recipient.delivered_at = match update.status {
            RecipientStatus::Delivered
                if recipient.delivery_status == RecipientStatus::Delivered =>
            {
                recipient.delivered_at.or(Some(update.at))
            },
            RecipientStatus::Delivered => Some(update.at),
            _ => None,
        };
        recipient.error_message = match update.status {
            RecipientStatus::Failed => update.error_message.clone(),
            _ => None,
        };
        recipient.delivery_status = update.status;
        Ok(1)
    }

    async fn create_validation(&self, validation: &WhatsAppValidation) -> Result<()> {
        self.check_write().await?;
        let mut state = self.state.write().await;

        if state.validations.contains_key(&validation.id) {
            return Err(CoreError::Conflict(format!("validation {} already exists", validation.id)));
        }
        state.validations.insert(validation.id, validation.clone());
        Ok(())
    }

    async fn find_validation(&self, id: ValidationId) -> Result<Option<WhatsAppValidation>> {
        Ok(self.state.read().await.validations.get(&id).cloned())
    }

    async fn resolve_validation(
        &self,
        id: ValidationId,
        status: ValidationStatus,
        response_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.check_write().await?;
        let mut state = self.state.write().await;

        match state.validations.get_mut(&id) {
            Some(row) if row.status == ValidationStatus::Pending => {
                row.status = status;
                row.response_message = response_message.map(ToString::to_string);
                row.validated_at = Some(now);
                Ok(true)
            },
            _ => Ok(false),
        }
    }
}
