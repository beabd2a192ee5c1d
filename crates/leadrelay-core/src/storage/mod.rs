//! Persistence for leads, templates, settings and the delivery ledger.
//!
//! [`MessagingStorage`] is the only storage surface the delivery layer sees.
//! [`Storage`] implements it over PostgreSQL through one repository per
//! table; [`memory::MemoryStorage`] implements it in memory for tests.
//!
//! Every mutating method takes the timestamp to write so that callers decide
//! time through their `Clock`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub mod leads;
pub mod memory;
pub mod messages;
pub mod recipients;
pub mod schema;
pub mod system_settings;
pub mod templates;
pub mod validations;

use crate::{
    error::{CoreError, Result},
    models::{
        DefaultSlot, Lead, LeadFilter, LeadId, MessageHistory, MessageId, MessageRecipient,
        MessageStatus, MessageTemplate, NewLead, NewMessage, RecipientUpdate, SettingRow,
        StatusId, TemplateId, ValidationId, ValidationStatus, WhatsAppValidation,
    },
};

/// Storage operations required by the messaging pipeline.
#[async_trait]
pub trait MessagingStorage: Send + Sync + std::fmt::Debug + 'static {
    /// Verifies the backing store answers.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    /// Finds a lead with its course, event and status labels.
    async fn find_lead(&self, id: LeadId) -> Result<Option<Lead>>;

    /// Lists leads matching a filter in capture order.
    ///
    /// With `exclude_contacted`, leads that have any recipient row are
    /// skipped regardless of message type or outcome.
    async fn list_leads(&self, filter: LeadFilter, exclude_contacted: bool) -> Result<Vec<Lead>>;

    /// Leads whose email or whatsapp equals `identifier` exactly.
    async fn find_leads_by_contact(&self, identifier: &str) -> Result<Vec<Lead>>;

    /// Inserts a lead and returns it with labels resolved.
    async fn insert_lead(&self, id: LeadId, lead: &NewLead, now: DateTime<Utc>) -> Result<Lead>;

    /// Sets a lead's status, returning the previous status and the updated
    /// lead.
    async fn update_lead_status(
        &self,
        id: LeadId,
        status_id: Option<StatusId>,
        now: DateTime<Utc>,
    ) -> Result<(Option<StatusId>, Lead)>;

    /// Finds a template by id.
    async fn find_template(&self, id: TemplateId) -> Result<Option<MessageTemplate>>;

    /// Finds the template occupying an automatic-send slot.
    async fn find_default_template(&self, slot: DefaultSlot) -> Result<Option<MessageTemplate>>;

    /// Inserts a template.
    async fn insert_template(&self, template: &MessageTemplate) -> Result<()>;

    /// Moves an automatic-send slot to the given template in one step.
    async fn set_default_template(
        &self,
        id: TemplateId,
        slot: DefaultSlot,
        now: DateTime<Utc>,
    ) -> Result<MessageTemplate>;

    /// Raw settings rows.
    async fn load_settings(&self) -> Result<Vec<SettingRow>>;

    /// Upserts a setting's JSON text.
    async fn put_setting(&self, key: &str, value: &str, now: DateTime<Utc>) -> Result<()>;

    /// Opens a ledger entry in `pending`.
    ///
    /// A duplicate delivery code fails with `ConstraintViolation` and leaves
    /// the existing entry untouched.
    async fn create_message(&self, message: &NewMessage) -> Result<MessageHistory>;

    /// Creates one `pending` recipient row per lead.
    async fn attach_recipients(
        &self,
        id: MessageId,
        lead_ids: &[LeadId],
        now: DateTime<Utc>,
    ) -> Result<u64>;

    /// Moves an entry from `pending` to `sending`.
    async fn mark_message_sending(&self, id: MessageId) -> Result<()>;

    /// Moves an entry from `sending` to its terminal status.
    async fn finalize_message(
        &self,
        id: MessageId,
        status: MessageStatus,
        webhook_response: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<MessageHistory>;

    /// Advances the entry's `pending` recipients to `sent`.
    async fn mark_recipients_sent(&self, id: MessageId, now: DateTime<Utc>) -> Result<u64>;

    /// Finds a ledger entry by id.
    async fn find_message(&self, id: MessageId) -> Result<Option<MessageHistory>>;

    /// Finds a ledger entry by delivery code.
    async fn find_message_by_code(&self, delivery_code: &str) -> Result<Option<MessageHistory>>;

    /// Recipient rows of an entry in creation order.
    async fn list_recipients(&self, id: MessageId) -> Result<Vec<MessageRecipient>>;

    /// Applies a relay-reported status to one recipient row; returns rows
    /// affected.
    ///
    /// `delivered_at` keeps its first value when the row was already
    /// delivered and is cleared for any other status.
    async fn update_recipient_status(
        &self,
        id: MessageId,
        lead_id: LeadId,
        update: &RecipientUpdate,
    ) -> Result<u64>;

    /// Records a pending validation; a duplicate id is a `Conflict`.
    async fn create_validation(&self, validation: &WhatsAppValidation) -> Result<()>;

    /// Finds a validation by id.
    async fn find_validation(&self, id: ValidationId) -> Result<Option<WhatsAppValidation>>;

    /// Moves a `pending` validation to a terminal status; returns false when
    /// the row was no longer pending.
    async fn resolve_validation(
        &self,
        id: ValidationId,
        status: ValidationStatus,
        response_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool>;
}

/// PostgreSQL-backed storage composed of per-table repositories.
#[derive(Clone)]
pub struct Storage {
    /// Lead reads and the status write.
    pub leads: Arc<leads::Repository>,
    /// Message templates and default slots.
    pub templates: Arc<templates::Repository>,
    /// Key/value business settings.
    pub settings: Arc<system_settings::Repository>,
    /// Message history rows.
    pub messages: Arc<messages::Repository>,
    /// Message recipient rows.
    pub recipients: Arc<recipients::Repository>,
    /// Phone validations.
    pub validations: Arc<validations::Repository>,
    pool: Arc<PgPool>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

impl Storage {
    /// Creates storage over a shared pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            leads: Arc::new(leads::Repository::new(pool.clone())),
            templates: Arc::new(templates::Repository::new(pool.clone())),
            settings: Arc::new(system_settings::Repository::new(pool.clone())),
            messages: Arc::new(messages::Repository::new(pool.clone())),
            recipients: Arc::new(recipients::Repository::new(pool.clone())),
            validations: Arc::new(validations::Repository::new(pool.clone())),
            pool,
        }
    }

    /// Returns the shared pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Verifies database connectivity.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the query fails.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl MessagingStorage for Storage {
    async fn ping(&self) -> Result<()> {
        self.health_check().await
    }

    async fn find_lead(&self, id: LeadId) -> Result<Option<Lead>> {
        self.leads.find_by_id(id).await
    }

    async fn list_leads(&self, filter: LeadFilter, exclude_contacted: bool) -> Result<Vec<Lead>> {
        self.leads.list(filter, exclude_contacted).await
    }

    async fn find_leads_by_contact(&self, identifier: &str) -> Result<Vec<Lead>> {
        self.leads.find_by_contact(identifier).await
    }

    async fn insert_lead(&self, id: LeadId, lead: &NewLead, now: DateTime<Utc>) -> Result<Lead> {
        self.leads.insert(id, lead, now).await?;
        self.leads
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("lead {id} vanished after insert")))
    }

    async fn update_lead_status(
        &self,
        id: LeadId,
        status_id: Option<StatusId>,
        now: DateTime<Utc>,
    ) -> Result<(Option<StatusId>, Lead)> {
        let previous = self.leads.update_status(id, status_id, now).await?;
        let lead = self
            .leads
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("lead {id} not found")))?;
        Ok((previous, lead))
    }

    async fn find_template(&self, id: TemplateId) -> Result<Option<MessageTemplate>> {
        self.templates.find_by_id(id).await
    }

    async fn find_default_template(&self, slot: DefaultSlot) -> Result<Option<MessageTemplate>> {
        self.templates.find_default(slot).await
    }

    async fn insert_template(&self, template: &MessageTemplate) -> Result<()> {
        self.templates.insert(template).await
    }

    async fn set_default_template(
        &self,
        id: TemplateId,
        slot: DefaultSlot,
        now: DateTime<Utc>,
    ) -> Result<MessageTemplate> {
        self.templates.set_default(id, slot, now).await
    }

    async fn load_settings(&self) -> Result<Vec<SettingRow>> {
        self.settings.load_all().await
    }

    async fn put_setting(&self, key: &str, value: &str, now: DateTime<Utc>) -> Result<()> {
        self.settings.upsert(key, value, now).await
    }

    async fn create_message(&self, message: &NewMessage) -> Result<MessageHistory> {
        self.messages.create(message).await
    }

    async fn attach_recipients(
        &self,
        id: MessageId,
        lead_ids: &[LeadId],
        now: DateTime<Utc>,
    ) -> Result<u64> {
        self.recipients.create_batch(id, lead_ids, now).await
    }

    async fn mark_message_sending(&self, id: MessageId) -> Result<()> {
        self.messages.mark_sending(id).await
    }

    async fn finalize_message(
        &self,
        id: MessageId,
        status: MessageStatus,
        webhook_response: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<MessageHistory> {
        self.messages.finalize(id, status, webhook_response, now).await
    }

    async fn mark_recipients_sent(&self, id: MessageId, now: DateTime<Utc>) -> Result<u64> {
        self.recipients.mark_sent(id, now).await
    }

    async fn find_message(&self, id: MessageId) -> Result<Option<MessageHistory>> {
        self.messages.find_by_id(id).await
    }

    async fn find_message_by_code(&self, delivery_code: &str) -> Result<Option<MessageHistory>> {
        self.messages.find_by_delivery_code(delivery_code).await
    }

    async fn list_recipients(&self, id: MessageId) -> Result<Vec<MessageRecipient>> {
        self.recipients.find_by_message(id).await
    }

    async fn update_recipient_status(
        &self,
        id: MessageId,
        lead_id: LeadId,
        update: &RecipientUpdate,
    ) -> Result<u64> {
        self.recipients.update_status(id, lead_id, update).await
    }

    async fn create_validation(&self, validation: &WhatsAppValidation) -> Result<()> {
        self.validations.create(validation).await
    }

    async fn find_validation(&self, id: ValidationId) -> Result<Option<WhatsAppValidation>> {
        self.validations.find_by_id(id).await
    }

    async fn resolve_validation(
        &self,
        id: ValidationId,
        status: ValidationStatus,
        response_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.validations.resolve(id, status, response_message, now).await
    }
}
