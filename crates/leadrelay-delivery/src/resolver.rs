//! Recipient resolution from a message filter.

use std::sync::Arc;

use leadrelay_core::{FilterType, Lead, LeadFilter, LeadId, MessageKind, MessagingStorage, StatusId};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DeliveryError, Result};

/// Parsed recipient selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientFilter {
    /// Every lead.
    All,
    /// Leads in a course or postgraduate course.
    Course(Uuid),
    /// Leads captured at an event.
    Event(Uuid),
    /// Leads in a status.
    Status(StatusId),
    /// Exactly one lead, for automatic sends.
    Single {
        /// Target lead.
        lead_id: LeadId,
        /// `auto_new_lead` or `automatic_conversion`.
        filter_type: FilterType,
    },
}

impl RecipientFilter {
    /// Parses a filter type and its textual argument.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if the argument is missing or not a UUID.
    pub fn parse(filter_type: FilterType, filter_value: Option<&str>) -> Result<Self> {
        if filter_type == FilterType::All {
            return Ok(Self::All);
        }

        let raw = filter_value.map(str::trim).filter(|v| !v.is_empty()).ok_or_else(|| {
            DeliveryError::bad_request(format!("filter_value is required for filter_type {filter_type}"))
        })?;
        let id = Uuid::parse_str(raw).map_err(|e| {
            DeliveryError::bad_request(format!("filter_value '{raw}' is not a valid id: {e}"))
        })?;

        Ok(match filter_type {
            FilterType::All => Self::All,
            FilterType::Course => Self::Course(id),
            FilterType::Event => Self::Event(id),
            FilterType::Status => Self::Status(StatusId(id)),
            FilterType::AutoNewLead | FilterType::AutomaticConversion => {
                Self::Single { lead_id: LeadId(id), filter_type }
            },
        })
    }

    /// Filter type recorded in the ledger.
    pub fn filter_type(&self) -> FilterType {
        match self {
            Self::All => FilterType::All,
            Self::Course(_) => FilterType::Course,
            Self::Event(_) => FilterType::Event,
            Self::Status(_) => FilterType::Status,
            Self::Single { filter_type, .. } => *filter_type,
        }
    }

    /// Filter argument recorded in the ledger.
    pub fn filter_value(&self) -> Option<String> {
        match self {
            Self::All => None,
            Self::Course(id) | Self::Event(id) => Some(id.to_string()),
            Self::Status(id) => Some(id.to_string()),
            Self::Single { lead_id, .. } => Some(lead_id.to_string()),
        }
    }
}

/// Produces the leads eligible for a message.
#[derive(Debug, Clone)]
pub struct RecipientResolver {
    storage: Arc<dyn MessagingStorage>,
}

impl RecipientResolver {
    /// Creates a resolver over the given storage.
    pub fn new(storage: Arc<dyn MessagingStorage>) -> Self {
        Self { storage }
    }

    /// Resolves recipients in stable capture order.
    ///
    /// An empty result is not an error. `exclude_ever_contacted` drops leads
    /// that already have any recipient row; it does not apply to single-lead
    /// filters. WhatsApp sends keep only leads with a whatsapp number.
    ///
    /// # Errors
    ///
    /// For single-lead filters, `NotFound` if the lead does not exist and
    /// `InvalidRecipient` if it has no contact for `kind`.
    pub async fn resolve(
        &self,
        filter: &RecipientFilter,
        exclude_ever_contacted: bool,
        kind: MessageKind,
    ) -> Result<Vec<Lead>> {
        let lead_filter = match *filter {
            RecipientFilter::Single { lead_id, .. } => return self.resolve_single(lead_id, kind).await,
            RecipientFilter::All => LeadFilter::All,
            RecipientFilter::Course(id) => LeadFilter::Course(id),
            RecipientFilter::Event(id) => LeadFilter::Event(id),
            RecipientFilter::Status(id) => LeadFilter::Status(id),
        };

        let mut leads = self.storage.list_leads(lead_filter, exclude_ever_contacted).await?;
        if kind == MessageKind::Whatsapp {
            leads.retain(Lead::has_whatsapp);
        }

        debug!(
            filter_type = %filter.filter_type(),
            exclude_ever_contacted,
            recipients = leads.len(),
            "resolved recipients"
        );
        Ok(leads)
    }

    async fn resolve_single(&self, lead_id: LeadId, kind: MessageKind) -> Result<Vec<Lead>> {
        let lead = self
            .storage
            .find_lead(lead_id)
            .await?
            .ok_or_else(|| DeliveryError::not_found(format!("lead {lead_id} not found")))?;

        if lead.contact_for(kind).is_none() {
            return Err(DeliveryError::invalid_recipient(format!(
                "lead {lead_id} has no {kind} contact"
            )));
        }
        Ok(vec![lead])
    }
}
