//! Lead and template builders with sensible defaults.

use chrono::Utc;
use leadrelay_core::{
    DefaultSlot, Lead, LeadId, MessageKind, MessageTemplate, MessagingStorage, NewLead, StatusId,
    TemplateId,
};
use uuid::Uuid;

/// Builder for leads inserted through storage.
#[derive(Debug, Clone)]
pub struct LeadBuilder {
    lead: NewLead,
}

impl LeadBuilder {
    /// Lead named `name` with no contact fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self { lead: NewLead { name: name.into(), ..NewLead::default() } }
    }

    /// Lead "Ana" reachable on whatsapp 5582999999999.
    pub fn ana() -> Self {
        Self::new("Ana").whatsapp("5582999999999")
    }

    /// Sets the whatsapp number.
    #[must_use]
    pub fn whatsapp(mut self, number: impl Into<String>) -> Self {
        self.lead.whatsapp = Some(number.into());
        self
    }

    /// Sets the email address.
    #[must_use]
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.lead.email = Some(email.into());
        self
    }

    /// Sets the course.
    #[must_use]
    pub fn course(mut self, id: Uuid) -> Self {
        self.lead.course_id = Some(id);
        self
    }

    /// Sets the postgraduate course.
    #[must_use]
    pub fn postgraduate_course(mut self, id: Uuid) -> Self {
        self.lead.postgraduate_course_id = Some(id);
        self
    }

    /// Sets the event.
    #[must_use]
    pub fn event(mut self, id: Uuid) -> Self {
        self.lead.event_id = Some(id);
        self
    }

    /// Sets the initial status.
    #[must_use]
    pub fn status(mut self, id: StatusId) -> Self {
        self.lead.status_id = Some(id);
        self
    }

    /// The fields as a capture request.
    pub fn build(self) -> NewLead {
        self.lead
    }

    /// Inserts the lead and returns it.
    pub async fn insert(self, storage: &dyn MessagingStorage) -> Lead {
        storage.insert_lead(LeadId::new(), &self.lead, Utc::now()).await.expect("lead inserted")
    }
}

/// Builder for message templates.
#[derive(Debug, Clone)]
pub struct TemplateBuilder {
    template: MessageTemplate,
}

impl TemplateBuilder {
    /// Whatsapp template with `content`.
    pub fn new(content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            template: MessageTemplate {
                id: TemplateId::new(),
                name: "Welcome".to_string(),
                content: content.into(),
                kind: MessageKind::Whatsapp,
                is_default: false,
                is_conversion_default: false,
                created_at: now,
                updated_at: now,
            },
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.template.name = name.into();
        self
    }

    /// Marks the template as occupying `slot`.
    #[must_use]
    pub fn default_for(mut self, slot: DefaultSlot) -> Self {
        match slot {
            DefaultSlot::NewLead => self.template.is_default = true,
            DefaultSlot::Conversion => self.template.is_conversion_default = true,
        }
        self
    }

    /// Inserts the template and returns it.
    pub async fn insert(self, storage: &dyn MessagingStorage) -> MessageTemplate {
        storage.insert_template(&self.template).await.expect("template inserted");
        self.template
    }
}
