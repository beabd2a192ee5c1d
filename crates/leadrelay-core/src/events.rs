//! Lead domain events and the post-commit hook seam.
//!
//! The CRUD write for a lead commits first; the event is then handed to a
//! [`LeadEventHandler`] which reports what, if anything, it sent. Handlers
//! are infallible by signature, so a lead write can never fail because an
//! automatic send did.
//!
//! ```text
//! POST /api/leads ──▶ insert lead ──commit──▶ LeadEvent::Created ──▶ handler
//!                                                                      │
//!            response { lead, auto_send_status } ◀── AutoSendReport ◀──┘
//! ```

use serde::{Deserialize, Serialize};

use crate::models::{Lead, MessageId, StatusId};

/// Something that happened to a lead after it was committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LeadEvent {
    /// A lead was captured.
    Created {
        /// The committed lead.
        lead: Lead,
    },

    /// A lead's status was written.
    StatusChanged {
        /// The lead after the update.
        lead: Lead,
        /// Status before the update.
        previous_status_id: Option<StatusId>,
    },
}

impl LeadEvent {
    /// The lead the event is about.
    pub fn lead(&self) -> &Lead {
        match self {
            Self::Created { lead } | Self::StatusChanged { lead, .. } => lead,
        }
    }
}

/// Coarse outcome of an automatic send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoSendStatus {
    /// Relay accepted the message.
    Sent,
    /// A precondition was unmet; nothing was dispatched.
    Skipped,
    /// A dispatch was attempted and failed, or the ledger could not be
    /// written.
    Failed,
}

/// Informational result attached to a lead write response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoSendReport {
    /// Coarse outcome.
    pub status: AutoSendStatus,
    /// Operator-facing explanation.
    pub message: String,
    /// Ledger entry, when one was opened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    /// Delivery code, when one was generated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_code: Option<String>,
}

impl AutoSendReport {
    /// Nothing was dispatched because `reason`.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: AutoSendStatus::Skipped,
            message: reason.into(),
            message_id: None,
            delivery_code: None,
        }
    }

    /// The relay accepted ledger entry `message_id`.
    pub fn sent(message_id: MessageId, delivery_code: impl Into<String>) -> Self {
        Self {
            status: AutoSendStatus::Sent,
            message: "automatic message sent".to_string(),
            message_id: Some(message_id),
            delivery_code: Some(delivery_code.into()),
        }
    }

    /// The automatic send failed with `reason`.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: AutoSendStatus::Failed,
            message: reason.into(),
            message_id: None,
            delivery_code: None,
        }
    }

    /// Attaches the ledger entry a failure belongs to.
    #[must_use]
    pub fn with_message(mut self, message_id: MessageId, delivery_code: impl Into<String>) -> Self {
        self.message_id = Some(message_id);
        self.delivery_code = Some(delivery_code.into());
        self
    }

    /// Whether a dispatch reached the relay successfully.
    pub fn is_sent(&self) -> bool {
        self.status == AutoSendStatus::Sent
    }
}

/// Post-commit hook for lead events.
#[async_trait::async_trait]
pub trait LeadEventHandler: Send + Sync + std::fmt::Debug {
    /// Reacts to a committed lead event.
    ///
    /// Must not fail: every problem is folded into the report.
    async fn handle_event(&self, event: LeadEvent) -> AutoSendReport;
}

/// Handler that never sends anything.
#[derive(Debug, Default)]
pub struct NoOpEventHandler;

impl NoOpEventHandler {
    /// Creates a new no-op handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl LeadEventHandler for NoOpEventHandler {
    async fn handle_event(&self, _event: LeadEvent) -> AutoSendReport {
        AutoSendReport::skipped("automatic sends are not wired")
    }
}
