//! Core domain models, storage and events for the lead messaging relay.
//!
//! Provides strongly-typed leads, templates and ledger rows, the typed
//! settings service, the clock abstraction and the storage seam shared by
//! the delivery and API crates.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod models;
pub mod settings;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use events::{AutoSendReport, AutoSendStatus, LeadEvent, LeadEventHandler, NoOpEventHandler};
pub use models::{
    DefaultSlot, FilterType, Lead, LeadFilter, LeadId, MessageHistory, MessageId, MessageKind,
    MessageRecipient, MessageStatus, MessageTemplate, NewLead, NewMessage, RecipientStatus,
    RecipientUpdate, StatusId, TemplateId, ValidationId, ValidationStatus, WhatsAppValidation,
};
pub use settings::{SettingsService, SystemSettings, WebhookUrls};
pub use storage::{memory::MemoryStorage, MessagingStorage, Storage};
pub use time::{Clock, RealClock, TestClock};
