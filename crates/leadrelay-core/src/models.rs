//! Core domain models and strongly-typed identifiers.
//!
//! Leads, templates and the two ledger tables (message history and message
//! recipients) plus phone validations. Identifiers are newtype wrappers so a
//! lead id can never be passed where a message id is expected, and every
//! lifecycle status is a closed enum stored as lowercase text.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl sqlx::Type<PgDb> for $name {
            fn type_info() -> PgTypeInfo {
                <Uuid as sqlx::Type<PgDb>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, PgDb> for $name {
            fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
                let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
                Ok(Self(uuid))
            }
        }

        impl sqlx::Encode<'_, PgDb> for $name {
            fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
                <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
            }
        }
    };
}

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            /// Wire and storage representation.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(concat!("invalid ", stringify!($name), ": {}"), other)),
                }
            }
        }

        impl sqlx::Type<PgDb> for $name {
            fn type_info() -> PgTypeInfo {
                <&str as sqlx::Type<PgDb>>::type_info()
            }

            fn compatible(ty: &PgTypeInfo) -> bool {
                <&str as sqlx::Type<PgDb>>::compatible(ty)
            }
        }

        impl<'r> sqlx::Decode<'r, PgDb> for $name {
            fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
                let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
                s.parse::<Self>().map_err(Into::into)
            }
        }

        impl sqlx::Encode<'_, PgDb> for $name {
            fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
                <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a captured lead.
    LeadId
);
uuid_id!(
    /// Identifier of a reusable message template.
    TemplateId
);
uuid_id!(
    /// Identifier of a message history row (one per dispatch attempt).
    MessageId
);
uuid_id!(
    /// Identifier of a lead status (pipeline stage).
    StatusId
);
uuid_id!(
    /// Client-generated correlation id of a phone validation request.
    ValidationId
);

text_enum!(
    /// Channel a message is sent through.
    MessageKind {
        /// WhatsApp message; recipients need a whatsapp number.
        Whatsapp => "whatsapp",
        /// Email message.
        Email => "email",
        /// SMS message; recipients need a phone number.
        Sms => "sms",
    }
);

text_enum!(
    /// How the recipients of a message were selected.
    FilterType {
        /// Every lead.
        All => "all",
        /// Leads enrolled in a course or postgraduate course.
        Course => "course",
        /// Leads captured at an event.
        Event => "event",
        /// Leads currently in a status.
        Status => "status",
        /// Single lead, sent right after capture.
        AutoNewLead => "auto_new_lead",
        /// Single lead, sent on transition into the conversion status.
        AutomaticConversion => "automatic_conversion",
    }
);

impl FilterType {
    /// Whether this filter targets exactly one lead by id.
    pub const fn is_single_lead(&self) -> bool {
        matches!(self, Self::AutoNewLead | Self::AutomaticConversion)
    }
}

text_enum!(
    /// Lifecycle of a message history row.
    ///
    /// ```text
    /// pending -> sending -> sent
    ///                   \-> failed
    /// ```
    MessageStatus {
        /// Ledger row written, recipients being attached.
        Pending => "pending",
        /// Ledger complete, relay POST in flight.
        Sending => "sending",
        /// Relay acknowledged with a 2xx response.
        Sent => "sent",
        /// Relay rejected the request, timed out or was unreachable.
        Failed => "failed",
    }
);

impl MessageStatus {
    /// Whether no further transition is allowed.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

text_enum!(
    /// Per-recipient delivery state.
    ///
    /// `sent` means the relay accepted the batch; `delivered`/`failed` are only
    /// reported by the relay's delivery callback.
    RecipientStatus {
        /// Recipient row created, dispatch not confirmed.
        Pending => "pending",
        /// Relay accepted the dispatch.
        Sent => "sent",
        /// Relay confirmed delivery on the channel.
        Delivered => "delivered",
        /// Relay reported a delivery failure.
        Failed => "failed",
    }
);

text_enum!(
    /// Outcome of a phone validation request.
    ValidationStatus {
        /// Waiting for the validation service callback.
        Pending => "pending",
        /// Number has an active WhatsApp account.
        Valid => "valid",
        /// Number does not have WhatsApp.
        Invalid => "invalid",
        /// Validation could not be performed.
        Error => "error",
    }
);

impl ValidationStatus {
    /// Whether the validation has reached a final state.
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A captured contact, with the labels of its referenced course, event and
/// status resolved for payload construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Lead {
    /// Unique identifier.
    pub id: LeadId,
    /// Contact name.
    pub name: String,
    /// WhatsApp number, digits only by convention.
    pub whatsapp: Option<String>,
    /// Email address.
    pub email: Option<String>,
    /// Referenced course.
    pub course_id: Option<Uuid>,
    /// Referenced postgraduate course.
    pub postgraduate_course_id: Option<Uuid>,
    /// Event where the lead was captured.
    pub event_id: Option<Uuid>,
    /// Current pipeline status.
    pub status_id: Option<StatusId>,
    /// Name of the course or postgraduate course.
    pub course_name: Option<String>,
    /// Name of the event.
    pub event_name: Option<String>,
    /// Name of the status.
    pub status_name: Option<String>,
    /// Display color of the status.
    pub status_color: Option<String>,
    /// When the lead was captured.
    pub created_at: DateTime<Utc>,
    /// Last modification.
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// Contact address used for the given channel, if present and non-blank.
    pub fn contact_for(&self, kind: MessageKind) -> Option<&str> {
        let value = match kind {
            MessageKind::Whatsapp | MessageKind::Sms => self.whatsapp.as_deref(),
            MessageKind::Email => self.email.as_deref(),
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }

    /// Whether the lead has a non-blank whatsapp number.
    pub fn has_whatsapp(&self) -> bool {
        self.contact_for(MessageKind::Whatsapp).is_some()
    }

    /// Exact match against email or whatsapp number.
    pub fn matches_identifier(&self, identifier: &str) -> bool {
        self.email.as_deref() == Some(identifier) || self.whatsapp.as_deref() == Some(identifier)
    }

    /// Whether the lead references the given course in either course slot.
    pub fn in_course(&self, course_id: Uuid) -> bool {
        self.course_id == Some(course_id) || self.postgraduate_course_id == Some(course_id)
    }
}

/// Fields accepted when capturing a lead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewLead {
    /// Contact name.
    pub name: String,
    /// WhatsApp number.
    #[serde(default)]
    pub whatsapp: Option<String>,
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
    /// Referenced course.
    #[serde(default)]
    pub course_id: Option<Uuid>,
    /// Referenced postgraduate course.
    #[serde(default)]
    pub postgraduate_course_id: Option<Uuid>,
    /// Event where the lead was captured.
    #[serde(default)]
    pub event_id: Option<Uuid>,
    /// Initial status.
    #[serde(default)]
    pub status_id: Option<StatusId>,
}

/// Recipient selection criteria understood by storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadFilter {
    /// Every lead.
    All,
    /// Leads referencing the course in either course slot.
    Course(Uuid),
    /// Leads captured at the event.
    Event(Uuid),
    /// Leads in the status.
    Status(StatusId),
}

/// Reusable message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MessageTemplate {
    /// Unique identifier.
    pub id: TemplateId,
    /// Display name.
    pub name: String,
    /// Message body.
    pub content: String,
    /// Channel the template is written for.
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: MessageKind,
    /// Sent automatically when a lead is captured.
    pub is_default: bool,
    /// Sent automatically when a lead converts.
    pub is_conversion_default: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification.
    pub updated_at: DateTime<Utc>,
}

/// Which automatic-send slot a default template occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultSlot {
    /// `is_default`, used on lead capture.
    NewLead,
    /// `is_conversion_default`, used on conversion.
    Conversion,
}

impl DefaultSlot {
    /// Column backing the slot.
    pub const fn column(&self) -> &'static str {
        match self {
            Self::NewLead => "is_default",
            Self::Conversion => "is_conversion_default",
        }
    }

    /// Whether the template occupies this slot.
    pub fn is_set_on(&self, template: &MessageTemplate) -> bool {
        match self {
            Self::NewLead => template.is_default,
            Self::Conversion => template.is_conversion_default,
        }
    }
}

/// A dispatch attempt as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MessageHistory {
    /// Unique identifier.
    pub id: MessageId,
    /// Channel.
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: MessageKind,
    /// Message body as sent to the relay.
    pub content: String,
    /// Correlation token shared with the relay.
    pub delivery_code: String,
    /// How recipients were selected.
    pub filter_type: FilterType,
    /// Filter argument (course id, event id, status id or lead id).
    pub filter_value: Option<String>,
    /// Number of recipient rows attached.
    pub recipients_count: i32,
    /// Lifecycle status.
    pub status: MessageStatus,
    /// Raw relay response or transport error text.
    pub webhook_response: Option<String>,
    /// When the relay acknowledged the dispatch.
    pub sent_at: Option<DateTime<Utc>>,
    /// When the ledger row was opened.
    pub created_at: DateTime<Utc>,
}

/// Values for opening a new ledger entry.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    /// Identifier chosen by the caller.
    pub id: MessageId,
    /// Channel.
    pub kind: MessageKind,
    /// Message body.
    pub content: String,
    /// Correlation token; must be unique across all messages.
    pub delivery_code: String,
    /// How recipients were selected.
    pub filter_type: FilterType,
    /// Filter argument.
    pub filter_value: Option<String>,
    /// Number of recipients about to be attached.
    pub recipients_count: i32,
    /// Opening time.
    pub created_at: DateTime<Utc>,
}

/// Per-lead delivery row of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MessageRecipient {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning message.
    pub message_history_id: MessageId,
    /// Recipient lead.
    pub lead_id: LeadId,
    /// Delivery state.
    pub delivery_status: RecipientStatus,
    /// When the relay accepted the dispatch.
    pub sent_at: Option<DateTime<Utc>>,
    /// When the relay confirmed delivery.
    pub delivered_at: Option<DateTime<Utc>>,
    /// Failure reason reported by the relay.
    pub error_message: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Authoritative status change reported by the relay for one recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipientUpdate {
    /// New delivery status.
    pub status: RecipientStatus,
    /// Time of the callback.
    pub at: DateTime<Utc>,
    /// Failure reason; only kept for `failed`.
    pub error_message: Option<String>,
}

/// Phone validation request and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WhatsAppValidation {
    /// Client-generated correlation id.
    pub id: ValidationId,
    /// Normalized phone number.
    pub whatsapp: String,
    /// Current state.
    pub status: ValidationStatus,
    /// Explanation from the validation service or the error text.
    pub response_message: Option<String>,
    /// When the request was recorded.
    pub created_at: DateTime<Utc>,
    /// When the row reached its terminal state.
    pub validated_at: Option<DateTime<Utc>>,
}

/// Raw key/value row of the settings table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SettingRow {
    /// Setting key.
    pub key: String,
    /// JSON-encoded value.
    pub value: Option<String>,
}
