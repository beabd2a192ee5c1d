//! Outbound messaging for the lead relay.
//!
//! Resolves recipients, records every dispatch in the delivery ledger before
//! POSTing it to the configured relay, applies the relay's delivery
//! callbacks, runs the automatic sends on lead capture and conversion, and
//! drives WhatsApp number validation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::time::Duration;

pub mod callback;
pub mod client;
pub mod dispatcher;
pub mod error;
pub mod ledger;
pub mod payload;
pub mod resolver;
pub mod triggers;
pub mod validation;

pub use callback::{CallbackAck, DeliveryCallback, DeliveryCallbackReceiver};
pub use client::{ClientConfig, RelayResponse, WebhookClient};
pub use dispatcher::{DispatchReport, MessageDispatcher, SendRequest, SendResult};
pub use error::{DeliveryError, ErrorCategory, Result, StatusClass};
pub use ledger::{generate_delivery_code, CodePrefix, DeliveryLedger};
pub use payload::{CallbackUrls, DispatchPayload, DispatchSpec, ValidationRequestPayload};
pub use resolver::{RecipientFilter, RecipientResolver};
pub use triggers::AutoSendTriggers;
pub use validation::{
    normalize_phone, HttpStatusSource, PollOutcome, StorageStatusSource, ValidationAck,
    ValidationCallback, ValidationPoller, ValidationService, ValidationStatusSource,
};

/// Hard bound for one relay POST.
pub const DEFAULT_DISPATCH_TIMEOUT_SECONDS: u64 = 30;

/// Wait between validation status reads.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Validation status reads before giving up.
pub const DEFAULT_POLL_ATTEMPTS: u32 = 60;
