//! Delivery ledger: the durable record of every dispatch attempt.
//!
//! A dispatch writes its history row and recipient rows and moves the row to
//! `sending` before the relay is contacted, so a crash mid-POST leaves a
//! visible `sending` entry. Exactly one `finalize` follows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use leadrelay_core::{
    Clock, CoreError, Lead, LeadId, MessageHistory, MessageId, MessageStatus, MessagingStorage,
    NewMessage,
};
use rand::Rng;
use tracing::{debug, error, warn};

use crate::{
    error::{DeliveryError, Result},
    payload::DispatchSpec,
};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_RANDOM_LEN: usize = 9;

/// Origin of a dispatch, encoded as the delivery code prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodePrefix {
    /// Operator-composed send.
    Manual,
    /// New-lead automatic send.
    NewLead,
    /// Conversion automatic send.
    Conversion,
}

impl CodePrefix {
    /// Prefix text.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "MSG",
            Self::NewLead => "AUTO",
            Self::Conversion => "CONV",
        }
    }
}

/// Generates `<PREFIX>-<unix millis>-<9 uppercase alphanumerics>`.
pub fn generate_delivery_code(prefix: CodePrefix, now: DateTime<Utc>) -> String {
    let mut rng = rand::rng();
    let random: String = (0..CODE_RANDOM_LEN)
        .map(|_| char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]))
        .collect();
    format!("{}-{}-{random}", prefix.as_str(), now.timestamp_millis())
}

/// Writes and advances ledger entries.
#[derive(Debug, Clone)]
pub struct DeliveryLedger {
    storage: Arc<dyn MessagingStorage>,
    clock: Arc<dyn Clock>,
}

impl DeliveryLedger {
    /// Creates a ledger over the given storage.
    pub fn new(storage: Arc<dyn MessagingStorage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Opens a `pending` entry with a fresh delivery code.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryCodeCollision` if the generated code is already taken;
    /// the existing entry is not touched and the caller may retry.
    pub async fn open(
        &self,
        spec: &DispatchSpec<'_>,
        prefix: CodePrefix,
        recipients: &[Lead],
    ) -> Result<MessageHistory> {
        let now = self.clock.now_utc();
        let message = NewMessage {
            id: MessageId::new(),
            kind: spec.kind,
            content: spec.content.to_string(),
            delivery_code: generate_delivery_code(prefix, now),
            filter_type: spec.filter_type,
            filter_value: spec.filter_value.map(ToString::to_string),
            recipients_count: i32::try_from(recipients.len()).unwrap_or(i32::MAX),
            created_at: now,
        };

        match self.storage.create_message(&message).await {
            Ok(row) => {
                debug!(message_id = %row.id, delivery_code = %row.delivery_code, "ledger entry opened");
                Ok(row)
            },
            Err(CoreError::ConstraintViolation(detail)) => {
                warn!(delivery_code = %message.delivery_code, detail, "delivery code collision");
                Err(DeliveryError::DeliveryCodeCollision { code: message.delivery_code })
            },
            Err(e) => {
                error!(error = %e, "failed to open ledger entry");
                Err(e.into())
            },
        }
    }

    /// Attaches one `pending` recipient row per lead.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the rows cannot be written.
    pub async fn attach_recipients(&self, id: MessageId, lead_ids: &[LeadId]) -> Result<u64> {
        self.storage
            .attach_recipients(id, lead_ids, self.clock.now_utc())
            .await
            .inspect_err(|e| error!(message_id = %id, error = %e, "failed to attach recipients"))
            .map_err(Into::into)
    }

    /// Moves the entry to `sending`; called right before the relay POST.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the entry is not pending.
    pub async fn mark_sending(&self, id: MessageId) -> Result<()> {
        self.storage
            .mark_message_sending(id)
            .await
            .inspect_err(|e| error!(message_id = %id, error = %e, "failed to mark sending"))
            .map_err(Into::into)
    }

    /// Records the terminal outcome and the raw response or error text.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the entry is not `sending`, `Storage` on write
    /// failure.
    pub async fn finalize(
        &self,
        id: MessageId,
        status: MessageStatus,
        webhook_response: &str,
    ) -> Result<MessageHistory> {
        self.storage
            .finalize_message(id, status, Some(webhook_response), self.clock.now_utc())
            .await
            .inspect_err(|e| error!(message_id = %id, error = %e, "failed to finalize ledger entry"))
            .map_err(Into::into)
    }

    /// Advances recipients to `sent` after a successful dispatch.
    ///
    /// Best effort: a failure is logged and reported as zero rows, the
    /// dispatch outcome stands.
    pub async fn mark_recipients_sent(&self, id: MessageId) -> u64 {
        match self.storage.mark_recipients_sent(id, self.clock.now_utc()).await {
            Ok(count) => count,
            Err(e) => {
                warn!(message_id = %id, error = %e, "failed to mark recipients sent");
                0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::TimeZone;
    use leadrelay_core::{FilterType, MemoryStorage, MessageKind, TestClock};
    use proptest::prelude::*;

    use super::*;

    fn spec() -> DispatchSpec<'static> {
        DispatchSpec {
            kind: MessageKind::Whatsapp,
            content: "Olá",
            filter_type: FilterType::All,
            filter_value: None,
            send_only_to_new: false,
        }
    }

    fn is_well_formed(code: &str, prefix: &str) -> bool {
        let parts: Vec<_> = code.split('-').collect();
        parts.len() == 3
            && parts[0] == prefix
            && parts[1].parse::<i64>().is_ok()
            && parts[2].len() == CODE_RANDOM_LEN
            && parts[2].bytes().all(|b| CODE_ALPHABET.contains(&b))
    }

    #[test]
    fn code_has_prefix_millis_and_random_suffix() {
        let at = Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap();
        let code = generate_delivery_code(CodePrefix::Conversion, at);

        assert!(is_well_formed(&code, "CONV"), "{code}");
        assert!(code.starts_with(&format!("CONV-{}-", at.timestamp_millis())));
    }

    #[test]
    fn codes_generated_in_the_same_millisecond_differ() {
        let at = Utc::now();
        let codes: HashSet<_> =
            (0..1000).map(|_| generate_delivery_code(CodePrefix::Manual, at)).collect();
        assert_eq!(codes.len(), 1000);
    }

    proptest! {
        #[test]
        fn codes_are_always_well_formed(millis in 0i64..4_102_444_800_000) {
            let at = Utc.timestamp_millis_opt(millis).unwrap();
            for prefix in [CodePrefix::Manual, CodePrefix::NewLead, CodePrefix::Conversion] {
                let code = generate_delivery_code(prefix, at);
                prop_assert!(is_well_formed(&code, prefix.as_str()));
            }
        }
    }

    #[tokio::test]
    async fn open_writes_pending_entry() {
        let storage = Arc::new(MemoryStorage::new());
        let ledger = DeliveryLedger::new(storage.clone(), Arc::new(TestClock::new()));

        let row = ledger.open(&spec(), CodePrefix::Manual, &[]).await.unwrap();

        assert_eq!(row.status, MessageStatus::Pending);
        assert!(row.delivery_code.starts_with("MSG-"));
        assert_eq!(storage.all_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn open_surfaces_collision_as_retryable() {
        let storage = Arc::new(MemoryStorage::new());
        storage.inject_write_error(CoreError::ConstraintViolation("delivery_code".into())).await;
        let ledger = DeliveryLedger::new(storage.clone(), Arc::new(TestClock::new()));

        let err = ledger.open(&spec(), CodePrefix::Manual, &[]).await.unwrap_err();
        assert!(matches!(err, DeliveryError::DeliveryCodeCollision { .. }));
        assert!(err.is_retryable());
        assert!(storage.all_messages().await.is_empty());
    }

    #[tokio::test]
    async fn storage_failure_on_open_is_hard_error() {
        let storage = Arc::new(MemoryStorage::new());
        storage.inject_write_error(CoreError::Database("connection reset".into())).await;
        let ledger = DeliveryLedger::new(storage, Arc::new(TestClock::new()));

        let err = ledger.open(&spec(), CodePrefix::Manual, &[]).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Storage { .. }));
    }

    #[tokio::test]
    async fn finalize_twice_is_rejected() {
        let storage = Arc::new(MemoryStorage::new());
        let ledger = DeliveryLedger::new(storage.clone(), Arc::new(TestClock::new()));
        let row = ledger.open(&spec(), CodePrefix::Manual, &[]).await.unwrap();

        ledger.mark_sending(row.id).await.unwrap();
        ledger.finalize(row.id, MessageStatus::Failed, "timeout").await.unwrap();
        let err = ledger.finalize(row.id, MessageStatus::Sent, "ok").await.unwrap_err();

        assert!(matches!(err, DeliveryError::Conflict { .. }));
        let stored = storage.find_message(row.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Failed);
        assert_eq!(stored.webhook_response.as_deref(), Some("timeout"));
    }
}
