//! Repository for message history rows, the per-dispatch half of the ledger.
//!
//! Status only moves forward: `pending` to `sending` when the recipients are
//! attached, then `sending` to `sent` or `failed` exactly once. Updates are
//! guarded on the expected current status so a second finalize is rejected
//! instead of overwriting the first outcome.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::{CoreError, Result},
    models::{MessageHistory, MessageId, MessageStatus, NewMessage},
};

const MESSAGE_COLUMNS: &str = "id, type, content, delivery_code, filter_type, filter_value, \
     recipients_count, status, webhook_response, sent_at, created_at";

/// Repository for message history database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Opens a ledger entry in `pending`.
    ///
    /// # Errors
    ///
    /// Returns `ConstraintViolation` if the delivery code is already taken.
    pub async fn create(&self, message: &NewMessage) -> Result<MessageHistory> {
        let row = sqlx::query_as::<_, MessageHistory>(&format!(
            r"
            INSERT INTO message_history (
                id, type, content, delivery_code, filter_type, filter_value,
                recipients_count, status, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8)
            RETURNING {MESSAGE_COLUMNS}
            "
        ))
        .bind(message.id)
        .bind(message.kind)
        .bind(&message.content)
        .bind(&message.delivery_code)
        .bind(message.filter_type)
        .bind(&message.filter_value)
        .bind(message.recipients_count)
        .bind(message.created_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(row)
    }

    /// Moves an entry from `pending` to `sending`.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the entry is not pending.
    pub async fn mark_sending(&self, id: MessageId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE message_history SET status = 'sending' WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::Conflict(format!("message {id} is not pending")));
        }
        Ok(())
    }

    /// Records the dispatch outcome of a `sending` entry.
    ///
    /// `sent_at` is stamped only for `sent`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a non-terminal status and `Conflict` if the
    /// entry is not in `sending`.
    pub async fn finalize(
        &self,
        id: MessageId,
        status: MessageStatus,
        webhook_response: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<MessageHistory> {
        if !status.is_terminal() {
            return Err(CoreError::InvalidInput(format!("cannot finalize message as {status}")));
        }
        let sent_at = (status == MessageStatus::Sent).then_some(now);

        let row = sqlx::query_as::<_, MessageHistory>(&format!(
            r"
            UPDATE message_history
            SET status = $2, webhook_response = $3, sent_at = $4
            WHERE id = $1 AND status = 'sending'
            RETURNING {MESSAGE_COLUMNS}
            "
        ))
        .bind(id)
        .bind(status)
        .bind(webhook_response)
        .bind(sent_at)
        .fetch_optional(&*self.pool)
        .await?;

        row.ok_or_else(|| CoreError::Conflict(format!("message {id} is not sending")))
    }

    /// Finds an entry by id.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: MessageId) -> Result<Option<MessageHistory>> {
        let row = sqlx::query_as::<_, MessageHistory>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM message_history WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(row)
    }

    /// Finds an entry by delivery code.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_delivery_code(&self, code: &str) -> Result<Option<MessageHistory>> {
        let row = sqlx::query_as::<_, MessageHistory>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM message_history WHERE delivery_code = $1"
        ))
        .bind(code)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(row)
    }
}
