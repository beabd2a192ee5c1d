//! Repository for message recipient rows, the per-lead half of the ledger.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::Result,
    models::{LeadId, MessageId, MessageRecipient, RecipientStatus, RecipientUpdate},
};

/// Repository for message recipient database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Creates one `pending` row per lead in a single statement.
    ///
    /// # Errors
    ///
    /// Returns `ConstraintViolation` if a lead is attached twice.
    pub async fn create_batch(
        &self,
        message_id: MessageId,
        lead_ids: &[LeadId],
        now: DateTime<Utc>,
    ) -> Result<u64> {
        if lead_ids.is_empty() {
            return Ok(0);
        }

        let ids: Vec<Uuid> = lead_ids.iter().map(|_| Uuid::new_v4()).collect();
        let leads: Vec<Uuid> = lead_ids.iter().map(|id| id.0).collect();

        let result = sqlx::query(
            r"
            INSERT INTO message_recipients (
                id, message_history_id, lead_id, delivery_status, created_at
            )
            SELECT r.id, $1, r.lead_id, 'pending', $4
            FROM UNNEST($2::uuid[], $3::uuid[]) AS r(id, lead_id)
            ",
        )
        .bind(message_id)
        .bind(&ids)
        .bind(&leads)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Advances the message's `pending` rows to `sent`.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_sent(&self, message_id: MessageId, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE message_recipients
            SET delivery_status = 'sent', sent_at = $2
            WHERE message_history_id = $1 AND delivery_status = 'pending'
            ",
        )
        .bind(message_id)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Applies a relay-reported status to the (message, lead) row.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn update_status(
        &self,
        message_id: MessageId,
        lead_id: LeadId,
        update: &RecipientUpdate,
    ) -> Result<u64> {
        let error_message =
            if update.status == RecipientStatus::Failed { update.error_message.as_deref() } else { None };

        let result = sqlx::query(
            r"
            UPDATE message_recipients
            SET delivery_status = $3,
                delivered_at = CASE
                    WHEN $3 = 'delivered' AND delivery_status = 'delivered'
                        THEN COALESCE(delivered_at, $4)
                    WHEN $3 = 'delivered' THEN $4
                    ELSE NULL
                END,
                error_message = $5
            WHERE message_history_id = $1 AND lead_id = $2
            ",
        )
        .bind(message_id)
        .bind(lead_id)
        .bind(update.status)
        .bind(update.at)
        .bind(error_message)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Rows of a message in creation order.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_message(&self, message_id: MessageId) -> Result<Vec<MessageRecipient>> {
        let rows = sqlx::query_as::<_, MessageRecipient>(
            r"
            SELECT id, message_history_id, lead_id, delivery_status,
                   sent_at, delivered_at, error_message, created_at
            FROM message_recipients
            WHERE message_history_id = $1
            ORDER BY created_at ASC, id ASC
            ",
        )
        .bind(message_id)
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows)
    }
}
