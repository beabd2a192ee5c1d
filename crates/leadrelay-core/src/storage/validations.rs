//! Repository for phone validation requests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::{CoreError, Result},
    models::{ValidationId, ValidationStatus, WhatsAppValidation},
};

/// Repository for validation database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Records a validation request.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the id was already used.
    pub async fn create(&self, validation: &WhatsAppValidation) -> Result<()> {
        let result = sqlx::query(
            r"
            INSERT INTO whatsapp_validations (
                id, whatsapp, status, response_message, created_at, validated_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(validation.id)
        .bind(&validation.whatsapp)
        .bind(validation.status)
        .bind(&validation.response_message)
        .bind(validation.created_at)
        .bind(validation.validated_at)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::Conflict(format!("validation {} already exists", validation.id)));
        }
        Ok(())
    }

    /// Finds a validation by id.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: ValidationId) -> Result<Option<WhatsAppValidation>> {
        let row = sqlx::query_as::<_, WhatsAppValidation>(
            r"
            SELECT id, whatsapp, status, response_message, created_at, validated_at
            FROM whatsapp_validations
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(row)
    }

    /// Moves a pending validation to a terminal status.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn resolve(
        &self,
        id: ValidationId,
        status: ValidationStatus,
        response_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE whatsapp_validations
            SET status = $2, response_message = $3, validated_at = $4
            WHERE id = $1 AND status = 'pending'
            ",
        )
        .bind(id)
        .bind(status)
        .bind(response_message)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
