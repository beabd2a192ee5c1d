//! Repository for message templates and their automatic-send slots.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::{CoreError, Result},
    models::{DefaultSlot, MessageTemplate, TemplateId},
};

const TEMPLATE_COLUMNS: &str =
    "id, name, content, type, is_default, is_conversion_default, created_at, updated_at";

/// Repository for message template database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Finds a template by id.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: TemplateId) -> Result<Option<MessageTemplate>> {
        let template = sqlx::query_as::<_, MessageTemplate>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM message_templates WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(template)
    }

    /// Finds the template occupying `slot`.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_default(&self, slot: DefaultSlot) -> Result<Option<MessageTemplate>> {
        let template = sqlx::query_as::<_, MessageTemplate>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM message_templates WHERE {} ORDER BY updated_at DESC LIMIT 1",
            slot.column()
        ))
        .fetch_optional(&*self.pool)
        .await?;

        Ok(template)
    }

    /// Inserts a template.
    ///
    /// # Errors
    ///
    /// Returns `ConstraintViolation` if the template claims a slot that is
    /// already taken.
    pub async fn insert(&self, template: &MessageTemplate) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO message_templates (
                id, name, content, type, is_default, is_conversion_default,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(template.id)
        .bind(&template.name)
        .bind(&template.content)
        .bind(template.kind)
        .bind(template.is_default)
        .bind(template.is_conversion_default)
        .bind(template.created_at)
        .bind(template.updated_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Moves `slot` to template `id`.
    ///
    /// The previous holder is cleared before the new one is set, both in one
    /// transaction. The partial unique index on the slot column is checked
    /// per row, so the clear must come first; the same index rejects a
    /// concurrent writer instead of letting both win.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the template does not exist.
    pub async fn set_default(
        &self,
        id: TemplateId,
        slot: DefaultSlot,
        now: DateTime<Utc>,
    ) -> Result<MessageTemplate> {
        let column = slot.column();
        let mut tx = self.pool.begin().await?;

        let exists: Option<(TemplateId,)> =
            sqlx::query_as("SELECT id FROM message_templates WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Err(CoreError::NotFound(format!("template {id} not found")));
        }

        sqlx::query(&format!(
            "UPDATE message_templates SET {column} = FALSE, updated_at = $2 \
             WHERE {column} AND id <> $1"
        ))
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "UPDATE message_templates SET {column} = TRUE, updated_at = $2 WHERE id = $1"
        ))
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let template = sqlx::query_as::<_, MessageTemplate>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM message_templates WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(template)
    }
}
