//! Repository for the key/value settings table.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{error::Result, models::SettingRow};

/// Repository for settings rows.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Loads every settings row.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn load_all(&self) -> Result<Vec<SettingRow>> {
        let rows = sqlx::query_as::<_, SettingRow>(
            "SELECT key, value FROM system_settings ORDER BY key",
        )
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows)
    }

    /// Inserts or replaces a setting.
    ///
    /// # Errors
    ///
    /// Returns error if the upsert fails.
    pub async fn upsert(&self, key: &str, value: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO system_settings (key, value, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }
}
