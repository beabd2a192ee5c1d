//! Repository for lead reads and the status write.
//!
//! Lead CRUD belongs to the surrounding application; this repository only
//! covers what the messaging pipeline needs: filtered reads with resolved
//! labels, lookup by contact, capture, and status changes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres, QueryBuilder};

use crate::{
    error::{CoreError, Result},
    models::{Lead, LeadFilter, LeadId, NewLead, StatusId},
};

const LEAD_SELECT: &str = r"
    SELECT l.id, l.name, l.whatsapp, l.email,
           l.course_id, l.postgraduate_course_id, l.event_id, l.status_id,
           COALESCE(c.name, pc.name) AS course_name,
           e.name AS event_name,
           s.name AS status_name,
           s.color AS status_color,
           l.created_at, l.updated_at
    FROM leads l
    LEFT JOIN courses c ON c.id = l.course_id
    LEFT JOIN postgraduate_courses pc ON pc.id = l.postgraduate_course_id
    LEFT JOIN events e ON e.id = l.event_id
    LEFT JOIN lead_statuses s ON s.id = l.status_id
";

/// Repository for lead database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Finds a lead by id with labels resolved.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: LeadId) -> Result<Option<Lead>> {
        let mut query = QueryBuilder::<Postgres>::new(LEAD_SELECT);
        query.push(" WHERE l.id = ").push_bind(id);

        let lead = query.build_query_as::<Lead>().fetch_optional(&*self.pool).await?;
        Ok(lead)
    }

    /// Lists leads matching `filter` ordered by capture time.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn list(&self, filter: LeadFilter, exclude_contacted: bool) -> Result<Vec<Lead>> {
        let mut query = QueryBuilder::<Postgres>::new(LEAD_SELECT);
        query.push(" WHERE TRUE");

        match filter {
            LeadFilter::All => {},
            LeadFilter::Course(course_id) => {
                query
                    .push(" AND (l.course_id = ")
                    .push_bind(course_id)
                    .push(" OR l.postgraduate_course_id = ")
                    .push_bind(course_id)
                    .push(")");
            },
            LeadFilter::Event(event_id) => {
                query.push(" AND l.event_id = ").push_bind(event_id);
            },
            LeadFilter::Status(status_id) => {
                query.push(" AND l.status_id = ").push_bind(status_id);
            },
        }

        if exclude_contacted {
            query.push(
                " AND NOT EXISTS (SELECT 1 FROM message_recipients mr WHERE mr.lead_id = l.id)",
            );
        }

        query.push(" ORDER BY l.created_at ASC, l.id ASC");

        let leads = query.build_query_as::<Lead>().fetch_all(&*self.pool).await?;
        Ok(leads)
    }

    /// Leads whose email or whatsapp equals `identifier`.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_contact(&self, identifier: &str) -> Result<Vec<Lead>> {
        let mut query = QueryBuilder::<Postgres>::new(LEAD_SELECT);
        query
            .push(" WHERE l.email = ")
            .push_bind(identifier)
            .push(" OR l.whatsapp = ")
            .push_bind(identifier)
            .push(" ORDER BY l.created_at ASC, l.id ASC");

        let leads = query.build_query_as::<Lead>().fetch_all(&*self.pool).await?;
        Ok(leads)
    }

    /// Inserts a captured lead.
    ///
    /// # Errors
    ///
    /// Returns `ConstraintViolation` if a referenced course, event or status
    /// does not exist.
    pub async fn insert(&self, id: LeadId, lead: &NewLead, now: DateTime<Utc>) -> Result<()> {
        self.insert_impl(&*self.pool, id, lead, now).await
    }

    async fn insert_impl<'e, E>(
        &self,
        executor: E,
        id: LeadId,
        lead: &NewLead,
        now: DateTime<Utc>,
    ) -> Result<()>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r"
            INSERT INTO leads (
                id, name, whatsapp, email, course_id, postgraduate_course_id,
                event_id, status_id, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            ",
        )
        .bind(id)
        .bind(&lead.name)
        .bind(&lead.whatsapp)
        .bind(&lead.email)
        .bind(lead.course_id)
        .bind(lead.postgraduate_course_id)
        .bind(lead.event_id)
        .bind(lead.status_id)
        .bind(now)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Sets the status of a lead and returns the status it had before.
    ///
    /// The previous value is read under a row lock so concurrent updates
    /// each observe the status the other one wrote.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the lead does not exist.
    pub async fn update_status(
        &self,
        id: LeadId,
        status_id: Option<StatusId>,
        now: DateTime<Utc>,
    ) -> Result<Option<StatusId>> {
        let mut tx = self.pool.begin().await?;

        let previous: Option<(Option<StatusId>,)> =
            sqlx::query_as("SELECT status_id FROM leads WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((previous,)) = previous else {
            return Err(CoreError::NotFound(format!("lead {id} not found")));
        };

        sqlx::query("UPDATE leads SET status_id = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(previous)
    }
}
