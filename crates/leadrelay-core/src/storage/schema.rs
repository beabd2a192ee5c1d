//! Idempotent schema setup.
//!
//! The lookup tables (courses, events, statuses) and leads are owned by the
//! surrounding CRUD application; they are created here only so a fresh
//! database can run the messaging pipeline on its own.

use sqlx::PgPool;
use tracing::debug;

use crate::error::Result;

const STATEMENTS: &[(&str, &str)] = &[
    (
        "courses",
        r"
        CREATE TABLE IF NOT EXISTS courses (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            name TEXT NOT NULL
        )
        ",
    ),
    (
        "postgraduate_courses",
        r"
        CREATE TABLE IF NOT EXISTS postgraduate_courses (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            name TEXT NOT NULL
        )
        ",
    ),
    (
        "events",
        r"
        CREATE TABLE IF NOT EXISTS events (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            name TEXT NOT NULL
        )
        ",
    ),
    (
        "lead_statuses",
        r"
        CREATE TABLE IF NOT EXISTS lead_statuses (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            name TEXT NOT NULL,
            color TEXT
        )
        ",
    ),
    (
        "leads",
        r"
        CREATE TABLE IF NOT EXISTS leads (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            name TEXT NOT NULL,
            whatsapp TEXT,
            email TEXT,
            course_id UUID REFERENCES courses(id),
            postgraduate_course_id UUID REFERENCES postgraduate_courses(id),
            event_id UUID REFERENCES events(id),
            status_id UUID REFERENCES lead_statuses(id),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    ),
    (
        "message_templates",
        r"
        CREATE TABLE IF NOT EXISTS message_templates (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            name TEXT NOT NULL,
            content TEXT NOT NULL,
            type TEXT NOT NULL CHECK (type IN ('whatsapp', 'email', 'sms')),
            is_default BOOLEAN NOT NULL DEFAULT FALSE,
            is_conversion_default BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    ),
    (
        "message_templates default index",
        r"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_message_templates_single_default
        ON message_templates ((is_default)) WHERE is_default
        ",
    ),
    (
        "message_templates conversion default index",
        r"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_message_templates_single_conversion_default
        ON message_templates ((is_conversion_default)) WHERE is_conversion_default
        ",
    ),
    (
        "system_settings",
        r"
        CREATE TABLE IF NOT EXISTS system_settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    ),
    (
        "message_history",
        r"
        CREATE TABLE IF NOT EXISTS message_history (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            type TEXT NOT NULL,
            content TEXT NOT NULL,
            delivery_code TEXT NOT NULL UNIQUE,
            filter_type TEXT NOT NULL,
            filter_value TEXT,
            recipients_count INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'sending', 'sent', 'failed')),
            webhook_response TEXT,
            sent_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    ),
    (
        "message_recipients",
        r"
        CREATE TABLE IF NOT EXISTS message_recipients (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            message_history_id UUID NOT NULL REFERENCES message_history(id) ON DELETE CASCADE,
            lead_id UUID NOT NULL REFERENCES leads(id) ON DELETE CASCADE,
            delivery_status TEXT NOT NULL DEFAULT 'pending'
                CHECK (delivery_status IN ('pending', 'sent', 'delivered', 'failed')),
            sent_at TIMESTAMPTZ,
            delivered_at TIMESTAMPTZ,
            error_message TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (message_history_id, lead_id)
        )
        ",
    ),
    (
        "message_recipients lead index",
        r"
        CREATE INDEX IF NOT EXISTS idx_message_recipients_lead
        ON message_recipients(lead_id)
        ",
    ),
    (
        "whatsapp_validations",
        r"
        CREATE TABLE IF NOT EXISTS whatsapp_validations (
            id UUID PRIMARY KEY,
            whatsapp TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'valid', 'invalid', 'error')),
            response_message TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            validated_at TIMESTAMPTZ
        )
        ",
    ),
];

/// Creates all tables and indexes that do not exist yet.
///
/// # Errors
///
/// Stops at the first failing statement; the object it creates is logged.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    for (object, statement) in STATEMENTS {
        debug!(object, "ensuring schema object");
        sqlx::query(statement).execute(pool).await.inspect_err(|e| {
            tracing::error!(object, error = %e, "schema statement failed");
        })?;
    }
    Ok(())
}

/// Names of the schema objects in creation order.
pub fn objects() -> impl Iterator<Item = &'static str> {
    STATEMENTS.iter().map(|(object, _)| *object)
}
