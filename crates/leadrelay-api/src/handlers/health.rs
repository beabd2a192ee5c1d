//! Orchestrator probes.
//!
//! `/health` and `/ready` ping storage and answer 503 when it is down;
//! `/live` only proves the process serves HTTP.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use leadrelay_core::{Clock, MessagingStorage};
use serde::Serialize;
use tracing::{debug, error, instrument};

use crate::AppState;

/// Body of `/health` and `/ready`.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    /// `healthy` or `unhealthy`.
    pub status: Overall,
    /// When the probe ran.
    pub timestamp: DateTime<Utc>,
    /// Per-dependency results.
    pub checks: Checks,
    /// Crate version.
    pub version: &'static str,
}

/// Probe verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Overall {
    /// Storage answered.
    Healthy,
    /// Storage did not answer.
    Unhealthy,
}

/// Dependencies probed.
#[derive(Debug, Serialize)]
pub struct Checks {
    /// The ledger store.
    pub database: DependencyCheck,
}

/// Result of probing one dependency.
#[derive(Debug, Serialize)]
pub struct DependencyCheck {
    /// `up` or `down`.
    pub status: &'static str,
    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Probe latency.
    pub response_time_ms: u64,
}

/// Pings storage and assembles a report.
pub async fn probe(clock: &dyn Clock, storage: &dyn MessagingStorage) -> HealthReport {
    let started = clock.now();
    let outcome = storage.ping().await;
    let response_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let (status, database) = match outcome {
        Ok(()) => (Overall::Healthy, DependencyCheck { status: "up", message: None, response_time_ms }),
        Err(e) => {
            error!(error = %e, "storage ping failed");
            let message = Some(format!("Database connection failed: {e}"));
            (Overall::Unhealthy, DependencyCheck { status: "down", message, response_time_ms })
        },
    };

    HealthReport {
        status,
        timestamp: clock.now_utc(),
        checks: Checks { database },
        version: env!("CARGO_PKG_VERSION"),
    }
}

/// `GET /health`.
#[instrument(name = "health_check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Response {
    let report = probe(state.clock.as_ref(), state.storage.as_ref()).await;
    debug!(status = ?report.status, "health probe finished");

    let code = match report.status {
        Overall::Healthy => StatusCode::OK,
        Overall::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(report)).into_response()
}

/// `GET /ready`; ready means storage answers.
#[instrument(name = "readiness_check", skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Response {
    health_check(State(state)).await
}

/// `GET /live`.
#[instrument(name = "liveness_check", skip(state))]
pub async fn liveness_check(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({
        "status": "alive",
        "timestamp": state.clock.now_utc(),
        "service": "leadrelay-api",
    }))
    .into_response()
}
