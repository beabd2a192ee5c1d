//! Message dispatch: resolve recipients, write the ledger, POST to the relay,
//! finalize.
//!
//! ```text
//! resolve ──▶ open (pending) ──▶ attach recipients ──▶ sending ──▶ POST
//!                                                                  │
//!                          sent + recipients sent ◀── 2xx ─────────┤
//!                          failed + diagnostic    ◀── other ───────┘
//! ```
//!
//! The ledger rows exist before the POST is issued. Every POST outcome ends
//! in exactly one terminal `finalize`; only a storage failure can leave an
//! entry short of a terminal state, and that is reported as a hard error.

use std::sync::Arc;

use leadrelay_core::{Clock, Lead, LeadId, MessageHistory, MessageId, MessageKind, MessageStatus};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    client::{parse_webhook_url, RelayResponse, WebhookClient},
    error::{DeliveryError, Result},
    ledger::{CodePrefix, DeliveryLedger},
    payload::{CallbackUrls, DispatchPayload, DispatchSpec},
    resolver::{RecipientFilter, RecipientResolver},
};

/// Opening attempts before a delivery code collision is reported.
const MAX_OPEN_ATTEMPTS: u32 = 3;

/// What to send and where.
#[derive(Debug, Clone)]
pub struct SendRequest<'a> {
    /// Channel.
    pub kind: MessageKind,
    /// Message body.
    pub content: &'a str,
    /// Recipient selection.
    pub filter: RecipientFilter,
    /// Skip leads that were ever contacted.
    pub send_only_to_new: bool,
    /// Relay URL for the channel.
    pub webhook_url: &'a str,
    /// Delivery code prefix.
    pub prefix: CodePrefix,
}

/// Outcome of a send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendResult {
    /// The filter matched nobody; no ledger rows were written.
    NoRecipients,
    /// A ledger entry was opened and finalized.
    Dispatched(DispatchReport),
}

/// Final state of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Ledger entry.
    pub message_id: MessageId,
    /// Correlation token.
    pub delivery_code: String,
    /// Recipients attached to the entry.
    pub recipients_count: usize,
    /// Terminal status.
    pub status: MessageStatus,
    /// Relay HTTP status, absent on transport failure.
    pub http_status: Option<u16>,
    /// Raw response body or diagnostic text.
    pub webhook_response: String,
}

impl DispatchReport {
    /// Whether the relay accepted the dispatch.
    pub fn is_sent(&self) -> bool {
        self.status == MessageStatus::Sent
    }
}

/// Runs sends end to end.
#[derive(Debug, Clone)]
pub struct MessageDispatcher {
    resolver: RecipientResolver,
    ledger: DeliveryLedger,
    client: WebhookClient,
    callbacks: CallbackUrls,
    clock: Arc<dyn Clock>,
}

impl MessageDispatcher {
    /// Creates a dispatcher.
    pub fn new(
        resolver: RecipientResolver,
        ledger: DeliveryLedger,
        client: WebhookClient,
        callbacks: CallbackUrls,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { resolver, ledger, client, callbacks, clock }
    }

    /// Resolves recipients and dispatches to them.
    ///
    /// # Errors
    ///
    /// - resolver errors (`BadRequest`, `NotFound`, `InvalidRecipient`)
    /// - `InvalidUrl` before any ledger write
    /// - `DeliveryCodeCollision` if every opening attempt collided
    /// - `Storage` if a ledger write failed
    ///
    /// Relay rejections, timeouts and network failures are not errors; they
    /// are recorded in the returned report.
    pub async fn send(&self, request: &SendRequest<'_>) -> Result<SendResult> {
        let leads = self
            .resolver
            .resolve(&request.filter, request.send_only_to_new, request.kind)
            .await?;

        if leads.is_empty() {
            info!(filter_type = %request.filter.filter_type(), "no recipients matched, nothing sent");
            return Ok(SendResult::NoRecipients);
        }

        parse_webhook_url(request.webhook_url)?;

        let filter_value = request.filter.filter_value();
        let spec = DispatchSpec {
            kind: request.kind,
            content: request.content,
            filter_type: request.filter.filter_type(),
            filter_value: filter_value.as_deref(),
            send_only_to_new: request.send_only_to_new,
        };

        self.dispatch(&spec, request.prefix, &leads, request.webhook_url)
            .await
            .map(SendResult::Dispatched)
    }

    /// Writes the ledger for `leads` and dispatches them.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send) after recipient resolution.
    pub async fn dispatch(
        &self,
        spec: &DispatchSpec<'_>,
        prefix: CodePrefix,
        leads: &[Lead],
        webhook_url: &str,
    ) -> Result<DispatchReport> {
        let entry = self.open_with_retry(spec, prefix, leads).await?;
        let span = info_span!(
            "dispatch",
            message_id = %entry.id,
            delivery_code = %entry.delivery_code,
            recipients = leads.len()
        );

        async move {
            let lead_ids: Vec<LeadId> = leads.iter().map(|l| l.id).collect();
            self.ledger.attach_recipients(entry.id, &lead_ids).await?;
            self.ledger.mark_sending(entry.id).await?;

            let payload = DispatchPayload::build(
                entry.id,
                &entry.delivery_code,
                spec,
                leads,
                &self.callbacks,
                self.clock.now_utc(),
            );

            let outcome = self.client.post_json(webhook_url, &payload).await;
            let (status, http_status, text) = interpret(outcome);

            self.ledger.finalize(entry.id, status, &text).await.map_err(|e| {
                error!(error = %e, "dispatch outcome could not be recorded");
                DeliveryError::storage(format!("failed to finalize message {}: {e}", entry.id))
            })?;

            if status == MessageStatus::Sent {
                let advanced = self.ledger.mark_recipients_sent(entry.id).await;
                info!(recipients_sent = advanced, "relay accepted dispatch");
            }

            Ok(DispatchReport {
                message_id: entry.id,
                delivery_code: entry.delivery_code.clone(),
                recipients_count: leads.len(),
                status,
                http_status,
                webhook_response: text,
            })
        }
        .instrument(span)
        .await
    }

    async fn open_with_retry(
        &self,
        spec: &DispatchSpec<'_>,
        prefix: CodePrefix,
        leads: &[Lead],
    ) -> Result<MessageHistory> {
        let mut attempt = 1;
        loop {
            match self.ledger.open(spec, prefix, leads).await {
                Err(DeliveryError::DeliveryCodeCollision { code }) if attempt < MAX_OPEN_ATTEMPTS => {
                    debug!(attempt, code, "retrying ledger open with a new delivery code");
                    attempt += 1;
                },
                other => return other,
            }
        }
    }
}

fn interpret(outcome: Result<RelayResponse>) -> (MessageStatus, Option<u16>, String) {
    match outcome {
        Ok(response) if response.is_success() => {
            (MessageStatus::Sent, Some(response.status_code), response.body)
        },
        Ok(response) => {
            warn!(status = response.status_code, "relay rejected dispatch");
            let text = describe_rejection(response.status_code, &response.body);
            (MessageStatus::Failed, Some(response.status_code), text)
        },
        Err(DeliveryError::Timeout { timeout_seconds }) => {
            warn!(timeout_seconds, "relay did not answer in time");
            (MessageStatus::Failed, None, timeout_marker(timeout_seconds))
        },
        Err(e) => {
            warn!(error = %e, "relay unreachable");
            (MessageStatus::Failed, None, e.to_string())
        },
    }
}

/// Text stored for a dispatch that hit the hard bound.
pub fn timeout_marker(timeout_seconds: u64) -> String {
    format!("timeout: no response within {timeout_seconds}s")
}

/// Operator-facing explanation for a relay status code, followed by the raw
/// body.
pub fn describe_rejection(status_code: u16, body: &str) -> String {
    let hint = match status_code {
        400 => "relay rejected the payload as malformed, check the fields it expects".to_string(),
        404 => "relay endpoint not found, check the configured webhook URL".to_string(),
        405 => "relay does not accept POST at this URL, check the webhook URL and its HTTP method"
            .to_string(),
        500 => "relay failed internally, check the relay logs".to_string(),
        400..=499 => format!("relay refused the request with HTTP {status_code}"),
        500..=599 => format!("relay unavailable with HTTP {status_code}"),
        _ => format!("unexpected relay response HTTP {status_code}"),
    };

    if body.is_empty() {
        format!("HTTP {status_code}: {hint}")
    } else {
        format!("HTTP {status_code}: {hint}. Response: {body}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_statuses_get_specific_hints() {
        assert!(describe_rejection(404, "").contains("webhook URL"));
        assert!(describe_rejection(405, "Method Not Allowed").contains("does not accept POST"));
        assert!(describe_rejection(400, "").contains("malformed"));
        assert!(describe_rejection(500, "").contains("failed internally"));
    }

    #[test]
    fn other_statuses_get_generic_hints() {
        assert_eq!(describe_rejection(422, ""), "HTTP 422: relay refused the request with HTTP 422");
        assert!(describe_rejection(503, "busy").ends_with("Response: busy"));
        assert!(describe_rejection(302, "").contains("unexpected"));
    }

    #[test]
    fn timeout_marker_names_bound() {
        assert_eq!(timeout_marker(30), "timeout: no response within 30s");
    }
}
