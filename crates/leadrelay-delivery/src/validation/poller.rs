use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use leadrelay_core::{Clock, MessagingStorage, ValidationId, ValidationStatus};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::{
    error::{DeliveryError, Result},
    payload::join_under,
    DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL,
};

/// Status of a validation row as seen by the poller.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ValidationSnapshot {
    /// Current status.
    pub status: ValidationStatus,
    /// Explanation, once resolved.
    #[serde(default)]
    pub response_message: Option<String>,
}

/// Where the poller reads validation status from.
#[async_trait]
pub trait ValidationStatusSource: Send + Sync + std::fmt::Debug {
    /// Reads the current status of `id`.
    async fn current(&self, id: ValidationId) -> Result<ValidationSnapshot>;
}

/// Reads status straight from storage.
#[derive(Debug, Clone)]
pub struct StorageStatusSource {
    storage: Arc<dyn MessagingStorage>,
}

impl StorageStatusSource {
    /// Creates a source over the given storage.
    pub fn new(storage: Arc<dyn MessagingStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ValidationStatusSource for StorageStatusSource {
    async fn current(&self, id: ValidationId) -> Result<ValidationSnapshot> {
        let row = self
            .storage
            .find_validation(id)
            .await?
            .ok_or_else(|| DeliveryError::not_found(format!("validation {id} not found")))?;
        Ok(ValidationSnapshot { status: row.status, response_message: row.response_message })
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    data: Option<ValidationSnapshot>,
    error: Option<String>,
}

/// Reads status from the service's `GET /api/whatsapp-validations/{id}`
/// below its base URL, path prefix included.
#[derive(Debug, Clone)]
pub struct HttpStatusSource {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpStatusSource {
    /// Creates a source against the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the HTTP client cannot be built.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build().map_err(|e| {
            DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
        })?;
        Ok(Self { client, base_url, timeout })
    }

    fn status_url(&self, id: ValidationId) -> Result<Url> {
        join_under(&self.base_url, &format!("api/whatsapp-validations/{id}"))
            .map_err(|e| DeliveryError::invalid_url(self.base_url.as_str(), e))
    }
}

#[async_trait]
impl ValidationStatusSource for HttpStatusSource {
    async fn current(&self, id: ValidationId) -> Result<ValidationSnapshot> {
        let url = self.status_url(id)?;
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                DeliveryError::timeout(self.timeout.as_secs())
            } else {
                DeliveryError::network(e.to_string())
            }
        })?;

        let status_code = response.status().as_u16();
        if status_code == 404 {
            return Err(DeliveryError::not_found(format!("validation {id} not found")));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| DeliveryError::network(format!("failed to read status body: {e}")))?;
        if !(200..300).contains(&status_code) {
            return Err(DeliveryError::relay_rejected(
                status_code,
                String::from_utf8_lossy(&body).into_owned(),
            ));
        }

        let envelope: Envelope = serde_json::from_slice(&body)
            .map_err(|e| DeliveryError::bad_request(format!("unexpected status body: {e}")))?;
        match envelope {
            Envelope { success: true, data: Some(snapshot), .. } => Ok(snapshot),
            Envelope { error, .. } => Err(DeliveryError::bad_request(
                error.unwrap_or_else(|| "status response carried no data".to_string()),
            )),
        }
    }
}

/// How a poll ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The number is on WhatsApp.
    Valid {
        /// Explanation from the service.
        message: Option<String>,
    },
    /// The number is not on WhatsApp.
    Invalid {
        /// Explanation from the service.
        message: Option<String>,
    },
    /// The service or the forward failed.
    Error {
        /// Diagnostic text.
        message: Option<String>,
    },
    /// Every attempt saw `pending`.
    TimedOut {
        /// Attempts made.
        attempts: u32,
    },
    /// The caller stopped waiting.
    Cancelled,
}

/// Bounded fixed-interval wait for a validation to resolve.
///
/// The poller never writes: a timed-out validation stays in whatever state
/// the validation service last left it.
#[derive(Debug, Clone)]
pub struct ValidationPoller {
    source: Arc<dyn ValidationStatusSource>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    max_attempts: u32,
}

impl ValidationPoller {
    /// Creates a poller with a one second interval and sixty attempts.
    pub fn new(source: Arc<dyn ValidationStatusSource>, clock: Arc<dyn Clock>) -> Self {
        Self { source, clock, interval: DEFAULT_POLL_INTERVAL, max_attempts: DEFAULT_POLL_ATTEMPTS }
    }

    /// Overrides the wait between attempts.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Overrides the attempt budget.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Waits an interval, reads the status, and repeats until the row is
    /// terminal, the attempts run out or `cancel` fires.
    ///
    /// Transient read failures count as an attempt and the poll continues.
    ///
    /// # Errors
    ///
    /// Returns non-retryable read errors such as `NotFound`.
    pub async fn poll(&self, id: ValidationId, cancel: &CancellationToken) -> Result<PollOutcome> {
        for attempt in 1..=self.max_attempts {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(validation_id = %id, attempt, "validation poll cancelled");
                    return Ok(PollOutcome::Cancelled);
                }
                () = self.clock.sleep(self.interval) => {}
            }

            match self.source.current(id).await {
                Ok(snapshot) => {
                    let message = snapshot.response_message;
                    match snapshot.status {
                        ValidationStatus::Pending => {},
                        ValidationStatus::Valid => return Ok(PollOutcome::Valid { message }),
                        ValidationStatus::Invalid => return Ok(PollOutcome::Invalid { message }),
                        ValidationStatus::Error => return Ok(PollOutcome::Error { message }),
                    }
                },
                Err(e) if e.is_retryable() => {
                    warn!(validation_id = %id, attempt, error = %e, "validation status read failed");
                },
                Err(e) => return Err(e),
            }
        }

        debug!(validation_id = %id, attempts = self.max_attempts, "validation poll exhausted");
        Ok(PollOutcome::TimedOut { attempts: self.max_attempts })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use leadrelay_core::TestClock;

    use super::*;

    /// Returns a scripted sequence of statuses, then repeats the last.
    #[derive(Debug)]
    struct Scripted {
        statuses: Mutex<Vec<ValidationStatus>>,
        reads: Mutex<u32>,
    }

    impl Scripted {
        fn new(mut statuses: Vec<ValidationStatus>) -> Arc<Self> {
            statuses.reverse();
            Arc::new(Self { statuses: Mutex::new(statuses), reads: Mutex::new(0) })
        }

        fn reads(&self) -> u32 {
            *self.reads.lock().unwrap()
        }
    }

    #[async_trait]
    impl ValidationStatusSource for Scripted {
        async fn current(&self, _id: ValidationId) -> Result<ValidationSnapshot> {
            *self.reads.lock().unwrap() += 1;
            let mut statuses = self.statuses.lock().unwrap();
            let status = if statuses.len() > 1 {
                statuses.pop().unwrap()
            } else {
                statuses[0]
            };
            Ok(ValidationSnapshot { status, response_message: None })
        }
    }

    #[tokio::test]
    async fn first_terminal_status_ends_poll() {
        let source = Scripted::new(vec![
            ValidationStatus::Pending,
            ValidationStatus::Pending,
            ValidationStatus::Invalid,
        ]);
        let clock = TestClock::new();
        let poller = ValidationPoller::new(source.clone(), Arc::new(clock.clone()));

        let outcome = poller.poll(ValidationId::new(), &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome, PollOutcome::Invalid { message: None });
        assert_eq!(source.reads(), 3);
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn gives_up_after_sixty_attempts() {
        let source = Scripted::new(vec![ValidationStatus::Pending]);
        let clock = TestClock::new();
        let poller = ValidationPoller::new(source.clone(), Arc::new(clock.clone()));

        let outcome = poller.poll(ValidationId::new(), &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome, PollOutcome::TimedOut { attempts: 60 });
        assert_eq!(source.reads(), 60);
        assert_eq!(clock.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn http_source_polls_below_the_base_path() {
        let id = ValidationId::new();
        for raw in ["https://host.example.com/crm/", "https://host.example.com/crm"] {
            let source =
                HttpStatusSource::new(Url::parse(raw).unwrap(), Duration::from_secs(1)).unwrap();

            assert_eq!(
                source.status_url(id).unwrap().as_str(),
                format!("https://host.example.com/crm/api/whatsapp-validations/{id}"),
                "{raw}"
            );
        }
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_read() {
        let source = Scripted::new(vec![ValidationStatus::Pending]);
        let poller = ValidationPoller::new(source.clone(), Arc::new(TestClock::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = poller.poll(ValidationId::new(), &cancel).await.unwrap();

        assert_eq!(outcome, PollOutcome::Cancelled);
        assert_eq!(source.reads(), 0);
    }
}
