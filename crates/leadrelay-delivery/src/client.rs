//! HTTP client for relay and validation-service POSTs.
//!
//! Every call is bounded by a hard timeout covering connect, send and body
//! read. Transport problems are categorized into `InvalidUrl`, `Timeout` and
//! `NetworkError`; any HTTP response, 2xx or not, is returned to the caller
//! to interpret.

use std::time::Duration;

use bytes::Bytes;
use reqwest::Response;
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};
use url::Url;

use crate::error::{DeliveryError, Result};

/// Stored response bodies are cut to this many bytes.
const MAX_STORED_BODY_BYTES: usize = 8 * 1024;

/// Configuration for the webhook client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Hard bound for one POST including the body read.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::DEFAULT_DISPATCH_TIMEOUT_SECONDS),
            user_agent: "LeadRelay/1.0".to_string(),
            max_redirects: 3,
        }
    }
}

/// What the remote end answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body, truncated for storage.
    pub body: String,
    /// Time from send to body read.
    pub duration: Duration,
}

impl RelayResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// JSON POST client shared by dispatch and validation.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl WebhookClient {
    /// Creates a client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the HTTP client cannot be built.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// The configured hard bound.
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// POSTs `payload` as JSON to `url`.
    ///
    /// # Errors
    ///
    /// - `InvalidUrl` when `url` does not parse as http(s); nothing is sent
    /// - `Timeout` when no complete response arrives within the bound
    /// - `NetworkError` for connection failures
    pub async fn post_json<T>(&self, url: &str, payload: &T) -> Result<RelayResponse>
    where
        T: Serialize + ?Sized,
    {
        let target = parse_webhook_url(url)?;
        let body = Bytes::from(serde_json::to_vec(payload).map_err(|e| {
            DeliveryError::bad_request(format!("payload could not be serialized: {e}"))
        })?);

        let span = info_span!("webhook_post", url = %target, bytes = body.len());

        async move {
            let start = std::time::Instant::now();
            let bound = self.config.timeout;

            let request = self
                .client
                .post(target)
                .header("content-type", "application/json")
                .body(body);

            let outcome = tokio::time::timeout(bound, async {
                let response = request.send().await?;
                read_response(response).await
            })
            .await;

            let (status_code, body) = match outcome {
                Ok(Ok(parts)) => parts,
                Ok(Err(e)) => {
                    tracing::warn!(duration_ms = start.elapsed().as_millis(), "Request failed: {}", e);
                    return Err(categorize(&e, bound));
                },
                Err(_) => {
                    tracing::warn!(timeout_secs = bound.as_secs(), "Request exceeded hard timeout");
                    return Err(DeliveryError::timeout(bound.as_secs()));
                },
            };

            let duration = start.elapsed();
            match status_code {
                200..=299 => tracing::debug!(status = status_code, duration_ms = duration.as_millis(), "Relay accepted"),
                _ => tracing::warn!(status = status_code, duration_ms = duration.as_millis(), "Relay rejected"),
            }

            Ok(RelayResponse { status_code, body, duration })
        }
        .instrument(span)
        .await
    }
}

/// Parses a webhook URL, accepting only http and https.
///
/// # Errors
///
/// Returns `InvalidUrl` describing why the URL was rejected.
pub fn parse_webhook_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| DeliveryError::invalid_url(raw, e))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(DeliveryError::invalid_url(raw, format!("unsupported scheme '{other}'"))),
    }
}

async fn read_response(response: Response) -> reqwest::Result<(u16, String)> {
    let status_code = response.status().as_u16();
    let bytes = response.bytes().await?;
    Ok((status_code, truncate_body(&bytes)))
}

fn truncate_body(bytes: &[u8]) -> String {
    if bytes.len() <= MAX_STORED_BODY_BYTES {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let suffix = "... (truncated)";
    let head = String::from_utf8_lossy(&bytes[..MAX_STORED_BODY_BYTES - suffix.len()]);
    format!("{head}{suffix}")
}

fn categorize(error: &reqwest::Error, bound: Duration) -> DeliveryError {
    if error.is_timeout() {
        return DeliveryError::timeout(bound.as_secs());
    }
    if error.is_connect() {
        return DeliveryError::network(format!("connection failed: {error}"));
    }
    DeliveryError::network(error.to_string())
}
