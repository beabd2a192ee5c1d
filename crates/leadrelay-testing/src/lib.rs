//! Test infrastructure for deterministic messaging tests.
//!
//! Provides an in-memory storage, a wiremock relay standing in for the
//! messaging and validation webhooks, a controllable clock, and the
//! production services wired against them.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

use leadrelay_core::{
    MemoryStorage, MessageHistory, MessageRecipient, MessagingStorage, SettingsService, StatusId,
    TestClock, WebhookUrls,
};
use leadrelay_delivery::{
    AutoSendTriggers, CallbackUrls, ClientConfig, DeliveryCallbackReceiver, DeliveryLedger,
    MessageDispatcher, RecipientResolver, ValidationService, WebhookClient,
};
use url::Url;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

pub mod fixtures;

pub use fixtures::{LeadBuilder, TemplateBuilder};

/// Public base URL advertised in callback URLs during tests.
pub const TEST_PUBLIC_BASE_URL: &str = "http://leadrelay.test/";

/// Relay path used by [`TestEnv::configure_whatsapp_relay`].
pub const WHATSAPP_RELAY_PATH: &str = "/relay/whatsapp";

/// Relay path used by [`TestEnv::configure_validation_relay`].
pub const VALIDATION_RELAY_PATH: &str = "/relay/validate";

/// Test environment backed by in-memory storage and a mock relay.
pub struct TestEnv {
    /// In-memory storage shared by every service built from this env.
    pub storage: Arc<MemoryStorage>,
    /// Deterministic clock
    pub clock: TestClock,
    /// Mock relay and validation service
    pub relay: MockServer,
    dispatch_timeout: Duration,
}

impl TestEnv {
    /// Creates an environment with the production dispatch bound.
    pub async fn new() -> Self {
        Self::with_dispatch_timeout(Duration::from_secs(
            leadrelay_delivery::DEFAULT_DISPATCH_TIMEOUT_SECONDS,
        ))
        .await
    }

    /// Creates an environment whose webhook client gives up after `timeout`.
    pub async fn with_dispatch_timeout(timeout: Duration) -> Self {
        Self {
            storage: Arc::new(MemoryStorage::new()),
            clock: TestClock::new(),
            relay: MockServer::start().await,
            dispatch_timeout: timeout,
        }
    }

    /// Storage as the trait object services take.
    pub fn storage_dyn(&self) -> Arc<dyn MessagingStorage> {
        self.storage.clone()
    }

    /// Absolute URL of a path on the mock relay.
    pub fn relay_url(&self, path: &str) -> String {
        format!("{}{path}", self.relay.uri())
    }

    /// Callback URLs under [`TEST_PUBLIC_BASE_URL`].
    pub fn callback_urls(&self) -> CallbackUrls {
        let base = Url::parse(TEST_PUBLIC_BASE_URL).expect("static test url parses");
        CallbackUrls::from_base(&base).expect("static test url joins")
    }

    /// Settings service over this env's storage.
    pub fn settings(&self) -> SettingsService {
        SettingsService::new(self.storage_dyn(), Arc::new(self.clock.clone()))
    }

    /// Webhook client honouring this env's dispatch bound.
    pub fn client(&self) -> WebhookClient {
        WebhookClient::new(ClientConfig { timeout: self.dispatch_timeout, ..ClientConfig::default() })
            .expect("webhook client builds")
    }

    /// Production dispatcher wired to this env.
    pub fn dispatcher(&self) -> MessageDispatcher {
        let clock = Arc::new(self.clock.clone());
        MessageDispatcher::new(
            RecipientResolver::new(self.storage_dyn()),
            DeliveryLedger::new(self.storage_dyn(), clock.clone()),
            self.client(),
            self.callback_urls(),
            clock,
        )
    }

    /// Production callback receiver wired to this env.
    pub fn callback_receiver(&self) -> DeliveryCallbackReceiver {
        DeliveryCallbackReceiver::new(self.storage_dyn(), Arc::new(self.clock.clone()))
    }

    /// Production trigger layer wired to this env.
    pub fn triggers(&self) -> AutoSendTriggers {
        AutoSendTriggers::new(self.settings(), self.storage_dyn(), self.dispatcher())
    }

    /// Production validation service wired to this env.
    pub fn validation_service(&self) -> ValidationService {
        ValidationService::new(
            self.storage_dyn(),
            self.settings(),
            self.client(),
            self.callback_urls().whatsapp_validation,
            Arc::new(self.clock.clone()),
        )
    }

    /// Turns new-lead automatic sends on.
    pub async fn enable_auto_send(&self) {
        self.settings().set_auto_send_enabled(true).await.expect("setting written");
    }

    /// Turns conversion sends on for `status_id`.
    pub async fn enable_conversion(&self, status_id: StatusId) {
        let settings = self.settings();
        settings.set_conversion_send_enabled(true).await.expect("setting written");
        settings.set_conversion_status_id(Some(status_id)).await.expect("setting written");
    }

    /// Points the whatsapp relay URL at [`WHATSAPP_RELAY_PATH`] on the mock.
    pub async fn configure_whatsapp_relay(&self) {
        self.update_webhook_urls(|urls| urls.whatsapp = Some(self.relay_url(WHATSAPP_RELAY_PATH)))
            .await;
    }

    /// Points the validation URL at [`VALIDATION_RELAY_PATH`] on the mock.
    pub async fn configure_validation_relay(&self) {
        self.update_webhook_urls(|urls| {
            urls.whatsapp_validation = Some(self.relay_url(VALIDATION_RELAY_PATH));
        })
        .await;
    }

    async fn update_webhook_urls(&self, change: impl FnOnce(&mut WebhookUrls)) {
        let settings = self.settings();
        let mut urls = settings.load().await.expect("settings load").webhook_urls().clone();
        change(&mut urls);
        settings.set_webhook_urls(&urls).await.expect("setting written");
    }

    /// Mounts a relay answering `status` with `body` on `path`.
    pub async fn mock_relay(&self, path: &str, status: u16, body: &str) {
        Mock::given(matchers::method("POST"))
            .and(matchers::path(path))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&self.relay)
            .await;
    }

    /// Mounts a relay on `path` that answers only after `delay`.
    pub async fn mock_slow_relay(&self, path: &str, delay: Duration) {
        Mock::given(matchers::method("POST"))
            .and(matchers::path(path))
            .respond_with(ResponseTemplate::new(200).set_delay(delay))
            .mount(&self.relay)
            .await;
    }

    /// Bodies of every request the relay received, parsed as JSON.
    pub async fn relay_requests(&self) -> Vec<serde_json::Value> {
        self.relay
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter_map(|r| serde_json::from_slice(&r.body).ok())
            .collect()
    }

    /// Every ledger entry.
    pub async fn messages(&self) -> Vec<MessageHistory> {
        self.storage.all_messages().await
    }

    /// Every recipient row.
    pub async fn recipients(&self) -> Vec<MessageRecipient> {
        self.storage.all_recipients().await
    }
}
