//! Shared application state handed to every handler.

use std::sync::Arc;

use anyhow::{Context, Result};
use leadrelay_core::{Clock, LeadEventHandler, MessagingStorage, RealClock, SettingsService};
use leadrelay_delivery::{
    AutoSendTriggers, CallbackUrls, DeliveryCallbackReceiver, DeliveryLedger, MessageDispatcher,
    RecipientResolver, ValidationService, WebhookClient,
};

use crate::config::Config;

/// Services wired over one storage and one clock.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Storage used by handlers for direct CRUD writes.
    pub storage: Arc<dyn MessagingStorage>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Typed business settings.
    pub settings: SettingsService,
    /// Manual and automatic sends.
    pub dispatcher: MessageDispatcher,
    /// Delivery confirmations.
    pub callbacks: DeliveryCallbackReceiver,
    /// Post-commit hook for lead writes.
    pub lead_events: Arc<dyn LeadEventHandler>,
    /// Phone validation.
    pub validations: ValidationService,
}

impl AppState {
    /// Wires every service. Lead events go to the automatic-send triggers.
    pub fn new(
        storage: Arc<dyn MessagingStorage>,
        clock: Arc<dyn Clock>,
        relay_client: WebhookClient,
        validation_client: WebhookClient,
        callback_urls: CallbackUrls,
    ) -> Self {
        let settings = SettingsService::new(storage.clone(), clock.clone());
        let dispatcher = MessageDispatcher::new(
            RecipientResolver::new(storage.clone()),
            DeliveryLedger::new(storage.clone(), clock.clone()),
            relay_client,
            callback_urls.clone(),
            clock.clone(),
        );
        let triggers = AutoSendTriggers::new(settings.clone(), storage.clone(), dispatcher.clone());
        let validations = ValidationService::new(
            storage.clone(),
            settings.clone(),
            validation_client,
            callback_urls.whatsapp_validation,
            clock.clone(),
        );

        Self {
            callbacks: DeliveryCallbackReceiver::new(storage.clone(), clock.clone()),
            lead_events: Arc::new(triggers),
            storage,
            clock,
            settings,
            dispatcher,
            validations,
        }
    }

    /// Builds production state from configuration.
    ///
    /// # Errors
    ///
    /// Fails if the public base URL is unusable or an HTTP client cannot be
    /// built.
    pub fn from_config(config: &Config, storage: Arc<dyn MessagingStorage>) -> Result<Self> {
        let callback_urls = config.callback_urls()?;
        let relay_client = WebhookClient::new(config.to_client_config())
            .context("Failed to build relay client")?;
        let validation_client = WebhookClient::new(config.to_validation_client_config())
            .context("Failed to build validation client")?;

        Ok(Self::new(
            storage,
            Arc::new(RealClock::new()),
            relay_client,
            validation_client,
            callback_urls,
        ))
    }

    /// Replaces the lead event hook.
    #[must_use]
    pub fn with_lead_events(mut self, handler: Arc<dyn LeadEventHandler>) -> Self {
        self.lead_events = handler;
        self
    }
}
