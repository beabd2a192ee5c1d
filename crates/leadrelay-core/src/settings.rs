//! Typed access to the runtime business settings.
//!
//! Settings live in a key/value table whose values are JSON text. They are
//! parsed once per read into [`SystemSettings`]; a value that does not parse
//! is a [`CoreError::Configuration`], never a silent default. A missing key
//! is the documented "not configured" state.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::{
    error::{CoreError, Result},
    models::{MessageKind, SettingRow, StatusId},
    storage::MessagingStorage,
    time::Clock,
};

/// Key of the new-lead auto-send switch.
pub const AUTO_MESSAGE_ENABLED: &str = "auto_message_enabled";
/// Key of the conversion auto-send switch.
pub const CONVERSION_MESSAGE_ENABLED: &str = "conversion_message_enabled";
/// Key of the status id that counts as a conversion.
pub const CONVERSION_STATUS_ID: &str = "conversion_status_id";
/// Key of the relay URL map.
pub const WEBHOOK_URLS: &str = "webhook_urls";

/// Relay endpoints per channel plus the phone validation service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookUrls {
    /// WhatsApp relay.
    #[serde(default)]
    pub whatsapp: Option<String>,
    /// Email relay.
    #[serde(default)]
    pub email: Option<String>,
    /// SMS relay.
    #[serde(default)]
    pub sms: Option<String>,
    /// Phone validation service.
    #[serde(default)]
    pub whatsapp_validation: Option<String>,
}

/// Parsed snapshot of the settings table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSettings {
    auto_message_enabled: bool,
    conversion_message_enabled: bool,
    conversion_status_id: Option<StatusId>,
    webhook_urls: WebhookUrls,
}

impl SystemSettings {
    /// Parses raw rows. Unknown keys are ignored.
    pub fn from_rows(rows: &[SettingRow]) -> Result<Self> {
        let mut settings = Self::default();

        for row in rows {
            let Some(raw) = row.value.as_deref() else {
                continue;
            };
            match row.key.as_str() {
                AUTO_MESSAGE_ENABLED => {
                    settings.auto_message_enabled = parse_value(&row.key, raw)?.unwrap_or(false);
                },
                CONVERSION_MESSAGE_ENABLED => {
                    settings.conversion_message_enabled =
                        parse_value(&row.key, raw)?.unwrap_or(false);
                },
                CONVERSION_STATUS_ID => {
                    settings.conversion_status_id = parse_value(&row.key, raw)?;
                },
                WEBHOOK_URLS => {
                    settings.webhook_urls = parse_value(&row.key, raw)?.unwrap_or_default();
                },
                other => debug!(key = other, "ignoring unknown setting"),
            }
        }

        Ok(settings)
    }

    /// Whether a lead capture should trigger the default template.
    pub fn is_auto_send_enabled(&self) -> bool {
        self.auto_message_enabled
    }

    /// Whether entering the conversion status should trigger a send.
    pub fn is_conversion_send_enabled(&self) -> bool {
        self.conversion_message_enabled
    }

    /// Status id that counts as a conversion, if configured.
    pub fn conversion_status_id(&self) -> Option<StatusId> {
        self.conversion_status_id
    }

    /// All configured relay URLs.
    pub fn webhook_urls(&self) -> &WebhookUrls {
        &self.webhook_urls
    }

    /// Configured relay URL for a channel as stored, ignoring blanks.
    pub fn raw_webhook_url(&self, kind: MessageKind) -> Option<&str> {
        let url = match kind {
            MessageKind::Whatsapp => self.webhook_urls.whatsapp.as_deref(),
            MessageKind::Email => self.webhook_urls.email.as_deref(),
            MessageKind::Sms => self.webhook_urls.sms.as_deref(),
        };
        non_blank(url)
    }

    /// Relay URL for a channel; `None` when absent, blank or unparseable.
    pub fn webhook_url(&self, kind: MessageKind) -> Option<Url> {
        parse_url(self.raw_webhook_url(kind))
    }

    /// Phone validation service URL; `None` when absent, blank or unparseable.
    pub fn validation_webhook_url(&self) -> Option<Url> {
        parse_url(non_blank(self.webhook_urls.whatsapp_validation.as_deref()))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_url(raw: Option<&str>) -> Option<Url> {
    let raw = raw?;
    match Url::parse(raw) {
        Ok(url) => Some(url),
        Err(e) => {
            warn!(url = raw, error = %e, "configured webhook url does not parse");
            None
        },
    }
}

fn parse_value<T: DeserializeOwned>(key: &str, raw: &str) -> Result<Option<T>> {
    serde_json::from_str::<Option<T>>(raw)
        .map_err(|e| CoreError::Configuration(format!("setting '{key}' is malformed: {e}")))
}

/// Reads and writes settings through storage.
#[derive(Debug, Clone)]
pub struct SettingsService {
    storage: Arc<dyn MessagingStorage>,
    clock: Arc<dyn Clock>,
}

impl SettingsService {
    /// Creates a settings service over the given storage.
    pub fn new(storage: Arc<dyn MessagingStorage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Loads and parses the current settings.
    pub async fn load(&self) -> Result<SystemSettings> {
        let rows = self.storage.load_settings().await?;
        SystemSettings::from_rows(&rows)
    }

    /// Turns new-lead auto-send on or off.
    pub async fn set_auto_send_enabled(&self, enabled: bool) -> Result<()> {
        self.put(AUTO_MESSAGE_ENABLED, &enabled).await
    }

    /// Turns conversion auto-send on or off.
    pub async fn set_conversion_send_enabled(&self, enabled: bool) -> Result<()> {
        self.put(CONVERSION_MESSAGE_ENABLED, &enabled).await
    }

    /// Sets or clears the conversion status.
    pub async fn set_conversion_status_id(&self, status_id: Option<StatusId>) -> Result<()> {
        self.put(CONVERSION_STATUS_ID, &status_id).await
    }

    /// Replaces the relay URL map.
    pub async fn set_webhook_urls(&self, urls: &WebhookUrls) -> Result<()> {
        self.put(WEBHOOK_URLS, urls).await
    }

    async fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.storage.put_setting(key, &json, self.clock.now_utc()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &str, value: &str) -> SettingRow {
        SettingRow { key: key.to_string(), value: Some(value.to_string()) }
    }

    #[test]
    fn absent_settings_mean_disabled() {
        let settings = SystemSettings::from_rows(&[]).unwrap();
        assert!(!settings.is_auto_send_enabled());
        assert!(!settings.is_conversion_send_enabled());
        assert_eq!(settings.conversion_status_id(), None);
        assert_eq!(settings.webhook_url(MessageKind::Whatsapp), None);
    }

    #[test]
    fn parses_all_known_keys() {
        let status = StatusId::new();
        let rows = vec![
            row(AUTO_MESSAGE_ENABLED, "true"),
            row(CONVERSION_MESSAGE_ENABLED, "false"),
            row(CONVERSION_STATUS_ID, &format!("\"{status}\"")),
            row(WEBHOOK_URLS, r#"{"whatsapp":"https://relay.example.com/wa","sms":"  "}"#),
        ];

        let settings = SystemSettings::from_rows(&rows).unwrap();

        assert!(settings.is_auto_send_enabled());
        assert!(!settings.is_conversion_send_enabled());
        assert_eq!(settings.conversion_status_id(), Some(status));
        assert_eq!(
            settings.webhook_url(MessageKind::Whatsapp).unwrap().as_str(),
            "https://relay.example.com/wa"
        );
        assert_eq!(settings.raw_webhook_url(MessageKind::Sms), None);
    }

    #[test]
    fn malformed_value_is_configuration_error() {
        let err = SystemSettings::from_rows(&[row(AUTO_MESSAGE_ENABLED, "yes please")]).unwrap_err();
        assert!(matches!(err, CoreError::Configuration(msg) if msg.contains(AUTO_MESSAGE_ENABLED)));
    }

    #[test]
    fn unparseable_url_is_treated_as_unconfigured() {
        let settings =
            SystemSettings::from_rows(&[row(WEBHOOK_URLS, r#"{"whatsapp":"not a url"}"#)]).unwrap();
        assert_eq!(settings.raw_webhook_url(MessageKind::Whatsapp), Some("not a url"));
        assert_eq!(settings.webhook_url(MessageKind::Whatsapp), None);
    }

    #[test]
    fn json_null_clears_a_setting() {
        let settings = SystemSettings::from_rows(&[row(CONVERSION_STATUS_ID, "null")]).unwrap();
        assert_eq!(settings.conversion_status_id(), None);
    }
}
