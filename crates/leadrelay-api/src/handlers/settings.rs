//! Business settings: auto-send switches, conversion status, relay URLs.

use axum::{body::Bytes, extract::State, http::StatusCode};
use leadrelay_core::{StatusId, WebhookUrls};
use leadrelay_delivery::client::parse_webhook_url;
use serde::{Deserialize, Deserializer};
use tracing::{info, instrument};

use super::{parse_body, success, ApiResult};
use crate::AppState;

/// Body of `PATCH /api/settings`. Absent fields are left untouched.
#[derive(Debug, Default, Deserialize)]
pub struct SettingsPatch {
    /// New-lead auto-send switch.
    #[serde(default)]
    pub auto_message_enabled: Option<bool>,
    /// Conversion auto-send switch.
    #[serde(default)]
    pub conversion_message_enabled: Option<bool>,
    /// Conversion status; an explicit `null` clears it.
    #[serde(default, deserialize_with = "present")]
    pub conversion_status_id: Option<Option<StatusId>>,
    /// Replacement relay URL map.
    #[serde(default)]
    pub webhook_urls: Option<WebhookUrls>,
}

/// Distinguishes an explicit `null` from an absent field.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Current settings.
#[instrument(name = "get_settings", skip(state))]
pub async fn get_settings(State(state): State<AppState>) -> ApiResult {
    let settings = state.settings.load().await?;
    Ok(success(StatusCode::OK, settings))
}

/// Applies a partial update and returns the resulting settings.
///
/// Non-blank relay URLs must parse as http(s); blanks are stored as given and
/// read back as unconfigured.
#[instrument(name = "update_settings", skip(state, body))]
pub async fn update_settings(State(state): State<AppState>, body: Bytes) -> ApiResult {
    let patch: SettingsPatch = parse_body(&body)?;

    if let Some(urls) = &patch.webhook_urls {
        for url in [&urls.whatsapp, &urls.email, &urls.sms, &urls.whatsapp_validation]
            .into_iter()
            .flatten()
            .filter(|u| !u.trim().is_empty())
        {
            parse_webhook_url(url)?;
        }
    }

    if let Some(enabled) = patch.auto_message_enabled {
        state.settings.set_auto_send_enabled(enabled).await?;
    }
    if let Some(enabled) = patch.conversion_message_enabled {
        state.settings.set_conversion_send_enabled(enabled).await?;
    }
    if let Some(status_id) = patch.conversion_status_id {
        state.settings.set_conversion_status_id(status_id).await?;
    }
    if let Some(urls) = &patch.webhook_urls {
        state.settings.set_webhook_urls(urls).await?;
    }
    info!("settings updated");

    let settings = state.settings.load().await?;
    Ok(success(StatusCode::OK, settings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_null_clears_conversion_status() {
        let patch: SettingsPatch = serde_json::from_str(r#"{"conversion_status_id": null}"#).unwrap();
        assert_eq!(patch.conversion_status_id, Some(None));

        let patch: SettingsPatch = serde_json::from_str("{}").unwrap();
        assert_eq!(patch.conversion_status_id, None);
    }
}
