//! Configuration management for the LeadRelay service.

use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use leadrelay_delivery::{CallbackUrls, ClientConfig};
use serde::{Deserialize, Serialize};
use url::Url;

const CONFIG_FILE: &str = "config.toml";

/// Service configuration with defaults, file, and environment overrides.
///
/// Loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`config.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Business settings such as webhook URLs and auto-send flags are not part of
/// this struct; they live in the `system_settings` table and can change
/// without a restart.
///
/// # Example
///
/// ```no_run
/// use leadrelay_api::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
///
/// println!("Server will bind to {}:{}", config.host, config.port);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Database
    /// `DATABASE_URL`: PostgreSQL connection string.
    #[serde(default = "default_database_url", alias = "DATABASE_URL")]
    pub database_url: String,
    /// `DATABASE_MAX_CONNECTIONS`: pool ceiling.
    #[serde(default = "default_max_connections", alias = "DATABASE_MAX_CONNECTIONS")]
    pub database_max_connections: u32,
    /// `DATABASE_MIN_CONNECTIONS`: connections kept open when idle.
    #[serde(default = "default_min_connections", alias = "DATABASE_MIN_CONNECTIONS")]
    pub database_min_connections: u32,
    /// `DATABASE_CONNECTION_TIMEOUT`: seconds to wait for a pooled connection.
    #[serde(default = "default_acquire_timeout", alias = "DATABASE_CONNECTION_TIMEOUT")]
    pub database_connection_timeout: u64,

    // Server
    /// `HOST`: interface to listen on.
    #[serde(default = "default_host", alias = "HOST")]
    pub host: String,
    /// `PORT`: listen port.
    #[serde(default = "default_port", alias = "PORT")]
    pub port: u16,
    /// `REQUEST_TIMEOUT`: seconds before an inbound request is cut. Must
    /// exceed the dispatch timeout so a manual send can finalize its ledger
    /// row first.
    #[serde(default = "default_request_timeout", alias = "REQUEST_TIMEOUT")]
    pub request_timeout: u64,
    /// `PUBLIC_BASE_URL`: where the relay can reach our callback endpoints.
    #[serde(default = "default_public_base_url", alias = "PUBLIC_BASE_URL")]
    pub public_base_url: String,

    // Relay
    /// `DISPATCH_TIMEOUT_SECONDS`: hard bound for one relay POST.
    #[serde(default = "default_dispatch_timeout", alias = "DISPATCH_TIMEOUT_SECONDS")]
    pub dispatch_timeout_seconds: u64,
    /// `VALIDATION_TIMEOUT_SECONDS`: hard bound for one validation-service POST.
    #[serde(default = "default_validation_timeout", alias = "VALIDATION_TIMEOUT_SECONDS")]
    pub validation_timeout_seconds: u64,

    // Logging
    /// `RUST_LOG`: default tracing filter when the environment sets none.
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl Config {
    /// Merges defaults, `config.toml` and the environment, then validates.
    ///
    /// # Errors
    ///
    /// Fails if a source cannot be parsed or the result does not validate.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""));

        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Client configuration for relay dispatches.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.dispatch_timeout_seconds),
            ..ClientConfig::default()
        }
    }

    /// Client configuration for validation-service requests.
    pub fn to_validation_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.validation_timeout_seconds),
            ..ClientConfig::default()
        }
    }

    /// Callback URLs advertised to the relay.
    ///
    /// # Errors
    ///
    /// Fails if `public_base_url` is not an absolute URL.
    pub fn callback_urls(&self) -> Result<CallbackUrls> {
        let base = Url::parse(&self.public_base_url).context("Invalid PUBLIC_BASE_URL")?;
        CallbackUrls::from_base(&base).context("Failed to derive callback URLs")
    }

    /// Socket address to bind.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr_str).context("Invalid server address")
    }

    /// Database URL safe to log: the password is replaced with `***`.
    pub fn database_url_masked(&self) -> String {
        if let Some(at_pos) = self.database_url.find('@') {
            if let Some(colon_pos) = self.database_url[..at_pos].rfind(':') {
                let mut masked = self.database_url.clone();
                masked.replace_range(colon_pos + 1..at_pos, "***");
                return masked;
            }
        }
        self.database_url.clone()
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        if self.database_max_connections == 0 {
            anyhow::bail!("database max_connections must be greater than 0");
        }

        if self.database_min_connections > self.database_max_connections {
            anyhow::bail!("database min_connections cannot exceed max_connections");
        }

        if self.dispatch_timeout_seconds == 0 {
            anyhow::bail!("dispatch_timeout_seconds must be greater than 0");
        }

        if self.validation_timeout_seconds == 0 {
            anyhow::bail!("validation_timeout_seconds must be greater than 0");
        }

        if self.request_timeout <= self.dispatch_timeout_seconds {
            anyhow::bail!("request_timeout must exceed dispatch_timeout_seconds");
        }

        let base = Url::parse(&self.public_base_url).context("public_base_url must be a URL")?;
        if !matches!(base.scheme(), "http" | "https") {
            anyhow::bail!("public_base_url must use http or https");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            database_max_connections: default_max_connections(),
            database_min_connections: default_min_connections(),
            database_connection_timeout: default_acquire_timeout(),
            host: default_host(),
            port: default_port(),
            request_timeout: default_request_timeout(),
            public_base_url: default_public_base_url(),
            dispatch_timeout_seconds: default_dispatch_timeout(),
            validation_timeout_seconds: default_validation_timeout(),
            rust_log: default_log_level(),
        }
    }
}

fn default_database_url() -> String {
    "postgresql://localhost/leadrelay".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    10
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    45
}

fn default_public_base_url() -> String {
    "http://127.0.0.1:8080/".to_string()
}

fn default_dispatch_timeout() -> u64 {
    leadrelay_delivery::DEFAULT_DISPATCH_TIMEOUT_SECONDS
}

fn default_validation_timeout() -> u64 {
    15
}

fn default_log_level() -> String {
    "info,leadrelay=debug,tower_http=debug".to_string()
}
