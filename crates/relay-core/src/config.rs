use config::{builder::DefaultState, Config, ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{RelayError, Result};
use crate::types::WebhookSubscription;

/// Prefix for environment overrides, e.g. `RELAY__SLACK__CHANNEL`
pub const ENV_PREFIX: &str = "RELAY";

/// Site name the platform UI shows for the default site
const DEFAULT_SITE_NAME: &str = "Default";

/// Main relay configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    pub tableau: TableauConfig,
    pub webhooks: WebhooksConfig,
    pub listener: ListenerConfig,
    pub slack: SlackConfig,
}

impl RelayConfig {
    /// Load configuration from an optional TOML file with environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        Self::from_builder(builder)
    }

    /// Load configuration from TOML text, without environment overrides
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Self::from_builder(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config: RelayConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the relay cannot start without
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.tableau.server)
            .map_err(|e| RelayError::Config(format!("invalid tableau.server: {}", e)))?;
        self.webhooks.callback()?;

        if self.webhooks.subscriptions.is_empty() {
            return Err(RelayError::Config(
                "at least one webhook subscription is required".to_string(),
            ));
        }
        if self.slack.channel.trim().is_empty() {
            return Err(RelayError::Config("slack.channel must not be empty".to_string()));
        }

        Ok(())
    }
}

/// Analytics platform connection settings
#[derive(Clone, Deserialize)]
pub struct TableauConfig {
    /// Externally reachable base URL, e.g. `https://tableau.example.com`
    pub server: String,
    #[serde(default = "default_site")]
    pub site: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub pat_name: Option<String>,
    #[serde(default)]
    pub pat_secret: Option<String>,
    /// CA bundle used to verify the platform's certificate
    #[serde(default)]
    pub ssl_certificates: Option<PathBuf>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_session_max_age_secs")]
    pub session_max_age_secs: u64,
}

impl TableauConfig {
    /// Content URL sent at sign-in; the default site is addressed by an empty string
    pub fn site_content_url(&self) -> &str {
        if self.site == DEFAULT_SITE_NAME {
            ""
        } else {
            &self.site
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn session_max_age(&self) -> Duration {
        Duration::from_secs(self.session_max_age_secs)
    }
}

impl fmt::Debug for TableauConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableauConfig")
            .field("server", &self.server)
            .field("site", &self.site)
            .field("api_version", &self.api_version)
            .field("pat_name", &self.pat_name)
            .field("pat_secret", &self.pat_secret.as_ref().map(|_| "[REDACTED]"))
            .field("ssl_certificates", &self.ssl_certificates)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("session_max_age_secs", &self.session_max_age_secs)
            .finish()
    }
}

fn default_site() -> String {
    DEFAULT_SITE_NAME.to_string()
}

fn default_api_version() -> String {
    "3.8".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_session_max_age_secs() -> u64 {
    1800
}

/// Webhook subscriptions and the callback URL they all share
#[derive(Debug, Clone, Deserialize)]
pub struct WebhooksConfig {
    pub url: String,
    #[serde(default = "default_subscriptions")]
    pub subscriptions: Vec<SubscriptionConfig>,
}

impl WebhooksConfig {
    /// Build the subscriptions to register, none of them registered yet
    pub fn subscriptions(&self) -> Vec<WebhookSubscription> {
        self.subscriptions
            .iter()
            .map(|s| WebhookSubscription::new(&s.name, &s.event_name, &self.url))
            .collect()
    }

    pub fn callback(&self) -> Result<CallbackUrl> {
        CallbackUrl::parse(&self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionConfig {
    pub event_name: String,
    pub name: String,
}

impl SubscriptionConfig {
    pub fn new(event_name: &str, name: &str) -> Self {
        Self {
            event_name: event_name.to_string(),
            name: name.to_string(),
        }
    }
}

fn default_subscriptions() -> Vec<SubscriptionConfig> {
    [
        "workbook-created",
        "workbook-updated",
        "workbook-deleted",
        "workbook-refresh-failed",
        "datasource-created",
        "datasource-updated",
        "datasource-deleted",
        "datasource-refresh-failed",
    ]
    .iter()
    .map(|event| SubscriptionConfig::new(event, &format!("tswts-{}", event)))
    .collect()
}

/// Listener path and port derived from the callback URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackUrl {
    pub url: Url,
    pub path: String,
    pub port: u16,
}

impl CallbackUrl {
    /// A callback URL without a path cannot be told apart from stray traffic
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)
            .map_err(|e| RelayError::Config(format!("invalid callback URL '{}': {}", raw, e)))?;

        let path = url.path().to_string();
        if path.is_empty() || path == "/" {
            return Err(RelayError::Config(format!(
                "callback URL '{}' has no listener path",
                raw
            )));
        }

        // `Url` drops a port equal to the scheme default, so look at the raw text
        let port = match url.port() {
            Some(port) => port,
            None if has_explicit_port(raw) => url.port_or_known_default().unwrap_or(443),
            None => 443,
        };

        Ok(Self { url, path, port })
    }
}

fn has_explicit_port(raw: &str) -> bool {
    let authority = raw
        .split_once("://")
        .map_or(raw, |(_, rest)| rest)
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    // Skip the colons inside a bracketed IPv6 address
    let after_host = host_port.rsplit_once(']').map_or(host_port, |(_, rest)| rest);

    after_host
        .rsplit_once(':')
        .is_some_and(|(_, port)| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
}

/// Inbound listener settings
#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Overrides the port taken from the callback URL
    #[serde(default)]
    pub port: Option<u16>,
    pub ssl_cert: PathBuf,
    pub ssl_key: PathBuf,
    #[serde(default)]
    pub ssl_ca_cert: Option<PathBuf>,
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl ListenerConfig {
    pub fn bind_port(&self, callback: &CallbackUrl) -> u16 {
        self.port.unwrap_or(callback.port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp")
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

/// Chat service settings
#[derive(Clone, Deserialize)]
pub struct SlackConfig {
    #[serde(default)]
    pub token: Option<String>,
    /// Channel id messages are posted to
    pub channel: String,
    #[serde(default = "default_join_channel")]
    pub join_channel: bool,
    #[serde(default = "default_slack_api_base")]
    pub api_base: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl SlackConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlackConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("channel", &self.channel)
            .field("join_channel", &self.join_channel)
            .field("api_base", &self.api_base)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

fn default_join_channel() -> bool {
    true
}

fn default_slack_api_base() -> String {
    "https://slack.com/api".to_string()
}
