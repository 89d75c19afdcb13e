//! Service configuration.
//!
//! Non-secret settings come from a TOML file; every section and field has a
//! default so a missing file or partial file is fine. Secrets only come from the
//! environment (see [`Secrets`]).

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;

pub use crate::nats::NatsConfig;
use crate::orchestrator::MAX_LOOKBACK_DAYS;
use crate::provider::ProviderClientConfig;
use crate::sync::RetryPolicy;

/// Complete service configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Credential database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "credentials.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Provider API configuration (client id/secret come from [`Secrets`])
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,
    /// Where the provider should push notifications
    #[serde(default = "default_callback_url")]
    pub callback_url: String,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_provider_base_url() -> String {
    "https://api.wearable.example".to_string()
}

fn default_callback_url() -> String {
    "http://localhost:3000/api/webhooks/provider".to_string()
}

fn default_provider_timeout() -> u64 {
    30
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_base_url(),
            callback_url: default_callback_url(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

impl ProviderConfig {
    pub fn client_config(&self, secrets: &Secrets) -> ProviderClientConfig {
        ProviderClientConfig {
            base_url: self.base_url.clone(),
            client_id: secrets.provider_client_id.clone(),
            client_secret: secrets.provider_client_secret.clone(),
            callback_url: self.callback_url.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// Sync configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// How far back the first sync of a user reaches
    #[serde(default = "default_initial_lookback_days")]
    pub initial_lookback_days: i64,
    /// Delay before the first retry; doubles per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Background jobs that may wait in the queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_initial_lookback_days() -> i64 {
    30
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            initial_lookback_days: default_initial_lookback_days(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0..=MAX_LOOKBACK_DAYS).contains(&self.initial_lookback_days) {
            bail!(
                "sync.initial_lookback_days must be between 0 and {}, got {}",
                MAX_LOOKBACK_DAYS,
                self.initial_lookback_days
            );
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_backoff: Duration::from_millis(self.retry_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

/// Where user existence is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryMode {
    /// NATS request/reply to the auth service
    #[default]
    Nats,
    /// Fixed list from `static_users` (development)
    Static,
}

/// Auth directory configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub mode: DirectoryMode,
    #[serde(default)]
    pub static_users: Vec<String>,
}

/// Secrets read from the environment.
#[derive(Clone)]
pub struct Secrets {
    /// Base64-encoded 32-byte master key for tokens at rest
    pub encryption_key: String,
    pub provider_client_id: String,
    pub provider_client_secret: String,
}

impl Secrets {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            encryption_key: std::env::var("WEARSYNC_ENCRYPTION_KEY")
                .context("WEARSYNC_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?,
            provider_client_id: std::env::var("WEARSYNC_PROVIDER_CLIENT_ID")
                .context("WEARSYNC_PROVIDER_CLIENT_ID is required")?,
            provider_client_secret: std::env::var("WEARSYNC_PROVIDER_CLIENT_SECRET")
                .context("WEARSYNC_PROVIDER_CLIENT_SECRET is required")?,
        })
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &str) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    parse_config(&contents)
}

/// Parse configuration from TOML text
pub fn parse_config(contents: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(contents).context("Failed to parse config")?;
    config.sync.validate()?;
    Ok(config)
}
