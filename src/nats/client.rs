use anyhow::{Context, Result};
use async_nats::jetstream::{self, stream};
use serde::Deserialize;
use tracing::info;

/// NATS configuration
#[derive(Clone, Debug, Deserialize)]
pub struct NatsConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
    /// Prefix for every subject this service publishes or requests on
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
    /// Timeout for request/reply calls (directory lookups)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_url() -> String {
    std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string())
}

fn default_stream_name() -> String {
    "WEARSYNC_EVENTS".to_string()
}

fn default_subject_prefix() -> String {
    "wearsync".to_string()
}

fn default_max_age_days() -> i64 {
    7
}

fn default_request_timeout_ms() -> u64 {
    2000
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            stream_name: default_stream_name(),
            subject_prefix: default_subject_prefix(),
            max_age_days: default_max_age_days(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl NatsConfig {
    /// Subjects captured by the event stream.
    pub fn stream_subjects(&self) -> Vec<String> {
        vec![
            format!("{}.subscriptions.>", self.subject_prefix),
            format!("{}.sync.>", self.subject_prefix),
        ]
    }
}

/// NATS client with JetStream
pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl NatsClient {
    /// Connect to NATS and initialize JetStream
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        info!("Connecting to NATS at {}", config.url);

        let client = async_nats::connect(&config.url)
            .await
            .context("Failed to connect to NATS")?;

        let jetstream = jetstream::new(client.clone());

        let nats_client = Self {
            client,
            jetstream,
            config,
        };

        nats_client.ensure_stream().await?;

        Ok(nats_client)
    }

    /// Ensure the event stream exists
    async fn ensure_stream(&self) -> Result<()> {
        if self.jetstream.get_stream(&self.config.stream_name).await.is_ok() {
            info!("Stream '{}' already exists", self.config.stream_name);
            return Ok(());
        }

        let stream_config = stream::Config {
            name: self.config.stream_name.clone(),
            subjects: self.config.stream_subjects(),
            max_age: std::time::Duration::from_secs((self.config.max_age_days * 86400) as u64),
            storage: stream::StorageType::File,
            retention: stream::RetentionPolicy::Limits,
            ..Default::default()
        };

        self.jetstream
            .create_stream(stream_config)
            .await
            .context("Failed to create JetStream stream")?;

        info!("Created JetStream stream '{}'", self.config.stream_name);
        Ok(())
    }

    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }

    /// Core client, used for request/reply
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    pub fn config(&self) -> &NatsConfig {
        &self.config
    }
}
