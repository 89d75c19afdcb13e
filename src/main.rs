use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;
use wearsync::api::{create_router, AppState};
use wearsync::config::{load_config, AppConfig, DirectoryMode, Secrets};
use wearsync::credentials::CredentialStore;
use wearsync::directory::{NatsUserDirectory, StaticUserDirectory, UserDirectory};
use wearsync::events::EventPublisher;
use wearsync::nats::{NatsClient, NatsEventPublisher};
use wearsync::orchestrator::CredentialOrchestrator;
use wearsync::provider::{HttpProviderClient, ProviderApi};
use wearsync::subscription::SubscriptionRegistrar;
use wearsync::sync::{SyncTrigger, SyncWorker};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wearsync=info".into()),
        )
        .init();

    info!("Wearsync starting...");

    let config = match std::env::var("WEARSYNC_CONFIG") {
        Ok(path) => {
            info!(path = %path, "Loading configuration");
            load_config(&path)?
        }
        Err(_) => {
            info!("WEARSYNC_CONFIG not set, using defaults");
            AppConfig::default()
        }
    };
    let secrets = Secrets::from_env()?;

    let nats = NatsClient::connect(config.nats.clone()).await?;

    let directory: Arc<dyn UserDirectory> = match config.directory.mode {
        DirectoryMode::Nats => Arc::new(NatsUserDirectory::new(
            nats.client().clone(),
            &config.nats.subject_prefix,
            Duration::from_millis(config.nats.request_timeout_ms),
        )),
        DirectoryMode::Static => {
            info!(
                users = config.directory.static_users.len(),
                "Using static user directory"
            );
            Arc::new(StaticUserDirectory::with_users(
                config.directory.static_users.iter().cloned(),
            ))
        }
    };

    let store = Arc::new(
        CredentialStore::new(
            &config.storage.database_path,
            &secrets.encryption_key,
            directory,
        )
        .context("Failed to open credential store")?,
    );
    info!(path = %config.storage.database_path, "Credential store ready");

    let provider: Arc<dyn ProviderApi> = Arc::new(HttpProviderClient::new(
        config.provider.client_config(&secrets),
    )?);
    let publisher: Arc<dyn EventPublisher> = Arc::new(NatsEventPublisher::new(
        nats.jetstream().clone(),
        config.nats.subject_prefix.clone(),
    ));

    let trigger = Arc::new(SyncTrigger::new(
        Arc::clone(&store),
        Arc::clone(&provider),
        Arc::clone(&publisher),
        config.sync.retry_policy(),
    ));
    let (dispatcher, worker) = SyncWorker::channel(
        Arc::clone(&trigger),
        Arc::clone(&publisher),
        config.sync.queue_capacity,
    );
    let worker_handle = worker.start();

    let orchestrator = CredentialOrchestrator::new(
        store,
        Arc::clone(&provider),
        SubscriptionRegistrar::new(provider, publisher),
        trigger,
        Arc::new(dispatcher),
    )
    .with_initial_lookback_days(config.sync.initial_lookback_days);

    let app = create_router(AppState {
        orchestrator: Arc::new(orchestrator),
    })
    .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    // The router (and with it the last dispatcher) is gone; let queued jobs finish.
    let _ = worker_handle.await;
    info!("Wearsync stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}
