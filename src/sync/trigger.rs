use super::{CategorySync, SyncError, SyncResult};
use crate::credentials::{CredentialStore, ProviderCredential, TokenStatus};
use crate::events::{BusError, DomainEvent, EventPublisher};
use crate::provider::{ProviderApi, ProviderError, SyncWindow};
use crate::scopes::{Category, GrantedScopes};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Backoff between attempts of a retried provider call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the second attempt; doubles for every further attempt
    pub base_backoff: Duration,
    /// Upper bound for any single delay, including provider `Retry-After`
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32, error: &ProviderError) -> Duration {
        let exponential = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let delay = match error {
            ProviderError::RateLimited {
                retry_after_secs: Some(secs),
            } => exponential.max(Duration::from_secs(*secs)),
            _ => exponential,
        };
        delay.min(self.max_backoff)
    }
}

/// Pulls user data from the provider and announces it on the bus.
pub struct SyncTrigger {
    store: Arc<CredentialStore>,
    provider: Arc<dyn ProviderApi>,
    publisher: Arc<dyn EventPublisher>,
    retry: RetryPolicy,
}

impl SyncTrigger {
    pub fn new(
        store: Arc<CredentialStore>,
        provider: Arc<dyn ProviderApi>,
        publisher: Arc<dyn EventPublisher>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            provider,
            publisher,
            retry,
        }
    }

    /// Syncs every category granted by `credential.scope` from `since` to now.
    ///
    /// Transient provider failures are retried up to `max_attempts` times per
    /// category. A rejected or expired token is not retried and downgrades the
    /// stored status. On success `last_sync` advances to the end of the window.
    pub async fn trigger_sync(
        &self,
        credential: &ProviderCredential,
        since: DateTime<Utc>,
        max_attempts: u32,
        internal_user_id: &str,
    ) -> Result<SyncResult, SyncError> {
        let scopes = GrantedScopes::parse(credential.scope.as_deref().unwrap_or_default());
        let categories: Vec<Category> = scopes.iter().collect();
        self.sync_window(
            credential,
            internal_user_id,
            &categories,
            SyncWindow::since(since),
            max_attempts,
            true,
        )
        .await
    }

    /// Syncs one category for the UTC day `date`.
    ///
    /// `last_sync` is left alone: it is a horizon for every granted category,
    /// and one day of one category does not cover it.
    pub async fn sync_category(
        &self,
        credential: &ProviderCredential,
        internal_user_id: &str,
        category: Category,
        date: NaiveDate,
        max_attempts: u32,
    ) -> Result<SyncResult, SyncError> {
        self.sync_window(
            credential,
            internal_user_id,
            &[category],
            SyncWindow::day(date),
            max_attempts,
            false,
        )
        .await
    }

    /// Announces an existing `last_sync` instead of syncing again.
    pub async fn publish_last_sync(
        &self,
        internal_user_id: &str,
        last_sync: DateTime<Utc>,
    ) -> Result<(), BusError> {
        self.publisher
            .publish(&DomainEvent::LastSync {
                internal_user_id: internal_user_id.to_string(),
                last_sync,
            })
            .await?;
        debug!(internal_user_id = %internal_user_id, last_sync = %last_sync, "Announced last sync");
        Ok(())
    }

    async fn sync_window(
        &self,
        credential: &ProviderCredential,
        internal_user_id: &str,
        categories: &[Category],
        window: SyncWindow,
        max_attempts: u32,
        advance_horizon: bool,
    ) -> Result<SyncResult, SyncError> {
        let mut summaries = Vec::with_capacity(categories.len());

        for &category in categories {
            let (records, attempts) = match self
                .fetch_with_retry(credential, internal_user_id, category, window, max_attempts)
                .await
            {
                Ok(fetched) => fetched,
                Err(err) => {
                    if let SyncError::Provider { source, .. } = &err {
                        self.downgrade_status(internal_user_id, source);
                    }
                    return Err(err);
                }
            };

            let count = records.len();
            self.publisher
                .publish(&DomainEvent::DataSync {
                    internal_user_id: internal_user_id.to_string(),
                    provider_user_id: credential.provider_user_id.clone(),
                    category,
                    window,
                    status: TokenStatus::ValidToken,
                    records,
                })
                .await?;

            summaries.push(CategorySync {
                category,
                records: count,
                attempts,
            });
        }

        if advance_horizon && !summaries.is_empty() {
            // Never record a horizon in the future
            let synced_until = window.end.min(Utc::now());
            self.store
                .record_sync(internal_user_id, synced_until)
                .map_err(SyncError::Storage)?;
        }

        let result = SyncResult {
            internal_user_id: internal_user_id.to_string(),
            provider_user_id: credential.provider_user_id.clone(),
            window,
            categories: summaries,
            status: TokenStatus::ValidToken,
        };

        info!(
            internal_user_id = %internal_user_id,
            categories = result.categories.len(),
            records = result.total_records(),
            "Sync completed"
        );
        Ok(result)
    }

    async fn fetch_with_retry(
        &self,
        credential: &ProviderCredential,
        internal_user_id: &str,
        category: Category,
        window: SyncWindow,
        max_attempts: u32,
    ) -> Result<(Vec<serde_json::Value>, u32), SyncError> {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.provider.fetch(credential, category, window).await {
                Ok(records) => return Ok((records, attempt)),
                Err(source) if source.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.delay(attempt, &source);
                    warn!(
                        internal_user_id = %internal_user_id,
                        category = %category,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %source,
                        "Provider fetch failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(source) => {
                    return Err(SyncError::Provider {
                        category,
                        attempts: attempt,
                        source,
                    })
                }
            }
        }
    }

    fn downgrade_status(&self, internal_user_id: &str, error: &ProviderError) {
        let status = match error {
            ProviderError::InvalidToken(_) => TokenStatus::InvalidToken,
            ProviderError::ExpiredToken(_) => TokenStatus::ExpiredToken,
            _ => return,
        };
        match self.store.update_status(internal_user_id, status) {
            Ok(_) => warn!(
                internal_user_id = %internal_user_id,
                status = %status,
                "Provider rejected token during sync"
            ),
            Err(e) => warn!(
                internal_user_id = %internal_user_id,
                error = %e,
                "Failed to record token status"
            ),
        }
    }
}
