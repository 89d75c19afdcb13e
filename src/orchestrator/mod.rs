//! Public credential operations.
//!
//! Linking runs as a pipeline over a [`CredentialRecord`] value:
//!
//! ```text
//! validate → introspect → (status = valid) → account not claimed elsewhere
//!          → scopes + subscriptions → directory gate → upsert
//! ```
//!
//! Each step hands the next one an updated record; nothing is written until the
//! directory gate has passed. Subscriptions are registered before the gate, so an
//! unknown user can leave provider subscriptions behind.

use crate::credentials::{validate_user_id, CredentialRecord, CredentialStore, ProviderCredential, TokenStatus};
use crate::provider::{ProviderApi, ProviderError};
use crate::scopes::{Category, GrantedScopes};
use crate::subscription::SubscriptionRegistrar;
use crate::sync::{SyncDispatcher, SyncJob, SyncResult, SyncTrigger};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

mod error;

pub use error::OrchestratorError;

/// Attempts for the sync fired after linking.
pub const INITIAL_SYNC_ATTEMPTS: u32 = 3;

/// Attempts for caller-requested and notification-driven syncs.
pub const SINGLE_SYNC_ATTEMPT: u32 = 1;

const DEFAULT_LOOKBACK_DAYS: i64 = 30;

/// Upper bound for the initial lookback (about ten years).
pub const MAX_LOOKBACK_DAYS: i64 = 3650;

/// Composes introspection, subscriptions, the directory gate, storage and sync.
pub struct CredentialOrchestrator {
    store: Arc<CredentialStore>,
    provider: Arc<dyn ProviderApi>,
    registrar: SubscriptionRegistrar,
    trigger: Arc<SyncTrigger>,
    dispatcher: Arc<dyn SyncDispatcher>,
    initial_lookback: Duration,
}

impl CredentialOrchestrator {
    pub fn new(
        store: Arc<CredentialStore>,
        provider: Arc<dyn ProviderApi>,
        registrar: SubscriptionRegistrar,
        trigger: Arc<SyncTrigger>,
        dispatcher: Arc<dyn SyncDispatcher>,
    ) -> Self {
        Self {
            store,
            provider,
            registrar,
            trigger,
            dispatcher,
            initial_lookback: Duration::days(DEFAULT_LOOKBACK_DAYS),
        }
    }

    /// How far back the first sync of a user reaches.
    ///
    /// Negative or unrepresentable values keep the default.
    pub fn with_initial_lookback_days(mut self, days: i64) -> Self {
        self.initial_lookback = lookback(days);
        self
    }

    /// Links (or relinks) a provider credential to an internal user.
    pub async fn link_credential(
        &self,
        record: CredentialRecord,
    ) -> Result<CredentialRecord, OrchestratorError> {
        let record = record.validated()?;
        let internal_user_id = record.internal_user_id.clone();

        let claims = self
            .provider
            .introspect(&record.provider_credential.access_token)
            .await
            .map_err(introspection_error)?;
        let record = record.with_introspection(claims);
        self.ensure_account_unclaimed(&record)?;

        let scopes =
            GrantedScopes::parse(record.provider_credential.scope.as_deref().unwrap_or_default());
        if scopes.is_empty() {
            warn!(internal_user_id = %internal_user_id, "No recognized scope granted");
            return Err(OrchestratorError::InsufficientScope(format!(
                "at least one of {} must be granted",
                Category::ALL
                    .iter()
                    .map(|c| c.scope_token())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        self.registrar.register_all(&record, &scopes).await?;

        if !self.store.check_user_exists(&internal_user_id).await? {
            warn!(internal_user_id = %internal_user_id, "Link rejected: unknown user");
            return Err(OrchestratorError::Validation(format!(
                "user '{}' is not registered",
                internal_user_id
            )));
        }

        let stored = self
            .store
            .upsert(&record)
            .map_err(OrchestratorError::Storage)?;

        info!(
            internal_user_id = %internal_user_id,
            provider_user_id = ?stored.provider_credential.provider_user_id,
            categories = scopes.len(),
            "Credential linked"
        );
        Ok(stored)
    }

    /// Links the credential, then either starts a background sync
    /// (`init_sync`) or re-announces the existing `last_sync`.
    ///
    /// The background part never delays or fails this call.
    pub async fn link_credential_and_sync(
        &self,
        record: CredentialRecord,
        init_sync: bool,
    ) -> Result<CredentialRecord, OrchestratorError> {
        let stored = self.link_credential(record).await?;

        if init_sync {
            self.dispatcher.submit(SyncJob::Full {
                internal_user_id: stored.internal_user_id.clone(),
                credential: stored.provider_credential.clone(),
                since: self.sync_horizon(None),
                max_attempts: INITIAL_SYNC_ATTEMPTS,
            });
        } else if let Some(last_sync) = stored.provider_credential.last_sync {
            self.dispatcher.submit(SyncJob::AnnounceLastSync {
                internal_user_id: stored.internal_user_id.clone(),
                last_sync,
            });
        }

        Ok(stored)
    }

    /// Revokes the user's token at the provider.
    ///
    /// Returns `false` without calling the provider when nothing is linked.
    pub async fn revoke_credential(&self, internal_user_id: &str) -> Result<bool, OrchestratorError> {
        validate_user_id(internal_user_id)?;

        let Some(record) = self
            .store
            .find_by_internal_user_id(internal_user_id)
            .map_err(OrchestratorError::Storage)?
        else {
            debug!(internal_user_id = %internal_user_id, "Nothing to revoke");
            return Ok(false);
        };

        self.provider
            .revoke(&record.provider_credential.access_token)
            .await?;

        self.store
            .update_status(internal_user_id, TokenStatus::InvalidToken)
            .map_err(OrchestratorError::Storage)?;

        info!(internal_user_id = %internal_user_id, "Credential revoked");
        Ok(true)
    }

    /// Runs a single-attempt sync now and returns its result.
    pub async fn request_sync(&self, internal_user_id: &str) -> Result<SyncResult, OrchestratorError> {
        validate_user_id(internal_user_id)?;

        let record = self
            .store
            .find_by_internal_user_id(internal_user_id)
            .map_err(OrchestratorError::Storage)?
            .filter(|r| r.provider_credential.is_linked())
            .ok_or_else(|| {
                OrchestratorError::MissingCredential(format!(
                    "user '{}' must link a provider account first",
                    internal_user_id
                ))
            })?;

        let credential = record.provider_credential;
        let since = self.sync_horizon(credential.last_sync);
        let result = self
            .trigger
            .trigger_sync(&credential, since, SINGLE_SYNC_ATTEMPT, internal_user_id)
            .await?;
        Ok(result)
    }

    /// Routes a provider notification to a background category sync.
    ///
    /// Notifications for unknown provider accounts are dropped.
    pub async fn relay_upstream_sync(
        &self,
        provider_user_id: &str,
        category: Category,
        date: NaiveDate,
    ) -> Result<(), OrchestratorError> {
        if provider_user_id.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "provider user id is required".to_string(),
            ));
        }

        let Some(record) = self
            .store
            .find_by_provider_user_id(provider_user_id)
            .map_err(OrchestratorError::Storage)?
        else {
            debug!(
                provider_user_id = %provider_user_id,
                category = %category,
                "Dropping notification for unlinked provider account"
            );
            return Ok(());
        };

        self.dispatcher.submit(SyncJob::Category {
            internal_user_id: record.internal_user_id,
            credential: record.provider_credential,
            category,
            date,
            max_attempts: SINGLE_SYNC_ATTEMPT,
        });
        Ok(())
    }

    /// Returns the linked provider credential, or an empty placeholder.
    pub async fn get_credential(
        &self,
        internal_user_id: &str,
    ) -> Result<ProviderCredential, OrchestratorError> {
        validate_user_id(internal_user_id)?;

        Ok(self
            .store
            .find_by_internal_user_id(internal_user_id)
            .map_err(OrchestratorError::Storage)?
            .map(|record| record.provider_credential)
            .unwrap_or_default())
    }

    /// Rejects a provider account already linked to a different internal user.
    fn ensure_account_unclaimed(&self, record: &CredentialRecord) -> Result<(), OrchestratorError> {
        let Some(provider_user_id) = record.provider_credential.provider_user_id.as_deref() else {
            return Ok(());
        };
        let owner = self
            .store
            .find_by_provider_user_id(provider_user_id)
            .map_err(OrchestratorError::Storage)?;
        match owner {
            Some(owner) if owner.internal_user_id != record.internal_user_id => {
                warn!(
                    internal_user_id = %record.internal_user_id,
                    provider_user_id = %provider_user_id,
                    "Link rejected: provider account belongs to another user"
                );
                Err(OrchestratorError::Validation(
                    "provider account is already linked to another user".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }

    fn sync_horizon(&self, last_sync: Option<DateTime<Utc>>) -> DateTime<Utc> {
        last_sync.unwrap_or_else(|| Utc::now() - self.initial_lookback)
    }
}

fn lookback(days: i64) -> Duration {
    match Duration::try_days(days) {
        Some(lookback) if days >= 0 && days <= MAX_LOOKBACK_DAYS => lookback,
        _ => {
            warn!(days, "Initial lookback out of range, using default");
            Duration::days(DEFAULT_LOOKBACK_DAYS)
        }
    }
}

/// A token the provider refuses to introspect is the caller's problem.
fn introspection_error(e: ProviderError) -> OrchestratorError {
    match e {
        ProviderError::Rejected(msg) => OrchestratorError::InvalidToken(msg),
        other => other.into(),
    }
}
