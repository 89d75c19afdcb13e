//! Provider webhook subscriptions, one per granted data category.

use crate::credentials::CredentialRecord;
use crate::events::{BusError, DomainEvent, EventPublisher};
use crate::provider::{ProviderApi, ProviderError};
use crate::scopes::{Category, GrantedScopes};
use std::sync::Arc;
use tracing::{info, warn};

/// Why a registration round stopped.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("subscription for {category} failed: {source}")]
    Provider {
        category: Category,
        #[source]
        source: ProviderError,
    },
    #[error("announcing subscription for {category} failed: {source}")]
    Bus {
        category: Category,
        #[source]
        source: BusError,
    },
}

/// Registers provider subscriptions and announces them on the bus.
#[derive(Clone)]
pub struct SubscriptionRegistrar {
    provider: Arc<dyn ProviderApi>,
    publisher: Arc<dyn EventPublisher>,
}

impl SubscriptionRegistrar {
    pub fn new(provider: Arc<dyn ProviderApi>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            provider,
            publisher,
        }
    }

    /// Subscribes `record` to every category in `scopes`, in category order.
    ///
    /// Stops at the first failure; categories registered before it stay
    /// registered at the provider.
    pub async fn register_all(
        &self,
        record: &CredentialRecord,
        scopes: &GrantedScopes,
    ) -> Result<Vec<Category>, RegistrationError> {
        let mut registered = Vec::with_capacity(scopes.len());
        for category in scopes.iter() {
            self.register(record, category).await?;
            registered.push(category);
        }
        Ok(registered)
    }

    async fn register(
        &self,
        record: &CredentialRecord,
        category: Category,
    ) -> Result<(), RegistrationError> {
        let credential = &record.provider_credential;

        self.provider
            .subscribe(credential, category)
            .await
            .map_err(|source| {
                warn!(
                    internal_user_id = %record.internal_user_id,
                    category = %category,
                    error = %source,
                    "Provider subscription failed"
                );
                RegistrationError::Provider { category, source }
            })?;

        let event = DomainEvent::SubscriptionRegistered {
            internal_user_id: record.internal_user_id.clone(),
            provider_user_id: credential.provider_user_id.clone(),
            category,
            label: category.label().to_string(),
        };
        self.publisher
            .publish(&event)
            .await
            .map_err(|source| RegistrationError::Bus { category, source })?;

        info!(
            internal_user_id = %record.internal_user_id,
            category = %category,
            label = category.label(),
            "Subscription registered"
        );
        Ok(())
    }
}
