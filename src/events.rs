//! Events announced on the message bus.

use crate::provider::SyncWindow;
use crate::scopes::Category;
use crate::credentials::TokenStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event published for downstream consumers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A provider webhook subscription was created or refreshed
    SubscriptionRegistered {
        internal_user_id: String,
        provider_user_id: Option<String>,
        category: Category,
        label: String,
    },
    /// Data points pulled from the provider for one category
    DataSync {
        internal_user_id: String,
        provider_user_id: Option<String>,
        category: Category,
        window: SyncWindow,
        status: TokenStatus,
        records: Vec<serde_json::Value>,
    },
    /// Announces the already-synced horizon instead of re-syncing
    LastSync {
        internal_user_id: String,
        last_sync: DateTime<Utc>,
    },
    /// Background sync gave up
    SyncFailed {
        internal_user_id: String,
        category: Option<Category>,
        attempts: u32,
        reason: String,
    },
}

impl DomainEvent {
    /// Subject suffix under the configured prefix.
    pub fn subject(&self, prefix: &str) -> String {
        match self {
            DomainEvent::SubscriptionRegistered { category, .. } => {
                format!("{}.subscriptions.{}", prefix, category)
            }
            DomainEvent::DataSync { category, .. } => format!("{}.sync.data.{}", prefix, category),
            DomainEvent::LastSync { .. } => format!("{}.sync.last", prefix),
            DomainEvent::SyncFailed { .. } => format!("{}.sync.failed", prefix),
        }
    }

    pub fn internal_user_id(&self) -> &str {
        match self {
            DomainEvent::SubscriptionRegistered {
                internal_user_id, ..
            }
            | DomainEvent::DataSync {
                internal_user_id, ..
            }
            | DomainEvent::LastSync {
                internal_user_id, ..
            }
            | DomainEvent::SyncFailed {
                internal_user_id, ..
            } => internal_user_id,
        }
    }
}

/// The bus could not accept an event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("event bus unavailable: {0}")]
pub struct BusError(pub String);

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<(), BusError>;
}
