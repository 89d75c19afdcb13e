//! Data synchronization against the provider.
//!
//! [`SyncTrigger`] does the work (fetch with bounded retry, publish, advance
//! `last_sync`). Work that the caller must not wait for is submitted as a
//! [`SyncJob`] to a [`SyncDispatcher`]; in production that is the queue in
//! front of a [`SyncWorker`].

use crate::credentials::{ProviderCredential, TokenStatus};
use crate::events::BusError;
use crate::provider::{ProviderError, SyncWindow};
use crate::scopes::Category;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

mod trigger;
mod worker;

pub use trigger::{RetryPolicy, SyncTrigger};
pub use worker::{QueueDispatcher, SyncWorker};

/// Outcome of one category inside a sync run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CategorySync {
    pub category: Category,
    pub records: usize,
    pub attempts: u32,
}

/// Outcome of a completed sync run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub internal_user_id: String,
    pub provider_user_id: Option<String>,
    pub window: SyncWindow,
    pub categories: Vec<CategorySync>,
    /// Token status after the run
    pub status: TokenStatus,
}

impl SyncResult {
    pub fn total_records(&self) -> usize {
        self.categories.iter().map(|c| c.records).sum()
    }
}

/// Why a sync run gave up.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("fetching {category} failed after {attempts} attempt(s): {source}")]
    Provider {
        category: Category,
        attempts: u32,
        #[source]
        source: ProviderError,
    },
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("credential storage failed: {0}")]
    Storage(#[source] anyhow::Error),
}

impl SyncError {
    /// Attempts made before giving up (1 for non-provider failures).
    pub fn attempts(&self) -> u32 {
        match self {
            SyncError::Provider { attempts, .. } => *attempts,
            _ => 1,
        }
    }

    pub fn category(&self) -> Option<Category> {
        match self {
            SyncError::Provider { category, .. } => Some(*category),
            _ => None,
        }
    }
}

/// Background work the caller does not wait for.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncJob {
    /// Sync every granted category from `since` up to now
    Full {
        internal_user_id: String,
        credential: ProviderCredential,
        since: DateTime<Utc>,
        max_attempts: u32,
    },
    /// Sync one category for one UTC day (provider notification)
    Category {
        internal_user_id: String,
        credential: ProviderCredential,
        category: Category,
        date: NaiveDate,
        max_attempts: u32,
    },
    /// Announce the existing horizon instead of syncing
    AnnounceLastSync {
        internal_user_id: String,
        last_sync: DateTime<Utc>,
    },
}

impl SyncJob {
    pub fn internal_user_id(&self) -> &str {
        match self {
            SyncJob::Full {
                internal_user_id, ..
            }
            | SyncJob::Category {
                internal_user_id, ..
            }
            | SyncJob::AnnounceLastSync {
                internal_user_id, ..
            } => internal_user_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SyncJob::Full { .. } => "full",
            SyncJob::Category { .. } => "category",
            SyncJob::AnnounceLastSync { .. } => "announce_last_sync",
        }
    }
}

/// Accepts background jobs without blocking the submitter.
///
/// Outcomes are never reported back to the submitter; implementations log
/// failures.
pub trait SyncDispatcher: Send + Sync {
    fn submit(&self, job: SyncJob);
}
