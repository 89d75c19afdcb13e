//! Wearable-data provider API.
//!
//! [`ProviderApi`] is the seam the orchestrator and sync trigger talk to. The
//! production implementation is [`HttpProviderClient`].

use crate::credentials::ProviderCredential;
use crate::scopes::Category;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

mod client;

pub use client::{HttpProviderClient, ProviderClientConfig};

/// Claims extracted from an introspected access token.
///
/// Every field is optional; providers are allowed to omit claims.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Introspection {
    pub subject_id: Option<String>,
    pub scope: Option<String>,
    pub expires_in: Option<i64>,
}

/// Half-open time window `[start, end)` requested from the provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SyncWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Window from `since` up to now.
    pub fn since(since: DateTime<Utc>) -> Self {
        Self::new(since, Utc::now())
    }

    /// The UTC calendar day `date`.
    pub fn day(date: NaiveDate) -> Self {
        let start = date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
        Self::new(start, start + Duration::days(1))
    }
}

/// Failures talking to the provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Provider returned a server error
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// Provider throttled the request
    #[error("provider rate limit exceeded")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Token is unknown, revoked or malformed
    #[error("provider rejected the token: {0}")]
    InvalidToken(String),

    /// Token was valid once but has expired
    #[error("provider token expired: {0}")]
    ExpiredToken(String),

    /// Provider refused the request for another reason
    #[error("provider rejected the request: {0}")]
    Rejected(String),

    /// Request never got an HTTP answer (connect, timeout, decode)
    #[error("provider transport error: {0}")]
    Transport(String),
}

impl ProviderError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Unavailable(_)
                | ProviderError::RateLimited { .. }
                | ProviderError::Transport(_)
        )
    }
}

/// Operations consumed from the provider.
#[async_trait]
pub trait ProviderApi: Send + Sync {
    /// Validates `access_token` and returns its claims.
    async fn introspect(&self, access_token: &str) -> Result<Introspection, ProviderError>;

    /// Creates or refreshes the webhook subscription for `category`.
    async fn subscribe(
        &self,
        credential: &ProviderCredential,
        category: Category,
    ) -> Result<(), ProviderError>;

    /// Revokes `access_token` at the provider.
    async fn revoke(&self, access_token: &str) -> Result<(), ProviderError>;

    /// Fetches the data points of `category` inside `window`.
    async fn fetch(
        &self,
        credential: &ProviderCredential,
        category: Category,
        window: SyncWindow,
    ) -> Result<Vec<serde_json::Value>, ProviderError>;
}
