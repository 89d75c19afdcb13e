//! Credential records linking an internal user to their provider OAuth credential.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore                    │
//! │  - Upsert keyed by internal_user_id      │
//! │  - Lookup by internal / provider user id │
//! │  - Directory gate (user must exist)      │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!       (seal)               (open)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       TokenCipher                        │
//! │  - AES-256-GCM                           │
//! │  - Unique nonce per token                │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SQLite Database                    │
//! │  - One row per internal user             │
//! │  - Native atomic upsert                  │
//! └─────────────────────────────────────────┘
//! ```

use crate::provider::Introspection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

mod encryption;
mod storage;

pub use encryption::TokenCipher;
pub use storage::CredentialStore;

/// Token type recorded once a token has passed introspection.
pub const BEARER: &str = "Bearer";

/// Maximum length of an internal user id.
const MAX_USER_ID_LEN: usize = 64;

/// Validity of the provider token as last observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    ValidToken,
    InvalidToken,
    ExpiredToken,
}

impl TokenStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenStatus::ValidToken => "valid_token",
            TokenStatus::InvalidToken => "invalid_token",
            TokenStatus::ExpiredToken => "expired_token",
        }
    }
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "valid_token" => Ok(TokenStatus::ValidToken),
            "invalid_token" => Ok(TokenStatus::InvalidToken),
            "expired_token" => Ok(TokenStatus::ExpiredToken),
            other => Err(anyhow::anyhow!("unknown token status '{}'", other)),
        }
    }
}

/// Provider-side half of a credential record.
///
/// `Default` doubles as the empty placeholder returned for unlinked users.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderCredential {
    /// Provider account id (populated by introspection)
    #[serde(default)]
    pub provider_user_id: Option<String>,

    /// OAuth access token
    #[serde(default)]
    pub access_token: String,

    /// Token lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,

    /// OAuth refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Space-delimited granted scopes
    #[serde(default)]
    pub scope: Option<String>,

    #[serde(default)]
    pub token_type: Option<String>,

    #[serde(default)]
    pub status: Option<TokenStatus>,

    /// End of the last successfully synchronized window
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
}

impl ProviderCredential {
    /// True when the credential carries enough to talk to the provider on the
    /// user's behalf.
    pub fn is_linked(&self) -> bool {
        !self.access_token.is_empty()
            && self
                .provider_user_id
                .as_deref()
                .is_some_and(|id| !id.is_empty())
    }
}

/// Persisted association between an internal user and a provider credential.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Storage identity, assigned on first insert and never taken from callers
    #[serde(skip_deserializing)]
    pub id: Option<String>,

    pub internal_user_id: String,

    #[serde(default)]
    pub provider_credential: ProviderCredential,
}

impl CredentialRecord {
    pub fn new(internal_user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            id: None,
            internal_user_id: internal_user_id.into(),
            provider_credential: ProviderCredential {
                access_token: access_token.into(),
                ..Default::default()
            },
        }
    }

    /// Checks the shape required before any provider call is made.
    pub fn validated(self) -> Result<Self, RecordError> {
        validate_user_id(&self.internal_user_id)?;
        if self.provider_credential.access_token.trim().is_empty() {
            return Err(RecordError::MissingAccessToken);
        }
        Ok(self)
    }

    /// Merges introspection claims into the record.
    ///
    /// Claims absent from the response leave the corresponding field untouched.
    /// The token type becomes bearer and the status valid.
    pub fn with_introspection(mut self, claims: Introspection) -> Self {
        let credential = &mut self.provider_credential;
        if let Some(subject) = claims.subject_id {
            credential.provider_user_id = Some(subject);
        }
        if let Some(scope) = claims.scope {
            credential.scope = Some(scope);
        }
        if let Some(expires_in) = claims.expires_in {
            credential.expires_in = Some(expires_in);
        }
        credential.token_type = Some(BEARER.to_string());
        credential.status = Some(TokenStatus::ValidToken);
        self
    }
}

/// Shape violations of an incoming record or id.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("internal_user_id is required")]
    EmptyUserId,
    #[error("internal_user_id must be at most {MAX_USER_ID_LEN} characters")]
    UserIdTooLong,
    #[error("internal_user_id contains invalid character '{0}' (must be [A-Za-z0-9_-])")]
    InvalidUserIdCharacter(char),
    #[error("provider_credential.access_token is required")]
    MissingAccessToken,
}

/// Validates an internal user id: 1 to 64 characters of `[A-Za-z0-9_-]`.
pub fn validate_user_id(id: &str) -> Result<(), RecordError> {
    if id.is_empty() {
        return Err(RecordError::EmptyUserId);
    }
    if id.len() > MAX_USER_ID_LEN {
        return Err(RecordError::UserIdTooLong);
    }
    if let Some(c) = id
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '-' && *c != '_')
    {
        return Err(RecordError::InvalidUserIdCharacter(c));
    }
    Ok(())
}
