//! Auth directory gate: is an internal user id a registered user?
//!
//! The directory is owned by another service. Production deployments ask it
//! over NATS request/reply ([`NatsUserDirectory`]); development and tests use
//! a fixed in-memory set ([`StaticUserDirectory`]).

use async_trait::async_trait;
use dashmap::DashSet;

mod nats;

pub use nats::NatsUserDirectory;

/// Directory lookups that could not be answered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// The transport to the directory failed or timed out
    #[error("user directory unreachable: {0}")]
    Unavailable(String),
    /// The directory answered with something we could not read
    #[error("malformed directory reply: {0}")]
    MalformedReply(String),
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Returns whether `internal_user_id` belongs to a registered user.
    async fn exists(&self, internal_user_id: &str) -> Result<bool, DirectoryError>;
}

/// Directory backed by a fixed set of user ids.
#[derive(Debug, Default)]
pub struct StaticUserDirectory {
    users: DashSet<String>,
}

impl StaticUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let directory = Self::new();
        for user in users {
            directory.insert(user);
        }
        directory
    }

    pub fn insert(&self, internal_user_id: impl Into<String>) {
        self.users.insert(internal_user_id.into());
    }

    pub fn remove(&self, internal_user_id: &str) -> bool {
        self.users.remove(internal_user_id).is_some()
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn exists(&self, internal_user_id: &str) -> Result<bool, DirectoryError> {
        Ok(self.users.contains(internal_user_id))
    }
}
