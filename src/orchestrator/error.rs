use crate::credentials::RecordError;
use crate::directory::DirectoryError;
use crate::provider::ProviderError;
use crate::subscription::RegistrationError;
use crate::sync::SyncError;

/// Failure of an orchestrator operation.
///
/// Client-side problems (`Validation`, `InsufficientScope`,
/// `MissingCredential`, `InvalidToken`) carry a message meant for the caller.
/// Infrastructure problems carry detail for the logs only.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("insufficient scope: {0}")]
    InsufficientScope(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("event bus unavailable: {0}")]
    EventBusUnavailable(String),

    #[error("no linked credential: {0}")]
    MissingCredential(String),

    #[error("provider rejected the token: {0}")]
    InvalidToken(String),

    #[error("credential storage failed: {0}")]
    Storage(#[source] anyhow::Error),
}

impl OrchestratorError {
    /// Whether the failure is on our side (or the provider's) rather than
    /// something the caller must fix.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            OrchestratorError::ProviderUnavailable(_)
                | OrchestratorError::EventBusUnavailable(_)
                | OrchestratorError::Storage(_)
        )
    }
}

impl From<RecordError> for OrchestratorError {
    fn from(e: RecordError) -> Self {
        OrchestratorError::Validation(e.to_string())
    }
}

impl From<ProviderError> for OrchestratorError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::InvalidToken(_) | ProviderError::ExpiredToken(_) => {
                OrchestratorError::InvalidToken(e.to_string())
            }
            ProviderError::Unavailable(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::Rejected(_)
            | ProviderError::Transport(_) => OrchestratorError::ProviderUnavailable(e.to_string()),
        }
    }
}

impl From<RegistrationError> for OrchestratorError {
    fn from(e: RegistrationError) -> Self {
        match e {
            RegistrationError::Provider { source, .. } => source.into(),
            RegistrationError::Bus { .. } => OrchestratorError::EventBusUnavailable(e.to_string()),
        }
    }
}

impl From<DirectoryError> for OrchestratorError {
    fn from(e: DirectoryError) -> Self {
        OrchestratorError::EventBusUnavailable(e.to_string())
    }
}

impl From<SyncError> for OrchestratorError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Provider { source, .. } => source.into(),
            SyncError::Bus(bus) => OrchestratorError::EventBusUnavailable(bus.to_string()),
            SyncError::Storage(e) => OrchestratorError::Storage(e),
        }
    }
}
