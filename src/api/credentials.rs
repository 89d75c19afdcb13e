//! Credential endpoints.

use super::{AppError, AppState};
use crate::credentials::{CredentialRecord, ProviderCredential};
use crate::sync::SyncResult;
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Query for POST /api/credentials/connect
#[derive(Deserialize, Default)]
pub struct ConnectQuery {
    /// Loosely-typed flag (`true`, `1`, `yes`, `on`)
    #[serde(default)]
    pub init_sync: Option<String>,
}

/// Interprets a loosely-typed flag (`true`, `1`, `yes`, `on`).
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Response for DELETE /api/credentials/:user_id/token
#[derive(Serialize)]
pub struct RevokeResponse {
    pub revoked: bool,
}

/// Create credential API router
pub fn create_credential_router(state: AppState) -> Router {
    Router::new()
        .route("/api/credentials", post(link_credential))
        .route("/api/credentials/connect", post(link_credential_and_sync))
        .route("/api/credentials/:user_id", get(get_credential))
        .route("/api/credentials/:user_id/token", delete(revoke_credential))
        .route("/api/credentials/:user_id/sync", post(request_sync))
        .with_state(state)
}

/// POST /api/credentials
async fn link_credential(
    State(state): State<AppState>,
    Json(record): Json<CredentialRecord>,
) -> Result<Json<CredentialRecord>, AppError> {
    let stored = state.orchestrator.link_credential(record).await?;
    Ok(Json(stored))
}

/// POST /api/credentials/connect?init_sync=<bool>
///
/// Responds as soon as the credential is stored; the sync runs in the
/// background.
async fn link_credential_and_sync(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    Json(record): Json<CredentialRecord>,
) -> Result<Json<CredentialRecord>, AppError> {
    let init_sync = query.init_sync.as_deref().is_some_and(is_truthy);
    debug!(internal_user_id = %record.internal_user_id, init_sync, "Connect requested");

    let stored = state
        .orchestrator
        .link_credential_and_sync(record, init_sync)
        .await?;
    Ok(Json(stored))
}

/// GET /api/credentials/:user_id
///
/// Unlinked users get an empty credential, not 404.
async fn get_credential(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ProviderCredential>, AppError> {
    let credential = state.orchestrator.get_credential(&user_id).await?;
    Ok(Json(credential))
}

/// DELETE /api/credentials/:user_id/token
async fn revoke_credential(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<RevokeResponse>, AppError> {
    let revoked = state.orchestrator.revoke_credential(&user_id).await?;
    Ok(Json(RevokeResponse { revoked }))
}

/// POST /api/credentials/:user_id/sync
async fn request_sync(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<SyncResult>, AppError> {
    let result = state.orchestrator.request_sync(&user_id).await?;
    Ok(Json(result))
}
