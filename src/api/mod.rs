//! HTTP surface over the credential orchestrator.

mod credentials;
mod error;
mod webhooks;

pub use credentials::{create_credential_router, is_truthy};
pub use error::AppError;
pub use webhooks::{create_webhook_router, ProviderNotification};

use crate::orchestrator::CredentialOrchestrator;
use axum::{response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<CredentialOrchestrator>,
}

/// Create the full API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(create_credential_router(state.clone()))
        .merge(create_webhook_router(state))
}

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
