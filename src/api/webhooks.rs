//! Provider notification endpoint.
//!
//! The provider posts a form (`userid`, `category`, `date`) whenever new data
//! is available. The reply is always immediate; the sync runs in the
//! background.

use super::{AppError, AppState};
use crate::scopes::Category;
use axum::{extract::State, http::StatusCode, routing::post, Form, Router};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;

/// Form posted by the provider
#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct ProviderNotification {
    /// Provider account id
    pub userid: String,
    /// Category name (`body`, `activities`, `sleep`)
    pub category: String,
    /// UTC day with new data (`YYYY-MM-DD`)
    pub date: String,
}

impl ProviderNotification {
    fn parse(&self) -> Result<(Category, NaiveDate), AppError> {
        let category = self
            .category
            .parse::<Category>()
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        let date = NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d").map_err(|_| {
            AppError::BadRequest(format!("invalid date '{}' (expected YYYY-MM-DD)", self.date))
        })?;
        Ok((category, date))
    }
}

/// Create webhook router
pub fn create_webhook_router(state: AppState) -> Router {
    Router::new()
        .route("/api/webhooks/provider", post(provider_notification))
        .with_state(state)
}

/// POST /api/webhooks/provider
async fn provider_notification(
    State(state): State<AppState>,
    Form(notification): Form<ProviderNotification>,
) -> Result<StatusCode, AppError> {
    let (category, date) = notification.parse()?;
    info!(
        provider_user_id = %notification.userid,
        category = %category,
        date = %date,
        "Provider notification received"
    );

    state
        .orchestrator
        .relay_upstream_sync(&notification.userid, category, date)
        .await?;
    Ok(StatusCode::ACCEPTED)
}
