use super::{Introspection, ProviderApi, ProviderError, SyncWindow};
use crate::credentials::ProviderCredential;
use crate::scopes::Category;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Connection settings for [`HttpProviderClient`].
#[derive(Clone, Debug)]
pub struct ProviderClientConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// URL the provider pushes notifications to
    pub callback_url: String,
    pub timeout: Duration,
}

#[derive(Deserialize, Debug)]
struct IntrospectionResponse {
    active: bool,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Deserialize, Debug)]
struct MeasuresResponse {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

/// HTTP client for the provider REST API.
pub struct HttpProviderClient {
    config: ProviderClientConfig,
    http_client: Client,
}

impl HttpProviderClient {
    pub fn new(config: ProviderClientConfig) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent("wearsync/0.1")
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            config,
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl ProviderApi for HttpProviderClient {
    async fn introspect(&self, access_token: &str) -> Result<Introspection, ProviderError> {
        let response = self
            .http_client
            .post(self.url("/oauth2/introspect"))
            .form(&[
                ("token", access_token),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_response_status(response).await?;
        let body: IntrospectionResponse = response.json().await.map_err(transport_error)?;

        if !body.active {
            return Err(ProviderError::InvalidToken(
                "token is not active".to_string(),
            ));
        }

        debug!(
            has_subject = body.sub.is_some(),
            has_scope = body.scope.is_some(),
            expires_in = ?body.expires_in,
            "Token introspected"
        );

        Ok(Introspection {
            subject_id: body.sub,
            scope: body.scope,
            expires_in: body.expires_in,
        })
    }

    async fn subscribe(
        &self,
        credential: &ProviderCredential,
        category: Category,
    ) -> Result<(), ProviderError> {
        let response = self
            .http_client
            .post(self.url("/notify/subscribe"))
            .bearer_auth(&credential.access_token)
            .form(&[
                ("category", category.as_str()),
                ("label", category.label()),
                ("callback_url", self.config.callback_url.as_str()),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        check_response_status(response).await?;
        Ok(())
    }

    async fn revoke(&self, access_token: &str) -> Result<(), ProviderError> {
        let response = self
            .http_client
            .post(self.url("/oauth2/revoke"))
            .form(&[
                ("token", access_token),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        check_response_status(response).await?;
        Ok(())
    }

    async fn fetch(
        &self,
        credential: &ProviderCredential,
        category: Category,
        window: SyncWindow,
    ) -> Result<Vec<serde_json::Value>, ProviderError> {
        let response = self
            .http_client
            .get(self.url(&format!("/v1/measures/{}", category.as_str())))
            .bearer_auth(&credential.access_token)
            .query(&[
                ("start", window.start.timestamp()),
                ("end", window.end.timestamp()),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_response_status(response).await?;
        let body: MeasuresResponse = response.json().await.map_err(transport_error)?;
        Ok(body.data)
    }
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    ProviderError::Transport(e.to_string())
}

/// Maps non-2xx responses onto [`ProviderError`].
///
/// - 401 → invalid token (expired token when the body says so)
/// - 429 → rate limited (reads `Retry-After` seconds)
/// - 5xx → unavailable
/// - Other non-2xx → rejected
async fn check_response_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read body>".to_string());

    Err(match status {
        StatusCode::UNAUTHORIZED if body.to_lowercase().contains("expired") => {
            ProviderError::ExpiredToken(body)
        }
        StatusCode::UNAUTHORIZED => ProviderError::InvalidToken(body),
        s if s.is_server_error() => ProviderError::Unavailable(format!("{}: {}", s, body)),
        s => ProviderError::Rejected(format!("{}: {}", s, body)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn client_for(server: &Server) -> HttpProviderClient {
        HttpProviderClient::new(ProviderClientConfig {
            base_url: server.url(),
            client_id: "client-1".to_string(),
            client_secret: "secret-1".to_string(),
            callback_url: "https://wearsync.example/api/webhooks/provider".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn credential(token: &str) -> ProviderCredential {
        ProviderCredential {
            access_token: token.to_string(),
            provider_user_id: Some("p1".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_introspect_active_token() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth2/introspect")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("token".into(), "tok-abc".into()),
                Matcher::UrlEncoded("client_id".into(), "client-1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"active": true, "sub": "p1", "scope": "weight-scope activity-scope", "expires_in": 3600}"#,
            )
            .create_async()
            .await;

        let claims = client_for(&server).introspect("tok-abc").await.unwrap();
        assert_eq!(claims.subject_id.as_deref(), Some("p1"));
        assert_eq!(claims.scope.as_deref(), Some("weight-scope activity-scope"));
        assert_eq!(claims.expires_in, Some(3600));
    }

    #[tokio::test]
    async fn test_introspect_partial_response() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth2/introspect")
            .with_status(200)
            .with_body(r#"{"active": true, "sub": "p1"}"#)
            .create_async()
            .await;

        let claims = client_for(&server).introspect("tok").await.unwrap();
        assert_eq!(claims.subject_id.as_deref(), Some("p1"));
        assert_eq!(claims.scope, None);
        assert_eq!(claims.expires_in, None);
    }

    #[tokio::test]
    async fn test_introspect_inactive_token() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth2/introspect")
            .with_status(200)
            .with_body(r#"{"active": false}"#)
            .create_async()
            .await;

        let err = client_for(&server).introspect("tok").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_subscribe_sends_category_and_label() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/notify/subscribe")
            .match_header("authorization", "Bearer tok-abc")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("category".into(), "activities".into()),
                Matcher::UrlEncoded("label".into(), "ACTIVITIES".into()),
            ]))
            .with_status(200)
            .create_async()
            .await;

        client_for(&server)
            .subscribe(&credential("tok-abc"), Category::Activities)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_returns_data_points() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/measures/sleep")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("start".into(), "1772323200".into()),
                Matcher::UrlEncoded("end".into(), "1772409600".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"data": [{"duration": 27000}, {"duration": 1800}]}"#)
            .create_async()
            .await;

        let window = SyncWindow::day(chrono::NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        let data = client_for(&server)
            .fetch(&credential("tok"), Category::Sleep, window)
            .await
            .unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["duration"], 27000);
    }

    async fn revoke_against(status: usize, header: Option<(&str, &str)>, body: &str) -> ProviderError {
        let mut server = Server::new_async().await;
        let mut mock = server
            .mock("POST", "/oauth2/revoke")
            .with_status(status)
            .with_body(body);
        if let Some((name, value)) = header {
            mock = mock.with_header(name, value);
        }
        let _mock = mock.create_async().await;

        client_for(&server).revoke("tok").await.unwrap_err()
    }

    #[tokio::test]
    async fn test_status_mapping() {
        assert_eq!(
            revoke_against(429, Some(("retry-after", "30")), "").await,
            ProviderError::RateLimited {
                retry_after_secs: Some(30)
            }
        );
        assert!(matches!(
            revoke_against(401, None, r#"{"error": "token expired"}"#).await,
            ProviderError::ExpiredToken(_)
        ));
        assert!(matches!(
            revoke_against(401, None, r#"{"error": "invalid_token"}"#).await,
            ProviderError::InvalidToken(_)
        ));
        assert!(matches!(
            revoke_against(503, None, "").await,
            ProviderError::Unavailable(_)
        ));
        assert!(matches!(
            revoke_against(400, None, "").await,
            ProviderError::Rejected(_)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_transport_error() {
        let client = HttpProviderClient::new(ProviderClientConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            callback_url: String::new(),
            timeout: Duration::from_secs(1),
        })
        .unwrap();

        let err = client.introspect("tok").await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)));
        assert!(err.is_transient());
    }
}
