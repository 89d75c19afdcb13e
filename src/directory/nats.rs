use super::{DirectoryError, UserDirectory};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Serialize)]
struct ExistsRequest<'a> {
    internal_user_id: &'a str,
}

#[derive(Deserialize, Debug)]
struct ExistsReply {
    exists: bool,
}

/// Asks the auth service over NATS request/reply.
///
/// Subject: `{prefix}.directory.users.exists`
/// Request: `{"internal_user_id": "..."}`
/// Reply: `{"exists": true|false}`
#[derive(Clone)]
pub struct NatsUserDirectory {
    client: async_nats::Client,
    subject: String,
    timeout: Duration,
}

impl NatsUserDirectory {
    pub fn new(client: async_nats::Client, subject_prefix: &str, timeout: Duration) -> Self {
        Self {
            client,
            subject: exists_subject(subject_prefix),
            timeout,
        }
    }
}

fn exists_subject(prefix: &str) -> String {
    format!("{}.directory.users.exists", prefix)
}

fn parse_reply(payload: &[u8]) -> Result<bool, DirectoryError> {
    serde_json::from_slice::<ExistsReply>(payload)
        .map(|reply| reply.exists)
        .map_err(|e| DirectoryError::MalformedReply(e.to_string()))
}

#[async_trait]
impl UserDirectory for NatsUserDirectory {
    async fn exists(&self, internal_user_id: &str) -> Result<bool, DirectoryError> {
        let payload = serde_json::to_vec(&ExistsRequest { internal_user_id })
            .map_err(|e| DirectoryError::MalformedReply(e.to_string()))?;

        debug!(
            internal_user_id = %internal_user_id,
            subject = %self.subject,
            "Querying user directory"
        );

        let request = self.client.request(self.subject.clone(), payload.into());
        let message = match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(message)) => message,
            Ok(Err(e)) => {
                warn!(error = %e, subject = %self.subject, "Directory request failed");
                return Err(DirectoryError::Unavailable(e.to_string()));
            }
            Err(_) => {
                warn!(subject = %self.subject, "Directory request timed out");
                return Err(DirectoryError::Unavailable(format!(
                    "no reply within {}ms",
                    self.timeout.as_millis()
                )));
            }
        };

        parse_reply(&message.payload)
    }
}
