//! HTTP client for the remote agent runtime.
//!
//! The runtime exposes stateful conversational sessions:
//!
//! - `DELETE /apps/{app}/users/{user}/sessions/s_{id}`: drop a stale session
//! - `POST   /apps/{app}/users/{user}/sessions/s_{id}`: create a session
//! - `POST   /run`: send one user message and wait for the agent to finish
//!
//! Session creation is best-effort and never fails the caller. Queries are retried
//! with a fixed backoff on connection errors and quota-limited responses; any other
//! non-200 response is returned immediately.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::pipeline::config::AgentConfig;
use crate::utils::json_extraction::preview;

/// Prefix the runtime expects on every session id.
pub const SESSION_ID_PREFIX: &str = "s_";

/// Substrings of a non-200 body that mark a retryable quota condition.
const QUOTA_MARKERS: [&str; 2] = ["token", "limit"];

/// Returns the wire form of a session id.
pub fn wire_session_id(session_id: &str) -> String {
    format!("{}{}", SESSION_ID_PREFIX, session_id)
}

/// Returns true if a non-200 body signals a quota or token limit.
pub fn is_quota_body(body: &str) -> bool {
    let lower = body.to_lowercase();
    QUOTA_MARKERS.iter().any(|m| lower.contains(m))
}

/// Outcome of the delete-then-create sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCreateResult {
    pub session_id: String,
    /// The delete request returned a success status.
    pub deleted: bool,
    /// The create request returned a success status.
    pub created: bool,
    /// First failure seen, if any.
    pub error: Option<SessionError>,
}

impl SessionCreateResult {
    pub fn is_ok(&self) -> bool {
        self.created && self.error.is_none()
    }
}

/// Body of `POST /run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    pub new_message: NewMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub role: String,
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePart {
    pub text: String,
}

impl RunRequest {
    pub fn new(app_name: &str, user_id: &str, session_id: &str, prompt: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            session_id: wire_session_id(session_id),
            new_message: NewMessage {
                role: "user".to_string(),
                parts: vec![MessagePart {
                    text: prompt.to_string(),
                }],
            },
        }
    }
}

/// Operations the job runner needs from the agent runtime.
#[async_trait]
pub trait AgentApi: Send + Sync {
    /// Deletes any stale session with this id, then creates it. Never fails.
    async fn create_session(&self, session_id: &str) -> SessionCreateResult;

    /// Sends `prompt` to the session and returns the raw 200 response body.
    async fn query(
        &self,
        prompt: &str,
        session_id: &str,
        max_retries: u32,
    ) -> Result<String, SessionError>;
}

/// Session client backed by `reqwest`.
pub struct SessionClient {
    client: Client,
    config: AgentConfig,
}

impl SessionClient {
    /// Creates a client for the configured runtime.
    pub fn new(config: AgentConfig) -> Result<Self, SessionError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SessionError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// URL of the session resource for `session_id`.
    pub fn session_url(&self, session_id: &str) -> String {
        format!(
            "{}/apps/{}/users/{}/sessions/{}",
            self.base_url(),
            urlencoding::encode(&self.config.app_name),
            urlencoding::encode(&self.config.user_id),
            urlencoding::encode(&wire_session_id(session_id)),
        )
    }

    fn run_url(&self) -> String {
        format!("{}/run", self.base_url())
    }

    /// Deletes the session. Returns whether the runtime acknowledged it.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool, SessionError> {
        let response = self
            .client
            .delete(self.session_url(session_id))
            .send()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        Ok(response.status().is_success())
    }

    async fn post_session(&self, session_id: &str) -> Result<(), SessionError> {
        let response = self
            .client
            .post(self.session_url(session_id))
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(SessionError::PermanentRemote {
            status: status.as_u16(),
            body,
        })
    }

    /// Execute a single query (no retry logic).
    async fn execute_query(&self, request: &RunRequest) -> Result<String, SessionError> {
        let response = self
            .client
            .post(self.run_url())
            .json(request)
            .send()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 200 {
            return response
                .text()
                .await
                .map_err(|e| SessionError::Decode(e.to_string()));
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());

        if is_quota_body(&body) {
            Err(SessionError::Quota {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(SessionError::PermanentRemote {
                status: status.as_u16(),
                body,
            })
        }
    }

    fn backoff_for(&self, error: &SessionError) -> Duration {
        match error {
            SessionError::Quota { .. } => self.config.quota_backoff,
            _ => self.config.transport_backoff,
        }
    }
}

#[async_trait]
impl AgentApi for SessionClient {
    async fn create_session(&self, session_id: &str) -> SessionCreateResult {
        let mut result = SessionCreateResult {
            session_id: session_id.to_string(),
            deleted: false,
            created: false,
            error: None,
        };

        match self.delete_session(session_id).await {
            Ok(deleted) => result.deleted = deleted,
            Err(err) => {
                tracing::warn!(session_id, error = %err, "Session delete failed");
                result.error = Some(err);
            }
        }

        match self.post_session(session_id).await {
            Ok(()) => result.created = true,
            Err(err) => {
                tracing::warn!(session_id, error = %err, "Session create failed");
                result.error.get_or_insert(err);
            }
        }

        tracing::debug!(
            session_id,
            deleted = result.deleted,
            created = result.created,
            "Session prepared"
        );
        result
    }

    async fn query(
        &self,
        prompt: &str,
        session_id: &str,
        max_retries: u32,
    ) -> Result<String, SessionError> {
        let request = RunRequest::new(
            &self.config.app_name,
            &self.config.user_id,
            session_id,
            prompt,
        );
        let mut last_error: Option<SessionError> = None;

        for attempt in 0..=max_retries {
            match self.execute_query(&request).await {
                Ok(body) => {
                    tracing::debug!(
                        session_id,
                        attempt = attempt + 1,
                        bytes = body.len(),
                        "Query succeeded"
                    );
                    return Ok(body);
                }
                Err(err) if err.is_retryable() => {
                    let delay = self.backoff_for(&err);
                    tracing::warn!(
                        session_id,
                        attempt = attempt + 1,
                        max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %preview(&err.to_string(), 200),
                        "Transient query failure, will retry"
                    );
                    last_error = Some(err);
                    if attempt < max_retries {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => {
                    tracing::warn!(session_id, error = %err, "Query failed permanently");
                    return Err(err);
                }
            }
        }

        Err(SessionError::RetriesExhausted {
            attempts: max_retries + 1,
            last: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}
