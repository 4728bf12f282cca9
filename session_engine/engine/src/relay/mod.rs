//! Session-membership primitives over the relay's HTTP surface.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use tracing::debug;

use crate::error::SessionError;
use crate::types::{PartyId, SessionId};

/// What the coordinator needs from a relay.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Announce `local_party` as the first member of a new session.
    async fn register_session(&self, session_id: &SessionId, local_party: &PartyId) -> Result<(), SessionError>;

    /// Currently registered members; an empty list is a valid answer.
    async fn get_session(&self, session_id: &SessionId) -> Result<Vec<PartyId>, SessionError>;

    /// Allow protocol traffic among exactly `members`.
    async fn start_session(&self, session_id: &SessionId, members: &[PartyId]) -> Result<(), SessionError>;

    /// Mark the session finished from `local_party`'s side.
    async fn complete_session(&self, session_id: &SessionId, local_party: &PartyId) -> Result<(), SessionError>;
}

/// HTTP relay client used by the coordinator
#[derive(Clone)]
pub struct RelayClient {
    base_url: String,
    http: reqwest::Client,
}

impl RelayClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SessionError::ValidationError(format!("relay client setup failed: {e}")))?;

        Ok(RelayClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn session_url(&self, session_id: &SessionId) -> String {
        format!("{}/session/{}", self.base_url, session_id)
    }
}

/// Turns transport errors and non-2xx replies into `RelayUnavailable`.
async fn check(op: &str, result: Result<Response, reqwest::Error>) -> Result<Response, SessionError> {
    let resp = result.map_err(|e| SessionError::RelayUnavailable(format!("{op}: {e}")))?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SessionError::RelayUnavailable(format!("{op}: relay returned {status}: {body}")))
}

#[async_trait]
impl Relay for RelayClient {
    async fn register_session(&self, session_id: &SessionId, local_party: &PartyId) -> Result<(), SessionError> {
        debug!(session_id = %session_id, local_party = %local_party, "Registering session");
        let result = self
            .http
            .post(self.session_url(session_id))
            .json(&[local_party])
            .send()
            .await;
        check("register session", result).await?;
        Ok(())
    }

    async fn get_session(&self, session_id: &SessionId) -> Result<Vec<PartyId>, SessionError> {
        let result = self.http.get(self.session_url(session_id)).send().await;
        let resp = check("get session", result).await?;

        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        let body = resp
            .text()
            .await
            .map_err(|e| SessionError::RelayUnavailable(format!("get session: {e}")))?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }

        let members: Option<Vec<PartyId>> = serde_json::from_str(&body)
            .map_err(|e| SessionError::RelayUnavailable(format!("get session: malformed member list: {e}")))?;
        Ok(members.unwrap_or_default())
    }

    async fn start_session(&self, session_id: &SessionId, members: &[PartyId]) -> Result<(), SessionError> {
        debug!(session_id = %session_id, members = members.len(), "Starting session");
        let result = self
            .http
            .post(format!("{}/start", self.session_url(session_id)))
            .json(members)
            .send()
            .await;
        check("start session", result).await?;
        Ok(())
    }

    async fn complete_session(&self, session_id: &SessionId, local_party: &PartyId) -> Result<(), SessionError> {
        debug!(session_id = %session_id, local_party = %local_party, "Completing session");
        let result = self
            .http
            .delete(format!("{}/{}", self.session_url(session_id), local_party))
            .send()
            .await;
        check("complete session", result)
            .await
            .map_err(|e| SessionError::CompletionSignalFailed(e.to_string()))?;
        Ok(())
    }
}
