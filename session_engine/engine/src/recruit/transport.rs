use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use tracing::debug;

use crate::error::SessionError;
use crate::recruit::requests::JoinRequest;
use crate::types::PartyRole;

/// Where a join request is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTarget {
    pub role: PartyRole,
    pub base_url: String,
    /// Full `Authorization` header value, e.g. `Bearer <token>`.
    pub auth_header: Option<String>,
}

/// Delivery of join requests to remote parties.
#[async_trait]
pub trait JoinTransport: Send + Sync {
    /// Ok only on HTTP 200; anything else is `RemotePartyRefused`.
    async fn request_join(&self, target: &JoinTarget, request: &JoinRequest) -> Result<(), SessionError>;

    /// Whether the Fast Vault Server holds a share for `public_key`.
    async fn vault_exists(&self, fast_vault_url: &str, public_key: &str) -> Result<bool, SessionError>;
}

#[derive(Clone)]
pub struct HttpJoinTransport {
    http: reqwest::Client,
}

impl HttpJoinTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SessionError::ValidationError(format!("join client setup failed: {e}")))?;
        Ok(HttpJoinTransport { http })
    }
}

#[async_trait]
impl JoinTransport for HttpJoinTransport {
    async fn request_join(&self, target: &JoinTarget, request: &JoinRequest) -> Result<(), SessionError> {
        let url = format!("{}{}", target.base_url.trim_end_matches('/'), request.path());
        debug!(role = %target.role, url = %url, session_id = request.session_id(), "Sending join request");

        let mut builder = self.http.post(&url).json(request);
        if let Some(auth) = target.auth_header.as_deref().filter(|a| !a.is_empty()) {
            builder = builder.header(AUTHORIZATION, auth);
        }

        let resp = builder.send().await.map_err(|e| SessionError::RemotePartyRefused {
            role: target.role,
            reason: format!("send request: {e}"),
        })?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(SessionError::RemotePartyRefused {
                role: target.role,
                reason: format!("returned {}: {}", status.as_u16(), body),
            });
        }
        Ok(())
    }

    async fn vault_exists(&self, fast_vault_url: &str, public_key: &str) -> Result<bool, SessionError> {
        let url = format!("{}/vault/exist/{}", fast_vault_url.trim_end_matches('/'), public_key);
        let resp = self.http.get(&url).send().await.map_err(|e| SessionError::RemotePartyRefused {
            role: PartyRole::FastVaultServer,
            reason: format!("send request: {e}"),
        })?;
        Ok(resp.status() == StatusCode::OK)
    }
}
