//! Verifier authentication: an EIP-191 message signed through a Fast Vault
//! keysign is exchanged for a bearer token, cached in the dev config.

use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::DevConfig;
use crate::coordinator::{KeysignParams, SessionCoordinator};
use crate::error::SessionError;
use crate::types::SignatureScheme;
use crate::vault::Vault;

/// Ethereum account path the login message is signed under.
pub const AUTH_DERIVE_PATH: &str = "m/44'/60'/0'/0/0";
/// How long the signed login message stays valid.
pub const MESSAGE_LIFETIME_MINUTES: i64 = 5;
/// How long a token is assumed valid after login.
pub const TOKEN_LIFETIME_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub token: String,
    pub public_key: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthToken {
    /// Cached token from `config`, if one was stored.
    pub fn from_config(config: &DevConfig) -> Result<Self, SessionError> {
        if config.auth_token.is_empty() {
            return Err(SessionError::AuthError(
                "no auth token found, run `devctl auth login` first".into(),
            ));
        }
        let expires_at = DateTime::parse_from_rfc3339(&config.auth_expires_at)
            .map_err(|e| SessionError::AuthError(format!("invalid token expiry: {e}")))?
            .with_timezone(&Utc);

        Ok(AuthToken {
            token: config.auth_token.clone(),
            public_key: config.auth_public_key.clone(),
            expires_at,
        })
    }

    pub fn store(&self, config: &mut DevConfig) {
        config.auth_token = self.token.clone();
        config.auth_public_key = self.public_key.clone();
        config.auth_expires_at = self.expires_at.to_rfc3339_opts(SecondsFormat::Secs, true);
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// `Authorization` header value for Verifier calls.
pub fn auth_header(config: &DevConfig, now: DateTime<Utc>) -> Result<String, SessionError> {
    let token = AuthToken::from_config(config)?;
    if token.is_expired(now) {
        return Err(SessionError::AuthError(
            "auth token expired, run `devctl auth login` again".into(),
        ));
    }
    Ok(format!("Bearer {}", token.token))
}

pub fn logout(config: &mut DevConfig) {
    config.auth_token.clear();
    config.auth_public_key.clear();
    config.auth_expires_at.clear();
}

// field order matches the sorted-key JSON the verifier re-hashes
#[derive(Debug, Serialize)]
struct LoginMessage {
    #[serde(rename = "expiresAt")]
    expires_at: String,
    nonce: String,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    message: &'a str,
    signature: &'a str,
    chain_code_hex: &'a str,
    public_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    data: LoginData,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

/// Fresh login message: a random 16-byte nonce and an expiry five minutes out.
pub fn login_message(now: DateTime<Utc>) -> Result<String, SessionError> {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);

    let message = LoginMessage {
        expires_at: (now + ChronoDuration::minutes(MESSAGE_LIFETIME_MINUTES))
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        nonce: hex::encode(nonce),
    };
    Ok(serde_json::to_string(&message)?)
}

/// Keccak-256 of the EIP-191 `personal_sign` framing of `message`.
pub fn eip191_hash(message: &str) -> [u8; 32] {
    let framed = format!("\x19Ethereum Signed Message:\n{}{}", message.len(), message);
    Keccak256::digest(framed.as_bytes()).into()
}

/// Signs a login message with the vault and trades it for a Verifier token.
pub async fn login(
    coordinator: &SessionCoordinator,
    vault: &Vault,
    vault_password: &str,
    cancel: &CancellationToken,
) -> Result<AuthToken, SessionError> {
    if vault.public_key_ecdsa.is_empty() {
        return Err(SessionError::AuthError("vault has no ECDSA public key".into()));
    }
    if vault.hex_chain_code.is_empty() {
        return Err(SessionError::AuthError("vault has no chain code".into()));
    }

    // STEP 1: build and hash the login message
    let message = login_message(Utc::now())?;
    let hash = hex::encode(eip191_hash(&message));

    // STEP 2: sign it together with the Fast Vault Server
    info!(vault = %vault.name, verifier = %coordinator.config().verifier_url, "Authenticating with verifier");
    let signed = coordinator
        .keysign(
            vault,
            KeysignParams {
                messages: vec![hash],
                scheme: SignatureScheme::Ecdsa,
                derive_path: AUTH_DERIVE_PATH.to_string(),
                vault_password: vault_password.to_string(),
            },
            cancel,
        )
        .await?;
    let signature = signed
        .value
        .first()
        .map(|r| r.der_signature.clone())
        .ok_or_else(|| SessionError::AuthError("no signature result".into()))?;

    // STEP 3: exchange the signature for a token
    let config = coordinator.config();
    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .map_err(|e| SessionError::AuthError(e.to_string()))?;
    let url = format!("{}/auth", config.verifier_url.trim_end_matches('/'));

    let response = client
        .post(&url)
        .json(&LoginRequest {
            message: &message,
            signature: &signature,
            chain_code_hex: &vault.hex_chain_code,
            public_key: &vault.public_key_ecdsa,
        })
        .send()
        .await
        .map_err(|e| SessionError::AuthError(format!("auth request failed: {e}")))?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(SessionError::AuthError(format!(
            "authentication failed ({}): {body}",
            status.as_u16()
        )));
    }
    let parsed: LoginResponse = serde_json::from_str(&body)
        .map_err(|e| SessionError::AuthError(format!("parse auth response: {e}")))?;

    Ok(AuthToken {
        token: parsed.data.token,
        public_key: vault.public_key_ecdsa.clone(),
        expires_at: Utc::now() + ChronoDuration::days(TOKEN_LIFETIME_DAYS),
    })
}
