//! JSON bodies for the remote parties' "join this session" endpoints.

use serde::{Deserialize, Serialize};

pub use crate::vault::LIB_TYPE_DKLS;

/// Fast Vault reshare mode used by plugin installs.
pub const RESHARE_TYPE_PLUGIN: u8 = 1;

/// Fast Vault `POST /vault/create`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultCreateRequest {
    pub name: String,
    pub session_id: String,
    pub hex_encryption_key: String,
    pub hex_chain_code: String,
    pub local_party_id: String,
    pub encryption_password: String,
    pub email: String,
    pub lib_type: u8,
}

/// Fast Vault `POST /vault/reshare`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastVaultReshareRequest {
    pub name: String,
    pub public_key: String,
    pub session_id: String,
    pub hex_encryption_key: String,
    pub hex_chain_code: String,
    pub local_party_id: String,
    pub old_parties: Vec<String>,
    pub old_reshare_prefix: String,
    pub encryption_password: String,
    pub email: String,
    pub reshare_type: u8,
    pub lib_type: u8,
}

/// Fast Vault `POST /vault/sign`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastVaultSignRequest {
    pub public_key: String,
    pub messages: Vec<String>,
    pub session: String,
    pub hex_encryption_key: String,
    pub derive_path: String,
    pub is_ecdsa: bool,
    pub vault_password: String,
}

/// Verifier `POST /vault/reshare`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierReshareRequest {
    pub name: String,
    pub public_key: String,
    pub session_id: String,
    pub hex_encryption_key: String,
    pub hex_chain_code: String,
    pub local_party_id: String,
    pub old_parties: Vec<String>,
    pub email: String,
    pub plugin_id: String,
}

/// Verifier `POST /vault/keysign`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierKeysignRequest {
    pub public_key: String,
    pub messages: Vec<String>,
    pub session: String,
    pub hex_encryption_key: String,
    pub derive_path: String,
    pub plugin_id: String,
    pub is_ecdsa: bool,
}

/// Any join body; serialized without a tag so the wire shape is the inner struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum JoinRequest {
    VaultCreate(VaultCreateRequest),
    FastVaultReshare(FastVaultReshareRequest),
    FastVaultSign(FastVaultSignRequest),
    VerifierReshare(VerifierReshareRequest),
    VerifierKeysign(VerifierKeysignRequest),
}

impl JoinRequest {
    /// Endpoint path on the receiving service.
    pub fn path(&self) -> &'static str {
        match self {
            JoinRequest::VaultCreate(_) => "/vault/create",
            JoinRequest::FastVaultReshare(_) | JoinRequest::VerifierReshare(_) => "/vault/reshare",
            JoinRequest::FastVaultSign(_) => "/vault/sign",
            JoinRequest::VerifierKeysign(_) => "/vault/keysign",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            JoinRequest::VaultCreate(r) => &r.session_id,
            JoinRequest::FastVaultReshare(r) => &r.session_id,
            JoinRequest::FastVaultSign(r) => &r.session,
            JoinRequest::VerifierReshare(r) => &r.session_id,
            JoinRequest::VerifierKeysign(r) => &r.session,
        }
    }
}
