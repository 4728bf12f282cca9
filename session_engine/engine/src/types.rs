//! Shared data types for the session engine: party IDs, roles, session
//! identifiers and the per-session secrets handed to recruited parties.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Routing address of a participant on the relay.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(pub String);

impl PartyId {
    pub fn new(id: impl Into<String>) -> Self {
        PartyId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Party ID assigned to the Fast Vault Server for a session:
    /// `Server-` plus the last five digits of a 31-multiplier string hash.
    pub fn fast_vault_for(session_id: &SessionId) -> Self {
        let mut h: i64 = 0;
        for c in session_id.as_str().chars() {
            h = h.wrapping_mul(31).wrapping_add(c as i64);
        }
        let digits = h.unsigned_abs().to_string();
        let suffix = &digits[digits.len().saturating_sub(5)..];
        PartyId(format!("Server-{suffix}"))
    }

    /// Party ID assigned to the Verifier for a session.
    pub fn verifier_for(session_id: &SessionId) -> Self {
        PartyId(format!("verifier-{}", session_id.short()))
    }

    /// Fresh local party ID for a CLI-initiated keygen.
    pub fn generate_local() -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        PartyId(format!("devctl-{}", &id[..8]))
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartyId {
    fn from(value: &str) -> Self {
        PartyId(value.to_string())
    }
}

/// What a participant is doing in a session. Attached when the party is
/// invited, never inferred from the shape of its ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyRole {
    Initiator,
    FastVaultServer,
    Verifier,
    Plugin,
    ExistingSigner,
    Unknown,
}

impl fmt::Display for PartyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PartyRole::Initiator => "CLI",
            PartyRole::FastVaultServer => "Fast Vault Server",
            PartyRole::Verifier => "Verifier",
            PartyRole::Plugin => "Plugin",
            PartyRole::ExistingSigner => "Existing signer",
            PartyRole::Unknown => "Unknown party",
        };
        f.write_str(label)
    }
}

/// Globally unique session identifier (UUID v4 text form).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        SessionId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, used for derived party IDs and reshare prefixes.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        SessionId(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionKind {
    Keygen,
    Reshare,
    Keysign,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionKind::Keygen => "keygen",
            SessionKind::Reshare => "reshare",
            SessionKind::Keysign => "keysign",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    Registered,
    Recruiting,
    Quorate,
    Started,
    Completed,
    Failed,
    TimedOut,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::TimedOut
        )
    }
}

/// Signature scheme a key share or signing request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureScheme {
    Ecdsa,
    EdDsa,
}

/// 32 random bytes generated per session and shared with recruited parties
/// through their own join requests. Wiped from memory on drop.
#[derive(Clone)]
pub struct EncryptionKey(Zeroizing<[u8; 32]>);

impl EncryptionKey {
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(&mut key[..]);
        EncryptionKey(key)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0[..])
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Generate a fresh hex-encoded BIP-32 chain code for a new vault.
pub fn generate_chain_code() -> String {
    let mut code = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut code);
    hex::encode(code)
}

/// One signature per signed message, as produced by the MPC capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysignResult {
    pub r: String,
    pub s: String,
    pub recovery_id: String,
    pub der_signature: String,
}
