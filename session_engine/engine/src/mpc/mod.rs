//! Boundary to the threshold-signature library. The coordinator only drives
//! sessions; the protocol rounds themselves run behind `MpcBackend`.

pub mod simulated;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{KeysignResult, PartyId, SessionId, SignatureScheme};

pub use simulated::SimulatedMpcBackend;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MpcError {
    /// The protocol run itself aborted (peer dropped, bad round message...).
    #[error("protocol aborted: {0}")]
    Protocol(String),
    /// Output violated an invariant the coordinator relies on.
    #[error("invalid output: {0}")]
    InvalidOutput(String),
}

/// Everything a backend needs to join the relay-routed protocol run.
#[derive(Debug, Clone)]
pub struct MpcContext {
    pub session_id: SessionId,
    pub relay_url: String,
    pub local_party: PartyId,
    /// Exactly the members passed to `StartSession`.
    pub committee: Vec<PartyId>,
    pub hex_encryption_key: String,
    pub hex_chain_code: String,
}

/// Public key plus the local party's opaque share material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedShare {
    pub public_key: String,
    pub keyshare: String,
}

/// Prior vault state a reshare is seeded with.
#[derive(Debug, Clone, Copy)]
pub struct ReshareSeed<'a> {
    pub public_key: &'a str,
    pub keyshare: Option<&'a str>,
    pub old_committee: &'a [PartyId],
    pub old_reshare_prefix: &'a str,
}

/// One message to sign.
#[derive(Debug, Clone, Copy)]
pub struct SignRequest<'a> {
    pub scheme: SignatureScheme,
    pub public_key: &'a str,
    pub keyshare: &'a str,
    /// Hex-encoded message hash.
    pub message: &'a str,
    /// BIP-32 path; only meaningful for ECDSA.
    pub derive_path: Option<&'a str>,
}

/// Threshold-signature capability the coordinator drives once a session has started.
#[async_trait]
pub trait MpcBackend: Send + Sync {
    async fn generate_share(&self, ctx: &MpcContext, scheme: SignatureScheme) -> Result<GeneratedShare, MpcError>;

    async fn reshare_share(
        &self,
        ctx: &MpcContext,
        scheme: SignatureScheme,
        seed: ReshareSeed<'_>,
    ) -> Result<GeneratedShare, MpcError>;

    async fn sign_share(&self, ctx: &MpcContext, request: SignRequest<'_>) -> Result<KeysignResult, MpcError>;
}
