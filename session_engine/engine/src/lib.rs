//! Session Engine Core Library
//!
//! Coordinates threshold-signature sessions over a relay: registers the
//! local party, recruits the Fast Vault Server, Verifier and plugin parties,
//! waits for quorum, hands off to the MPC capability and records the
//! resulting vault state.

pub mod audit;
pub mod auth;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod mpc;
pub mod recruit;
pub mod relay;
pub mod session;
pub mod types;
pub mod vault;

#[cfg(test)]
mod tests;

pub use config::{DevConfig, EngineConfig};
pub use coordinator::{
    Completed, KeygenParams, KeysignParams, ReshareParams, SessionCoordinator, VerifierKeysignParams,
};
pub use error::SessionError;
pub use types::{KeysignResult, PartyId, PartyRole, SessionId, SessionKind, SessionStatus, SignatureScheme};
pub use vault::{FileVaultStore, MemoryVaultStore, Vault, VaultStore};
