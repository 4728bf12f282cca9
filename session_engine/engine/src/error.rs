//! Centralized session engine error types.

use thiserror::Error;

use crate::mpc::MpcError;
use crate::types::PartyRole;

#[derive(Error, Debug)]
pub enum SessionError {
    /// Transport failure or non-2xx reply from the relay.
    #[error("Relay unavailable: {0}")]
    RelayUnavailable(String),
    /// A remote party's join endpoint answered with something other than 200.
    #[error("{role} refused to join: {reason}")]
    RemotePartyRefused { role: PartyRole, reason: String },
    /// Quorum was not observed before the phase deadline.
    #[error("Timed out waiting for parties ({observed}/{expected} joined)")]
    PartyRecruitmentTimeout { expected: usize, observed: usize },
    /// The caller's cancellation token fired.
    #[error("Operation cancelled")]
    OperationCancelled,
    /// The opaque threshold-signature capability failed.
    #[error("MPC execution failed: {0}")]
    MpcExecutionFailed(#[from] MpcError),
    /// `CompleteSession` failed after a result was already produced. Advisory only.
    #[error("Completion signal failed: {0}")]
    CompletionSignalFailed(String),
    #[error("Vault error: {0}")]
    VaultError(String),
    /// A backup file could not be decoded or decrypted.
    #[error("Vault backup error: {0}")]
    BackupError(String),
    /// Input validation, invariant or state-machine violation.
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Authentication error: {0}")]
    AuthError(String),
    /// Another operation holds the vault directory lock.
    #[error("Another operation is already running against {0}")]
    LockHeld(String),
}

impl SessionError {
    /// Everything except a failed completion signal aborts the operation.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::CompletionSignalFailed(_))
    }
}
