pub mod file;
pub mod memory;

use crate::error::SessionError;
use crate::vault::Vault;

pub use file::{FileVaultStore, OperationLock};
pub(crate) use file::write_private;
pub use memory::MemoryVaultStore;

/// Persistent home of vault records. Records are replaced wholesale.
pub trait VaultStore: Send + Sync {
    fn save(&self, vault: &Vault) -> Result<(), SessionError>;
    /// First vault whose file name starts with or contains `prefix`.
    fn load(&self, prefix: &str) -> Result<Vault, SessionError>;
    fn list(&self) -> Result<Vec<Vault>, SessionError>;
    /// Drops every stored vault.
    fn clear(&self) -> Result<(), SessionError>;
}

pub(crate) fn matches_prefix(file_name: &str, prefix: &str) -> bool {
    file_name.starts_with(prefix) || file_name.contains(prefix)
}
