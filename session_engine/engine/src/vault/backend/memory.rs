use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::error::SessionError;
use crate::vault::Vault;
use crate::vault::backend::{VaultStore, matches_prefix};

/// Non-persistent store keyed by file name.
#[derive(Debug, Clone, Default)]
pub struct MemoryVaultStore {
    records: Arc<RwLock<BTreeMap<String, Vault>>>,
}

impl MemoryVaultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VaultStore for MemoryVaultStore {
    fn save(&self, vault: &Vault) -> Result<(), SessionError> {
        vault.validate()?;
        let mut records = self
            .records
            .write()
            .map_err(|_| SessionError::VaultError("Vault lock poisoned".into()))?;
        records.insert(vault.file_name(), vault.clone());
        Ok(())
    }

    fn load(&self, prefix: &str) -> Result<Vault, SessionError> {
        let records = self
            .records
            .read()
            .map_err(|_| SessionError::VaultError("Vault lock poisoned".into()))?;
        records
            .iter()
            .find(|(name, _)| matches_prefix(name, prefix))
            .map(|(_, vault)| vault.clone())
            .ok_or_else(|| SessionError::VaultError(format!("vault not found: {prefix}")))
    }

    fn list(&self) -> Result<Vec<Vault>, SessionError> {
        let records = self
            .records
            .read()
            .map_err(|_| SessionError::VaultError("Vault lock poisoned".into()))?;
        Ok(records.values().cloned().collect())
    }

    fn clear(&self) -> Result<(), SessionError> {
        self.records
            .write()
            .map_err(|_| SessionError::VaultError("Vault lock poisoned".into()))?
            .clear();
        Ok(())
    }
}
