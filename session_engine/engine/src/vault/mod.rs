//! The durable artifact sessions mutate: public keys, the signer set, the
//! reshare epoch and the local party's own share material.

pub mod backend;
pub mod backup;
pub mod transition;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::types::{PartyId, SignatureScheme};

pub use backend::{FileVaultStore, MemoryVaultStore, OperationLock, VaultStore};
pub use backup::{BackupFormat, Imported, decode_backup, export_vault, import_vault};
pub use transition::{KeygenOutcome, ReshareOutcome, SessionOutcome, apply};

/// Library type recorded on vaults created through DKLS sessions.
pub const LIB_TYPE_DKLS: u8 = 1;

/// Local party's share for one public key (opaque bytes from the MPC library).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyShare {
    pub pubkey: String,
    pub keyshare: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    pub name: String,
    #[serde(rename = "pubKeyECDSA")]
    pub public_key_ecdsa: String,
    #[serde(rename = "pubKeyEdDSA")]
    pub public_key_eddsa: String,
    #[serde(rename = "hexChainCode")]
    pub hex_chain_code: String,
    #[serde(rename = "localPartyID")]
    pub local_party_id: PartyId,
    pub signers: Vec<PartyId>,
    #[serde(rename = "keyshares", default)]
    pub key_shares: Vec<KeyShare>,
    #[serde(rename = "resharePrefix", default, skip_serializing_if = "String::is_empty")]
    pub reshare_prefix: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: String,
    #[serde(rename = "libType", default)]
    pub lib_type: u8,
}

impl Vault {
    pub fn public_key(&self, scheme: SignatureScheme) -> &str {
        match scheme {
            SignatureScheme::Ecdsa => &self.public_key_ecdsa,
            SignatureScheme::EdDsa => &self.public_key_eddsa,
        }
    }

    /// Local share belonging to `pubkey`, if this vault holds one.
    pub fn keyshare_for(&self, pubkey: &str) -> Option<&str> {
        self.key_shares
            .iter()
            .find(|ks| ks.pubkey == pubkey)
            .map(|ks| ks.keyshare.as_str())
    }

    /// Checks the invariants every persisted vault must hold.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.signers.len() < 2 {
            return Err(SessionError::ValidationError(format!(
                "vault {} has {} signers, need at least 2",
                self.name,
                self.signers.len()
            )));
        }
        Ok(())
    }

    /// File name the vault is stored under: the first 16 characters of the
    /// ECDSA key, or `<name>-<date>` when there is no usable key yet.
    pub fn file_name(&self) -> String {
        match self.public_key_ecdsa.get(..16) {
            Some(prefix) => format!("{prefix}.json"),
            None => {
                let date = self.created_at.get(..10).unwrap_or(&self.created_at);
                format!("{}-{}.json", self.name, date)
            }
        }
    }
}
