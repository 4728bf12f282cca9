//! Vault backups: the `.vult` container written by the mobile apps and the
//! browser extension, the iOS JSON backup, and plain vault JSON.

use std::fmt;
use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat, Utc};
use prost::Message;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::types::PartyId;
use crate::vault::backend::write_private;
use crate::vault::{KeyShare, Vault, VaultStore};

const NONCE_LEN: usize = 12;

/// Outer `.vult` message. `vault` is base64 of a `VaultMessage`, sealed
/// when `is_encrypted` is set.
#[derive(Clone, PartialEq, Message)]
pub(crate) struct VaultContainer {
    #[prost(uint64, tag = "1")]
    pub version: u64,
    #[prost(string, tag = "2")]
    pub vault: String,
    #[prost(bool, tag = "3")]
    pub is_encrypted: bool,
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct VaultMessage {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub public_key_ecdsa: String,
    #[prost(string, tag = "3")]
    pub public_key_eddsa: String,
    #[prost(string, repeated, tag = "4")]
    pub signers: Vec<String>,
    #[prost(message, optional, tag = "5")]
    pub created_at: Option<prost_types::Timestamp>,
    #[prost(string, tag = "6")]
    pub hex_chain_code: String,
    #[prost(message, repeated, tag = "7")]
    pub key_shares: Vec<KeyShareMessage>,
    #[prost(string, tag = "8")]
    pub local_party_id: String,
    #[prost(string, tag = "9")]
    pub reshare_prefix: String,
    #[prost(int32, tag = "10")]
    pub lib_type: i32,
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct KeyShareMessage {
    #[prost(string, tag = "1")]
    pub public_key: String,
    #[prost(string, tag = "2")]
    pub keyshare: String,
}

/// iOS backups wrap the vault JSON with a version string.
#[derive(Deserialize)]
struct IosBackup {
    #[serde(default)]
    version: String,
    vault: Vault,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupFormat {
    Vult,
    IosBackup { version: String },
    Json,
}

impl fmt::Display for BackupFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupFormat::Vult => write!(f, ".vult (protobuf)"),
            BackupFormat::IosBackup { version } => write!(f, "iOS backup (v{version})"),
            BackupFormat::Json => write!(f, "JSON"),
        }
    }
}

/// Result of a successful import.
#[derive(Debug, Clone)]
pub struct Imported {
    pub vault: Vault,
    pub format: BackupFormat,
    /// Vaults dropped by a forced import.
    pub replaced: usize,
}

/// AES-256-GCM with a SHA-256 of the password as key; the nonce leads the
/// ciphertext.
pub(crate) fn open_sealed(password: &str, sealed: &[u8]) -> Result<Vec<u8>, SessionError> {
    if sealed.len() < NONCE_LEN {
        return Err(SessionError::BackupError("ciphertext too short".into()));
    }
    let digest = Sha256::digest(password.as_bytes());
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(digest.as_slice()));
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| SessionError::BackupError("decrypt vault: wrong password or corrupt file".into()))
}

fn parse_vult(data: &[u8], password: &str) -> Result<Vault, SessionError> {
    let text = std::str::from_utf8(data).map_err(|e| SessionError::BackupError(format!("not text: {e}")))?;
    let decoded = STANDARD
        .decode(text.trim())
        .map_err(|e| SessionError::BackupError(format!("base64 decode: {e}")))?;
    let container = VaultContainer::decode(decoded.as_slice())
        .map_err(|e| SessionError::BackupError(format!("unmarshal vault container: {e}")))?;

    let mut vault_bytes = STANDARD
        .decode(&container.vault)
        .map_err(|e| SessionError::BackupError(format!("decode vault data: {e}")))?;
    if container.is_encrypted {
        if password.is_empty() {
            return Err(SessionError::BackupError(
                "vault is encrypted - password required (use --password)".into(),
            ));
        }
        vault_bytes = open_sealed(password, &vault_bytes)?;
    }

    let message = VaultMessage::decode(vault_bytes.as_slice())
        .map_err(|e| SessionError::BackupError(format!("unmarshal vault: {e}")))?;
    message.into_vault()
}

impl VaultMessage {
    fn into_vault(self) -> Result<Vault, SessionError> {
        let created_at = match self.created_at {
            Some(ts) => DateTime::from_timestamp(ts.seconds, ts.nanos.max(0) as u32)
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_default(),
            None => String::new(),
        };
        let lib_type = u8::try_from(self.lib_type)
            .map_err(|_| SessionError::BackupError(format!("unknown lib type {}", self.lib_type)))?;

        Ok(Vault {
            name: self.name,
            public_key_ecdsa: self.public_key_ecdsa,
            public_key_eddsa: self.public_key_eddsa,
            hex_chain_code: self.hex_chain_code,
            local_party_id: PartyId::new(self.local_party_id),
            signers: self.signers.into_iter().map(PartyId::new).collect(),
            key_shares: self
                .key_shares
                .into_iter()
                .map(|ks| KeyShare {
                    pubkey: ks.public_key,
                    keyshare: ks.keyshare,
                })
                .collect(),
            reshare_prefix: self.reshare_prefix,
            created_at,
            lib_type,
        })
    }
}

/// Decodes a backup file, trying `.vult` first and then the JSON forms.
/// A missing creation time is filled in with `now`.
pub fn decode_backup(data: &[u8], password: &str, now: DateTime<Utc>) -> Result<(Vault, BackupFormat), SessionError> {
    let (mut vault, format) = match parse_vult(data, password) {
        Ok(vault) => (vault, BackupFormat::Vult),
        Err(vult_err) => {
            debug!(error = %vult_err, "Not a .vult container, trying JSON");
            match serde_json::from_slice::<IosBackup>(data) {
                Ok(backup) if !backup.version.is_empty() => (
                    backup.vault,
                    BackupFormat::IosBackup {
                        version: backup.version,
                    },
                ),
                _ => {
                    let vault = serde_json::from_slice::<Vault>(data).map_err(|json_err| {
                        SessionError::BackupError(format!(
                            "parse vault file: protobuf error: {vult_err}, json error: {json_err}"
                        ))
                    })?;
                    (vault, BackupFormat::Json)
                }
            }
        }
    };

    if vault.public_key_ecdsa.is_empty() {
        return Err(SessionError::ValidationError(
            "invalid vault file: missing public key".into(),
        ));
    }
    if vault.created_at.is_empty() {
        vault.created_at = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    }
    info!(format = %format, name = %vault.name, "Decoded vault backup");
    Ok((vault, format))
}

/// Imports a backup into `store`. Refuses to replace a vault that already
/// went through a plugin reshare (more than 2 signers) unless `force` is
/// set; a forced import drops every stored vault first.
pub fn import_vault(
    store: &dyn VaultStore,
    data: &[u8],
    password: &str,
    force: bool,
    now: DateTime<Utc>,
) -> Result<Imported, SessionError> {
    let existing = store.list()?;
    let reshared = existing.iter().find(|v| v.signers.len() > 2);
    if let (false, Some(reshared)) = (force, reshared) {
        return Err(SessionError::VaultError(format!(
            "existing vault {} has {} signers, use --force to overwrite",
            reshared.name,
            reshared.signers.len()
        )));
    }

    let (vault, format) = decode_backup(data, password, now)?;
    vault.validate()?;

    let replaced = if force && !existing.is_empty() {
        warn!(count = existing.len(), "Force import: removing existing vaults");
        store.clear()?;
        existing.len()
    } else {
        0
    };

    store.save(&vault)?;
    Ok(Imported {
        vault,
        format,
        replaced,
    })
}

/// Default export target: `<name>-vault.json` in the working directory.
pub fn export_file_name(vault: &Vault) -> String {
    format!("{}-vault.json", vault.name)
}

/// Writes `vault` as pretty JSON to `path`, readable by the owner only.
pub fn export_vault(vault: &Vault, path: &Path) -> Result<(), SessionError> {
    let data = serde_json::to_vec_pretty(vault)?;
    write_private(path, &data)?;
    info!(path = %path.display(), name = %vault.name, "Exported vault");
    Ok(())
}
