//! Applies a finished session's outcome to vault state. The prior vault is
//! never touched; callers persist the returned value wholesale.

use crate::error::SessionError;
use crate::mpc::GeneratedShare;
use crate::types::PartyId;
use crate::vault::{KeyShare, LIB_TYPE_DKLS, Vault};

#[derive(Debug, Clone)]
pub struct KeygenOutcome {
    pub name: String,
    pub local_party: PartyId,
    pub hex_chain_code: String,
    pub members: Vec<PartyId>,
    pub ecdsa: GeneratedShare,
    pub eddsa: GeneratedShare,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ReshareOutcome {
    pub members: Vec<PartyId>,
    pub reshare_prefix: String,
    pub ecdsa: GeneratedShare,
    /// Absent when the vault never had an EdDSA key.
    pub eddsa: Option<GeneratedShare>,
}

#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Keygen(KeygenOutcome),
    Reshare(ReshareOutcome),
}

/// Builds the vault that results from `outcome`.
///
/// Keygen requires no prior vault. Reshare requires one and keeps its public
/// keys; `signers`, `resharePrefix` and the local shares are replaced
/// together or not at all.
pub fn apply(old: Option<&Vault>, outcome: SessionOutcome) -> Result<Vault, SessionError> {
    let vault = match (old, outcome) {
        (None, SessionOutcome::Keygen(out)) => {
            if out.ecdsa.public_key.is_empty() || out.eddsa.public_key.is_empty() {
                return Err(SessionError::ValidationError(
                    "keygen produced an empty public key".into(),
                ));
            }
            Vault {
                name: out.name,
                key_shares: vec![
                    KeyShare { pubkey: out.ecdsa.public_key.clone(), keyshare: out.ecdsa.keyshare },
                    KeyShare { pubkey: out.eddsa.public_key.clone(), keyshare: out.eddsa.keyshare },
                ],
                public_key_ecdsa: out.ecdsa.public_key,
                public_key_eddsa: out.eddsa.public_key,
                hex_chain_code: out.hex_chain_code,
                local_party_id: out.local_party,
                signers: out.members,
                reshare_prefix: String::new(),
                created_at: out.created_at,
                lib_type: LIB_TYPE_DKLS,
            }
        }
        (Some(old), SessionOutcome::Reshare(out)) => {
            if out.ecdsa.public_key != old.public_key_ecdsa {
                return Err(SessionError::ValidationError(format!(
                    "reshare changed the ECDSA public key ({} -> {})",
                    old.public_key_ecdsa, out.ecdsa.public_key
                )));
            }
            if let Some(eddsa) = &out.eddsa {
                if eddsa.public_key != old.public_key_eddsa {
                    return Err(SessionError::ValidationError(format!(
                        "reshare changed the EdDSA public key ({} -> {})",
                        old.public_key_eddsa, eddsa.public_key
                    )));
                }
            }

            let mut key_shares = vec![KeyShare {
                pubkey: out.ecdsa.public_key,
                keyshare: out.ecdsa.keyshare,
            }];
            match out.eddsa {
                Some(eddsa) => key_shares.push(KeyShare {
                    pubkey: eddsa.public_key,
                    keyshare: eddsa.keyshare,
                }),
                None => key_shares.extend(
                    old.key_shares
                        .iter()
                        .filter(|ks| ks.pubkey != old.public_key_ecdsa)
                        .cloned(),
                ),
            }

            Vault {
                signers: out.members,
                reshare_prefix: out.reshare_prefix,
                key_shares,
                ..old.clone()
            }
        }
        (Some(_), SessionOutcome::Keygen(_)) => {
            return Err(SessionError::ValidationError(
                "keygen cannot be applied over an existing vault".into(),
            ));
        }
        (None, SessionOutcome::Reshare(_)) => {
            return Err(SessionError::ValidationError(
                "reshare needs an existing vault".into(),
            ));
        }
    };

    vault.validate()?;
    Ok(vault)
}
