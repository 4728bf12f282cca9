//! Deterministic stand-in for the threshold-signature library, for local
//! development and tests. It produces well-formed outputs but no real
//! threshold cryptography happens here.

use async_trait::async_trait;

use crate::mpc::{GeneratedShare, MpcBackend, MpcContext, MpcError, ReshareSeed, SignRequest};
use crate::types::{KeysignResult, SignatureScheme};

const ECDSA_CONTEXT: &str = "session-engine simulated 2025 ecdsa public key";
const EDDSA_CONTEXT: &str = "session-engine simulated 2025 eddsa public key";

#[derive(Debug, Clone, Default)]
pub struct SimulatedMpcBackend;

impl SimulatedMpcBackend {
    pub fn new() -> Self {
        SimulatedMpcBackend
    }

    fn keyshare(ctx: &MpcContext, scheme: SignatureScheme) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(ctx.hex_encryption_key.as_bytes());
        hasher.update(format!("{scheme:?}").as_bytes());
        hasher.update(ctx.session_id.as_str().as_bytes());
        hasher.update(ctx.local_party.as_str().as_bytes());
        hex::encode(hasher.finalize().as_bytes())
    }
}

#[async_trait]
impl MpcBackend for SimulatedMpcBackend {
    async fn generate_share(&self, ctx: &MpcContext, scheme: SignatureScheme) -> Result<GeneratedShare, MpcError> {
        let chain_code = hex::decode(&ctx.hex_chain_code)
            .map_err(|e| MpcError::Protocol(format!("chain code is not hex: {e}")))?;

        let mut material = chain_code;
        material.extend_from_slice(ctx.session_id.as_str().as_bytes());

        let public_key = match scheme {
            SignatureScheme::Ecdsa => {
                let x = blake3::derive_key(ECDSA_CONTEXT, &material);
                // compressed point prefix picked from the parity of the last byte
                let prefix = if x[31] & 1 == 0 { "02" } else { "03" };
                format!("{prefix}{}", hex::encode(x))
            }
            SignatureScheme::EdDsa => hex::encode(blake3::derive_key(EDDSA_CONTEXT, &material)),
        };

        Ok(GeneratedShare {
            public_key,
            keyshare: Self::keyshare(ctx, scheme),
        })
    }

    async fn reshare_share(
        &self,
        ctx: &MpcContext,
        scheme: SignatureScheme,
        seed: ReshareSeed<'_>,
    ) -> Result<GeneratedShare, MpcError> {
        if seed.public_key.is_empty() {
            return Err(MpcError::Protocol(format!("no {scheme:?} public key to reshare")));
        }
        Ok(GeneratedShare {
            public_key: seed.public_key.to_string(),
            keyshare: Self::keyshare(ctx, scheme),
        })
    }

    async fn sign_share(&self, ctx: &MpcContext, request: SignRequest<'_>) -> Result<KeysignResult, MpcError> {
        let message = hex::decode(request.message)
            .map_err(|e| MpcError::Protocol(format!("message is not hex: {e}")))?;

        let mut hasher = blake3::Hasher::new();
        hasher.update(request.keyshare.as_bytes());
        hasher.update(&message);
        hasher.update(request.derive_path.unwrap_or("").as_bytes());
        hasher.update(ctx.session_id.as_str().as_bytes());
        let mut r = *hasher.finalize().as_bytes();

        let mut hasher = blake3::Hasher::new();
        hasher.update(&r);
        hasher.update(request.keyshare.as_bytes());
        let mut s = *hasher.finalize().as_bytes();

        // keep both scalars below 2^255 so DER never needs sign padding games
        r[0] &= 0x7f;
        s[0] &= 0x7f;

        let recovery_id = match request.scheme {
            SignatureScheme::Ecdsa => format!("{:02x}", r[31] & 1),
            SignatureScheme::EdDsa => "00".to_string(),
        };

        Ok(KeysignResult {
            r: hex::encode(r),
            s: hex::encode(s),
            recovery_id,
            der_signature: hex::encode(der_encode(&r, &s)),
        })
    }
}

/// DER `SEQUENCE { INTEGER r, INTEGER s }` for 32-byte big-endian scalars.
pub fn der_encode(r: &[u8; 32], s: &[u8; 32]) -> Vec<u8> {
    fn integer(v: &[u8]) -> Vec<u8> {
        let first = v.iter().position(|b| *b != 0).unwrap_or(v.len() - 1);
        let mut body = v[first..].to_vec();
        if body[0] & 0x80 != 0 {
            body.insert(0, 0);
        }
        let mut out = vec![0x02, body.len() as u8];
        out.extend(body);
        out
    }

    let mut seq = integer(r);
    seq.extend(integer(s));
    let mut out = vec![0x30, seq.len() as u8];
    out.extend(seq);
    out
}

#[cfg(test)]
mod tests {
    use super::der_encode;

    #[test]
    fn der_strips_leading_zeros_and_pads_high_bit() {
        let mut r = [0u8; 32];
        r[31] = 0x01;
        let mut s = [0u8; 32];
        s[0] = 0x80;

        let der = der_encode(&r, &s);
        assert_eq!(&der[..5], &[0x30, 3 + 35, 0x02, 0x01, 0x01]);
        assert_eq!(&der[5..8], &[0x02, 33, 0x00]);
        assert_eq!(der.len(), 2 + 3 + 35);
    }
}
