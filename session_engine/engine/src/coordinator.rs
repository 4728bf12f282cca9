use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

use crate::audit::AuditTracker;
use crate::config::EngineConfig;
use crate::error::SessionError;
use crate::mpc::{MpcBackend, MpcContext, ReshareSeed, SignRequest};
use crate::recruit::requests::{
    FastVaultReshareRequest, FastVaultSignRequest, LIB_TYPE_DKLS, RESHARE_TYPE_PLUGIN, VaultCreateRequest,
    VerifierKeysignRequest, VerifierReshareRequest,
};
use crate::recruit::{
    self, HttpJoinTransport, Invitation, JoinRequest, JoinTarget, JoinTransport, Requirement,
};
use crate::relay::{Relay, RelayClient};
use crate::session::Session;
use crate::types::{
    KeysignResult, PartyId, PartyRole, SessionId, SessionKind, SessionStatus, SignatureScheme,
    generate_chain_code,
};
use crate::vault::{self, KeygenOutcome, ReshareOutcome, SessionOutcome, Vault};

/// Result of a finished operation plus what the caller may want to report.
#[derive(Debug)]
pub struct Completed<T> {
    pub value: T,
    pub session_id: SessionId,
    /// Members in relay order with the role each was recruited for.
    pub roster: Vec<(PartyId, PartyRole)>,
    /// Set when `CompleteSession` failed; the value is still final.
    pub completion_error: Option<SessionError>,
}

#[derive(Debug, Clone, Default)]
pub struct KeygenParams {
    pub name: String,
    pub encryption_password: String,
    pub email: String,
}

#[derive(Debug, Clone, Default)]
pub struct ReshareParams {
    pub plugin_id: String,
    /// Overrides `EngineConfig::verifier_url` when set.
    pub verifier_url: Option<String>,
    pub auth_header: Option<String>,
    pub vault_password: String,
}

#[derive(Debug, Clone)]
pub struct KeysignParams {
    /// Hex-encoded message hashes, signed in order.
    pub messages: Vec<String>,
    pub scheme: SignatureScheme,
    /// Ignored for EdDSA.
    pub derive_path: String,
    pub vault_password: String,
}

#[derive(Debug, Clone)]
pub struct VerifierKeysignParams {
    pub messages: Vec<String>,
    pub derive_path: String,
    pub plugin_id: String,
    pub auth_header: Option<String>,
}

/// Drives one keygen, reshare or keysign session end to end
pub struct SessionCoordinator {
    config: EngineConfig,
    relay: Arc<dyn Relay>,
    transport: Arc<dyn JoinTransport>,
    mpc: Arc<dyn MpcBackend>,
    audit: Arc<AuditTracker>,
}

impl SessionCoordinator {
    pub fn new(
        config: EngineConfig,
        relay: Arc<dyn Relay>,
        transport: Arc<dyn JoinTransport>,
        mpc: Arc<dyn MpcBackend>,
    ) -> Self {
        SessionCoordinator {
            config,
            relay,
            transport,
            mpc,
            audit: Arc::new(AuditTracker::default()),
        }
    }

    /// HTTP relay and join transport built from `config`.
    pub fn from_config(config: EngineConfig, mpc: Arc<dyn MpcBackend>) -> Result<Self, SessionError> {
        let relay = RelayClient::new(&config.relay_url, config.request_timeout)?;
        let transport = HttpJoinTransport::new(config.request_timeout)?;
        Ok(Self::new(config, Arc::new(relay), Arc::new(transport), mpc))
    }

    pub fn with_audit(mut self, audit: Arc<AuditTracker>) -> Self {
        self.audit = audit;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn audit(&self) -> &Arc<AuditTracker> {
        &self.audit
    }

    /// Creates a brand-new 2-of-2 vault with the Fast Vault Server.
    pub async fn keygen(
        &self,
        local_party: PartyId,
        params: KeygenParams,
        cancel: &CancellationToken,
    ) -> Result<Completed<Vault>, SessionError> {
        let mut session = self.open(SessionKind::Keygen, local_party, 2).await?;
        let span = info_span!("session", kind = "keygen", session_id = %session.id, local_party = %session.local_party, vault = %params.name);

        let result = async {
            let chain_code = generate_chain_code();
            let server = PartyId::fast_vault_for(&session.id);

            let invitation = Invitation {
                target: self.fast_vault_target(),
                party_id: Some(server.clone()),
                requirement: Requirement::Required,
                request: JoinRequest::VaultCreate(VaultCreateRequest {
                    name: params.name.clone(),
                    session_id: session.id.to_string(),
                    hex_encryption_key: session.encryption_key.to_hex(),
                    hex_chain_code: chain_code.clone(),
                    local_party_id: server.to_string(),
                    encryption_password: params.encryption_password.clone(),
                    email: params.email.clone(),
                    lib_type: LIB_TYPE_DKLS,
                }),
            };

            self.gather(&mut session, vec![invitation], &[], self.config.keygen_timeout, cancel)
                .await?;

            info!("Running keygen protocol for ECDSA and EdDSA");
            let ctx = self.context(&session, &chain_code);
            let ecdsa = self.mpc.generate_share(&ctx, SignatureScheme::Ecdsa).await?;
            let eddsa = self.mpc.generate_share(&ctx, SignatureScheme::EdDsa).await?;

            vault::apply(
                None,
                SessionOutcome::Keygen(KeygenOutcome {
                    name: params.name.clone(),
                    local_party: session.local_party.clone(),
                    hex_chain_code: chain_code,
                    members: session.members.clone(),
                    ecdsa,
                    eddsa,
                    created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                }),
            )
        }
        .instrument(span)
        .await;

        self.conclude(&mut session, result).await
    }

    /// Reshares `vault` to its old signers plus the Verifier and a plugin.
    /// `vault` is never modified; the resharded vault is returned.
    pub async fn reshare(
        &self,
        vault: &Vault,
        params: ReshareParams,
        cancel: &CancellationToken,
    ) -> Result<Completed<Vault>, SessionError> {
        vault.validate()?;
        let expected = vault.signers.len() + 2;
        let mut session = self
            .open(SessionKind::Reshare, vault.local_party_id.clone(), expected)
            .await?;
        let span = info_span!("session", kind = "reshare", session_id = %session.id, local_party = %session.local_party, plugin_id = %params.plugin_id);

        let result = async {
            let hex_key = session.encryption_key.to_hex();
            let old_parties: Vec<String> = vault.signers.iter().map(PartyId::to_string).collect();
            let server = PartyId::fast_vault_for(&session.id);
            let verifier = PartyId::verifier_for(&session.id);

            let invitations = vec![
                // the Fast Vault Server already knows it must reshare, so a
                // refusal here is not fatal
                Invitation {
                    target: self.fast_vault_target(),
                    party_id: Some(server.clone()),
                    requirement: Requirement::BestEffort,
                    request: JoinRequest::FastVaultReshare(FastVaultReshareRequest {
                        name: vault.name.clone(),
                        public_key: vault.public_key_ecdsa.clone(),
                        session_id: session.id.to_string(),
                        hex_encryption_key: hex_key.clone(),
                        hex_chain_code: vault.hex_chain_code.clone(),
                        local_party_id: server.to_string(),
                        old_parties: old_parties.clone(),
                        old_reshare_prefix: vault.reshare_prefix.clone(),
                        encryption_password: params.vault_password.clone(),
                        email: String::new(),
                        reshare_type: RESHARE_TYPE_PLUGIN,
                        lib_type: vault.lib_type,
                    }),
                },
                Invitation {
                    target: self.verifier_target(params.verifier_url.as_deref(), params.auth_header.clone()),
                    party_id: Some(verifier.clone()),
                    requirement: Requirement::Required,
                    request: JoinRequest::VerifierReshare(VerifierReshareRequest {
                        name: vault.name.clone(),
                        public_key: vault.public_key_ecdsa.clone(),
                        session_id: session.id.to_string(),
                        hex_encryption_key: hex_key,
                        hex_chain_code: vault.hex_chain_code.clone(),
                        local_party_id: verifier.to_string(),
                        old_parties,
                        email: String::new(),
                        plugin_id: params.plugin_id.clone(),
                    }),
                },
            ];

            self.gather(&mut session, invitations, &vault.signers, self.config.reshare_timeout, cancel)
                .await?;

            info!(expected, "Running reshare protocol");
            let ctx = self.context(&session, &vault.hex_chain_code);
            let ecdsa = self
                .mpc
                .reshare_share(&ctx, SignatureScheme::Ecdsa, reshare_seed(vault, &vault.public_key_ecdsa))
                .await?;
            let eddsa = if vault.public_key_eddsa.is_empty() {
                None
            } else {
                Some(
                    self.mpc
                        .reshare_share(&ctx, SignatureScheme::EdDsa, reshare_seed(vault, &vault.public_key_eddsa))
                        .await?,
                )
            };

            vault::apply(
                Some(vault),
                SessionOutcome::Reshare(ReshareOutcome {
                    members: session.members.clone(),
                    reshare_prefix: session.id.short().to_string(),
                    ecdsa,
                    eddsa,
                }),
            )
        }
        .instrument(span)
        .await;

        self.conclude(&mut session, result).await
    }

    /// Signs each message with the Fast Vault Server as co-signer. Results are
    /// index-aligned with `params.messages`.
    pub async fn keysign(
        &self,
        vault: &Vault,
        params: KeysignParams,
        cancel: &CancellationToken,
    ) -> Result<Completed<Vec<KeysignResult>>, SessionError> {
        let derive_path = match params.scheme {
            SignatureScheme::Ecdsa => params.derive_path.clone(),
            SignatureScheme::EdDsa => String::new(),
        };
        let (public_key, keyshare) = signing_material(vault, params.scheme, &params.messages)?;

        let mut session = self
            .open(SessionKind::Keysign, vault.local_party_id.clone(), 2)
            .await?;
        let span = info_span!("session", kind = "keysign", session_id = %session.id, local_party = %session.local_party, messages = params.messages.len());

        let result = async {
            let invitation = Invitation {
                target: self.fast_vault_target(),
                party_id: None,
                requirement: Requirement::Required,
                request: JoinRequest::FastVaultSign(FastVaultSignRequest {
                    public_key: public_key.to_string(),
                    messages: params.messages.clone(),
                    session: session.id.to_string(),
                    hex_encryption_key: session.encryption_key.to_hex(),
                    derive_path: derive_path.clone(),
                    is_ecdsa: params.scheme == SignatureScheme::Ecdsa,
                    vault_password: params.vault_password.clone(),
                }),
            };

            self.gather(&mut session, vec![invitation], &vault.signers, self.config.keysign_timeout, cancel)
                .await?;

            self.sign_all(&session, vault, params.scheme, public_key, keyshare, &params.messages, &derive_path)
                .await
        }
        .instrument(span)
        .await;

        self.conclude(&mut session, result).await
    }

    /// Keysign where the Verifier (on behalf of a plugin) is the co-signer.
    pub async fn keysign_with_verifier(
        &self,
        vault: &Vault,
        params: VerifierKeysignParams,
        cancel: &CancellationToken,
    ) -> Result<Completed<Vec<KeysignResult>>, SessionError> {
        let (public_key, keyshare) = signing_material(vault, SignatureScheme::Ecdsa, &params.messages)?;

        let mut session = self
            .open(SessionKind::Keysign, vault.local_party_id.clone(), 2)
            .await?;
        let span = info_span!("session", kind = "keysign_with_verifier", session_id = %session.id, local_party = %session.local_party, plugin_id = %params.plugin_id);

        let result = async {
            let invitation = Invitation {
                target: self.verifier_target(None, params.auth_header.clone()),
                party_id: None,
                requirement: Requirement::Required,
                request: JoinRequest::VerifierKeysign(VerifierKeysignRequest {
                    public_key: public_key.to_string(),
                    messages: params.messages.clone(),
                    session: session.id.to_string(),
                    hex_encryption_key: session.encryption_key.to_hex(),
                    derive_path: params.derive_path.clone(),
                    plugin_id: params.plugin_id.clone(),
                    is_ecdsa: true,
                }),
            };

            self.gather(
                &mut session,
                vec![invitation],
                &vault.signers,
                self.config.verifier_keysign_timeout,
                cancel,
            )
            .await?;

            self.sign_all(
                &session,
                vault,
                SignatureScheme::Ecdsa,
                public_key,
                keyshare,
                &params.messages,
                &params.derive_path,
            )
            .await
        }
        .instrument(span)
        .await;

        self.conclude(&mut session, result).await
    }

    /// Asks the Fast Vault Server whether it already co-signs `public_key`.
    pub async fn vault_exists(&self, public_key: &str) -> Result<bool, SessionError> {
        self.transport
            .vault_exists(&self.config.fast_vault_url, public_key)
            .await
    }

    /// Creates the session and registers the local party with the relay.
    async fn open(&self, kind: SessionKind, local_party: PartyId, expected: usize) -> Result<Session, SessionError> {
        let mut session = Session::new(kind, local_party, expected, self.audit.clone())?;
        info!(session_id = %session.id, kind = %kind, local_party = %session.local_party, expected, "Starting session");

        if let Err(err) = self.relay.register_session(&session.id, &session.local_party).await {
            session.fail(&err);
            return Err(err);
        }
        session.registered();
        Ok(session)
    }

    /// Recruits the remote parties, waits for quorum and signals start.
    async fn gather(
        &self,
        session: &mut Session,
        invitations: Vec<Invitation>,
        old_signers: &[PartyId],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        if cancel.is_cancelled() {
            return Err(SessionError::OperationCancelled);
        }
        session.advance(SessionStatus::Recruiting, "recruiting parties")?;

        recruit::invite_all(self.transport.as_ref(), session, invitations, cancel).await?;

        info!(expected = session.expected_party_count, "Waiting for parties to join...");
        let members = recruit::wait_for_parties(
            self.relay.as_ref(),
            &session.id,
            session.expected_party_count,
            timeout,
            self.config.poll_interval,
            cancel,
        )
        .await?;

        session.accept_quorum(members, old_signers)?;
        info!(parties = ?session.members, "All parties joined, starting session");

        self.relay.start_session(&session.id, &session.members).await?;
        session.advance(SessionStatus::Started, "relay routing started")
    }

    #[allow(clippy::too_many_arguments)]
    async fn sign_all(
        &self,
        session: &Session,
        vault: &Vault,
        scheme: SignatureScheme,
        public_key: &str,
        keyshare: &str,
        messages: &[String],
        derive_path: &str,
    ) -> Result<Vec<KeysignResult>, SessionError> {
        let ctx = self.context(session, &vault.hex_chain_code);
        let derive_path = Some(derive_path).filter(|p| !p.is_empty() && scheme == SignatureScheme::Ecdsa);

        let mut results = Vec::with_capacity(messages.len());
        for message in messages {
            let signature = self
                .mpc
                .sign_share(
                    &ctx,
                    SignRequest {
                        scheme,
                        public_key,
                        keyshare,
                        message,
                        derive_path,
                    },
                )
                .await?;
            results.push(signature);
        }
        Ok(results)
    }

    /// Turns the phase result into the caller-facing outcome. Failures leave
    /// nothing behind; a failed completion signal is only a warning.
    async fn conclude<T>(&self, session: &mut Session, result: Result<T, SessionError>) -> Result<Completed<T>, SessionError> {
        let value = match result {
            Ok(value) => value,
            Err(err) => {
                warn!(session_id = %session.id, error = %err, "Session failed");
                session.fail(&err);
                return Err(err);
            }
        };

        let completion_error = match self.relay.complete_session(&session.id, &session.local_party).await {
            Ok(()) => None,
            Err(err) => {
                let err = match err {
                    SessionError::CompletionSignalFailed(_) => err,
                    other => SessionError::CompletionSignalFailed(other.to_string()),
                };
                warn!(session_id = %session.id, error = %err, "Failed to complete session");
                Some(err)
            }
        };
        session.advance(SessionStatus::Completed, "session complete")?;

        Ok(Completed {
            value,
            session_id: session.id.clone(),
            roster: session.roster(),
            completion_error,
        })
    }

    fn context(&self, session: &Session, hex_chain_code: &str) -> MpcContext {
        MpcContext {
            session_id: session.id.clone(),
            relay_url: self.config.relay_url.clone(),
            local_party: session.local_party.clone(),
            committee: session.members.clone(),
            hex_encryption_key: session.encryption_key.to_hex(),
            hex_chain_code: hex_chain_code.to_string(),
        }
    }

    fn fast_vault_target(&self) -> JoinTarget {
        JoinTarget {
            role: PartyRole::FastVaultServer,
            base_url: self.config.fast_vault_url.clone(),
            auth_header: None,
        }
    }

    fn verifier_target(&self, url: Option<&str>, auth_header: Option<String>) -> JoinTarget {
        JoinTarget {
            role: PartyRole::Verifier,
            base_url: url.unwrap_or(&self.config.verifier_url).to_string(),
            auth_header,
        }
    }
}

/// Public key and local share for `scheme`, checked before any session opens.
fn signing_material<'a>(
    vault: &'a Vault,
    scheme: SignatureScheme,
    messages: &[String],
) -> Result<(&'a str, &'a str), SessionError> {
    if messages.is_empty() {
        return Err(SessionError::ValidationError("nothing to sign".into()));
    }
    let public_key = vault.public_key(scheme);
    if public_key.is_empty() {
        return Err(SessionError::ValidationError(format!(
            "vault {} has no {scheme:?} public key",
            vault.name
        )));
    }
    let keyshare = vault.keyshare_for(public_key).ok_or_else(|| {
        SessionError::VaultError(format!("vault {} holds no share for {public_key}", vault.name))
    })?;
    Ok((public_key, keyshare))
}

fn reshare_seed<'a>(vault: &'a Vault, public_key: &'a str) -> ReshareSeed<'a> {
    ReshareSeed {
        public_key,
        keyshare: vault.keyshare_for(public_key),
        old_committee: &vault.signers,
        old_reshare_prefix: &vault.reshare_prefix,
    }
}
