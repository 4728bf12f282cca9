//! In-memory doubles for the relay, the join endpoints and the MPC library.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::audit::AuditTracker;
use crate::config::EngineConfig;
use crate::coordinator::SessionCoordinator;
use crate::error::SessionError;
use crate::mpc::{GeneratedShare, MpcBackend, MpcContext, MpcError, ReshareSeed, SignRequest, SimulatedMpcBackend};
use crate::recruit::{JoinRequest, JoinTarget, JoinTransport};
use crate::relay::Relay;
use crate::types::{KeysignResult, PartyId, PartyRole, SessionId, SignatureScheme};
use crate::vault::{KeyShare, LIB_TYPE_DKLS, Vault};

/// Relay that keeps membership in memory and counts membership reads.
#[derive(Default)]
pub struct MemoryRelay {
    sessions: Mutex<HashMap<SessionId, Vec<PartyId>>>,
    started: Mutex<Vec<(SessionId, Vec<PartyId>)>>,
    completed: Mutex<Vec<(SessionId, PartyId)>>,
    get_calls: AtomicUsize,
    pub fail_register: AtomicBool,
    pub fail_start: AtomicBool,
    pub fail_complete: AtomicBool,
}

impl MemoryRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn join(&self, session_id: &SessionId, party: PartyId) {
        let mut sessions = self.sessions.lock().unwrap();
        let members = sessions.entry(session_id.clone()).or_default();
        if !members.contains(&party) {
            members.push(party);
        }
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> Vec<(SessionId, Vec<PartyId>)> {
        self.started.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<(SessionId, PartyId)> {
        self.completed.lock().unwrap().clone()
    }

    /// Every session registered so far.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    async fn register_session(&self, session_id: &SessionId, local_party: &PartyId) -> Result<(), SessionError> {
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(SessionError::RelayUnavailable("register refused".into()));
        }
        self.join(session_id, local_party.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &SessionId) -> Result<Vec<PartyId>, SessionError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn start_session(&self, session_id: &SessionId, members: &[PartyId]) -> Result<(), SessionError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(SessionError::RelayUnavailable("start refused".into()));
        }
        self.started
            .lock()
            .unwrap()
            .push((session_id.clone(), members.to_vec()));
        Ok(())
    }

    async fn complete_session(&self, session_id: &SessionId, local_party: &PartyId) -> Result<(), SessionError> {
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(SessionError::CompletionSignalFailed("relay went away".into()));
        }
        self.completed
            .lock()
            .unwrap()
            .push((session_id.clone(), local_party.clone()));
        Ok(())
    }
}

/// What a remote party does when asked to join.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Accept and register on the relay after `delay`. `party` overrides the
    /// ID taken from the join request; `extra` parties (a plugin brought in
    /// by the Verifier, say) register alongside it.
    Join {
        party: Option<PartyId>,
        extra: Vec<PartyId>,
        delay: Duration,
    },
    /// Accept but never show up.
    Ghost,
    /// Answer with the given HTTP status.
    Refuse(u16),
    /// Hold the request open for the given time, then accept.
    Stall(Duration),
}

/// Join under the ID from the join request after `secs` seconds.
pub fn join_after(secs: u64) -> Reply {
    Reply::Join {
        party: None,
        extra: Vec::new(),
        delay: Duration::from_secs(secs),
    }
}

/// Join under `party` after `secs` seconds.
pub fn join_as(party: &str, secs: u64) -> Reply {
    Reply::Join {
        party: Some(PartyId::new(party)),
        extra: Vec::new(),
        delay: Duration::from_secs(secs),
    }
}

/// Join endpoints scripted per role. Accepted parties register themselves on
/// the shared `MemoryRelay` from a spawned task.
pub struct ScriptedTransport {
    relay: Arc<MemoryRelay>,
    replies: Mutex<HashMap<PartyRole, Reply>>,
    requests: Mutex<Vec<(JoinTarget, JoinRequest)>>,
    pub existing_vaults: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new(relay: Arc<MemoryRelay>) -> Arc<Self> {
        Arc::new(ScriptedTransport {
            relay,
            replies: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            existing_vaults: Mutex::new(Vec::new()),
        })
    }

    pub fn on(&self, role: PartyRole, reply: Reply) {
        self.replies.lock().unwrap().insert(role, reply);
    }

    pub fn requests(&self) -> Vec<(JoinTarget, JoinRequest)> {
        self.requests.lock().unwrap().clone()
    }
}

fn requested_party(request: &JoinRequest) -> Option<PartyId> {
    match request {
        JoinRequest::VaultCreate(r) => Some(PartyId::new(&r.local_party_id)),
        JoinRequest::FastVaultReshare(r) => Some(PartyId::new(&r.local_party_id)),
        JoinRequest::VerifierReshare(r) => Some(PartyId::new(&r.local_party_id)),
        JoinRequest::FastVaultSign(_) | JoinRequest::VerifierKeysign(_) => None,
    }
}

#[async_trait]
impl JoinTransport for ScriptedTransport {
    async fn request_join(&self, target: &JoinTarget, request: &JoinRequest) -> Result<(), SessionError> {
        self.requests
            .lock()
            .unwrap()
            .push((target.clone(), request.clone()));

        let reply = self
            .replies
            .lock()
            .unwrap()
            .get(&target.role)
            .cloned()
            .unwrap_or(Reply::Ghost);

        match reply {
            Reply::Refuse(code) => Err(SessionError::RemotePartyRefused {
                role: target.role,
                reason: format!("returned {code}: boom"),
            }),
            Reply::Ghost => Ok(()),
            Reply::Stall(hold) => {
                tokio::time::sleep(hold).await;
                Ok(())
            }
            Reply::Join { party, extra, delay } => {
                let party = party
                    .or_else(|| requested_party(request))
                    .unwrap_or_else(|| PartyId::new("remote-signer"));
                let relay = self.relay.clone();
                let session_id = SessionId::from(request.session_id());
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    relay.join(&session_id, party);
                    for other in extra {
                        relay.join(&session_id, other);
                    }
                });
                Ok(())
            }
        }
    }

    async fn vault_exists(&self, _fast_vault_url: &str, public_key: &str) -> Result<bool, SessionError> {
        Ok(self
            .existing_vaults
            .lock()
            .unwrap()
            .iter()
            .any(|pk| pk == public_key))
    }
}

/// Simulated backend that can be told to fail one step.
#[derive(Default)]
pub struct FlakyMpc {
    inner: SimulatedMpcBackend,
    pub fail_generate: AtomicBool,
    pub fail_reshare: AtomicBool,
    pub fail_sign: AtomicBool,
    pub sign_calls: AtomicUsize,
}

#[async_trait]
impl MpcBackend for FlakyMpc {
    async fn generate_share(&self, ctx: &MpcContext, scheme: SignatureScheme) -> Result<GeneratedShare, MpcError> {
        if self.fail_generate.load(Ordering::SeqCst) {
            return Err(MpcError::Protocol("keygen round 2 aborted".into()));
        }
        self.inner.generate_share(ctx, scheme).await
    }

    async fn reshare_share(
        &self,
        ctx: &MpcContext,
        scheme: SignatureScheme,
        seed: ReshareSeed<'_>,
    ) -> Result<GeneratedShare, MpcError> {
        if self.fail_reshare.load(Ordering::SeqCst) {
            return Err(MpcError::Protocol("reshare aborted".into()));
        }
        self.inner.reshare_share(ctx, scheme, seed).await
    }

    async fn sign_share(&self, ctx: &MpcContext, request: SignRequest<'_>) -> Result<KeysignResult, MpcError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_sign.load(Ordering::SeqCst) {
            return Err(MpcError::Protocol("signing aborted".into()));
        }
        self.inner.sign_share(ctx, request).await
    }
}

pub struct Harness {
    pub relay: Arc<MemoryRelay>,
    pub transport: Arc<ScriptedTransport>,
    pub mpc: Arc<FlakyMpc>,
    pub audit: Arc<AuditTracker>,
    pub coordinator: SessionCoordinator,
}

pub fn harness() -> Harness {
    let relay = MemoryRelay::new();
    let transport = ScriptedTransport::new(relay.clone());
    let mpc = Arc::new(FlakyMpc::default());
    let audit = Arc::new(AuditTracker::new(1000));
    let config = EngineConfig {
        relay_url: "http://relay.test".into(),
        fast_vault_url: "http://fastvault.test".into(),
        verifier_url: "http://verifier.test".into(),
        ..EngineConfig::default()
    };
    let coordinator = SessionCoordinator::new(config, relay.clone(), transport.clone(), mpc.clone())
        .with_audit(audit.clone());

    Harness {
        relay,
        transport,
        mpc,
        audit,
        coordinator,
    }
}

/// A 2-of-2 vault shared by `cli-1` and a Fast Vault Server.
pub fn sample_vault() -> Vault {
    let ecdsa = format!("02{}", "ab".repeat(32));
    let eddsa = "cd".repeat(32);
    Vault {
        name: "test-vault".into(),
        public_key_ecdsa: ecdsa.clone(),
        public_key_eddsa: eddsa.clone(),
        hex_chain_code: "11".repeat(32),
        local_party_id: PartyId::new("cli-1"),
        signers: vec![PartyId::new("cli-1"), PartyId::new("Server-12345")],
        key_shares: vec![
            KeyShare {
                pubkey: ecdsa,
                keyshare: "ecdsa-share".into(),
            },
            KeyShare {
                pubkey: eddsa,
                keyshare: "eddsa-share".into(),
            },
        ],
        reshare_prefix: String::new(),
        created_at: "2025-01-01T00:00:00Z".into(),
        lib_type: LIB_TYPE_DKLS,
    }
}
