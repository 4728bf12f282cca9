use std::collections::HashMap;
use std::sync::Arc;

use crate::audit::{AuditRecord, AuditTracker, now_rfc3339};
use crate::error::SessionError;
use crate::types::{EncryptionKey, PartyId, PartyRole, SessionId, SessionKind, SessionStatus};

/// Represents the state of one coordination round on the relay
pub struct Session {
    pub id: SessionId,
    pub kind: SessionKind,
    pub local_party: PartyId,
    pub expected_party_count: usize,
    pub members: Vec<PartyId>,           // canonical member list once quorate
    pub encryption_key: EncryptionKey,   // shared with each recruit via its own join request
    pub status: SessionStatus,
    roles: HashMap<PartyId, PartyRole>,  // tagged at invitation time
    audit: Arc<AuditTracker>,
}

impl Session {
    /// Creates a session with a fresh id and encryption key.
    pub fn new(
        kind: SessionKind,
        local_party: PartyId,
        expected_party_count: usize,
        audit: Arc<AuditTracker>,
    ) -> Result<Self, SessionError> {
        if expected_party_count < 2 {
            return Err(SessionError::ValidationError(format!(
                "a session needs at least 2 parties, got {expected_party_count}"
            )));
        }

        let mut roles = HashMap::new();
        roles.insert(local_party.clone(), PartyRole::Initiator);

        Ok(Session {
            id: SessionId::generate(),
            kind,
            local_party,
            expected_party_count,
            members: Vec::new(),
            encryption_key: EncryptionKey::generate(),
            status: SessionStatus::Registered,
            roles,
            audit,
        })
    }

    /// Moves the session along the status machine, recording the transition.
    pub fn advance(&mut self, to: SessionStatus, message: impl Into<String>) -> Result<(), SessionError> {
        use SessionStatus::*;

        let allowed = matches!(
            (self.status, to),
            (Registered, Recruiting)
                | (Recruiting, Quorate)
                | (Quorate, Started)
                | (Started, Completed)
                | (Registered, Failed)
                | (Recruiting, Failed)
                | (Quorate, Failed)
                | (Started, Failed)
                | (Recruiting, TimedOut)
        );
        if !allowed {
            return Err(SessionError::ValidationError(format!(
                "session {} cannot move from {:?} to {:?}",
                self.id, self.status, to
            )));
        }

        self.status = to;
        self.record(None, message);
        Ok(())
    }

    /// Marks the session failed if the current status allows it. Used on error
    /// paths where the original error must win over a transition error.
    pub fn fail(&mut self, err: &SessionError) {
        let to = match err {
            SessionError::PartyRecruitmentTimeout { .. } => SessionStatus::TimedOut,
            _ => SessionStatus::Failed,
        };
        if self.advance(to, err.to_string()).is_err() {
            tracing::debug!(session_id = %self.id, status = ?self.status, "Session already terminal");
        }
    }

    /// Records the initial status once the relay has accepted the session.
    pub fn registered(&self) {
        self.record(Some(self.local_party.clone()), "registered with relay");
    }

    /// Tags a party with the role it was invited for.
    pub fn tag(&mut self, party: PartyId, role: PartyRole) {
        self.record(Some(party.clone()), format!("invited as {role}"));
        self.roles.insert(party, role);
    }

    /// Accepts the relay's member list verbatim as the canonical party set and
    /// tags every member that was not invited explicitly.
    pub fn accept_quorum(&mut self, members: Vec<PartyId>, old_signers: &[PartyId]) -> Result<(), SessionError> {
        for member in &members {
            if self.roles.contains_key(member) {
                continue;
            }
            let role = if old_signers.contains(member) {
                PartyRole::ExistingSigner
            } else if self.kind == SessionKind::Reshare {
                PartyRole::Plugin
            } else {
                PartyRole::Unknown
            };
            self.roles.insert(member.clone(), role);
        }

        let summary = members.iter().map(PartyId::as_str).collect::<Vec<_>>().join(",");
        self.members = members;
        self.advance(SessionStatus::Quorate, format!("members [{summary}]"))
    }

    pub fn role_of(&self, party: &PartyId) -> PartyRole {
        self.roles.get(party).copied().unwrap_or(PartyRole::Unknown)
    }

    /// Members paired with their roles, in member order.
    pub fn roster(&self) -> Vec<(PartyId, PartyRole)> {
        self.members
            .iter()
            .map(|m| (m.clone(), self.role_of(m)))
            .collect()
    }

    fn record(&self, party: Option<PartyId>, message: impl Into<String>) {
        self.audit.log(AuditRecord {
            session_id: self.id.clone(),
            kind: self.kind,
            status: self.status,
            party,
            message: message.into(),
            timestamp: now_rfc3339(),
        });
    }
}
