//! Party recruitment: ask each remote party to join, then poll the relay
//! until the expected number of members has registered.

pub mod requests;
pub mod transport;

use std::time::Duration;

use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::relay::Relay;
use crate::session::Session;
use crate::types::{PartyId, SessionId};

pub use requests::JoinRequest;
pub use transport::{HttpJoinTransport, JoinTarget, JoinTransport};

/// Whether a refusal from this party aborts the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Required,
    BestEffort,
}

/// One join request to send, with the role and party ID it was issued for.
#[derive(Debug, Clone)]
pub struct Invitation {
    pub target: JoinTarget,
    /// ID we assigned to the remote, when we assign one.
    pub party_id: Option<PartyId>,
    pub requirement: Requirement,
    pub request: JoinRequest,
}

/// Sends every invitation in order. Required refusals abort immediately;
/// best-effort refusals are logged and recruitment carries on. A request
/// still in flight when `cancel` fires is dropped.
pub async fn invite_all(
    transport: &dyn JoinTransport,
    session: &mut Session,
    invitations: Vec<Invitation>,
    cancel: &CancellationToken,
) -> Result<(), SessionError> {
    for invitation in invitations {
        let role = invitation.target.role;
        if let Some(party) = &invitation.party_id {
            session.tag(party.clone(), role);
        }

        info!(session_id = %session.id, role = %role, "Requesting party to join");
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SessionError::OperationCancelled),
            sent = transport.request_join(&invitation.target, &invitation.request) => sent,
        };
        match sent {
            Ok(()) => {}
            Err(err) if invitation.requirement == Requirement::BestEffort => {
                warn!(session_id = %session.id, role = %role, error = %err, "Join request failed - continuing anyway");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Polls relay membership every `poll_interval` until at least `expected`
/// members are registered, `timeout` elapses, or `cancel` fires.
///
/// The member list from the quorum-reaching poll is returned verbatim. Relay
/// read errors are retried after the same interval and only bounded by the
/// deadline.
pub async fn wait_for_parties(
    relay: &dyn Relay,
    session_id: &SessionId,
    expected: usize,
    timeout: Duration,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<PartyId>, SessionError> {
    let deadline = Instant::now() + timeout;
    let mut observed = 0;

    loop {
        let polled = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SessionError::OperationCancelled),
            _ = sleep_until(deadline) => {
                return Err(SessionError::PartyRecruitmentTimeout { expected, observed });
            }
            polled = relay.get_session(session_id) => polled,
        };

        match polled {
            Ok(members) if members.len() >= expected => return Ok(members),
            Ok(members) => {
                observed = members.len();
                debug!(session_id = %session_id, parties = observed, expected, "Waiting for more parties...");
            }
            Err(err) => {
                debug!(session_id = %session_id, error = %err, "Failed to get session");
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SessionError::OperationCancelled),
            _ = sleep_until(deadline) => {
                return Err(SessionError::PartyRecruitmentTimeout { expected, observed });
            }
            _ = sleep(poll_interval) => {}
        }
    }
}
