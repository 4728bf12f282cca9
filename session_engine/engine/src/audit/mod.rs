use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::info;

use crate::types::{PartyId, SessionId, SessionKind, SessionStatus};

/// Record of a session status transition
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub session_id: SessionId,
    pub kind: SessionKind,
    pub status: SessionStatus,
    pub party: Option<PartyId>,
    pub message: String,
    pub timestamp: String, // RFC3339
}

impl AuditRecord {
    pub fn status_label(&self) -> &'static str {
        match self.status {
            SessionStatus::Registered => "REGISTERED",
            SessionStatus::Recruiting => "RECRUITING",
            SessionStatus::Quorate => "QUORATE",
            SessionStatus::Started => "STARTED",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Failed => "FAILED",
            SessionStatus::TimedOut => "TIMED_OUT",
        }
    }
}

/// In-memory audit tracker, bounded; oldest entries are evicted first.
pub struct AuditTracker {
    records: Mutex<VecDeque<AuditRecord>>,
    max_entries: usize,
}

impl Default for AuditTracker {
    fn default() -> Self {
        AuditTracker::new(500)
    }
}

impl AuditTracker {
    pub fn new(max_entries: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(max_entries)),
            max_entries,
        }
    }

    /// Record a new event in the audit log
    pub fn log(&self, record: AuditRecord) {
        info!(
            session_id = %record.session_id,
            kind = %record.kind,
            party = record.party.as_ref().map(|p| p.as_str()).unwrap_or(""),
            "AUDIT [{}] {}",
            record.status_label(),
            record.message
        );

        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if self.max_entries == 0 {
            return;
        }
        if records.len() == self.max_entries {
            records.pop_front(); // evict oldest
        }
        records.push_back(record);
    }

    /// Most recent records, newest first
    pub fn recent(&self, count: usize) -> Vec<AuditRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.iter().rev().take(count).cloned().collect()
    }

    /// Distinct statuses one session went through, in order
    pub fn trail(&self, session_id: &SessionId) -> Vec<SessionStatus> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut trail: Vec<SessionStatus> = Vec::new();
        for record in records.iter().filter(|r| &r.session_id == session_id) {
            if trail.last() != Some(&record.status) {
                trail.push(record.status);
            }
        }
        trail
    }
}

/// Helper to get current timestamp as RFC3339 string
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
