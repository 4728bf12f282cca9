use crate::audit::{AuditRecord, AuditTracker, now_rfc3339};
use crate::types::{PartyId, SessionId, SessionKind, SessionStatus};

fn record(session: &str, status: SessionStatus, message: &str) -> AuditRecord {
    AuditRecord {
        session_id: SessionId::from(session),
        kind: SessionKind::Keygen,
        status,
        party: None,
        message: message.into(),
        timestamp: now_rfc3339(),
    }
}

#[test]
fn test_audit_log_adds_and_retrieves() {
    let tracker = AuditTracker::new(10);

    tracker.log(record("session_1", SessionStatus::Registered, "registered with relay"));

    let recent = tracker.recent(1);
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].session_id.as_str(), "session_1");
    assert_eq!(recent[0].message, "registered with relay");
    assert_eq!(recent[0].status_label(), "REGISTERED");
}

#[test]
fn test_audit_log_eviction() {
    let tracker = AuditTracker::new(3);

    for i in 0..5 {
        let mut r = record(&format!("session_{i}"), SessionStatus::Started, "relay routing started");
        r.party = Some(PartyId::new(format!("party-{i}")));
        tracker.log(r);
    }

    let recent = tracker.recent(5);
    assert_eq!(recent.len(), 3); // oldest two evicted
    assert_eq!(recent[0].session_id.as_str(), "session_4");
    assert_eq!(recent[2].session_id.as_str(), "session_2");
}

#[test]
fn test_audit_trail_collapses_repeats() {
    let tracker = AuditTracker::new(50);

    tracker.log(record("a", SessionStatus::Registered, "registered"));
    tracker.log(record("b", SessionStatus::Registered, "other session"));
    tracker.log(record("a", SessionStatus::Recruiting, "recruiting"));
    tracker.log(record("a", SessionStatus::Recruiting, "invited as Fast Vault Server"));
    tracker.log(record("a", SessionStatus::TimedOut, "timed out"));

    assert_eq!(
        tracker.trail(&SessionId::from("a")),
        vec![
            SessionStatus::Registered,
            SessionStatus::Recruiting,
            SessionStatus::TimedOut,
        ]
    );
    assert!(tracker.trail(&SessionId::from("missing")).is_empty());
}

#[test]
fn test_audit_log_thread_safety() {
    use std::thread;

    let tracker = AuditTracker::new(100);

    thread::scope(|scope| {
        for i in 0..10 {
            let tracker = &tracker;
            scope.spawn(move || {
                tracker.log(record(&format!("thread_{i}"), SessionStatus::Completed, "session complete"));
            });
        }
    });

    let recent = tracker.recent(10);
    assert_eq!(recent.len(), 10);
}
