//! Per-session attendance records.

use crate::types::EnrolledIdentity;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Attendance of one identity within a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub identity_id: String,
    pub name: String,
    /// Highest confidence observed; never decreases.
    pub max_confidence: f32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub detection_count: u64,
}

/// Effect of one [`AttendanceSession::update_detection`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateOutcome {
    /// First sighting of this identity in the session.
    Inserted,
    /// Confidence strictly exceeded the previous maximum.
    Improved { previous: f32 },
    /// Seen again without a new maximum.
    Unchanged,
    /// The session has ended.
    Ignored,
}

impl UpdateOutcome {
    pub fn is_first_detection(&self) -> bool {
        matches!(self, UpdateOutcome::Inserted)
    }
}

/// Serializable point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub active: bool,
    /// Sorted by name.
    pub records: Vec<AttendanceRecord>,
}

#[derive(Debug, Default)]
struct SessionState {
    records: HashMap<String, AttendanceRecord>,
    ended_at: Option<DateTime<Utc>>,
}

/// Running attendance record for one class session.
#[derive(Debug)]
pub struct AttendanceSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    state: RwLock<SessionState>,
}

impl AttendanceSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            state: RwLock::new(SessionState::default()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().ended_at
    }

    pub fn is_active(&self) -> bool {
        self.state.read().ended_at.is_none()
    }

    /// Record a sighting of `identity` at `confidence`.
    pub fn update_detection(&self, identity: &EnrolledIdentity, confidence: f32) -> UpdateOutcome {
        let now = Utc::now();
        let mut state = self.state.write();
        if state.ended_at.is_some() {
            return UpdateOutcome::Ignored;
        }

        match state.records.get_mut(&identity.id) {
            Some(record) => {
                record.detection_count += 1;
                record.last_seen = now;
                if confidence > record.max_confidence {
                    let previous = record.max_confidence;
                    record.max_confidence = confidence;
                    UpdateOutcome::Improved { previous }
                } else {
                    UpdateOutcome::Unchanged
                }
            }
            None => {
                state.records.insert(
                    identity.id.clone(),
                    AttendanceRecord {
                        identity_id: identity.id.clone(),
                        name: identity.name.clone(),
                        max_confidence: confidence,
                        first_seen: now,
                        last_seen: now,
                        detection_count: 1,
                    },
                );
                UpdateOutcome::Inserted
            }
        }
    }

    pub fn is_detected(&self, identity_id: &str) -> bool {
        self.state.read().records.contains_key(identity_id)
    }

    pub fn max_confidence_for(&self, identity_id: &str) -> Option<f32> {
        self.state
            .read()
            .records
            .get(identity_id)
            .map(|r| r.max_confidence)
    }

    pub fn record(&self, identity_id: &str) -> Option<AttendanceRecord> {
        self.state.read().records.get(identity_id).cloned()
    }

    /// All records, sorted by name then id.
    pub fn all_records(&self) -> Vec<AttendanceRecord> {
        let mut records: Vec<_> = self.state.read().records.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.identity_id.cmp(&b.identity_id)));
        records
    }

    pub fn detected_count(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let ended_at = self.ended_at();
        SessionSnapshot {
            session_id: self.id,
            started_at: self.started_at,
            ended_at,
            active: ended_at.is_none(),
            records: self.all_records(),
        }
    }

    /// End the session. Returns `true` only for the call that ended it.
    pub fn end(&self) -> bool {
        let mut state = self.state.write();
        if state.ended_at.is_some() {
            return false;
        }
        state.ended_at = Some(Utc::now());
        true
    }
}

impl Default for AttendanceSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn student(id: &str, name: &str) -> EnrolledIdentity {
        EnrolledIdentity::new(id, name, Vec::new())
    }

    #[test]
    fn test_first_detection_inserts() {
        let session = AttendanceSession::new();
        let alice = student("s1", "Alice");
        assert_eq!(session.update_detection(&alice, 82.0), UpdateOutcome::Inserted);
        assert!(session.is_detected("s1"));
        let record = session.record("s1").unwrap();
        assert_eq!(record.max_confidence, 82.0);
        assert_eq!(record.detection_count, 1);
        assert_eq!(record.first_seen, record.last_seen);
    }

    #[test]
    fn test_max_confidence_is_max_of_inputs_in_any_order() {
        let orders = [[71.0, 90.0, 85.0], [90.0, 85.0, 71.0], [85.0, 71.0, 90.0]];
        for order in orders {
            let session = AttendanceSession::new();
            let alice = student("s1", "Alice");
            for c in order {
                session.update_detection(&alice, c);
            }
            assert_eq!(session.max_confidence_for("s1"), Some(90.0));
            assert_eq!(session.record("s1").unwrap().detection_count, 3);
        }
    }

    #[test]
    fn test_outcomes() {
        let session = AttendanceSession::new();
        let alice = student("s1", "Alice");
        session.update_detection(&alice, 80.0);
        assert_eq!(
            session.update_detection(&alice, 85.0),
            UpdateOutcome::Improved { previous: 80.0 }
        );
        assert_eq!(session.update_detection(&alice, 85.0), UpdateOutcome::Unchanged);
        assert_eq!(session.update_detection(&alice, 70.0), UpdateOutcome::Unchanged);
    }

    #[test]
    fn test_last_seen_refreshes_on_lower_confidence() {
        let session = AttendanceSession::new();
        let alice = student("s1", "Alice");
        session.update_detection(&alice, 90.0);
        let first = session.record("s1").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        session.update_detection(&alice, 75.0);
        let second = session.record("s1").unwrap();
        assert!(second.last_seen > first.last_seen);
        assert_eq!(second.first_seen, first.first_seen);
        assert_eq!(second.max_confidence, 90.0);
    }

    #[test]
    fn test_end_is_idempotent_and_freezes_records() {
        let session = AttendanceSession::new();
        let alice = student("s1", "Alice");
        session.update_detection(&alice, 80.0);
        assert!(session.end());
        assert!(!session.end());
        assert!(!session.is_active());
        assert_eq!(session.update_detection(&alice, 99.0), UpdateOutcome::Ignored);
        assert_eq!(session.max_confidence_for("s1"), Some(80.0));
    }

    #[test]
    fn test_all_records_sorted_by_name() {
        let session = AttendanceSession::new();
        session.update_detection(&student("3", "Carol"), 80.0);
        session.update_detection(&student("1", "Alice"), 80.0);
        session.update_detection(&student("2", "Bob"), 80.0);
        let names: Vec<_> = session.all_records().into_iter().map(|r| r.name).collect();
        assert_eq!(names, ["Alice", "Bob", "Carol"]);
    }

    #[test]
    fn test_snapshot_serializes() {
        let session = AttendanceSession::new();
        session.update_detection(&student("1", "Alice"), 88.5);
        let json = serde_json::to_value(session.snapshot()).unwrap();
        assert_eq!(json["active"], true);
        assert_eq!(json["records"][0]["identity_id"], "1");
        assert_eq!(json["records"][0]["max_confidence"], 88.5);
    }

    #[test]
    fn test_concurrent_updates_keep_max() {
        let session = Arc::new(AttendanceSession::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let session = Arc::clone(&session);
                std::thread::spawn(move || {
                    let alice = student("s1", "Alice");
                    for i in 0..50 {
                        session.update_detection(&alice, (t * 50 + i) as f32);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let record = session.record("s1").unwrap();
        assert_eq!(record.max_confidence, 399.0);
        assert_eq!(record.detection_count, 400);
    }
}
