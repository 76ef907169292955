//! Attendance event fan-out.
//!
//! Subscribers are held in a copy-on-write list: publishing clones an `Arc`
//! of the current list and delivers without holding any lock, so a
//! subscriber may (un)subscribe from inside its own callback.

use crate::session::SessionSnapshot;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AttendanceEvent {
    SessionStarted {
        session_id: Uuid,
        started_at: DateTime<Utc>,
        roster_size: usize,
    },
    StudentDetected {
        identity_id: String,
        name: String,
        confidence: f32,
        first_detection: bool,
    },
    AttendanceUpdated(SessionSnapshot),
    SessionEnded(SessionSnapshot),
}

impl AttendanceEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AttendanceEvent::SessionStarted { .. } => "session_started",
            AttendanceEvent::StudentDetected { .. } => "student_detected",
            AttendanceEvent::AttendanceUpdated(_) => "attendance_updated",
            AttendanceEvent::SessionEnded(_) => "session_ended",
        }
    }
}

/// Error returned by a subscriber; logged and otherwise ignored.
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: &AttendanceEvent) -> Result<(), SubscriberError>;
}

impl<F> EventSubscriber for F
where
    F: Fn(&AttendanceEvent) -> Result<(), SubscriberError> + Send + Sync,
{
    fn on_event(&self, event: &AttendanceEvent) -> Result<(), SubscriberError> {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type SubscriberList = Arc<Vec<(SubscriptionId, Arc<dyn EventSubscriber>)>>;

/// Forwards events into a crossbeam channel; fails once the receiver is gone.
struct ChannelSubscriber(crossbeam_channel::Sender<AttendanceEvent>);

impl EventSubscriber for ChannelSubscriber {
    fn on_event(&self, event: &AttendanceEvent) -> Result<(), SubscriberError> {
        self.0
            .send(event.clone())
            .map_err(|_| "event channel receiver dropped".into())
    }
}

#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<SubscriberList>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut guard = self.subscribers.write();
        let mut list: Vec<_> = guard.iter().cloned().collect();
        list.push((id, subscriber));
        *guard = Arc::new(list);
        id
    }

    /// Returns whether a subscriber was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut guard = self.subscribers.write();
        let before = guard.len();
        let list: Vec<_> = guard.iter().filter(|(sid, _)| *sid != id).cloned().collect();
        let removed = list.len() != before;
        *guard = Arc::new(list);
        removed
    }

    /// Subscribe an unbounded channel and return its receiving end.
    pub fn channel(&self) -> crossbeam_channel::Receiver<AttendanceEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribe(Arc::new(ChannelSubscriber(tx)));
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Deliver `event` to every subscriber in subscription order.
    ///
    /// A failing or panicking subscriber does not stop delivery to the others.
    pub fn publish(&self, event: &AttendanceEvent) {
        let subscribers = Arc::clone(&self.subscribers.read());
        for (id, subscriber) in subscribers.iter() {
            match panic::catch_unwind(AssertUnwindSafe(|| subscriber.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(subscriber = id.0, event = event.kind(), error = %e, "subscriber failed");
                }
                Err(_) => {
                    tracing::error!(subscriber = id.0, event = event.kind(), "subscriber panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn detected(name: &str) -> AttendanceEvent {
        AttendanceEvent::StudentDetected {
            identity_id: name.to_lowercase(),
            name: name.to_string(),
            confidence: 90.0,
            first_detection: true,
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, Arc<dyn EventSubscriber>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscriber = move |event: &AttendanceEvent| -> Result<(), SubscriberError> {
            sink.lock().push(event.kind().to_string());
            Ok(())
        };
        (seen, Arc::new(subscriber))
    }

    #[test]
    fn test_publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let (a, sa) = recorder();
        let (b, sb) = recorder();
        bus.subscribe(sa);
        bus.subscribe(sb);
        bus.publish(&detected("Alice"));
        assert_eq!(a.lock().len(), 1);
        assert_eq!(b.lock().len(), 1);
    }

    #[test]
    fn test_failing_and_panicking_subscribers_are_isolated() {
        let bus = EventBus::new();
        bus.subscribe(Arc::new(|_: &AttendanceEvent| -> Result<(), SubscriberError> {
            Err("boom".into())
        }));
        bus.subscribe(Arc::new(|_: &AttendanceEvent| -> Result<(), SubscriberError> {
            panic!("subscriber bug")
        }));
        let (seen, s) = recorder();
        bus.subscribe(s);

        bus.publish(&detected("Alice"));
        bus.publish(&detected("Bob"));
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let (seen, s) = recorder();
        let id = bus.subscribe(s);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&detected("Alice"));
        assert!(seen.lock().is_empty());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_channel_receives_events_in_order() {
        let bus = EventBus::new();
        let rx = bus.channel();
        bus.publish(&detected("Alice"));
        bus.publish(&detected("Bob"));
        let names: Vec<_> = rx
            .try_iter()
            .map(|e| match e {
                AttendanceEvent::StudentDetected { name, .. } => name,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(names, ["Alice", "Bob"]);
    }

    #[test]
    fn test_dropped_channel_does_not_break_delivery() {
        let bus = EventBus::new();
        drop(bus.channel());
        let (seen, s) = recorder();
        bus.subscribe(s);
        bus.publish(&detected("Alice"));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_subscribe_from_inside_callback() {
        let bus = Arc::new(EventBus::new());
        let inner = Arc::clone(&bus);
        bus.subscribe(Arc::new(move |_: &AttendanceEvent| -> Result<(), SubscriberError> {
            let (_, s) = recorder();
            inner.subscribe(s);
            Ok(())
        }));
        bus.publish(&detected("Alice"));
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(detected("Alice")).unwrap();
        assert_eq!(json["type"], "student_detected");
        assert_eq!(json["data"]["name"], "Alice");
        assert_eq!(json["data"]["first_detection"], true);
    }
}
