//! Single-process fan-out with bounded per-subscriber queues.
//!
//! One producer side (event log, registries, run queue) pushes envelopes;
//! each subscriber pulls from its own queue. A full queue drops the
//! subscriber rather than blocking the producer; the client reconnects
//! with its `Last-Event-ID` and resumes from the replay buffer.

use chrono::Utc;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::types::{Envelope, EventId, Scope, StreamMessage, SubscriberFilter};
use crate::session::Session;

/// Size of each subscriber's delivery queue.
const SUBSCRIBER_QUEUE_SIZE: usize = 64;

struct Subscriber {
    tx: mpsc::Sender<Arc<Envelope>>,
    filter: SubscriberFilter,
}

/// Fan-out hub with a bounded replay window for resume-by-id.
pub struct Broadcaster {
    subscribers: DashMap<u64, Subscriber>,
    next_subscriber_id: AtomicU64,
    next_seq: AtomicU64,
    replay: Mutex<VecDeque<Arc<Envelope>>>,
    replay_window: Duration,
}

impl Broadcaster {
    pub fn new(replay_window: Duration) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_subscriber_id: AtomicU64::new(1),
            next_seq: AtomicU64::new(1),
            replay: Mutex::new(VecDeque::new()),
            replay_window,
        }
    }

    fn stamp(&self, abbrev: &'static str) -> EventId {
        EventId {
            ms: Utc::now().timestamp_millis(),
            abbrev,
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
        }
    }

    /// Publish one message to every matching subscriber and the replay
    /// buffer.
    pub fn publish(&self, scope: Scope, message: StreamMessage) {
        let envelope = Arc::new(Envelope {
            id: self.stamp(message.abbrev()),
            scope,
            message,
        });

        {
            let mut replay = self.replay.lock().expect("replay buffer lock");
            replay.push_back(envelope.clone());
            let horizon = envelope.id.ms - self.replay_window.as_millis() as i64;
            while replay.front().is_some_and(|e| e.id.ms < horizon) {
                replay.pop_front();
            }
        }

        let mut dropped = Vec::new();
        for entry in self.subscribers.iter() {
            if !entry.filter.allows(&envelope.scope) {
                continue;
            }
            match entry.tx.try_send(envelope.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subscriber = *entry.key(), "subscriber queue full, dropping");
                    dropped.push(*entry.key());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dropped.push(*entry.key());
                }
            }
        }
        for id in dropped {
            self.subscribers.remove(&id);
        }
    }

    /// Register a subscriber. The returned subscription cleans itself up on
    /// drop.
    pub fn subscribe(self: &Arc<Self>, filter: SubscriberFilter) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_SIZE);
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.insert(id, Subscriber { tx, filter });
        debug!(subscriber = id, "registered stream subscriber");
        Subscription {
            id,
            rx: Some(rx),
            broadcaster: self.clone(),
        }
    }

    fn unsubscribe(&self, id: u64) {
        if self.subscribers.remove(&id).is_some() {
            debug!(subscriber = id, "removed stream subscriber");
        }
    }

    /// Build a per-subscriber `init` snapshot envelope.
    pub fn init_envelope(&self, sessions: Vec<Session>) -> Envelope {
        let message = StreamMessage::Init { sessions };
        Envelope {
            id: self.stamp(message.abbrev()),
            // Init is addressed to exactly one subscriber; never fanned out.
            scope: Scope {
                created_by: String::new(),
                session_id: String::new(),
            },
            message,
        }
    }

    /// Replay buffered envelopes newer than the client's marker.
    ///
    /// Returns `None` when the marker has aged out of the buffer (or never
    /// belonged to it); the caller then sends a fresh init snapshot.
    pub fn replay_since(
        &self,
        marker: (i64, u64),
        filter: &SubscriberFilter,
    ) -> Option<Vec<Arc<Envelope>>> {
        let replay = self.replay.lock().expect("replay buffer lock");

        let front = replay.front()?;
        if marker < front.id.key() {
            // Older than anything retained: cannot prove continuity.
            return None;
        }

        Some(
            replay
                .iter()
                .filter(|e| e.id.key() > marker && filter.allows(&e.scope))
                .cloned()
                .collect(),
        )
    }

    /// Number of connected subscribers (for diagnostics).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// A live subscription; dropping it unregisters the subscriber.
pub struct Subscription {
    id: u64,
    rx: Option<mpsc::Receiver<Arc<Envelope>>>,
    broadcaster: Arc<Broadcaster>,
}

impl Subscription {
    /// Detach the delivery queue; the subscription stays the drop guard.
    pub fn take_rx(&mut self) -> mpsc::Receiver<Arc<Envelope>> {
        self.rx.take().expect("subscription receiver already taken")
    }

    pub async fn recv(&mut self) -> Option<Arc<Envelope>> {
        match &mut self.rx {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    pub fn try_recv(&mut self) -> Option<Arc<Envelope>> {
        self.rx.as_mut().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use chrono::Utc;
    use orchestrator_protocol::SessionStatus;

    fn broadcaster() -> Arc<Broadcaster> {
        Arc::new(Broadcaster::new(Duration::from_secs(300)))
    }

    fn admin_filter() -> SubscriberFilter {
        SubscriberFilter {
            user: "admin".to_string(),
            role: Role::Admin,
            session_id: None,
        }
    }

    fn scope(created_by: &str, session_id: &str) -> Scope {
        Scope {
            created_by: created_by.to_string(),
            session_id: session_id.to_string(),
        }
    }

    fn session(id: &str, created_by: &str) -> Session {
        Session {
            session_id: id.to_string(),
            session_name: format!("name-{id}"),
            project_dir: None,
            agent_name: "researcher".to_string(),
            created_by: created_by.to_string(),
            parent_session_name: None,
            status: SessionStatus::Running,
            executor_session_id: None,
            created_at: Utc::now(),
            last_resumed_at: None,
        }
    }

    fn deleted(session_id: &str) -> StreamMessage {
        StreamMessage::SessionDeleted {
            session_id: session_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_delivery_respects_filters() {
        let hub = broadcaster();
        let mut alice = hub.subscribe(SubscriberFilter {
            user: "alice".to_string(),
            role: Role::User,
            session_id: None,
        });
        let mut admin = hub.subscribe(admin_filter());

        hub.publish(scope("alice", "ses_1"), deleted("ses_1"));
        hub.publish(scope("bob", "ses_2"), deleted("ses_2"));

        let first = alice.recv().await.unwrap();
        assert_eq!(first.scope.session_id, "ses_1");
        assert!(alice.try_recv().is_none());

        assert_eq!(admin.recv().await.unwrap().scope.session_id, "ses_1");
        assert_eq!(admin.recv().await.unwrap().scope.session_id, "ses_2");
    }

    #[tokio::test]
    async fn test_event_ids_strictly_increase() {
        let hub = broadcaster();
        hub.publish(scope("a", "s1"), deleted("s1"));
        hub.publish(scope("a", "s2"), deleted("s2"));
        hub.publish(scope("a", "s3"), deleted("s3"));

        let replay = hub.replay.lock().unwrap();
        let keys: Vec<_> = replay.iter().map(|e| e.id.key()).collect();
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[tokio::test]
    async fn test_replay_after_marker() {
        let hub = broadcaster();
        hub.publish(scope("a", "s1"), deleted("s1"));
        hub.publish(scope("a", "s2"), deleted("s2"));

        let marker = hub.replay.lock().unwrap().front().unwrap().id.key();
        let replayed = hub.replay_since(marker, &admin_filter()).unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].scope.session_id, "s2");
    }

    #[tokio::test]
    async fn test_replay_marker_aged_out() {
        let hub = broadcaster();
        hub.publish(scope("a", "s1"), deleted("s1"));
        // A marker older than the retained front cannot be resumed from.
        assert!(hub.replay_since((0, 0), &admin_filter()).is_none());
    }

    #[tokio::test]
    async fn test_slow_subscriber_dropped() {
        let hub = broadcaster();
        let subscription = hub.subscribe(admin_filter());
        assert_eq!(hub.subscriber_count(), 1);

        // Never drain: the queue fills, then the next publish drops us.
        for i in 0..=SUBSCRIBER_QUEUE_SIZE {
            hub.publish(scope("a", &format!("s{i}")), deleted("x"));
        }
        assert_eq!(hub.subscriber_count(), 0);
        drop(subscription);
    }

    #[tokio::test]
    async fn test_subscription_drop_unregisters() {
        let hub = broadcaster();
        let subscription = hub.subscribe(admin_filter());
        assert_eq!(hub.subscriber_count(), 1);
        drop(subscription);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_init_envelope_has_ini_abbrev() {
        let hub = broadcaster();
        let envelope = hub.init_envelope(vec![session("ses_1", "alice")]);
        assert_eq!(envelope.id.abbrev, "ini");
        assert!(matches!(envelope.message, StreamMessage::Init { .. }));
    }
}
