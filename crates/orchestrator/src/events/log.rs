//! Event log service: write-lock serialization, broadcasting, and callback
//! notification on terminal transitions.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use orchestrator_protocol::{EventPayload, SessionEvent};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use super::repository::{AppendError, EventRepository};
use crate::broadcast::{Broadcaster, Scope, StreamMessage};
use crate::callback::CallbackNotice;
use crate::session::SessionRepository;

/// The per-session append path.
///
/// One writer at a time per session: a second concurrent appender gets
/// `Conflict` instead of waiting. Sequencing itself is done by the
/// repository transaction; the lock keeps interleaved writers from racing
/// the terminal check.
#[derive(Clone)]
pub struct EventLog {
    events: EventRepository,
    sessions: SessionRepository,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    broadcaster: Arc<Broadcaster>,
    watcher_tx: mpsc::UnboundedSender<CallbackNotice>,
}

impl EventLog {
    pub fn new(
        events: EventRepository,
        sessions: SessionRepository,
        broadcaster: Arc<Broadcaster>,
        watcher_tx: mpsc::UnboundedSender<CallbackNotice>,
    ) -> Self {
        Self {
            events,
            sessions,
            locks: Arc::new(DashMap::new()),
            broadcaster,
            watcher_tx,
        }
    }

    /// Append one event; returns the assigned sequence.
    pub async fn append(
        &self,
        session_id: &str,
        timestamp: DateTime<Utc>,
        payload: EventPayload,
    ) -> Result<i64, AppendError> {
        let lock = self
            .locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let Ok(_guard) = lock.try_lock() else {
            return Err(AppendError::Conflict);
        };

        let outcome = self.events.append(session_id, timestamp, &payload).await?;
        debug!(
            session_id,
            sequence = outcome.sequence,
            event_type = payload.event_type(),
            "event appended"
        );

        // Broadcast outside the transaction; subscribers see the event and
        // then any derived status change, in that order.
        let session = self
            .sessions
            .get(session_id)
            .await
            .map_err(AppendError::Internal)?;
        if let Some(session) = session {
            let scope = Scope {
                created_by: session.created_by.clone(),
                session_id: session.session_id.clone(),
            };
            self.broadcaster.publish(
                scope.clone(),
                StreamMessage::SessionEvent {
                    event: SessionEvent {
                        session_id: session_id.to_string(),
                        sequence: outcome.sequence,
                        timestamp,
                        payload,
                    },
                },
            );
            if outcome.status_after != outcome.status_before {
                self.broadcaster.publish(
                    scope,
                    StreamMessage::SessionUpdated {
                        session: session.clone(),
                    },
                );
            }
            if outcome.status_after.is_terminal() {
                // The callback watcher owns what happens next; a closed
                // channel only means the coordinator is shutting down.
                let _ = self.watcher_tx.send(CallbackNotice::SessionTerminal {
                    session_id: session_id.to_string(),
                    status: outcome.status_after,
                });
            }
        }

        Ok(outcome.sequence)
    }

    /// Ordered read from the log.
    pub async fn read(
        &self,
        session_id: &str,
        after: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<SessionEvent>> {
        self.events.list(session_id, after, limit).await
    }

    /// The last terminal event, or none.
    pub async fn terminal_of(&self, session_id: &str) -> anyhow::Result<Option<SessionEvent>> {
        self.events.terminal_of(session_id).await
    }

    pub fn repository(&self) -> &EventRepository {
        &self.events
    }
}
