//! Event log persistence.
//!
//! Appends are transactional: the event insert and any derived
//! session-status update commit together. `sequence` is assigned here and
//! is the authoritative order within a session.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use orchestrator_protocol::{EventPayload, MessageRole, SessionEvent, SessionStatus};
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;

/// Append failure modes surfaced to executors.
#[derive(Debug, Error)]
pub enum AppendError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session is terminal; no further events accepted")]
    SessionTerminal,

    #[error("another writer holds the session log")]
    Conflict,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// What one committed append did.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub sequence: i64,
    /// Global append id (broadcaster resume buffer key space).
    pub global_id: i64,
    pub status_before: SessionStatus,
    pub status_after: SessionStatus,
}

#[derive(Debug, Clone, FromRow)]
struct EventRow {
    id: i64,
    session_id: String,
    sequence: i64,
    timestamp: DateTime<Utc>,
    payload: String,
}

impl EventRow {
    fn into_event(self) -> Result<SessionEvent> {
        let payload: EventPayload = serde_json::from_str(&self.payload)
            .with_context(|| format!("parsing stored event payload (id {})", self.id))?;
        Ok(SessionEvent {
            session_id: self.session_id,
            sequence: self.sequence,
            timestamp: self.timestamp,
            payload,
        })
    }
}

/// Repository for the append-only event log.
#[derive(Debug, Clone)]
pub struct EventRepository {
    pool: SqlitePool,
}

impl EventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append one event and derive the session status in a single
    /// transaction.
    pub async fn append(
        &self,
        session_id: &str,
        timestamp: DateTime<Utc>,
        payload: &EventPayload,
    ) -> Result<AppendOutcome, AppendError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("starting append transaction")?;

        let row: Option<(String,)> =
            sqlx::query_as("SELECT status FROM sessions WHERE session_id = ?")
                .bind(session_id)
                .fetch_optional(&mut *tx)
                .await
                .context("reading session status")?;

        let Some((status_raw,)) = row else {
            return Err(AppendError::SessionNotFound(session_id.to_string()));
        };
        let status_before: SessionStatus = status_raw
            .parse()
            .map_err(|e: String| AppendError::Internal(anyhow!(e)))?;
        if status_before.is_terminal() {
            return Err(AppendError::SessionTerminal);
        }

        let (sequence,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(sequence), 0) + 1 FROM events WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(&mut *tx)
                .await
                .context("computing next sequence")?;

        let payload_json =
            serde_json::to_string(payload).context("serializing event payload")?;
        let insert = sqlx::query(
            "INSERT INTO events (session_id, sequence, event_type, timestamp, payload) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(sequence)
        .bind(payload.event_type())
        .bind(timestamp)
        .bind(&payload_json)
        .execute(&mut *tx)
        .await
        .context("inserting event")?;
        let global_id = insert.last_insert_rowid();

        let status_after = payload.derived_status().unwrap_or(SessionStatus::Running);
        if status_after != status_before {
            sqlx::query("UPDATE sessions SET status = ? WHERE session_id = ?")
                .bind(status_after.to_string())
                .bind(session_id)
                .execute(&mut *tx)
                .await
                .context("updating derived session status")?;
        }

        // A session_start carrying the executor's native handle stamps it
        // onto the session for later resumes.
        if let EventPayload::SessionStart {
            executor_session_id: Some(handle),
        } = payload
        {
            sqlx::query(
                "UPDATE sessions SET executor_session_id = ? WHERE session_id = ? \
                 AND executor_session_id IS NULL",
            )
            .bind(handle)
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .context("recording executor session id")?;
        }

        tx.commit().await.context("committing append")?;

        Ok(AppendOutcome {
            sequence,
            global_id,
            status_before,
            status_after,
        })
    }

    /// Ordered batch of events with sequence greater than `after`.
    pub async fn list(
        &self,
        session_id: &str,
        after: i64,
        limit: i64,
    ) -> Result<Vec<SessionEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT id, session_id, sequence, timestamp, payload FROM events \
             WHERE session_id = ? AND sequence > ? ORDER BY sequence ASC LIMIT ?",
        )
        .bind(session_id)
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("listing events")?;

        rows.into_iter().map(EventRow::into_event).collect()
    }

    /// The last terminal event of the session, if any.
    pub async fn terminal_of(&self, session_id: &str) -> Result<Option<SessionEvent>> {
        let row = sqlx::query_as::<_, EventRow>(
            "SELECT id, session_id, sequence, timestamp, payload FROM events \
             WHERE session_id = ? AND event_type IN ('session_stop', 'result') \
             ORDER BY sequence DESC LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching terminal event")?;

        row.map(EventRow::into_event).transpose()
    }

    /// The last `result` event of the session, if any.
    pub async fn last_result(&self, session_id: &str) -> Result<Option<SessionEvent>> {
        let row = sqlx::query_as::<_, EventRow>(
            "SELECT id, session_id, sequence, timestamp, payload FROM events \
             WHERE session_id = ? AND event_type = 'result' \
             ORDER BY sequence DESC LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching last result event")?;

        row.map(EventRow::into_event).transpose()
    }

    /// The most recent assistant message with text content, if any.
    pub async fn last_assistant_text(&self, session_id: &str) -> Result<Option<String>> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT id, session_id, sequence, timestamp, payload FROM events \
             WHERE session_id = ? AND event_type = 'message' ORDER BY sequence DESC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .context("fetching message events")?;

        for row in rows {
            let event = row.into_event()?;
            if let EventPayload::Message {
                role: MessageRole::Assistant,
                ..
            } = &event.payload
            {
                if let Some(text) = event.message_text() {
                    return Ok(Some(text));
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::session::{Session, SessionRepository};
    use orchestrator_protocol::{ContentBlock, ResultType};

    async fn setup() -> (Database, EventRepository) {
        let db = Database::in_memory().await.unwrap();
        let sessions = SessionRepository::new(db.pool().clone());
        sessions
            .create(&Session {
                session_id: "ses_0000000000000001".to_string(),
                session_name: "demo".to_string(),
                project_dir: None,
                agent_name: "researcher".to_string(),
                created_by: "alice".to_string(),
                parent_session_name: None,
                status: SessionStatus::Pending,
                executor_session_id: None,
                created_at: Utc::now(),
                last_resumed_at: None,
            })
            .await
            .unwrap();
        let events = EventRepository::new(db.pool().clone());
        (db, events)
    }

    fn start_event() -> EventPayload {
        EventPayload::SessionStart {
            executor_session_id: Some("native-77".to_string()),
        }
    }

    #[tokio::test]
    async fn test_sequences_are_monotonic() {
        let (_db, events) = setup().await;
        let first = events
            .append("ses_0000000000000001", Utc::now(), &start_event())
            .await
            .unwrap();
        let second = events
            .append(
                "ses_0000000000000001",
                Utc::now(),
                &EventPayload::Message {
                    role: MessageRole::Assistant,
                    content: vec![ContentBlock::Text {
                        text: "Hi".to_string(),
                    }],
                },
            )
            .await
            .unwrap();
        assert!(first.sequence < second.sequence);
        assert!(first.global_id < second.global_id);
    }

    #[tokio::test]
    async fn test_first_event_moves_pending_to_running() {
        let (_db, events) = setup().await;
        let outcome = events
            .append("ses_0000000000000001", Utc::now(), &start_event())
            .await
            .unwrap();
        assert_eq!(outcome.status_before, SessionStatus::Pending);
        assert_eq!(outcome.status_after, SessionStatus::Running);
    }

    #[tokio::test]
    async fn test_terminal_event_closes_the_log() {
        let (_db, events) = setup().await;
        events
            .append(
                "ses_0000000000000001",
                Utc::now(),
                &EventPayload::SessionStop {
                    exit_code: 0,
                    reason: None,
                },
            )
            .await
            .unwrap();

        let err = events
            .append("ses_0000000000000001", Utc::now(), &start_event())
            .await
            .unwrap_err();
        assert!(matches!(err, AppendError::SessionTerminal));
    }

    #[tokio::test]
    async fn test_nonzero_exit_derives_failed() {
        let (_db, events) = setup().await;
        let outcome = events
            .append(
                "ses_0000000000000001",
                Utc::now(),
                &EventPayload::SessionStop {
                    exit_code: 3,
                    reason: Some("crashed".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.status_after, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn test_unknown_session_rejected() {
        let (_db, events) = setup().await;
        let err = events
            .append("ses_ffffffffffffffff", Utc::now(), &start_event())
            .await
            .unwrap_err();
        assert!(matches!(err, AppendError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_append_then_read_round_trip() {
        let (_db, events) = setup().await;
        let appended = [
            start_event(),
            EventPayload::PreTool {
                tool_name: "bash".to_string(),
                tool_input: serde_json::json!({"cmd": "ls"}),
            },
            EventPayload::Result {
                result_type: ResultType::Autonomous,
                result_text: Some("Hi".to_string()),
                result_data: None,
            },
        ];
        for payload in &appended {
            events
                .append("ses_0000000000000001", Utc::now(), payload)
                .await
                .unwrap();
        }

        let read = events.list("ses_0000000000000001", 0, 100).await.unwrap();
        assert_eq!(read.len(), 3);
        for (i, event) in read.iter().enumerate() {
            assert_eq!(event.sequence, (i + 1) as i64);
            assert_eq!(&event.payload, &appended[i]);
        }

        let terminal = events
            .terminal_of("ses_0000000000000001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(terminal.sequence, 3);
    }

    #[tokio::test]
    async fn test_session_start_stamps_executor_handle() {
        let (db, events) = setup().await;
        events
            .append("ses_0000000000000001", Utc::now(), &start_event())
            .await
            .unwrap();

        let sessions = SessionRepository::new(db.pool().clone());
        let session = sessions.get("ses_0000000000000001").await.unwrap().unwrap();
        assert_eq!(session.executor_session_id.as_deref(), Some("native-77"));
    }

    #[tokio::test]
    async fn test_last_assistant_text_skips_user_messages() {
        let (_db, events) = setup().await;
        for (role, text) in [
            (MessageRole::Assistant, "earlier"),
            (MessageRole::User, "question"),
        ] {
            events
                .append(
                    "ses_0000000000000001",
                    Utc::now(),
                    &EventPayload::Message {
                        role,
                        content: vec![ContentBlock::Text {
                            text: text.to_string(),
                        }],
                    },
                )
                .await
                .unwrap();
        }

        let text = events
            .last_assistant_text("ses_0000000000000001")
            .await
            .unwrap();
        assert_eq!(text.as_deref(), Some("earlier"));
    }
}
