//! Session registry service.

use anyhow::Result;
use chrono::Utc;
use orchestrator_protocol::{EventPayload, ResultType, RunStatus};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use super::models::{Session, SessionFilter, SessionResult, StatusProbe};
use super::repository::SessionRepository;
use crate::broadcast::{Broadcaster, Scope, StreamMessage};
use crate::callback::CallbackRepository;
use crate::events::EventRepository;
use crate::ids;
use crate::runs::RunRepository;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session name already in use: {0}")]
    DuplicateName(String),

    #[error("parent session not found: {0}")]
    ParentNotFound(String),

    #[error("session result not ready")]
    ResultNotReady,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Parameters for session creation.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub session_name: String,
    pub project_dir: Option<String>,
    pub agent_name: String,
    pub created_by: String,
    pub parent_session_name: Option<String>,
}

/// CRUD over sessions, result extraction, and delete cascades.
#[derive(Clone)]
pub struct SessionService {
    sessions: SessionRepository,
    events: EventRepository,
    runs: RunRepository,
    callbacks: CallbackRepository,
    broadcaster: Arc<Broadcaster>,
}

impl SessionService {
    pub fn new(
        sessions: SessionRepository,
        events: EventRepository,
        runs: RunRepository,
        callbacks: CallbackRepository,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            sessions,
            events,
            runs,
            callbacks,
            broadcaster,
        }
    }

    /// Create a session and attach any callbacks waiting for its name.
    pub async fn create(&self, new: NewSession) -> Result<Session, SessionError> {
        if let Some(parent_name) = &new.parent_session_name {
            // Parent references are by name and cross creator boundaries:
            // children spawned through a runner facade arrive under the
            // shared-key identity.
            let parent = self
                .sessions
                .find_by_name(parent_name)
                .await
                .map_err(SessionError::Internal)?;
            if parent.is_none() {
                return Err(SessionError::ParentNotFound(parent_name.clone()));
            }
        }

        if self
            .sessions
            .get_by_name(&new.created_by, &new.session_name)
            .await
            .map_err(SessionError::Internal)?
            .is_some()
        {
            return Err(SessionError::DuplicateName(new.session_name));
        }

        let session = Session {
            session_id: ids::new_session_id(),
            session_name: new.session_name,
            project_dir: new.project_dir,
            agent_name: new.agent_name,
            created_by: new.created_by,
            parent_session_name: new.parent_session_name,
            status: Default::default(),
            executor_session_id: None,
            created_at: Utc::now(),
            last_resumed_at: None,
        };
        self.sessions
            .create(&session)
            .await
            .map_err(SessionError::Internal)?;
        info!(
            session_id = %session.session_id,
            session_name = %session.session_name,
            agent = %session.agent_name,
            "session created"
        );

        let attached = self
            .callbacks
            .attach_child(&session.session_name, &session.session_id)
            .await
            .map_err(SessionError::Internal)?;
        if attached > 0 {
            info!(
                session_id = %session.session_id,
                registrations = attached,
                "attached session to pending callbacks"
            );
        }

        self.broadcaster.publish(
            Scope {
                created_by: session.created_by.clone(),
                session_id: session.session_id.clone(),
            },
            StreamMessage::SessionCreated {
                session: session.clone(),
            },
        );

        Ok(session)
    }

    pub async fn get(&self, session_id: &str) -> Result<Session, SessionError> {
        self.sessions
            .get(session_id)
            .await
            .map_err(SessionError::Internal)?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    pub async fn get_by_name(
        &self,
        created_by: &str,
        name: &str,
    ) -> Result<Option<Session>, SessionError> {
        self.sessions
            .get_by_name(created_by, name)
            .await
            .map_err(SessionError::Internal)
    }

    pub async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>, SessionError> {
        self.sessions
            .list(filter)
            .await
            .map_err(SessionError::Internal)
    }

    /// Coarse status probe; unknown ids are an answer, not an error.
    pub async fn status_probe(&self, session_id: &str) -> Result<StatusProbe, SessionError> {
        let session = self
            .sessions
            .get(session_id)
            .await
            .map_err(SessionError::Internal)?;
        Ok(match session {
            Some(session) => StatusProbe::from_status(session.status),
            None => StatusProbe::NotExistent,
        })
    }

    /// Extract the result of a terminal session.
    ///
    /// The last `result` event wins; a text-bearing assistant message is
    /// the fallback for executors that never emit an explicit result.
    pub async fn result(&self, session_id: &str) -> Result<SessionResult, SessionError> {
        let session = self.get(session_id).await?;
        if !session.is_terminal() {
            return Err(SessionError::ResultNotReady);
        }

        if let Some(event) = self
            .events
            .last_result(session_id)
            .await
            .map_err(SessionError::Internal)?
        {
            if let EventPayload::Result {
                result_type,
                result_text,
                result_data,
            } = event.payload
            {
                return Ok(SessionResult {
                    session_id: session_id.to_string(),
                    result_type,
                    result_text,
                    result_data,
                });
            }
        }

        let text = self
            .events
            .last_assistant_text(session_id)
            .await
            .map_err(SessionError::Internal)?;
        Ok(SessionResult {
            session_id: session_id.to_string(),
            result_type: ResultType::Autonomous,
            result_text: text,
            result_data: None,
        })
    }

    /// Delete a session: open runs stop, callbacks cancel, events cascade.
    pub async fn delete(&self, session_id: &str) -> Result<(), SessionError> {
        let session = self.get(session_id).await?;

        let open = self
            .runs
            .open_for_session(session_id)
            .await
            .map_err(SessionError::Internal)?;
        for stored in open {
            let run_id = &stored.run.run_id;
            let stopped = if stored.run.status == RunStatus::Pending {
                self.runs
                    .stop_if_pending(run_id)
                    .await
                    .map_err(SessionError::Internal)?
            } else {
                self.runs
                    .finalize(run_id, None, RunStatus::Stopped, Some("session deleted"))
                    .await
                    .map_err(SessionError::Internal)?
            };
            if stopped {
                info!(run_id = %run_id, session_id, "stopped open run of deleted session");
            }
        }

        let cancelled = self
            .callbacks
            .cancel_for_session(session_id)
            .await
            .map_err(SessionError::Internal)?;
        if cancelled > 0 {
            info!(session_id, cancelled, "cancelled callbacks of deleted session");
        }

        self.sessions
            .delete(session_id)
            .await
            .map_err(SessionError::Internal)?;

        self.broadcaster.publish(
            Scope {
                created_by: session.created_by,
                session_id: session_id.to_string(),
            },
            StreamMessage::SessionDeleted {
                session_id: session_id.to_string(),
            },
        );

        Ok(())
    }

    pub fn repository(&self) -> &SessionRepository {
        &self.sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use orchestrator_protocol::{ContentBlock, MessageRole, SessionStatus};
    use std::time::Duration;

    async fn service() -> (Database, SessionService) {
        let db = Database::in_memory().await.unwrap();
        let broadcaster = Arc::new(Broadcaster::new(Duration::from_secs(300)));
        let service = SessionService::new(
            SessionRepository::new(db.pool().clone()),
            EventRepository::new(db.pool().clone()),
            RunRepository::new(db.pool().clone()),
            CallbackRepository::new(db.pool().clone()),
            broadcaster,
        );
        (db, service)
    }

    fn new_session(name: &str) -> NewSession {
        NewSession {
            session_name: name.to_string(),
            project_dir: None,
            agent_name: "researcher".to_string(),
            created_by: "alice".to_string(),
            parent_session_name: None,
        }
    }

    #[tokio::test]
    async fn test_create_issues_ses_id() {
        let (_db, service) = service().await;
        let session = service.create(new_session("demo")).await.unwrap();
        assert!(session.session_id.starts_with("ses_"));
        assert_eq!(session.status, SessionStatus::Pending);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let (_db, service) = service().await;
        service.create(new_session("demo")).await.unwrap();
        let err = service.create(new_session("demo")).await.unwrap_err();
        assert!(matches!(err, SessionError::DuplicateName(_)));
    }

    #[tokio::test]
    async fn test_missing_parent_rejected() {
        let (_db, service) = service().await;
        let mut new = new_session("child");
        new.parent_session_name = Some("ghost".to_string());
        let err = service.create(new).await.unwrap_err();
        assert!(matches!(err, SessionError::ParentNotFound(_)));
    }

    #[tokio::test]
    async fn test_result_not_ready_while_running() {
        let (_db, service) = service().await;
        let session = service.create(new_session("demo")).await.unwrap();
        let err = service.result(&session.session_id).await.unwrap_err();
        assert!(matches!(err, SessionError::ResultNotReady));
    }

    #[tokio::test]
    async fn test_result_prefers_result_event() {
        let (db, service) = service().await;
        let session = service.create(new_session("demo")).await.unwrap();
        let events = EventRepository::new(db.pool().clone());
        events
            .append(
                &session.session_id,
                Utc::now(),
                &EventPayload::Message {
                    role: MessageRole::Assistant,
                    content: vec![ContentBlock::Text {
                        text: "chatter".to_string(),
                    }],
                },
            )
            .await
            .unwrap();
        events
            .append(
                &session.session_id,
                Utc::now(),
                &EventPayload::Result {
                    result_type: ResultType::Autonomous,
                    result_text: Some("Hi".to_string()),
                    result_data: None,
                },
            )
            .await
            .unwrap();

        let result = service.result(&session.session_id).await.unwrap();
        assert_eq!(result.result_text.as_deref(), Some("Hi"));
        assert_eq!(result.result_type, ResultType::Autonomous);
    }

    #[tokio::test]
    async fn test_result_falls_back_to_assistant_message() {
        let (db, service) = service().await;
        let session = service.create(new_session("demo")).await.unwrap();
        let events = EventRepository::new(db.pool().clone());
        events
            .append(
                &session.session_id,
                Utc::now(),
                &EventPayload::Message {
                    role: MessageRole::Assistant,
                    content: vec![ContentBlock::Text {
                        text: "the answer".to_string(),
                    }],
                },
            )
            .await
            .unwrap();
        events
            .append(
                &session.session_id,
                Utc::now(),
                &EventPayload::SessionStop {
                    exit_code: 0,
                    reason: None,
                },
            )
            .await
            .unwrap();

        let result = service.result(&session.session_id).await.unwrap();
        assert_eq!(result.result_text.as_deref(), Some("the answer"));
    }

    #[tokio::test]
    async fn test_status_probe_three_answers() {
        let (db, service) = service().await;
        let session = service.create(new_session("demo")).await.unwrap();
        assert_eq!(
            service.status_probe(&session.session_id).await.unwrap(),
            StatusProbe::Running
        );

        let events = EventRepository::new(db.pool().clone());
        events
            .append(
                &session.session_id,
                Utc::now(),
                &EventPayload::SessionStop {
                    exit_code: 0,
                    reason: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(
            service.status_probe(&session.session_id).await.unwrap(),
            StatusProbe::Finished
        );

        assert_eq!(
            service.status_probe("ses_ffffffffffffffff").await.unwrap(),
            StatusProbe::NotExistent
        );
    }

    #[tokio::test]
    async fn test_delete_removes_session_and_events() {
        let (db, service) = service().await;
        let session = service.create(new_session("demo")).await.unwrap();
        let events = EventRepository::new(db.pool().clone());
        events
            .append(
                &session.session_id,
                Utc::now(),
                &EventPayload::SessionStart {
                    executor_session_id: None,
                },
            )
            .await
            .unwrap();

        service.delete(&session.session_id).await.unwrap();
        assert!(matches!(
            service.get(&session.session_id).await.unwrap_err(),
            SessionError::NotFound(_)
        ));

        let remaining: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(remaining.0, 0);
    }
}
