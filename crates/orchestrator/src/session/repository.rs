//! Session database repository.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use orchestrator_protocol::SessionStatus;
use sqlx::SqlitePool;

use super::models::{Session, SessionFilter};

const SESSION_COLUMNS: &str = "session_id, session_name, project_dir, agent_name, created_by, \
     parent_session_name, status, executor_session_id, created_at, last_resumed_at";

/// Repository for session persistence.
#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new session row.
    pub async fn create(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                session_id, session_name, project_dir, agent_name, created_by,
                parent_session_name, status, executor_session_id, created_at, last_resumed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.session_name)
        .bind(&session.project_dir)
        .bind(&session.agent_name)
        .bind(&session.created_by)
        .bind(&session.parent_session_name)
        .bind(session.status.to_string())
        .bind(&session.executor_session_id)
        .bind(session.created_at)
        .bind(session.last_resumed_at)
        .execute(&self.pool)
        .await
        .context("creating session")?;

        Ok(())
    }

    /// Get a session by id.
    pub async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching session")?;

        Ok(session)
    }

    /// Get a session by `(created_by, session_name)`.
    pub async fn get_by_name(&self, created_by: &str, name: &str) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE created_by = ? AND session_name = ?"
        ))
        .bind(created_by)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("fetching session by name")?;

        Ok(session)
    }

    /// Find the most recently created session with the given name,
    /// regardless of creator. Used to attach callback children.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE session_name = ? \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("finding session by name")?;

        Ok(session)
    }

    /// List sessions matching the filter, most recent first.
    pub async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(&format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM sessions
            WHERE (? IS NULL OR created_by = ?)
              AND (? IS NULL OR status = ?)
              AND (? IS NULL OR agent_name = ?)
            ORDER BY created_at DESC
            "#
        ))
        .bind(&filter.created_by)
        .bind(&filter.created_by)
        .bind(filter.status.map(|s| s.to_string()))
        .bind(filter.status.map(|s| s.to_string()))
        .bind(&filter.agent_name)
        .bind(&filter.agent_name)
        .fetch_all(&self.pool)
        .await
        .context("listing sessions")?;

        Ok(sessions)
    }

    /// Set the status unless the session is already terminal.
    ///
    /// Returns true when a transition happened.
    pub async fn set_status_if_open(&self, session_id: &str, status: SessionStatus) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sessions SET status = ? WHERE session_id = ? \
             AND status NOT IN ('finished', 'failed', 'stopped')",
        )
        .bind(status.to_string())
        .bind(session_id)
        .execute(&self.pool)
        .await
        .context("updating session status")?;

        Ok(result.rows_affected() > 0)
    }

    /// Stamp the last resume time.
    pub async fn touch_resumed(&self, session_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE sessions SET last_resumed_at = ? WHERE session_id = ?")
            .bind(at)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .context("updating last_resumed_at")?;

        Ok(())
    }

    /// Re-enter a session: a resume starts a fresh status cycle.
    pub async fn reopen(&self, session_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE sessions SET status = 'pending', last_resumed_at = ? WHERE session_id = ?",
        )
        .bind(at)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .context("reopening session")?;

        Ok(())
    }

    /// Record the executor framework's native session handle.
    pub async fn set_executor_session_id(&self, session_id: &str, handle: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET executor_session_id = ? WHERE session_id = ?")
            .bind(handle)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .context("recording executor session id")?;

        Ok(())
    }

    /// Delete a session. Events cascade via the schema.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .context("deleting session")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn sample_session(id: &str, name: &str) -> Session {
        Session {
            session_id: id.to_string(),
            session_name: name.to_string(),
            project_dir: None,
            agent_name: "researcher".to_string(),
            created_by: "alice".to_string(),
            parent_session_name: None,
            status: SessionStatus::Pending,
            executor_session_id: None,
            created_at: Utc::now(),
            last_resumed_at: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_round_trip() {
        let db = Database::in_memory().await.unwrap();
        let repo = SessionRepository::new(db.pool().clone());

        let session = sample_session("ses_0000000000000001", "demo");
        repo.create(&session).await.unwrap();

        let fetched = repo.get("ses_0000000000000001").await.unwrap().unwrap();
        assert_eq!(fetched.session_name, "demo");
        assert_eq!(fetched.status, SessionStatus::Pending);
        assert!(fetched.last_resumed_at.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_name_per_creator_rejected() {
        let db = Database::in_memory().await.unwrap();
        let repo = SessionRepository::new(db.pool().clone());

        repo.create(&sample_session("ses_0000000000000001", "demo"))
            .await
            .unwrap();
        let err = repo
            .create(&sample_session("ses_0000000000000002", "demo"))
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_terminal_status_is_sticky() {
        let db = Database::in_memory().await.unwrap();
        let repo = SessionRepository::new(db.pool().clone());

        repo.create(&sample_session("ses_0000000000000001", "demo"))
            .await
            .unwrap();

        assert!(
            repo.set_status_if_open("ses_0000000000000001", SessionStatus::Failed)
                .await
                .unwrap()
        );
        // A terminal session cannot transition again.
        assert!(
            !repo
                .set_status_if_open("ses_0000000000000001", SessionStatus::Running)
                .await
                .unwrap()
        );

        let fetched = repo.get("ses_0000000000000001").await.unwrap().unwrap();
        assert_eq!(fetched.status, SessionStatus::Failed);
    }
}
