//! Callback registration persistence.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use super::models::{CallbackRegistration, CallbackStatus};

const CALLBACK_COLUMNS: &str = "callback_id, parent_session_id, parent_session_name, \
     child_session_name, child_session_id, strategy, batch_delay_seconds, status, \
     child_status, created_at, updated_at";

/// Repository for callback registrations.
#[derive(Debug, Clone)]
pub struct CallbackRepository {
    pool: SqlitePool,
}

impl CallbackRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, registration: &CallbackRegistration) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO callbacks (
                callback_id, parent_session_id, parent_session_name, child_session_name,
                child_session_id, strategy, batch_delay_seconds, status, child_status,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&registration.callback_id)
        .bind(&registration.parent_session_id)
        .bind(&registration.parent_session_name)
        .bind(&registration.child_session_name)
        .bind(&registration.child_session_id)
        .bind(registration.strategy.to_string())
        .bind(registration.batch_delay_seconds)
        .bind(registration.status.to_string())
        .bind(&registration.child_status)
        .bind(registration.created_at)
        .bind(registration.updated_at)
        .execute(&self.pool)
        .await
        .context("inserting callback registration")?;

        Ok(())
    }

    pub async fn get(&self, callback_id: &str) -> Result<Option<CallbackRegistration>> {
        let registration = sqlx::query_as::<_, CallbackRegistration>(&format!(
            "SELECT {CALLBACK_COLUMNS} FROM callbacks WHERE callback_id = ?"
        ))
        .bind(callback_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching callback registration")?;

        Ok(registration)
    }

    /// Attach a freshly created child session to its pending registrations.
    pub async fn attach_child(&self, child_name: &str, child_session_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE callbacks SET child_session_id = ?, status = 'child_running', updated_at = ? \
             WHERE child_session_name = ? AND status = 'pending'",
        )
        .bind(child_session_id)
        .bind(Utc::now())
        .bind(child_name)
        .execute(&self.pool)
        .await
        .context("attaching child session to callbacks")?;

        Ok(result.rows_affected())
    }

    /// Live registrations watching a given child session.
    pub async fn watching_child(&self, child_session_id: &str) -> Result<Vec<CallbackRegistration>> {
        let registrations = sqlx::query_as::<_, CallbackRegistration>(&format!(
            "SELECT {CALLBACK_COLUMNS} FROM callbacks \
             WHERE child_session_id = ? AND status IN ('pending', 'child_running')"
        ))
        .bind(child_session_id)
        .fetch_all(&self.pool)
        .await
        .context("fetching callbacks watching child")?;

        Ok(registrations)
    }

    /// Record the child's terminal status.
    pub async fn mark_child_completed(&self, callback_id: &str, child_status: &str) -> Result<()> {
        sqlx::query(
            "UPDATE callbacks SET status = 'child_completed', child_status = ?, updated_at = ? \
             WHERE callback_id = ?",
        )
        .bind(child_status)
        .bind(Utc::now())
        .bind(callback_id)
        .execute(&self.pool)
        .await
        .context("marking callback child completed")?;

        Ok(())
    }

    pub async fn set_status(&self, callback_id: &str, status: CallbackStatus) -> Result<()> {
        sqlx::query("UPDATE callbacks SET status = ?, updated_at = ? WHERE callback_id = ?")
            .bind(status.to_string())
            .bind(Utc::now())
            .bind(callback_id)
            .execute(&self.pool)
            .await
            .context("updating callback status")?;

        Ok(())
    }

    /// All registrations of a parent session.
    pub async fn for_parent(&self, parent_session_id: &str) -> Result<Vec<CallbackRegistration>> {
        let registrations = sqlx::query_as::<_, CallbackRegistration>(&format!(
            "SELECT {CALLBACK_COLUMNS} FROM callbacks WHERE parent_session_id = ? \
             ORDER BY created_at ASC"
        ))
        .bind(parent_session_id)
        .fetch_all(&self.pool)
        .await
        .context("fetching callbacks for parent")?;

        Ok(registrations)
    }

    /// Registrations awaiting dispatch for a parent.
    pub async fn completed_for_parent(
        &self,
        parent_session_id: &str,
    ) -> Result<Vec<CallbackRegistration>> {
        let registrations = sqlx::query_as::<_, CallbackRegistration>(&format!(
            "SELECT {CALLBACK_COLUMNS} FROM callbacks \
             WHERE parent_session_id = ? AND status = 'child_completed' ORDER BY created_at ASC"
        ))
        .bind(parent_session_id)
        .fetch_all(&self.pool)
        .await
        .context("fetching completed callbacks for parent")?;

        Ok(registrations)
    }

    /// Everything the API exposes for listing.
    pub async fn list(&self) -> Result<Vec<CallbackRegistration>> {
        let registrations = sqlx::query_as::<_, CallbackRegistration>(&format!(
            "SELECT {CALLBACK_COLUMNS} FROM callbacks ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .context("listing callbacks")?;

        Ok(registrations)
    }

    /// Cancel live registrations referencing the session as parent or
    /// child. Returns how many were cancelled.
    pub async fn cancel_for_session(&self, session_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE callbacks SET status = 'cancelled', updated_at = ? \
             WHERE (parent_session_id = ? OR child_session_id = ?) \
             AND status IN ('pending', 'child_running', 'child_completed')",
        )
        .bind(Utc::now())
        .bind(session_id)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .context("cancelling callbacks for session")?;

        Ok(result.rows_affected())
    }
}
