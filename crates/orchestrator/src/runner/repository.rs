//! Runner registry persistence.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::models::RunnerRecord;

const RUNNER_COLUMNS: &str = "runner_id, hostname, executor_type, executor_profile, \
     project_dir, tags, status, last_heartbeat, registered_at";

/// Repository for runner records.
#[derive(Debug, Clone)]
pub struct RunnerRepository {
    pool: SqlitePool,
}

impl RunnerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, record: &RunnerRecord) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO runners ({RUNNER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&record.runner_id)
        .bind(&record.hostname)
        .bind(&record.executor_type)
        .bind(&record.executor_profile)
        .bind(&record.project_dir)
        .bind(&record.tags)
        .bind(record.status.to_string())
        .bind(record.last_heartbeat)
        .bind(record.registered_at)
        .execute(&self.pool)
        .await
        .context("inserting runner")?;

        Ok(())
    }

    pub async fn get(&self, runner_id: &str) -> Result<Option<RunnerRecord>> {
        let record = sqlx::query_as::<_, RunnerRecord>(&format!(
            "SELECT {RUNNER_COLUMNS} FROM runners WHERE runner_id = ?"
        ))
        .bind(runner_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching runner")?;

        Ok(record)
    }

    /// Record a heartbeat; a stale runner recovers to online.
    ///
    /// Returns false when the runner is unknown or already removed.
    pub async fn touch_heartbeat(&self, runner_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE runners SET last_heartbeat = ?, status = 'online' \
             WHERE runner_id = ? AND status IN ('online', 'stale')",
        )
        .bind(at)
        .bind(runner_id)
        .execute(&self.pool)
        .await
        .context("recording heartbeat")?;

        Ok(result.rows_affected() > 0)
    }

    /// Online and stale runners.
    pub async fn list_active(&self) -> Result<Vec<RunnerRecord>> {
        let records = sqlx::query_as::<_, RunnerRecord>(&format!(
            "SELECT {RUNNER_COLUMNS} FROM runners WHERE status IN ('online', 'stale') \
             ORDER BY registered_at ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .context("listing active runners")?;

        Ok(records)
    }

    /// `online → stale` for runners silent since `cutoff`. Returns the ids
    /// that transitioned.
    pub async fn mark_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let ids: Vec<(String,)> = sqlx::query_as(
            "SELECT runner_id FROM runners WHERE status = 'online' AND last_heartbeat < ?",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context("finding stale candidates")?;

        for (runner_id,) in &ids {
            sqlx::query("UPDATE runners SET status = 'stale' WHERE runner_id = ? AND status = 'online'")
                .bind(runner_id)
                .execute(&self.pool)
                .await
                .context("marking runner stale")?;
        }

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    /// `stale → removed` for runners silent since `cutoff`. Returns the ids
    /// that transitioned.
    pub async fn mark_removed(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let ids: Vec<(String,)> = sqlx::query_as(
            "SELECT runner_id FROM runners WHERE status = 'stale' AND last_heartbeat < ?",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context("finding removal candidates")?;

        for (runner_id,) in &ids {
            sqlx::query("UPDATE runners SET status = 'removed' WHERE runner_id = ? AND status = 'stale'")
                .bind(runner_id)
                .execute(&self.pool)
                .await
                .context("marking runner removed")?;
        }

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    /// Hard delete; only used to roll back a rejected registration.
    pub async fn delete(&self, runner_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM runners WHERE runner_id = ?")
            .bind(runner_id)
            .execute(&self.pool)
            .await
            .context("deleting runner")?;

        Ok(())
    }
}
