//! Run persistence and the atomic claim.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use orchestrator_protocol::{AgentBlueprint, Run, RunStatus};
use sqlx::{FromRow, SqlitePool};

use super::models::StoredRun;

const RUN_COLUMNS: &str = "run_id, kind, session_id, session_name, agent_name, parameters, \
     agent_blueprint, project_dir, parent_session_id, parent_session_name, executor_session_id, \
     executor_type, required_tags, owner_runner_id, status, claimed_by_runner_id, \
     stop_requested, created_at, claimed_at, finished_at, error";

#[derive(Debug, Clone, FromRow)]
struct RunRow {
    run_id: String,
    kind: String,
    session_id: String,
    session_name: String,
    agent_name: String,
    parameters: String,
    agent_blueprint: Option<String>,
    project_dir: Option<String>,
    parent_session_id: Option<String>,
    parent_session_name: Option<String>,
    executor_session_id: Option<String>,
    executor_type: String,
    required_tags: String,
    owner_runner_id: Option<String>,
    status: String,
    claimed_by_runner_id: Option<String>,
    stop_requested: i64,
    created_at: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl RunRow {
    fn into_stored(self) -> Result<StoredRun> {
        let parameters =
            serde_json::from_str(&self.parameters).context("parsing stored run parameters")?;
        let agent_blueprint: Option<AgentBlueprint> = self
            .agent_blueprint
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("parsing stored run blueprint")?;
        let required_tags: Vec<String> =
            serde_json::from_str(&self.required_tags).context("parsing stored run tags")?;

        Ok(StoredRun {
            run: Run {
                run_id: self.run_id,
                kind: self.kind.parse().map_err(|e: String| anyhow!(e))?,
                session_id: self.session_id,
                session_name: self.session_name,
                agent_name: self.agent_name,
                parameters,
                agent_blueprint,
                project_dir: self.project_dir,
                parent_session_id: self.parent_session_id,
                parent_session_name: self.parent_session_name,
                executor_session_id: self.executor_session_id,
                status: self.status.parse().map_err(|e: String| anyhow!(e))?,
                claimed_by_runner_id: self.claimed_by_runner_id,
                created_at: self.created_at,
                claimed_at: self.claimed_at,
                finished_at: self.finished_at,
                error: self.error,
            },
            executor_type: self.executor_type,
            required_tags,
            owner_runner_id: self.owner_runner_id,
            stop_requested: self.stop_requested != 0,
        })
    }
}

/// Repository for run persistence.
#[derive(Debug, Clone)]
pub struct RunRepository {
    pool: SqlitePool,
}

impl RunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a fresh pending run.
    pub async fn insert(&self, stored: &StoredRun) -> Result<()> {
        let run = &stored.run;
        sqlx::query(&format!(
            "INSERT INTO runs ({RUN_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&run.run_id)
        .bind(run.kind.to_string())
        .bind(&run.session_id)
        .bind(&run.session_name)
        .bind(&run.agent_name)
        .bind(serde_json::to_string(&run.parameters).context("serializing run parameters")?)
        .bind(
            run.agent_blueprint
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .context("serializing run blueprint")?,
        )
        .bind(&run.project_dir)
        .bind(&run.parent_session_id)
        .bind(&run.parent_session_name)
        .bind(&run.executor_session_id)
        .bind(&stored.executor_type)
        .bind(serde_json::to_string(&stored.required_tags).context("serializing run tags")?)
        .bind(&stored.owner_runner_id)
        .bind(run.status.to_string())
        .bind(&run.claimed_by_runner_id)
        .bind(stored.stop_requested as i64)
        .bind(run.created_at)
        .bind(run.claimed_at)
        .bind(run.finished_at)
        .bind(&run.error)
        .execute(&self.pool)
        .await
        .context("inserting run")?;

        Ok(())
    }

    pub async fn get(&self, run_id: &str) -> Result<Option<StoredRun>> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE run_id = ?"
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching run")?;

        row.map(RunRow::into_stored).transpose()
    }

    /// Pending runs in FIFO order.
    pub async fn pending_fifo(&self) -> Result<Vec<StoredRun>> {
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE status = 'pending' \
             ORDER BY created_at ASC, rowid ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .context("listing pending runs")?;

        rows.into_iter().map(RunRow::into_stored).collect()
    }

    /// Atomic claim: at most one runner wins a given run.
    pub async fn try_claim(&self, run_id: &str, runner_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE runs SET status = 'claimed', claimed_by_runner_id = ?, claimed_at = ? \
             WHERE run_id = ? AND status = 'pending'",
        )
        .bind(runner_id)
        .bind(Utc::now())
        .bind(run_id)
        .execute(&self.pool)
        .await
        .context("claiming run")?;

        Ok(result.rows_affected() > 0)
    }

    /// `claimed → started`, guarded by the holder.
    pub async fn mark_started(&self, run_id: &str, runner_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE runs SET status = 'started' \
             WHERE run_id = ? AND claimed_by_runner_id = ? AND status = 'claimed'",
        )
        .bind(run_id)
        .bind(runner_id)
        .execute(&self.pool)
        .await
        .context("marking run started")?;

        Ok(result.rows_affected() > 0)
    }

    /// Transition a held run to a terminal state.
    ///
    /// `holder` guards the transition when supplied; cleanup paths pass
    /// `None` to finalize regardless of which runner held the run.
    pub async fn finalize(
        &self,
        run_id: &str,
        holder: Option<&str>,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        debug_assert!(status.is_terminal());
        let result = sqlx::query(
            "UPDATE runs SET status = ?, finished_at = ?, error = ? \
             WHERE run_id = ? AND status IN ('claimed', 'started') \
             AND (? IS NULL OR claimed_by_runner_id = ?)",
        )
        .bind(status.to_string())
        .bind(Utc::now())
        .bind(error)
        .bind(run_id)
        .bind(holder)
        .bind(holder)
        .execute(&self.pool)
        .await
        .context("finalizing run")?;

        Ok(result.rows_affected() > 0)
    }

    /// `pending → stopped` without a claim ever happening.
    pub async fn stop_if_pending(&self, run_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE runs SET status = 'stopped', finished_at = ? \
             WHERE run_id = ? AND status = 'pending'",
        )
        .bind(Utc::now())
        .bind(run_id)
        .execute(&self.pool)
        .await
        .context("stopping pending run")?;

        Ok(result.rows_affected() > 0)
    }

    /// Flag a held run for stop delivery on the holder's next poll.
    pub async fn request_stop(&self, run_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE runs SET stop_requested = 1 \
             WHERE run_id = ? AND status IN ('claimed', 'started')",
        )
        .bind(run_id)
        .execute(&self.pool)
        .await
        .context("requesting run stop")?;

        Ok(result.rows_affected() > 0)
    }

    /// Held runs flagged for stopping, for one runner.
    pub async fn stop_requested_for(&self, runner_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT run_id FROM runs WHERE claimed_by_runner_id = ? \
             AND status IN ('claimed', 'started') AND stop_requested = 1 \
             ORDER BY created_at ASC",
        )
        .bind(runner_id)
        .fetch_all(&self.pool)
        .await
        .context("listing stop-requested runs")?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Runs a runner currently holds.
    pub async fn held_by(&self, runner_id: &str) -> Result<Vec<StoredRun>> {
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE claimed_by_runner_id = ? \
             AND status IN ('claimed', 'started')"
        ))
        .bind(runner_id)
        .fetch_all(&self.pool)
        .await
        .context("listing held runs")?;

        rows.into_iter().map(RunRow::into_stored).collect()
    }

    /// The run currently holding a session, if any.
    pub async fn active_for_session(&self, session_id: &str) -> Result<Option<StoredRun>> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE session_id = ? \
             AND status IN ('claimed', 'started') LIMIT 1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching active run for session")?;

        row.map(RunRow::into_stored).transpose()
    }

    /// Open (non-terminal) runs of a session.
    pub async fn open_for_session(&self, session_id: &str) -> Result<Vec<StoredRun>> {
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE session_id = ? \
             AND status IN ('pending', 'claimed', 'started')"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .context("listing open runs for session")?;

        rows.into_iter().map(RunRow::into_stored).collect()
    }
}
