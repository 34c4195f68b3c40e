//! Runner-owned blueprint persistence.

use anyhow::{Context, Result};
use chrono::Utc;
use orchestrator_protocol::AgentBlueprint;
use sqlx::SqlitePool;

/// Repository for blueprints registered by runners.
#[derive(Debug, Clone)]
pub struct AgentRepository {
    pool: SqlitePool,
}

impl AgentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Names already taken in the runner-owned table.
    pub async fn existing_names(&self, names: &[String]) -> Result<Vec<String>> {
        let mut taken = Vec::new();
        for name in names {
            let row: Option<(String,)> = sqlx::query_as("SELECT name FROM agents WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .context("checking agent name")?;
            if let Some((name,)) = row {
                taken.push(name);
            }
        }
        Ok(taken)
    }

    /// Persist a runner's blueprints in one transaction.
    pub async fn insert_owned(
        &self,
        owner_runner_id: &str,
        blueprints: &[AgentBlueprint],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("starting agent insert")?;
        let now = Utc::now();
        for blueprint in blueprints {
            let body = serde_json::to_string(blueprint).context("serializing blueprint")?;
            sqlx::query(
                "INSERT INTO agents (name, owner_runner_id, blueprint, registered_at) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&blueprint.name)
            .bind(owner_runner_id)
            .bind(&body)
            .bind(now)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("inserting agent: {}", blueprint.name))?;
        }
        tx.commit().await.context("committing agent insert")?;
        Ok(())
    }

    /// Look up one runner-owned blueprint and its owner.
    pub async fn get(&self, name: &str) -> Result<Option<(AgentBlueprint, String)>> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT blueprint, owner_runner_id FROM agents WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .context("fetching agent")?;

        row.map(|(body, owner)| {
            let blueprint: AgentBlueprint =
                serde_json::from_str(&body).context("parsing stored blueprint")?;
            Ok((blueprint, owner))
        })
        .transpose()
    }

    /// All runner-owned blueprints with their owners.
    pub async fn list(&self) -> Result<Vec<(AgentBlueprint, String)>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT blueprint, owner_runner_id FROM agents ORDER BY name")
                .fetch_all(&self.pool)
                .await
                .context("listing agents")?;

        rows.into_iter()
            .map(|(body, owner)| {
                let blueprint: AgentBlueprint =
                    serde_json::from_str(&body).context("parsing stored blueprint")?;
                Ok((blueprint, owner))
            })
            .collect()
    }

    /// Blueprints owned by one runner.
    pub async fn list_by_owner(&self, owner_runner_id: &str) -> Result<Vec<AgentBlueprint>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT blueprint FROM agents WHERE owner_runner_id = ? ORDER BY name")
                .bind(owner_runner_id)
                .fetch_all(&self.pool)
                .await
                .context("listing agents by owner")?;

        rows.into_iter()
            .map(|(body,)| {
                serde_json::from_str(&body).context("parsing stored blueprint")
            })
            .collect()
    }

    /// Delete everything a runner owns; returns the deleted names.
    pub async fn delete_by_owner(&self, owner_runner_id: &str) -> Result<Vec<String>> {
        let names: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM agents WHERE owner_runner_id = ?")
                .bind(owner_runner_id)
                .fetch_all(&self.pool)
                .await
                .context("listing agents for deletion")?;

        sqlx::query("DELETE FROM agents WHERE owner_runner_id = ?")
            .bind(owner_runner_id)
            .execute(&self.pool)
            .await
            .context("deleting agents by owner")?;

        Ok(names.into_iter().map(|(name,)| name).collect())
    }
}
