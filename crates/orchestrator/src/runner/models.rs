//! Runner registry models.

use chrono::{DateTime, Utc};
use orchestrator_protocol::{AgentBlueprint, RunnerInfo, RunnerStatus};
use sqlx::FromRow;

/// One registered runner, as stored.
#[derive(Debug, Clone, FromRow)]
pub struct RunnerRecord {
    pub runner_id: String,
    pub hostname: String,
    pub executor_type: String,
    pub executor_profile: String,
    pub project_dir: Option<String>,
    /// JSON array of tags.
    pub tags: String,
    #[sqlx(try_from = "String")]
    pub status: RunnerStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl RunnerRecord {
    /// Parsed tag set; a corrupt column reads as empty.
    pub fn tag_list(&self) -> Vec<String> {
        serde_json::from_str(&self.tags).unwrap_or_default()
    }

    /// Wire representation with the runner's agent inventory attached.
    pub fn into_info(self, agents: Vec<AgentBlueprint>) -> RunnerInfo {
        let tags = self.tag_list();
        RunnerInfo {
            runner_id: self.runner_id,
            hostname: self.hostname,
            executor_type: self.executor_type,
            executor_profile: self.executor_profile,
            project_dir: self.project_dir,
            tags,
            status: self.status,
            last_heartbeat: self.last_heartbeat,
            agents,
        }
    }
}
