//! Runner registry service.
//!
//! Registration is all-or-nothing with the runner's agent blueprints; the
//! sweeper task walks `online → stale → removed` off missed heartbeats and
//! cascades removal into owned blueprints and held runs.

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use orchestrator_protocol::{
    HeartbeatResponse, RegisterRunnerRequest, RegisterRunnerResponse, RunnerInfo, RunnerStatus,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use super::models::RunnerRecord;
use super::repository::RunnerRepository;
use crate::agent::{AgentService, RegisterError};
use crate::ids;
use crate::runs::RunQueue;
use crate::settings::RunnerSettings;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("runner not found: {0}")]
    NotFound(String),

    #[error("agent name already registered: {0}")]
    AgentConflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Registration, heartbeats, and the staleness sweeper.
pub struct RunnerRegistry {
    runners: RunnerRepository,
    agents: AgentService,
    queue: Arc<RunQueue>,
    settings: RunnerSettings,
}

impl RunnerRegistry {
    pub fn new(
        runners: RunnerRepository,
        agents: AgentService,
        queue: Arc<RunQueue>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            runners,
            agents,
            queue,
            settings,
        }
    }

    /// Register a runner and persist its owned blueprints.
    ///
    /// A name conflict rejects the whole registration; the runner may retry
    /// with a different profile.
    pub async fn register(
        &self,
        request: RegisterRunnerRequest,
    ) -> Result<RegisterRunnerResponse, RegistryError> {
        let now = Utc::now();
        let record = RunnerRecord {
            runner_id: ids::new_runner_id(),
            hostname: request.hostname,
            executor_type: request.executor_type,
            executor_profile: request.executor_profile,
            project_dir: request.project_dir,
            tags: serde_json::to_string(&request.tags).context("serializing runner tags")?,
            status: RunnerStatus::Online,
            last_heartbeat: now,
            registered_at: now,
        };
        self.runners.insert(&record).await?;

        if let Err(err) = self
            .agents
            .register_owned(&record.runner_id, &request.agents)
            .await
        {
            self.runners.delete(&record.runner_id).await?;
            return Err(match err {
                RegisterError::Conflict(name) => RegistryError::AgentConflict(name),
                RegisterError::Internal(e) => RegistryError::Internal(e),
            });
        }

        info!(
            runner_id = %record.runner_id,
            hostname = %record.hostname,
            executor_type = %record.executor_type,
            agents = request.agents.len(),
            "runner registered"
        );
        Ok(RegisterRunnerResponse {
            runner_id: record.runner_id,
        })
    }

    /// Record a heartbeat; stale runners recover to online.
    pub async fn heartbeat(&self, runner_id: &str) -> Result<HeartbeatResponse, RegistryError> {
        let touched = self.runners.touch_heartbeat(runner_id, Utc::now()).await?;
        if !touched {
            // Unknown or removed: either way the runner must re-register.
            return Err(RegistryError::NotFound(runner_id.to_string()));
        }
        Ok(HeartbeatResponse {
            status: RunnerStatus::Online,
        })
    }

    /// Registry dump: online and stale runners with agent inventories.
    pub async fn list(&self) -> Result<Vec<RunnerInfo>> {
        let mut infos = Vec::new();
        for record in self.runners.list_active().await? {
            let agents = self.agents.owned_by(&record.runner_id).await?;
            infos.push(record.into_info(agents));
        }
        Ok(infos)
    }

    pub async fn get(&self, runner_id: &str) -> Result<Option<RunnerRecord>, RegistryError> {
        Ok(self.runners.get(runner_id).await?)
    }

    /// One sweep: apply both staleness thresholds and cascade removals.
    pub async fn sweep_once(&self) -> Result<()> {
        let now = Utc::now();

        let stale_cutoff = now - ChronoDuration::seconds(self.settings.stale_after_secs as i64);
        for runner_id in self.runners.mark_stale(stale_cutoff).await? {
            warn!(runner_id = %runner_id, "runner went stale");
        }

        let remove_cutoff = now - ChronoDuration::seconds(self.settings.remove_after_secs as i64);
        for runner_id in self.runners.mark_removed(remove_cutoff).await? {
            warn!(runner_id = %runner_id, "runner removed after missed heartbeats");
            self.cleanup_removed(&runner_id).await?;
        }

        Ok(())
    }

    /// Removal cascade: owned blueprints die with the runner, held runs
    /// fail, callbacks fire off the resulting terminal sessions.
    async fn cleanup_removed(&self, runner_id: &str) -> Result<()> {
        let deleted = self.agents.remove_owner(runner_id).await?;
        for name in &deleted {
            info!(runner_id, agent = %name, "deleted blueprint of removed runner");
        }

        self.queue.fail_runs_for_runner(runner_id).await?;
        Ok(())
    }

    /// Background sweeper; runs until the task is aborted at shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        let interval = Duration::from_secs(self.settings.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = registry.sweep_once().await {
                    error!(error = %err, "runner sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::RunnerSettings;
    use crate::testutil::TestStack;
    use orchestrator_protocol::{RunStatus, SessionStatus};
    use std::time::Duration as StdDuration;

    fn instant_thresholds() -> RunnerSettings {
        RunnerSettings {
            stale_after_secs: 0,
            remove_after_secs: 0,
            sweep_interval_secs: 1,
        }
    }

    #[tokio::test]
    async fn test_agent_conflict_rejects_whole_registration() {
        let stack = TestStack::new().await;
        let first = stack
            .register_runner(
                "cli",
                &[],
                vec![TestStack::procedural_blueprint("web-crawler")],
            )
            .await;

        let err = stack
            .registry
            .register(orchestrator_protocol::RegisterRunnerRequest {
                hostname: "other".to_string(),
                executor_type: "cli".to_string(),
                executor_profile: "default".to_string(),
                project_dir: None,
                tags: vec![],
                agents: vec![
                    TestStack::procedural_blueprint("fresh"),
                    TestStack::procedural_blueprint("web-crawler"),
                ],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::AgentConflict(name) if name == "web-crawler"));

        // The losing runner was rolled back entirely; the winner keeps the
        // name and nothing from the rejected batch leaked in.
        assert_eq!(stack.registry.list().await.unwrap().len(), 1);
        assert!(stack.agents.resolve("fresh").await.unwrap().is_none());
        let kept = stack.agents.resolve("web-crawler").await.unwrap().unwrap();
        assert_eq!(kept.owner_runner_id.as_deref(), Some(first.as_str()));
    }

    #[tokio::test]
    async fn test_heartbeat_recovers_stale_runner() {
        let stack = TestStack::with_runner_settings(RunnerSettings {
            stale_after_secs: 0,
            remove_after_secs: 3600,
            sweep_interval_secs: 1,
        })
        .await;
        let runner_id = stack.register_runner("claude-sdk", &[], vec![]).await;

        tokio::time::sleep(StdDuration::from_millis(5)).await;
        stack.registry.sweep_once().await.unwrap();
        let record = stack.registry.get(&runner_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunnerStatus::Stale);

        stack.registry.heartbeat(&runner_id).await.unwrap();
        let record = stack.registry.get(&runner_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunnerStatus::Online);
    }

    #[tokio::test]
    async fn test_removal_cascades_into_runs_agents_and_sessions() {
        let stack = TestStack::with_runner_settings(instant_thresholds()).await;
        let runner_id = stack
            .register_runner("claude-sdk", &[], vec![])
            .await;

        let created = stack
            .queue
            .create("alice", TestStack::start_request("hello"))
            .await
            .unwrap();
        stack
            .queue
            .poll(&runner_id, StdDuration::from_millis(20))
            .await
            .unwrap();

        tokio::time::sleep(StdDuration::from_millis(5)).await;
        stack.registry.sweep_once().await.unwrap();

        let record = stack.registry.get(&runner_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunnerStatus::Removed);

        let stored = stack.queue.get(&created.run_id).await.unwrap();
        assert_eq!(stored.run.status, RunStatus::Failed);
        assert_eq!(
            stored.run.error.as_deref(),
            Some("runner disconnected during execution")
        );
        let session = stack.sessions.get(&created.session_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Failed);

        // A removed runner must re-register before anything else.
        let err = stack.registry.heartbeat(&runner_id).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
        let err = stack
            .queue
            .poll(&runner_id, StdDuration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::runs::QueueError::RunnerNotFound(_)));
    }

    #[tokio::test]
    async fn test_removed_runner_loses_owned_blueprints() {
        let stack = TestStack::with_runner_settings(instant_thresholds()).await;
        stack
            .register_runner(
                "cli",
                &[],
                vec![TestStack::procedural_blueprint("web-crawler")],
            )
            .await;
        assert!(stack.agents.resolve("web-crawler").await.unwrap().is_some());

        tokio::time::sleep(StdDuration::from_millis(5)).await;
        stack.registry.sweep_once().await.unwrap();

        assert!(stack.agents.resolve("web-crawler").await.unwrap().is_none());
        assert!(stack.registry.list().await.unwrap().is_empty());
    }
}
