//! Shared construction for service-level tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use orchestrator_protocol::{AgentBlueprint, AgentKind, RegisterRunnerRequest, RunKind};
use tokio::sync::mpsc;

use crate::agent::{AgentFileStore, AgentRepository, AgentService};
use crate::broadcast::Broadcaster;
use crate::callback::{CallbackCoordinator, CallbackNotice, CallbackRepository};
use crate::db::Database;
use crate::events::{EventLog, EventRepository};
use crate::runner::{RunnerRegistry, RunnerRepository};
use crate::runs::{CreateRunRequest, RunMode, RunQueue, RunRepository};
use crate::session::{SessionRepository, SessionService};
use crate::settings::{BatchWindowMode, QueueSettings, RunnerSettings};

/// Everything a service test needs, wired the same way `main` wires it.
pub(crate) struct TestStack {
    pub db: Database,
    pub broadcaster: Arc<Broadcaster>,
    pub watcher_tx: mpsc::UnboundedSender<CallbackNotice>,
    /// Taken by tests that drive the coordinator by hand.
    pub watcher_rx: Option<mpsc::UnboundedReceiver<CallbackNotice>>,
    pub sessions: SessionService,
    pub events: EventLog,
    pub agents: AgentService,
    pub runs: RunRepository,
    pub callbacks: CallbackRepository,
    pub queue: Arc<RunQueue>,
    pub registry: Arc<RunnerRegistry>,
    pub coordinator: Arc<CallbackCoordinator>,
    _agents_dir: tempfile::TempDir,
}

impl TestStack {
    pub async fn new() -> Self {
        Self::with_runner_settings(RunnerSettings::default()).await
    }

    pub async fn with_runner_settings(runner_settings: RunnerSettings) -> Self {
        let db = Database::in_memory().await.expect("in-memory database");
        let broadcaster = Arc::new(Broadcaster::new(Duration::from_secs(300)));
        let (watcher_tx, watcher_rx) = mpsc::unbounded_channel();

        let agents_dir = tempfile::tempdir().expect("agents dir");
        std::fs::write(
            agents_dir.path().join("researcher.json"),
            serde_json::to_string(&AgentBlueprint {
                name: "researcher".to_string(),
                kind: AgentKind::Autonomous,
                description: "Research assistant".to_string(),
                system_prompt: Some("You research things.".to_string()),
                command: None,
                parameters_schema: None,
                mcp_servers: HashMap::from([(
                    "orchestrator".to_string(),
                    serde_json::json!({"url": "${runner.orchestrator_mcp_url}/mcp"}),
                )]),
                tags: vec![],
            })
            .expect("blueprint json"),
        )
        .expect("write blueprint");

        let session_repo = SessionRepository::new(db.pool().clone());
        let event_repo = EventRepository::new(db.pool().clone());
        let run_repo = RunRepository::new(db.pool().clone());
        let runner_repo = RunnerRepository::new(db.pool().clone());
        let callback_repo = CallbackRepository::new(db.pool().clone());

        let sessions = SessionService::new(
            session_repo.clone(),
            event_repo.clone(),
            run_repo.clone(),
            callback_repo.clone(),
            broadcaster.clone(),
        );
        let events = EventLog::new(
            event_repo.clone(),
            session_repo.clone(),
            broadcaster.clone(),
            watcher_tx.clone(),
        );
        let agents = AgentService::new(
            AgentFileStore::new(Some(agents_dir.path().to_path_buf())),
            AgentRepository::new(db.pool().clone()),
        );

        let queue = Arc::new(RunQueue::new(
            run_repo.clone(),
            runner_repo.clone(),
            agents.clone(),
            sessions.clone(),
            events.clone(),
            callback_repo.clone(),
            broadcaster.clone(),
            watcher_tx.clone(),
            QueueSettings::default(),
        ));
        let registry = Arc::new(RunnerRegistry::new(
            runner_repo,
            agents.clone(),
            queue.clone(),
            runner_settings,
        ));
        let coordinator = Arc::new(CallbackCoordinator::new(
            callback_repo.clone(),
            sessions.clone(),
            run_repo.clone(),
            queue.clone(),
            BatchWindowMode::Fixed,
        ));

        Self {
            db,
            broadcaster,
            watcher_tx,
            watcher_rx: Some(watcher_rx),
            sessions,
            events,
            agents,
            runs: run_repo,
            callbacks: callback_repo,
            queue,
            registry,
            coordinator,
            _agents_dir: agents_dir,
        }
    }

    /// Register a runner and return its id.
    pub async fn register_runner(
        &self,
        executor_type: &str,
        tags: &[&str],
        agents: Vec<AgentBlueprint>,
    ) -> String {
        self.registry
            .register(RegisterRunnerRequest {
                hostname: "test-host".to_string(),
                executor_type: executor_type.to_string(),
                executor_profile: "default".to_string(),
                project_dir: None,
                tags: tags.iter().map(|t| t.to_string()).collect(),
                agents,
            })
            .await
            .expect("register runner")
            .runner_id
    }

    /// A minimal autonomous start request.
    pub fn start_request(prompt: &str) -> CreateRunRequest {
        CreateRunRequest {
            kind: RunKind::StartSession,
            agent_name: Some("researcher".to_string()),
            session_name: None,
            session_id: None,
            parameters: None,
            prompt: Some(prompt.to_string()),
            project_dir: None,
            mode: RunMode::Async,
            scope: HashMap::new(),
            tags: Vec::new(),
            parent_session_id: None,
            parent_session_name: None,
            callback_strategy: None,
            batch_delay_seconds: None,
            sync_timeout_secs: None,
        }
    }

    /// A procedural blueprint for runner-owned registrations.
    pub fn procedural_blueprint(name: &str) -> AgentBlueprint {
        AgentBlueprint {
            name: name.to_string(),
            kind: AgentKind::Procedural,
            description: String::new(),
            system_prompt: None,
            command: Some(format!("run-{name} ${{params.url}}")),
            parameters_schema: Some(serde_json::json!({
                "type": "object",
                "required": ["url"],
                "properties": {"url": {"type": "string", "format": "uri"}}
            })),
            mcp_servers: HashMap::new(),
            tags: vec![],
        }
    }
}
