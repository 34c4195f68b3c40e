//! Application state shared across handlers.
//!
//! Every global (queue, registries, broadcaster) is reachable only through
//! this struct and injected explicitly, so tests can stand up fresh copies.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::agent::{AgentFileStore, AgentRepository, AgentService};
use crate::auth::AuthState;
use crate::broadcast::Broadcaster;
use crate::callback::{CallbackCoordinator, CallbackNotice, CallbackRepository};
use crate::db::Database;
use crate::events::{EventLog, EventRepository};
use crate::runner::{RunnerRegistry, RunnerRepository};
use crate::runs::RunQueue;
use crate::session::{SessionRepository, SessionService};
use crate::settings::Settings;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionService,
    pub events: EventLog,
    pub agents: AgentService,
    pub queue: Arc<RunQueue>,
    pub registry: Arc<RunnerRegistry>,
    pub callbacks: Arc<CallbackCoordinator>,
    pub broadcaster: Arc<Broadcaster>,
    pub auth: AuthState,
}

impl AppState {
    /// Wire every service over one database.
    ///
    /// Returns the state plus the callback watcher's receiving end; the
    /// caller decides when to spawn the background tasks.
    pub fn build(
        db: &Database,
        settings: &Settings,
    ) -> (Self, mpsc::UnboundedReceiver<CallbackNotice>) {
        let broadcaster = Arc::new(Broadcaster::new(std::time::Duration::from_secs(
            settings.stream.replay_window_secs,
        )));
        let (watcher_tx, watcher_rx) = mpsc::unbounded_channel();

        let session_repo = SessionRepository::new(db.pool().clone());
        let event_repo = EventRepository::new(db.pool().clone());
        let run_repo = crate::runs::RunRepository::new(db.pool().clone());
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
            event_repo,
            session_repo,
            broadcaster.clone(),
            watcher_tx.clone(),
        );
        let agents = AgentService::new(
            AgentFileStore::new(settings.agents_dir.clone()),
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
            watcher_tx,
            settings.queue.clone(),
        ));
        let registry = Arc::new(RunnerRegistry::new(
            runner_repo,
            agents.clone(),
            queue.clone(),
            settings.runners.clone(),
        ));
        let callbacks = Arc::new(CallbackCoordinator::new(
            callback_repo,
            sessions.clone(),
            run_repo,
            queue.clone(),
            settings.callbacks.batch_window_mode,
        ));

        let auth = AuthState::new(
            settings.auth.enabled,
            settings.auth.api_key.clone(),
            &settings.auth.user_tokens,
        );

        (
            Self {
                sessions,
                events,
                agents,
                queue,
                registry,
                callbacks,
                broadcaster,
                auth,
            },
            watcher_rx,
        )
    }

    /// Spawn the sweeper and callback watcher.
    pub fn spawn_background(
        &self,
        watcher_rx: mpsc::UnboundedReceiver<CallbackNotice>,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            self.registry.spawn_sweeper(),
            self.callbacks.spawn_watcher(watcher_rx),
        ]
    }
}
