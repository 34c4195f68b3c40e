//! The run queue.
//!
//! Runs enter as `pending`, wake any long-polling runners, and are claimed
//! atomically by exactly one of them. Terminal reports close the run and
//! release the session for deferred callbacks. Stop signals ride the next
//! poll response of the holding runner.

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use orchestrator_protocol::{
    AgentBlueprint, EventPayload, PlaceholderError, PollResponse, Run, RunKind, RunStatus,
    StageOneVars, resolve_stage_one,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tracing::{info, warn};

use super::models::{CreateRunRequest, CreateRunResponse, RunCreateError, RunMode, StoredRun};
use super::repository::RunRepository;
use crate::agent::AgentService;
use crate::broadcast::{Broadcaster, Scope, StreamMessage};
use crate::callback::{CallbackNotice, CallbackRegistration, CallbackRepository, CallbackStatus};
use crate::events::{AppendError, EventLog};
use crate::ids;
use crate::params::{ParamsError, validate_params};
use crate::runner::{RunnerRecord, RunnerRepository};
use crate::session::{NewSession, SessionError, SessionResult, SessionService, StatusProbe};
use crate::settings::{QueueSettings, ResumeIdSource};

const RUNNER_DISCONNECT_ERROR: &str = "runner disconnected during execution";

/// Runner-facing queue operation failures.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("runner not found: {0}")]
    RunnerNotFound(String),

    #[error("run is not held by this runner in a transitionable state")]
    Conflict,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Queue of runs with long-poll dispatch.
pub struct RunQueue {
    runs: RunRepository,
    runners: RunnerRepository,
    agents: AgentService,
    sessions: SessionService,
    events: EventLog,
    callbacks: CallbackRepository,
    broadcaster: Arc<Broadcaster>,
    watcher_tx: mpsc::UnboundedSender<CallbackNotice>,
    /// Wakes long-poll waiters on enqueue and on stop requests.
    pending_notify: Notify,
    settings: QueueSettings,
}

impl RunQueue {
    pub fn new(
        runs: RunRepository,
        runners: RunnerRepository,
        agents: AgentService,
        sessions: SessionService,
        events: EventLog,
        callbacks: CallbackRepository,
        broadcaster: Arc<Broadcaster>,
        watcher_tx: mpsc::UnboundedSender<CallbackNotice>,
        settings: QueueSettings,
    ) -> Self {
        Self {
            runs,
            runners,
            agents,
            sessions,
            events,
            callbacks,
            broadcaster,
            watcher_tx,
            pending_notify: Notify::new(),
            settings,
        }
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Validate, resolve, and enqueue a run (or translate a stop command).
    pub async fn create(
        &self,
        created_by: &str,
        request: CreateRunRequest,
    ) -> Result<CreateRunResponse, RunCreateError> {
        match request.kind {
            RunKind::StartSession => self.create_start(created_by, request).await,
            RunKind::ResumeSession => self.create_resume(created_by, request).await,
            RunKind::StopCommand => self.create_stop(created_by, request).await,
        }
    }

    async fn create_start(
        &self,
        created_by: &str,
        request: CreateRunRequest,
    ) -> Result<CreateRunResponse, RunCreateError> {
        let agent_name = request
            .agent_name
            .clone()
            .ok_or_else(|| RunCreateError::Invalid("agent_name is required".to_string()))?;
        let resolved = self
            .agents
            .resolve(&agent_name)
            .await?
            .ok_or_else(|| RunCreateError::AgentNotFound(agent_name.clone()))?;

        let params = merged_params(&request)?;
        check_params(&resolved.blueprint, &params)?;

        let parent = self.resolve_parent(created_by, &request).await?;

        let session_name = request
            .session_name
            .clone()
            .unwrap_or_else(|| format!("{agent_name}-{}", ids::short_suffix()));
        let session = self
            .sessions
            .create(NewSession {
                session_name,
                project_dir: request.project_dir.clone(),
                agent_name: agent_name.clone(),
                created_by: created_by.to_string(),
                parent_session_name: parent.as_ref().map(|(_, name)| name.clone()),
            })
            .await
            .map_err(map_session_error)?;

        let blueprint = self.resolve_blueprint(
            resolved.blueprint,
            &session.session_id,
            &params,
            &request,
            created_by,
        )?;

        self.register_callback(&request, &parent, &session.session_name, &session.session_id)
            .await?;

        let executor_type = self
            .executor_type_for(&resolved.owner_runner_id, &agent_name)
            .await?;
        let run = Run {
            run_id: ids::new_run_id(),
            kind: RunKind::StartSession,
            session_id: session.session_id.clone(),
            session_name: session.session_name.clone(),
            agent_name,
            parameters: params,
            agent_blueprint: Some(blueprint),
            project_dir: request.project_dir.clone(),
            parent_session_id: parent.as_ref().map(|(id, _)| id.clone()),
            parent_session_name: parent.map(|(_, name)| name),
            executor_session_id: None,
            status: RunStatus::Pending,
            claimed_by_runner_id: None,
            created_at: Utc::now(),
            claimed_at: None,
            finished_at: None,
            error: None,
        };
        let run_id = self
            .enqueue(run, executor_type, &request, resolved.owner_runner_id)
            .await?;

        self.finish_create(request, session.session_id.clone(), run_id)
            .await
    }

    async fn create_resume(
        &self,
        created_by: &str,
        request: CreateRunRequest,
    ) -> Result<CreateRunResponse, RunCreateError> {
        let session = self.target_session(created_by, &request).await?;

        if self
            .runs
            .active_for_session(&session.session_id)
            .await
            .context("checking for active run")?
            .is_some()
        {
            return Err(RunCreateError::Busy(session.session_id));
        }

        let resolved = self
            .agents
            .resolve(&session.agent_name)
            .await?
            .ok_or_else(|| RunCreateError::AgentNotFound(session.agent_name.clone()))?;

        let params = merged_params(&request)?;
        check_params(&resolved.blueprint, &params)?;

        let blueprint = self.resolve_blueprint(
            resolved.blueprint,
            &session.session_id,
            &params,
            &request,
            created_by,
        )?;

        // Re-entry opens a fresh status cycle: the terminal rule holds
        // within a cycle, an explicit resume starts the next one.
        let now = Utc::now();
        self.sessions
            .repository()
            .reopen(&session.session_id, now)
            .await
            .context("reopening session for resume")?;
        if let Ok(reopened) = self.sessions.get(&session.session_id).await {
            self.broadcaster.publish(
                Scope {
                    created_by: reopened.created_by.clone(),
                    session_id: reopened.session_id.clone(),
                },
                StreamMessage::SessionUpdated { session: reopened },
            );
        }

        let executor_session_id = match self.settings.resume_id_source {
            ResumeIdSource::RunPayload => session.executor_session_id.clone(),
            ResumeIdSource::SessionApi => None,
        };

        let executor_type = self
            .executor_type_for(&resolved.owner_runner_id, &session.agent_name)
            .await?;
        let run = Run {
            run_id: ids::new_run_id(),
            kind: RunKind::ResumeSession,
            session_id: session.session_id.clone(),
            session_name: session.session_name.clone(),
            agent_name: session.agent_name.clone(),
            parameters: params,
            agent_blueprint: Some(blueprint),
            project_dir: session.project_dir.clone(),
            parent_session_id: request.parent_session_id.clone(),
            parent_session_name: request.parent_session_name.clone(),
            executor_session_id,
            status: RunStatus::Pending,
            claimed_by_runner_id: None,
            created_at: now,
            claimed_at: None,
            finished_at: None,
            error: None,
        };
        let run_id = self
            .enqueue(run, executor_type, &request, resolved.owner_runner_id)
            .await?;

        self.finish_create(request, session.session_id, run_id).await
    }

    async fn create_stop(
        &self,
        created_by: &str,
        request: CreateRunRequest,
    ) -> Result<CreateRunResponse, RunCreateError> {
        let session = self.target_session(created_by, &request).await?;
        let open = self
            .runs
            .open_for_session(&session.session_id)
            .await
            .context("listing open runs")?;
        if open.is_empty() {
            return Err(RunCreateError::Invalid(
                "session has no open runs to stop".to_string(),
            ));
        }

        let first = open[0].run.run_id.clone();
        for stored in open {
            self.stop(&stored.run.run_id).await.map_err(|e| match e {
                QueueError::Internal(e) => RunCreateError::Internal(e),
                other => RunCreateError::Invalid(other.to_string()),
            })?;
        }

        Ok(CreateRunResponse {
            run_id: first,
            session_id: session.session_id,
            result: None,
        })
    }

    async fn finish_create(
        &self,
        request: CreateRunRequest,
        session_id: String,
        run_id: String,
    ) -> Result<CreateRunResponse, RunCreateError> {
        let result = if request.mode == RunMode::Sync {
            let timeout = request
                .sync_timeout_secs
                .unwrap_or(self.settings.sync_timeout_secs);
            Some(
                self.wait_for_result(&session_id, Duration::from_secs(timeout))
                    .await?,
            )
        } else {
            None
        };

        Ok(CreateRunResponse {
            run_id,
            session_id,
            result,
        })
    }

    async fn resolve_parent(
        &self,
        created_by: &str,
        request: &CreateRunRequest,
    ) -> Result<Option<(String, String)>, RunCreateError> {
        match (&request.parent_session_id, &request.parent_session_name) {
            (Some(id), _) => {
                let parent = self
                    .sessions
                    .get(id)
                    .await
                    .map_err(|_| RunCreateError::ParentNotFound(id.clone()))?;
                Ok(Some((parent.session_id, parent.session_name)))
            }
            (None, Some(name)) => {
                // Prefer the caller's own session of that name; facade
                // callers fall back to the global name lookup.
                let parent = match self
                    .sessions
                    .get_by_name(created_by, name)
                    .await
                    .map_err(map_session_error)?
                {
                    Some(parent) => parent,
                    None => self
                        .sessions
                        .repository()
                        .find_by_name(name)
                        .await
                        .context("finding parent by name")?
                        .ok_or_else(|| RunCreateError::ParentNotFound(name.clone()))?,
                };
                Ok(Some((parent.session_id, parent.session_name)))
            }
            (None, None) => Ok(None),
        }
    }

    async fn target_session(
        &self,
        created_by: &str,
        request: &CreateRunRequest,
    ) -> Result<crate::session::Session, RunCreateError> {
        match (&request.session_id, &request.session_name) {
            (Some(id), _) => self.sessions.get(id).await.map_err(map_session_error),
            (None, Some(name)) => self
                .sessions
                .get_by_name(created_by, name)
                .await
                .map_err(map_session_error)?
                .ok_or_else(|| RunCreateError::SessionNotFound(name.clone())),
            (None, None) => Err(RunCreateError::Invalid(
                "session_id or session_name is required".to_string(),
            )),
        }
    }

    /// Stage-1 placeholder resolution over the blueprint's templated
    /// fields.
    fn resolve_blueprint(
        &self,
        mut blueprint: AgentBlueprint,
        session_id: &str,
        params: &Value,
        request: &CreateRunRequest,
        created_by: &str,
    ) -> Result<AgentBlueprint, PlaceholderError> {
        let mut scope = request.scope.clone();
        scope
            .entry("created_by".to_string())
            .or_insert_with(|| created_by.to_string());
        if let Some(project_dir) = &request.project_dir {
            scope
                .entry("project_dir".to_string())
                .or_insert_with(|| project_dir.clone());
        }

        let vars = StageOneVars {
            session_id: session_id.to_string(),
            params: params.clone(),
            scope,
            env: std::env::vars().collect::<HashMap<_, _>>(),
        };

        if let Some(system_prompt) = blueprint.system_prompt.take() {
            blueprint.system_prompt = Some(resolve_text(system_prompt, &vars)?);
        }
        if let Some(command) = blueprint.command.take() {
            blueprint.command = Some(resolve_text(command, &vars)?);
        }
        for (_, config) in blueprint.mcp_servers.iter_mut() {
            resolve_stage_one(config, &vars)?;
        }
        Ok(blueprint)
    }

    async fn register_callback(
        &self,
        request: &CreateRunRequest,
        parent: &Option<(String, String)>,
        child_name: &str,
        child_session_id: &str,
    ) -> Result<(), RunCreateError> {
        let Some(strategy) = request.callback_strategy else {
            return Ok(());
        };
        let Some((parent_id, parent_name)) = parent else {
            return Err(RunCreateError::Invalid(
                "callback_strategy requires a parent session".to_string(),
            ));
        };

        let now = Utc::now();
        self.callbacks
            .insert(&CallbackRegistration {
                callback_id: uuid::Uuid::new_v4().to_string(),
                parent_session_id: parent_id.clone(),
                parent_session_name: parent_name.clone(),
                child_session_name: child_name.to_string(),
                child_session_id: Some(child_session_id.to_string()),
                strategy,
                batch_delay_seconds: request.batch_delay_seconds.unwrap_or(0),
                status: CallbackStatus::ChildRunning,
                child_status: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .context("registering callback")?;
        Ok(())
    }

    async fn executor_type_for(
        &self,
        owner_runner_id: &Option<String>,
        agent_name: &str,
    ) -> Result<String, RunCreateError> {
        match owner_runner_id {
            Some(owner) => {
                let runner = self
                    .runners
                    .get(owner)
                    .await
                    .context("fetching owning runner")?
                    .ok_or_else(|| RunCreateError::AgentNotFound(agent_name.to_string()))?;
                Ok(runner.executor_type)
            }
            None => Ok(self.settings.autonomous_executor_type.clone()),
        }
    }

    async fn enqueue(
        &self,
        run: Run,
        executor_type: String,
        request: &CreateRunRequest,
        owner_runner_id: Option<String>,
    ) -> Result<String, RunCreateError> {
        let run_id = run.run_id.clone();
        self.runs
            .insert(&StoredRun {
                run,
                executor_type,
                required_tags: request.tags.clone(),
                owner_runner_id,
                stop_requested: false,
            })
            .await
            .context("inserting run")?;
        info!(run_id = %run_id, "run enqueued");
        self.pending_notify.notify_waiters();
        Ok(run_id)
    }

    async fn wait_for_result(
        &self,
        session_id: &str,
        timeout: Duration,
    ) -> Result<SessionResult, RunCreateError> {
        let deadline = Instant::now() + timeout;
        loop {
            let probe = self
                .sessions
                .status_probe(session_id)
                .await
                .map_err(map_session_error)?;
            match probe {
                StatusProbe::Finished => {
                    return self
                        .sessions
                        .result(session_id)
                        .await
                        .map_err(map_session_error);
                }
                StatusProbe::NotExistent => {
                    return Err(RunCreateError::SessionNotFound(session_id.to_string()));
                }
                StatusProbe::Running => {}
            }
            if Instant::now() >= deadline {
                return Err(RunCreateError::DeadlineExceeded);
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Long-poll claim.
    ///
    /// Returns as soon as a matching run is claimed or a stop signal is
    /// queued for this runner; otherwise blocks until `wait` expires and
    /// returns an empty response.
    pub async fn poll(&self, runner_id: &str, wait: Duration) -> Result<PollResponse, QueueError> {
        let runner = self
            .runners
            .get(runner_id)
            .await
            .context("fetching polling runner")?
            .filter(|r| r.status != orchestrator_protocol::RunnerStatus::Removed)
            .ok_or_else(|| QueueError::RunnerNotFound(runner_id.to_string()))?;

        // Polling proves liveness just as well as an explicit heartbeat.
        self.runners
            .touch_heartbeat(runner_id, Utc::now())
            .await
            .context("recording poll heartbeat")?;

        let wait = wait.min(Duration::from_secs(self.settings.max_poll_wait_secs));
        let deadline = Instant::now() + wait;

        loop {
            // Arm the wakeup before scanning so an enqueue between the scan
            // and the select cannot be missed.
            let notified = self.pending_notify.notified();

            let stop_runs = self
                .runs
                .stop_requested_for(runner_id)
                .await
                .context("listing stop signals")?;
            if let Some(run) = self.try_claim_for(&runner).await? {
                return Ok(PollResponse {
                    run: Some(run),
                    stop_runs,
                });
            }
            if !stop_runs.is_empty() {
                return Ok(PollResponse {
                    run: None,
                    stop_runs,
                });
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(PollResponse::default()),
            }
        }
    }

    /// Scan the FIFO for the first matching run and try to claim it.
    async fn try_claim_for(&self, runner: &RunnerRecord) -> Result<Option<Run>, QueueError> {
        let runner_tags = runner.tag_list();
        let pending = self
            .runs
            .pending_fifo()
            .await
            .context("scanning pending runs")?;

        for stored in pending {
            if stored.executor_type != runner.executor_type {
                continue;
            }
            if let Some(owner) = &stored.owner_runner_id {
                if *owner != runner.runner_id {
                    continue;
                }
            }
            if !stored.required_tags.iter().all(|t| runner_tags.contains(t)) {
                continue;
            }

            // Serialized claim: losing the race just moves us down the
            // FIFO.
            if self
                .runs
                .try_claim(&stored.run.run_id, &runner.runner_id)
                .await
                .context("claiming run")?
            {
                info!(
                    run_id = %stored.run.run_id,
                    runner_id = %runner.runner_id,
                    "run claimed"
                );
                let mut run = stored.run;
                run.status = RunStatus::Claimed;
                run.claimed_by_runner_id = Some(runner.runner_id.clone());
                run.claimed_at = Some(Utc::now());
                return Ok(Some(run));
            }
        }
        Ok(None)
    }

    // ========================================================================
    // Status reports
    // ========================================================================

    pub async fn report_started(
        &self,
        run_id: &str,
        runner_id: &str,
        executor_session_id: Option<&str>,
    ) -> Result<(), QueueError> {
        let stored = self.get(run_id).await?;
        if !self
            .runs
            .mark_started(run_id, runner_id)
            .await
            .context("marking run started")?
        {
            return Err(QueueError::Conflict);
        }
        if let Some(handle) = executor_session_id {
            self.sessions
                .repository()
                .set_executor_session_id(&stored.run.session_id, handle)
                .await
                .context("recording executor session id")?;
        }
        Ok(())
    }

    pub async fn report_completed(&self, run_id: &str, runner_id: &str) -> Result<(), QueueError> {
        let stored = self.get(run_id).await?;
        if !self
            .runs
            .finalize(run_id, Some(runner_id), RunStatus::Finished, None)
            .await
            .context("finalizing completed run")?
        {
            return Err(QueueError::Conflict);
        }
        info!(run_id, runner_id, "run completed");
        let _ = self.watcher_tx.send(CallbackNotice::RunReleased {
            session_id: stored.run.session_id,
        });
        Ok(())
    }

    pub async fn report_failed(
        &self,
        run_id: &str,
        runner_id: &str,
        error: &str,
    ) -> Result<(), QueueError> {
        let stored = self.get(run_id).await?;
        if !self.finalize_failed(&stored, Some(runner_id), error).await? {
            return Err(QueueError::Conflict);
        }
        Ok(())
    }

    pub async fn report_stopped(
        &self,
        run_id: &str,
        runner_id: &str,
        reason: Option<&str>,
    ) -> Result<(), QueueError> {
        let stored = self.get(run_id).await?;
        if !self
            .runs
            .finalize(run_id, Some(runner_id), RunStatus::Stopped, reason)
            .await
            .context("finalizing stopped run")?
        {
            return Err(QueueError::Conflict);
        }
        info!(run_id, runner_id, "run stopped");
        self.mark_session_stopped(&stored.run.session_id).await?;
        let _ = self.watcher_tx.send(CallbackNotice::RunReleased {
            session_id: stored.run.session_id,
        });
        Ok(())
    }

    // ========================================================================
    // Stop signalling
    // ========================================================================

    /// Best-effort stop. Pending runs stop immediately; held runs get the
    /// signal on the holder's next poll. Already-terminal runs are a no-op.
    pub async fn stop(&self, run_id: &str) -> Result<(), QueueError> {
        let stored = self.get(run_id).await?;
        match stored.run.status {
            RunStatus::Pending => {
                if self
                    .runs
                    .stop_if_pending(run_id)
                    .await
                    .context("stopping pending run")?
                {
                    info!(run_id, "pending run stopped");
                    self.mark_session_stopped(&stored.run.session_id).await?;
                }
                Ok(())
            }
            RunStatus::Claimed | RunStatus::Started => {
                self.runs
                    .request_stop(run_id)
                    .await
                    .context("flagging run for stop")?;
                // Wake the holder's long-poll so delivery is prompt.
                self.pending_notify.notify_waiters();
                Ok(())
            }
            // Idempotent: late stops on finished runs succeed silently.
            _ => Ok(()),
        }
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Fail every run a disconnected runner still holds.
    pub async fn fail_runs_for_runner(&self, runner_id: &str) -> Result<()> {
        let held = self.runs.held_by(runner_id).await?;
        for stored in held {
            warn!(
                run_id = %stored.run.run_id,
                runner_id,
                "failing run of disconnected runner"
            );
            self.finalize_failed(&stored, None, RUNNER_DISCONNECT_ERROR)
                .await
                .map_err(|e| anyhow!(e))?;
        }
        Ok(())
    }

    async fn finalize_failed(
        &self,
        stored: &StoredRun,
        holder: Option<&str>,
        error: &str,
    ) -> Result<bool, QueueError> {
        let run_id = &stored.run.run_id;
        let session_id = &stored.run.session_id;

        if !self
            .runs
            .finalize(run_id, holder, RunStatus::Failed, Some(error))
            .await
            .context("finalizing failed run")?
        {
            return Ok(false);
        }
        warn!(run_id = %run_id, error, "run failed");

        // The run_failed event derives the session's failed status and
        // notifies subscribers and callbacks. A terminal session already
        // told its own story; a locked one gets the status update directly.
        match self
            .events
            .append(
                session_id,
                Utc::now(),
                EventPayload::RunFailed {
                    error: error.to_string(),
                },
            )
            .await
        {
            Ok(_) | Err(AppendError::SessionTerminal) | Err(AppendError::SessionNotFound(_)) => {}
            Err(AppendError::Conflict) => {
                self.sessions
                    .repository()
                    .set_status_if_open(session_id, orchestrator_protocol::SessionStatus::Failed)
                    .await
                    .context("failing session after append conflict")?;
            }
            Err(AppendError::Internal(e)) => return Err(QueueError::Internal(e)),
        }

        if let Ok(session) = self.sessions.get(session_id).await {
            self.broadcaster.publish(
                Scope {
                    created_by: session.created_by,
                    session_id: session_id.clone(),
                },
                StreamMessage::RunFailed {
                    run_id: run_id.clone(),
                    session_id: session_id.clone(),
                    error: error.to_string(),
                },
            );
        }

        let _ = self.watcher_tx.send(CallbackNotice::RunReleased {
            session_id: session_id.clone(),
        });
        Ok(true)
    }

    async fn mark_session_stopped(&self, session_id: &str) -> Result<(), QueueError> {
        let changed = self
            .sessions
            .repository()
            .set_status_if_open(session_id, orchestrator_protocol::SessionStatus::Stopped)
            .await
            .context("stopping session")?;
        if changed {
            if let Ok(session) = self.sessions.get(session_id).await {
                self.broadcaster.publish(
                    Scope {
                        created_by: session.created_by.clone(),
                        session_id: session_id.to_string(),
                    },
                    StreamMessage::SessionUpdated { session },
                );
            }
            let _ = self.watcher_tx.send(CallbackNotice::SessionTerminal {
                session_id: session_id.to_string(),
                status: orchestrator_protocol::SessionStatus::Stopped,
            });
        }
        Ok(())
    }

    /// Fetch a run for the API.
    pub async fn get(&self, run_id: &str) -> Result<StoredRun, QueueError> {
        self.runs
            .get(run_id)
            .await
            .context("fetching run")?
            .ok_or_else(|| QueueError::RunNotFound(run_id.to_string()))
    }
}

fn merged_params(request: &CreateRunRequest) -> Result<Value, RunCreateError> {
    let mut params = match &request.parameters {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(_) => {
            return Err(RunCreateError::Invalid(
                "parameters must be an object".to_string(),
            ));
        }
        None => json!({}),
    };
    if let Some(prompt) = &request.prompt {
        params["prompt"] = Value::String(prompt.clone());
    }
    Ok(params)
}

fn check_params(blueprint: &AgentBlueprint, params: &Value) -> Result<(), RunCreateError> {
    let schema = blueprint.effective_parameters_schema();
    validate_params(&schema, params).map_err(|e| match e {
        ParamsError::Invalid(failure) => RunCreateError::Validation(failure),
        ParamsError::BadSchema(msg) => RunCreateError::Internal(anyhow!(msg)),
    })
}

fn resolve_text(text: String, vars: &StageOneVars) -> Result<String, PlaceholderError> {
    let mut value = Value::String(text);
    resolve_stage_one(&mut value, vars)?;
    match value {
        Value::String(s) => Ok(s),
        _ => unreachable!("string input resolves to a string"),
    }
}

fn map_session_error(err: SessionError) -> RunCreateError {
    match err {
        SessionError::NotFound(id) => RunCreateError::SessionNotFound(id),
        SessionError::DuplicateName(name) => RunCreateError::DuplicateSession(name),
        SessionError::ParentNotFound(name) => RunCreateError::ParentNotFound(name),
        SessionError::ResultNotReady => {
            RunCreateError::Internal(anyhow!("session result not ready"))
        }
        SessionError::Internal(e) => RunCreateError::Internal(e),
    }
}
