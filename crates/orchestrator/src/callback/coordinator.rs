//! Callback coordinator: strategy evaluation and parent re-entry.
//!
//! A single watcher task consumes terminal/release notices from the event
//! log and the run queue. Batch windows live in the watcher's local state;
//! everything durable is in the callbacks table, so a deferred dispatch is
//! never lost while the coordinator is healthy.

use anyhow::{Context, Result};
use orchestrator_protocol::{RunKind, SessionStatus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::models::{CallbackRegistration, CallbackStatus, CallbackStrategy};
use super::repository::CallbackRepository;
use super::CallbackNotice;
use crate::runs::{CreateRunRequest, RunCreateError, RunMode, RunQueue, RunRepository};
use crate::session::{SessionError, SessionService};
use crate::settings::BatchWindowMode;

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("callback not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Open batch windows, keyed by parent session id.
pub type BatchWindows = HashMap<String, Instant>;

/// Drives parent re-entry off child terminal states.
pub struct CallbackCoordinator {
    callbacks: CallbackRepository,
    sessions: SessionService,
    runs: RunRepository,
    queue: Arc<RunQueue>,
    window_mode: BatchWindowMode,
}

impl CallbackCoordinator {
    pub fn new(
        callbacks: CallbackRepository,
        sessions: SessionService,
        runs: RunRepository,
        queue: Arc<RunQueue>,
        window_mode: BatchWindowMode,
    ) -> Self {
        Self {
            callbacks,
            sessions,
            runs,
            queue,
            window_mode,
        }
    }

    /// The watcher loop: notices in, dispatches out.
    pub fn spawn_watcher(
        self: &Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<CallbackNotice>,
    ) -> tokio::task::JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut windows = BatchWindows::new();
            loop {
                let next_deadline = windows.values().min().copied();
                tokio::select! {
                    notice = rx.recv() => {
                        let Some(notice) = notice else { break };
                        if let Err(err) = coordinator.handle_notice(notice, &mut windows).await {
                            error!(error = %err, "callback notice handling failed");
                        }
                    }
                    _ = async {
                        match next_deadline {
                            Some(deadline) => tokio::time::sleep_until(deadline).await,
                            // No window open: recv above is the only wakeup.
                            None => std::future::pending().await,
                        }
                    } => {
                        if let Err(err) = coordinator.flush_due_windows(&mut windows).await {
                            error!(error = %err, "batch window flush failed");
                        }
                    }
                }
            }
        })
    }

    /// Process one notice. Public so tests can drive the coordinator
    /// deterministically.
    pub async fn handle_notice(
        &self,
        notice: CallbackNotice,
        windows: &mut BatchWindows,
    ) -> Result<()> {
        match notice {
            CallbackNotice::SessionTerminal { session_id, status } => {
                self.on_child_terminal(&session_id, status, windows).await
            }
            CallbackNotice::RunReleased { session_id } => {
                self.on_run_released(&session_id, windows).await
            }
        }
    }

    async fn on_child_terminal(
        &self,
        child_session_id: &str,
        status: SessionStatus,
        windows: &mut BatchWindows,
    ) -> Result<()> {
        let watching = self.callbacks.watching_child(child_session_id).await?;
        if watching.is_empty() {
            return Ok(());
        }

        for registration in &watching {
            self.callbacks
                .mark_child_completed(&registration.callback_id, &status.to_string())
                .await?;
            info!(
                callback_id = %registration.callback_id,
                child = %registration.child_session_name,
                status = %status,
                "callback child completed"
            );
        }

        for registration in watching {
            match registration.strategy {
                CallbackStrategy::Immediate => {
                    self.try_dispatch(
                        &registration.parent_session_id,
                        vec![self
                            .callbacks
                            .get(&registration.callback_id)
                            .await?
                            .context("completed callback vanished")?],
                    )
                    .await?;
                }
                CallbackStrategy::Batch => {
                    let deadline = Instant::now()
                        + Duration::from_secs(registration.batch_delay_seconds.max(0) as u64);
                    let parent = registration.parent_session_id.clone();
                    match self.window_mode {
                        BatchWindowMode::Fixed => {
                            windows.entry(parent).or_insert(deadline);
                        }
                        BatchWindowMode::Sliding => {
                            windows.insert(parent, deadline);
                        }
                    }
                }
                CallbackStrategy::All => {
                    self.try_dispatch_all_strategy(&registration.parent_session_id)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// A parent's run ended; deferred completions may dispatch now.
    async fn on_run_released(
        &self,
        parent_session_id: &str,
        windows: &mut BatchWindows,
    ) -> Result<()> {
        let completed = self.callbacks.completed_for_parent(parent_session_id).await?;
        if completed.is_empty() {
            return Ok(());
        }

        let mut immediate = Vec::new();
        let mut batch = Vec::new();
        for registration in completed {
            match registration.strategy {
                CallbackStrategy::Immediate => immediate.push(registration),
                // An open window still owns its registrations.
                CallbackStrategy::Batch => {
                    if !windows.contains_key(parent_session_id) {
                        batch.push(registration);
                    }
                }
                CallbackStrategy::All => {}
            }
        }

        for registration in immediate {
            self.try_dispatch(parent_session_id, vec![registration])
                .await?;
        }
        if !batch.is_empty() {
            self.try_dispatch(parent_session_id, batch).await?;
        }
        self.try_dispatch_all_strategy(parent_session_id).await?;
        Ok(())
    }

    /// Flush every window whose deadline has passed.
    pub async fn flush_due_windows(&self, windows: &mut BatchWindows) -> Result<()> {
        let now = Instant::now();
        let due: Vec<String> = windows
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(parent, _)| parent.clone())
            .collect();

        for parent in due {
            windows.remove(&parent);
            let batch: Vec<CallbackRegistration> = self
                .callbacks
                .completed_for_parent(&parent)
                .await?
                .into_iter()
                .filter(|r| r.strategy == CallbackStrategy::Batch)
                .collect();
            self.try_dispatch(&parent, batch).await?;
        }
        Ok(())
    }

    /// Dispatch the `all` aggregate once every registration terminated.
    async fn try_dispatch_all_strategy(&self, parent_session_id: &str) -> Result<()> {
        let all: Vec<CallbackRegistration> = self
            .callbacks
            .for_parent(parent_session_id)
            .await?
            .into_iter()
            .filter(|r| r.strategy == CallbackStrategy::All)
            .filter(|r| r.status != CallbackStatus::Cancelled)
            .collect();
        if all.is_empty() {
            return Ok(());
        }

        let every_child_done = all
            .iter()
            .all(|r| !matches!(r.status, CallbackStatus::Pending | CallbackStatus::ChildRunning));
        if !every_child_done {
            return Ok(());
        }

        let dispatchable: Vec<CallbackRegistration> = all
            .into_iter()
            .filter(|r| r.status == CallbackStatus::ChildCompleted)
            .collect();
        self.try_dispatch(parent_session_id, dispatchable).await
    }

    /// Enqueue the parent's re-entry if it is idle; otherwise leave the
    /// registrations in `child_completed` for the next release notice.
    async fn try_dispatch(
        &self,
        parent_session_id: &str,
        registrations: Vec<CallbackRegistration>,
    ) -> Result<()> {
        if registrations.is_empty() {
            return Ok(());
        }

        let parent = match self.sessions.get(parent_session_id).await {
            Ok(parent) => parent,
            Err(SessionError::NotFound(_)) => {
                for registration in registrations {
                    self.callbacks
                        .set_status(&registration.callback_id, CallbackStatus::Cancelled)
                        .await?;
                }
                return Ok(());
            }
            Err(SessionError::Internal(e)) => return Err(e),
            Err(other) => return Err(anyhow::anyhow!(other)),
        };

        // Parent idle check: a held run defers the dispatch, it does not
        // lose the completion.
        if self
            .runs
            .active_for_session(parent_session_id)
            .await?
            .is_some()
        {
            return Ok(());
        }

        let prompt = completion_prompt(&registrations);
        let request = CreateRunRequest {
            kind: RunKind::ResumeSession,
            agent_name: None,
            session_name: None,
            session_id: Some(parent_session_id.to_string()),
            parameters: None,
            prompt: Some(prompt),
            project_dir: None,
            mode: RunMode::Async,
            scope: HashMap::new(),
            tags: Vec::new(),
            parent_session_id: None,
            parent_session_name: None,
            callback_strategy: None,
            batch_delay_seconds: None,
            sync_timeout_secs: None,
        };

        match self.queue.create(&parent.created_by, request).await {
            Ok(response) => {
                info!(
                    parent_session_id,
                    run_id = %response.run_id,
                    children = registrations.len(),
                    "callback dispatched"
                );
                for registration in registrations {
                    self.callbacks
                        .set_status(&registration.callback_id, CallbackStatus::CallbackSent)
                        .await?;
                }
            }
            // Raced a new run into the parent: defer, a release notice
            // follows.
            Err(RunCreateError::Busy(_)) => {}
            Err(err) => {
                warn!(parent_session_id, error = %err, "callback dispatch failed");
                for registration in registrations {
                    self.callbacks
                        .set_status(&registration.callback_id, CallbackStatus::CallbackFailed)
                        .await?;
                }
            }
        }
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<CallbackRegistration>, CallbackError> {
        Ok(self.callbacks.list().await?)
    }

    /// Explicit cancellation of a live registration.
    pub async fn cancel(&self, callback_id: &str) -> Result<CallbackRegistration, CallbackError> {
        let registration = self
            .callbacks
            .get(callback_id)
            .await?
            .ok_or_else(|| CallbackError::NotFound(callback_id.to_string()))?;
        if !registration.status.is_terminal() {
            self.callbacks
                .set_status(callback_id, CallbackStatus::Cancelled)
                .await?;
        }
        Ok(self
            .callbacks
            .get(callback_id)
            .await?
            .ok_or_else(|| CallbackError::NotFound(callback_id.to_string()))?)
    }
}

/// The synthetic prompt the parent wakes up to.
fn completion_prompt(registrations: &[CallbackRegistration]) -> String {
    let mut lines = vec![
        "The following child sessions have finished:".to_string(),
    ];
    for registration in registrations {
        let child_id = registration.child_session_id.as_deref().unwrap_or("unknown");
        let status = registration
            .child_status
            .as_deref()
            .unwrap_or("finished");
        lines.push(format!(
            "- {} (session_id: {child_id}, status: {status})",
            registration.child_session_name
        ));
    }
    lines.push(
        "Fetch each child's output with the session result API before continuing.".to_string(),
    );
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestStack;
    use chrono::Utc;
    use orchestrator_protocol::{EventPayload, ResultType, RunStatus};
    use std::time::Duration as StdDuration;
    use tokio::sync::mpsc::UnboundedReceiver;

    const WAIT: StdDuration = StdDuration::from_millis(20);

    /// Feed every queued notice through the coordinator by hand.
    async fn drain(
        stack: &TestStack,
        rx: &mut UnboundedReceiver<CallbackNotice>,
        windows: &mut BatchWindows,
    ) {
        while let Ok(notice) = rx.try_recv() {
            stack
                .coordinator
                .handle_notice(notice, windows)
                .await
                .unwrap();
        }
    }

    /// Run a start request through claim, result, and completion.
    async fn run_to_finish(stack: &TestStack, runner_id: &str, request: crate::runs::CreateRunRequest) -> (String, String) {
        let created = stack.queue.create("alice", request).await.unwrap();
        let run = stack
            .queue
            .poll(runner_id, WAIT)
            .await
            .unwrap()
            .run
            .expect("claimed run");
        assert_eq!(run.run_id, created.run_id);
        stack
            .queue
            .report_started(&created.run_id, runner_id, None)
            .await
            .unwrap();
        stack
            .events
            .append(
                &created.session_id,
                Utc::now(),
                EventPayload::Result {
                    result_type: ResultType::Autonomous,
                    result_text: Some("done".to_string()),
                    result_data: None,
                },
            )
            .await
            .unwrap();
        stack
            .queue
            .report_completed(&created.run_id, runner_id)
            .await
            .unwrap();
        (created.run_id, created.session_id)
    }

    fn child_request(parent_session_id: &str, strategy: CallbackStrategy) -> crate::runs::CreateRunRequest {
        let mut request = TestStack::start_request("child work");
        request.parent_session_id = Some(parent_session_id.to_string());
        request.callback_strategy = Some(strategy);
        request
    }

    #[tokio::test]
    async fn test_immediate_callback_resumes_idle_parent() {
        let mut stack = TestStack::new().await;
        let mut rx = stack.watcher_rx.take().unwrap();
        let mut windows = BatchWindows::new();
        let runner_id = stack.register_runner("claude-sdk", &[], vec![]).await;

        let (_run, parent_id) =
            run_to_finish(&stack, &runner_id, TestStack::start_request("parent")).await;
        let (_run, child_id) = run_to_finish(
            &stack,
            &runner_id,
            child_request(&parent_id, CallbackStrategy::Immediate),
        )
        .await;

        drain(&stack, &mut rx, &mut windows).await;

        // The parent got a pending resume with a prompt naming the child.
        let open = stack.runs.open_for_session(&parent_id).await.unwrap();
        assert_eq!(open.len(), 1);
        let resume = &open[0].run;
        assert_eq!(resume.kind, orchestrator_protocol::RunKind::ResumeSession);
        let prompt = resume.parameters["prompt"].as_str().unwrap();
        assert!(prompt.contains(&child_id));

        let callbacks = stack.coordinator.list().await.unwrap();
        assert_eq!(callbacks.len(), 1);
        assert_eq!(callbacks[0].status, CallbackStatus::CallbackSent);
    }

    #[tokio::test]
    async fn test_callback_defers_until_parent_idle() {
        let mut stack = TestStack::new().await;
        let mut rx = stack.watcher_rx.take().unwrap();
        let mut windows = BatchWindows::new();
        let runner_id = stack.register_runner("claude-sdk", &[], vec![]).await;

        // Parent run stays claimed: the parent is busy.
        let parent = stack
            .queue
            .create("alice", TestStack::start_request("parent"))
            .await
            .unwrap();
        stack.queue.poll(&runner_id, WAIT).await.unwrap();

        let (_run, _child_id) = run_to_finish(
            &stack,
            &runner_id,
            child_request(&parent.session_id, CallbackStrategy::Immediate),
        )
        .await;
        drain(&stack, &mut rx, &mut windows).await;

        // Deferred: the completion is recorded but no resume exists yet.
        let callbacks = stack.coordinator.list().await.unwrap();
        assert_eq!(callbacks[0].status, CallbackStatus::ChildCompleted);
        let open = stack.runs.open_for_session(&parent.session_id).await.unwrap();
        assert_eq!(open.len(), 1, "only the parent's own run is open");

        // Parent's run ends; the release notice dispatches the callback.
        stack
            .queue
            .report_completed(&parent.run_id, &runner_id)
            .await
            .unwrap();
        drain(&stack, &mut rx, &mut windows).await;

        let callbacks = stack.coordinator.list().await.unwrap();
        assert_eq!(callbacks[0].status, CallbackStatus::CallbackSent);
        let open = stack.runs.open_for_session(&parent.session_id).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].run.status, RunStatus::Pending);
        assert_eq!(
            open[0].run.kind,
            orchestrator_protocol::RunKind::ResumeSession
        );
    }

    #[tokio::test]
    async fn test_all_strategy_waits_for_every_child() {
        let mut stack = TestStack::new().await;
        let mut rx = stack.watcher_rx.take().unwrap();
        let mut windows = BatchWindows::new();
        let runner_id = stack.register_runner("claude-sdk", &[], vec![]).await;

        let (_run, parent_id) =
            run_to_finish(&stack, &runner_id, TestStack::start_request("parent")).await;
        drain(&stack, &mut rx, &mut windows).await;

        let (_r1, _c1) = run_to_finish(
            &stack,
            &runner_id,
            child_request(&parent_id, CallbackStrategy::All),
        )
        .await;
        // Second child registered but still running.
        let second = stack
            .queue
            .create("alice", child_request(&parent_id, CallbackStrategy::All))
            .await
            .unwrap();
        stack.queue.poll(&runner_id, WAIT).await.unwrap();

        drain(&stack, &mut rx, &mut windows).await;
        let open = stack.runs.open_for_session(&parent_id).await.unwrap();
        assert!(open.is_empty(), "no dispatch while a child is running");

        // Second child finishes; the aggregate fires once.
        stack
            .events
            .append(
                &second.session_id,
                Utc::now(),
                EventPayload::Result {
                    result_type: ResultType::Autonomous,
                    result_text: Some("done".to_string()),
                    result_data: None,
                },
            )
            .await
            .unwrap();
        stack
            .queue
            .report_completed(&second.run_id, &runner_id)
            .await
            .unwrap();
        drain(&stack, &mut rx, &mut windows).await;

        let open = stack.runs.open_for_session(&parent_id).await.unwrap();
        assert_eq!(open.len(), 1);
        let callbacks = stack.coordinator.list().await.unwrap();
        assert!(
            callbacks
                .iter()
                .all(|c| c.status == CallbackStatus::CallbackSent)
        );
    }

    #[tokio::test]
    async fn test_batch_window_flush_dispatches_aggregate() {
        let mut stack = TestStack::new().await;
        let mut rx = stack.watcher_rx.take().unwrap();
        let mut windows = BatchWindows::new();
        let runner_id = stack.register_runner("claude-sdk", &[], vec![]).await;

        let (_run, parent_id) =
            run_to_finish(&stack, &runner_id, TestStack::start_request("parent")).await;
        drain(&stack, &mut rx, &mut windows).await;

        let (_r, _c) = run_to_finish(
            &stack,
            &runner_id,
            child_request(&parent_id, CallbackStrategy::Batch),
        )
        .await;
        drain(&stack, &mut rx, &mut windows).await;

        // The window is open; nothing dispatched before the deadline.
        assert!(windows.contains_key(&parent_id));
        stack.coordinator.flush_due_windows(&mut windows).await.unwrap();
        assert!(!windows.contains_key(&parent_id));

        let open = stack.runs.open_for_session(&parent_id).await.unwrap();
        assert_eq!(open.len(), 1);
        let callbacks = stack.coordinator.list().await.unwrap();
        assert_eq!(callbacks[0].status, CallbackStatus::CallbackSent);
    }

    #[tokio::test]
    async fn test_explicit_cancel() {
        let stack = TestStack::new().await;
        let runner_id = stack.register_runner("claude-sdk", &[], vec![]).await;

        let (_run, parent_id) =
            run_to_finish(&stack, &runner_id, TestStack::start_request("parent")).await;
        stack
            .queue
            .create("alice", child_request(&parent_id, CallbackStrategy::Immediate))
            .await
            .unwrap();

        let callbacks = stack.coordinator.list().await.unwrap();
        let cancelled = stack
            .coordinator
            .cancel(&callbacks[0].callback_id)
            .await
            .unwrap();
        assert_eq!(cancelled.status, CallbackStatus::Cancelled);

        // Cancelling again is a no-op on a terminal registration.
        let again = stack
            .coordinator
            .cancel(&callbacks[0].callback_id)
            .await
            .unwrap();
        assert_eq!(again.status, CallbackStatus::Cancelled);
    }

    fn registration(name: &str, status: &str) -> CallbackRegistration {
        CallbackRegistration {
            callback_id: "cb-1".to_string(),
            parent_session_id: "ses_p".to_string(),
            parent_session_name: "parent".to_string(),
            child_session_name: name.to_string(),
            child_session_id: Some("ses_c".to_string()),
            strategy: CallbackStrategy::Immediate,
            batch_delay_seconds: 0,
            status: CallbackStatus::ChildCompleted,
            child_status: Some(status.to_string()),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_completion_prompt_names_children_and_statuses() {
        let prompt = completion_prompt(&[
            registration("crawler", "finished"),
            registration("indexer", "failed"),
        ]);
        assert!(prompt.contains("crawler"));
        assert!(prompt.contains("indexer"));
        assert!(prompt.contains("status: failed"));
        assert!(prompt.contains("session result API"));
    }
}
