//! Run supervision.
//!
//! One task per claimed run walks `received → launching → running →
//! reported`. Stop commands arrive through the poll loop and terminate the
//! executor with SIGTERM, a grace interval, then SIGKILL.

use anyhow::{Context, Result, bail};
use orchestrator_protocol::Run;
use rustix::process::{Pid, Signal, kill_process};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::client::CoordinatorClient;
use crate::executor::{self, ExecContext};
use crate::settings::RunnerSettings;

/// How much stderr is kept for failure reports.
const STDERR_TAIL_BYTES: usize = 4096;

/// Supervision phase of one claimed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Received,
    Launching,
    Running,
    Reported,
}

/// What the executor's exit amounts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed(String),
    Stopped(String),
}

/// Classify a process exit.
///
/// A stop request wins over the exit code: a SIGTERM'd executor usually
/// exits nonzero and that is not a failure.
pub fn outcome_of(exit_code: Option<i32>, stop_requested: bool, stderr_tail: &str) -> RunOutcome {
    if stop_requested {
        return RunOutcome::Stopped("stop requested".to_string());
    }
    match exit_code {
        Some(0) => RunOutcome::Completed,
        Some(code) => {
            let mut message = format!("executor exited with code {code}");
            if !stderr_tail.is_empty() {
                message.push_str(": ");
                message.push_str(stderr_tail);
            }
            RunOutcome::Failed(message)
        }
        None => RunOutcome::Failed("executor terminated by signal".to_string()),
    }
}

/// Keep only the trailing bytes of accumulated stderr.
pub fn push_tail(tail: &mut String, chunk: &str, max_bytes: usize) {
    tail.push_str(chunk);
    if tail.len() > max_bytes {
        let cut = tail.len() - max_bytes;
        // Stay on a char boundary.
        let cut = (cut..tail.len())
            .find(|i| tail.is_char_boundary(*i))
            .unwrap_or(tail.len());
        tail.drain(..cut);
    }
}

/// The runner's run supervisor.
pub struct Supervisor {
    client: Arc<CoordinatorClient>,
    settings: RunnerSettings,
    runner_id: String,
    exec_ctx: ExecContext,
    /// Stop signals for in-flight runs.
    active: Mutex<HashMap<String, Arc<Notify>>>,
}

impl Supervisor {
    pub fn new(
        client: Arc<CoordinatorClient>,
        settings: RunnerSettings,
        runner_id: String,
        orchestrator_mcp_url: String,
    ) -> Self {
        let exec_ctx = ExecContext {
            api_url: settings.api_url.clone(),
            api_key: settings.api_key.clone(),
            orchestrator_mcp_url,
            executor_binary: settings.executor_binary.clone(),
            default_project_dir: settings.project_dir.clone(),
        };
        Self {
            client,
            settings,
            runner_id,
            exec_ctx,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// The long-poll loop. Returns an error only when the coordinator no
    /// longer recognizes this runner (caller exits nonzero).
    pub async fn run_loop(self: Arc<Self>) -> Result<()> {
        loop {
            match self
                .client
                .poll(&self.runner_id, self.settings.poll_wait_secs)
                .await
            {
                Ok(response) => {
                    for run_id in &response.stop_runs {
                        self.deliver_stop(run_id).await;
                    }
                    if let Some(run) = response.run {
                        info!(run_id = %run.run_id, agent = %run.agent_name, "claimed run");
                        tokio::spawn(self.clone().execute_run(run));
                    }
                }
                Err(err) if CoordinatorClient::is_not_found(&err) => {
                    bail!("coordinator no longer recognizes this runner: {err}");
                }
                Err(err) => {
                    warn!(error = %err, "poll failed; backing off");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    async fn deliver_stop(&self, run_id: &str) {
        let stop = self.active.lock().await.get(run_id).cloned();
        match stop {
            Some(stop) => {
                info!(run_id, "delivering stop to executor");
                stop.notify_one();
            }
            // Claimed on a previous life of this runner: nothing to kill,
            // settle the queue.
            None => {
                if let Err(err) = self
                    .client
                    .report_stopped(run_id, &self.runner_id, Some("no active process".to_string()))
                    .await
                {
                    warn!(run_id, error = %err, "failed to settle orphaned stop");
                }
            }
        }
    }

    /// Heartbeat task.
    pub fn spawn_heartbeat(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let supervisor = self.clone();
        let interval = Duration::from_secs(self.settings.heartbeat_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = supervisor.client.heartbeat(&supervisor.runner_id).await {
                    warn!(error = %err, "heartbeat failed");
                }
            }
        })
    }

    async fn execute_run(self: Arc<Self>, run: Run) {
        let run_id = run.run_id.clone();
        let stop = Arc::new(Notify::new());
        self.active.lock().await.insert(run_id.clone(), stop.clone());

        if let Err(err) = self.supervise(run, stop).await {
            error!(run_id = %run_id, error = %err, "run supervision failed");
        }
        self.active.lock().await.remove(&run_id);
    }

    async fn supervise(&self, run: Run, stop: Arc<Notify>) -> Result<()> {
        let mut phase = RunPhase::Received;
        debug!(run_id = %run.run_id, ?phase, "supervising run");

        phase = RunPhase::Launching;
        debug!(run_id = %run.run_id, ?phase, "preparing executor");
        let prepared = match executor::prepare(&run, &self.exec_ctx) {
            Ok(prepared) => prepared,
            Err(err) => {
                self.client
                    .report_failed(&run.run_id, &self.runner_id, format!("launch failed: {err:#}"))
                    .await?;
                return Ok(());
            }
        };

        let mut command = Command::new(&prepared.program);
        command
            .args(&prepared.args)
            .envs(&prepared.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &prepared.cwd {
            command.current_dir(cwd);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                self.client
                    .report_failed(
                        &run.run_id,
                        &self.runner_id,
                        format!("spawning {} failed: {err}", prepared.program),
                    )
                    .await?;
                return Ok(());
            }
        };
        debug!(run_id = %run.run_id, pid = child.id(), "executor spawned");

        // The executor reports its own native session handle through its
        // session_start event; the started report only flips the run.
        self.client
            .report_started(&run.run_id, &self.runner_id, None)
            .await?;
        phase = RunPhase::Running;
        debug!(run_id = %run.run_id, ?phase, "executor running");

        let stderr = child.stderr.take();
        let tail = Arc::new(Mutex::new(String::new()));
        let tail_task = stderr.map(|mut stderr| {
            let tail = tail.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                while let Ok(n) = stderr.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                    let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                    push_tail(&mut *tail.lock().await, &chunk, STDERR_TAIL_BYTES);
                }
            })
        });

        let mut stop_requested = false;
        let exit_status = tokio::select! {
            status = child.wait() => status.context("waiting for executor")?,
            _ = stop.notified() => {
                stop_requested = true;
                self.terminate(&mut child).await?
            }
        };
        if let Some(task) = tail_task {
            let _ = task.await;
        }

        let stderr_tail = tail.lock().await.clone();
        let outcome = outcome_of(exit_status.code(), stop_requested, stderr_tail.trim());
        match &outcome {
            RunOutcome::Completed => {
                self.client
                    .report_completed(&run.run_id, &self.runner_id)
                    .await?;
            }
            RunOutcome::Failed(message) => {
                self.client
                    .report_failed(&run.run_id, &self.runner_id, message.clone())
                    .await?;
            }
            RunOutcome::Stopped(reason) => {
                self.client
                    .report_stopped(&run.run_id, &self.runner_id, Some(reason.clone()))
                    .await?;
            }
        }
        phase = RunPhase::Reported;
        info!(run_id = %run.run_id, ?phase, ?outcome, "run reported");
        Ok(())
    }

    /// SIGTERM, grace interval, SIGKILL.
    async fn terminate(&self, child: &mut Child) -> Result<std::process::ExitStatus> {
        if let Some(pid) = child.id().and_then(|id| Pid::from_raw(id as i32)) {
            let _ = kill_process(pid, Signal::TERM);
        }

        let grace = Duration::from_secs(self.settings.stop_grace_secs);
        tokio::select! {
            status = child.wait() => status.context("waiting after SIGTERM"),
            _ = tokio::time::sleep(grace) => {
                warn!("executor ignored SIGTERM; sending SIGKILL");
                child.start_kill().context("sending SIGKILL")?;
                child.wait().await.context("waiting after SIGKILL")
            }
        }
    }
}
