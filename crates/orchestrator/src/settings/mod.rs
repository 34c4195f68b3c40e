//! Coordinator configuration.
//!
//! TOML file via the `config` crate, with the well-known environment
//! variables (`AGENT_ORCHESTRATOR_*`, `AUTH_ENABLED`) layered on top.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::auth::UserToken;

/// How the executor's native session handle reaches a resumed executor.
///
/// Exactly one path is taken for all resumes; this is deliberately a knob
/// rather than a hardcoded choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeIdSource {
    /// The coordinator stamps it into the resume run payload.
    #[default]
    RunPayload,
    /// The executor fetches it from the session API itself.
    SessionApi,
}

/// Whether later batch completions restart the aggregation window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchWindowMode {
    /// Window anchored at the first child completion.
    #[default]
    Fixed,
    /// Every completion restarts the delay.
    Sliding,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub user_tokens: Vec<UserToken>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            user_tokens: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// T_stale: seconds without a heartbeat before `online → stale`.
    pub stale_after_secs: u64,
    /// T_remove: seconds without a heartbeat before `stale → removed`.
    pub remove_after_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            stale_after_secs: 120,
            remove_after_secs: 600,
            sweep_interval_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Server ceiling on long-poll waits.
    pub max_poll_wait_secs: u64,
    /// Default sync-mode deadline.
    pub sync_timeout_secs: u64,
    /// Executor type autonomous (file-backed) blueprints dispatch to.
    pub autonomous_executor_type: String,
    pub resume_id_source: ResumeIdSource,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_poll_wait_secs: 30,
            sync_timeout_secs: 300,
            autonomous_executor_type: "claude-sdk".to_string(),
            resume_id_source: ResumeIdSource::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CallbackSettings {
    pub batch_window_mode: BatchWindowMode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Replay buffer retention for `Last-Event-ID` resume.
    pub replay_window_secs: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            replay_window_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub listen_addr: SocketAddr,
    pub database_path: PathBuf,
    /// Coordinator-owned blueprint directory.
    pub agents_dir: Option<PathBuf>,
    pub auth: AuthSettings,
    pub runners: RunnerSettings,
    pub queue: QueueSettings,
    pub callbacks: CallbackSettings,
    pub stream: StreamSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8420".parse().expect("default listen address"),
            database_path: PathBuf::from("data/orchestrator.db"),
            agents_dir: None,
            auth: AuthSettings::default(),
            runners: RunnerSettings::default(),
            queue: QueueSettings::default(),
            callbacks: CallbackSettings::default(),
            stream: StreamSettings::default(),
        }
    }
}

impl Settings {
    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.to_path_buf()));
        }
        let mut settings: Settings = builder
            .build()
            .context("assembling configuration")?
            .try_deserialize()
            .context("parsing configuration")?;
        settings.apply_env();
        Ok(settings)
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var("AGENT_ORCHESTRATOR_AGENTS_DIR") {
            if !dir.is_empty() {
                self.agents_dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(key) = std::env::var("AGENT_ORCHESTRATOR_API_KEY") {
            if !key.is_empty() {
                self.auth.api_key = Some(key);
            }
        }
        if let Ok(enabled) = std::env::var("AUTH_ENABLED") {
            self.auth.enabled = !matches!(enabled.as_str(), "0" | "false" | "no");
        }
    }
}
