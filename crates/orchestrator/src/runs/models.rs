//! Run queue request/response models.

use orchestrator_protocol::{PlaceholderError, Run, RunKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use crate::callback::CallbackStrategy;
use crate::params::ValidationFailure;
use crate::session::SessionResult;

/// Whether run creation returns immediately or waits for the result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Async,
    /// Block until the session terminates (bounded by the sync deadline).
    Sync,
}

/// Run creation request.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRunRequest {
    #[serde(rename = "type")]
    pub kind: RunKind,

    /// Required for start/resume; ignored for stop commands.
    #[serde(default)]
    pub agent_name: Option<String>,

    #[serde(default)]
    pub session_name: Option<String>,

    /// Target for resumes and stop commands.
    #[serde(default)]
    pub session_id: Option<String>,

    #[serde(default)]
    pub parameters: Option<Value>,

    /// Sugar for `parameters: {"prompt": ...}` on autonomous agents.
    #[serde(default)]
    pub prompt: Option<String>,

    #[serde(default)]
    pub project_dir: Option<String>,

    #[serde(default)]
    pub mode: RunMode,

    /// Caller-supplied values backing `${scope.*}` placeholders.
    #[serde(default)]
    pub scope: HashMap<String, String>,

    /// Tags a claiming runner must carry.
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub parent_session_id: Option<String>,

    #[serde(default)]
    pub parent_session_name: Option<String>,

    /// Registering a strategy makes this run's session a callback child.
    #[serde(default)]
    pub callback_strategy: Option<CallbackStrategy>,

    #[serde(default)]
    pub batch_delay_seconds: Option<i64>,

    /// Sync-mode deadline override, seconds.
    #[serde(default)]
    pub sync_timeout_secs: Option<u64>,
}

/// Run creation response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRunResponse {
    pub run_id: String,
    pub session_id: String,
    /// Populated in sync mode once the session terminated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SessionResult>,
}

/// A run together with its coordinator-side matching metadata.
#[derive(Debug, Clone)]
pub struct StoredRun {
    pub run: Run,
    pub executor_type: String,
    pub required_tags: Vec<String>,
    /// Runner-owned blueprints bind their runs to the owning runner.
    pub owner_runner_id: Option<String>,
    pub stop_requested: bool,
}

/// Run creation failure modes.
#[derive(Debug, Error)]
pub enum RunCreateError {
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("parent session not found: {0}")]
    ParentNotFound(String),

    #[error("session name already in use: {0}")]
    DuplicateSession(String),

    #[error("parameter validation failed")]
    Validation(Box<ValidationFailure>),

    #[error("placeholder resolution failed: {0}")]
    Placeholder(#[from] PlaceholderError),

    #[error("session has an active run: {0}")]
    Busy(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("deadline exceeded waiting for session result")]
    DeadlineExceeded,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
