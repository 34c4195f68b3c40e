//! Session data models.

use chrono::{DateTime, Utc};
use orchestrator_protocol::{ResultType, SessionStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// A named, persistent task instance owning an event log.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    /// Server-issued opaque id (`ses_` + 16 hex).
    pub session_id: String,
    /// User-facing label, unique per creator.
    pub session_name: String,
    pub project_dir: Option<String>,
    pub agent_name: String,
    pub created_by: String,
    /// By-name reference; not updated if the parent is renamed.
    pub parent_session_name: Option<String>,
    /// Derived from the event log; terminal states are final.
    #[sqlx(try_from = "String")]
    pub status: SessionStatus,
    /// The executor framework's native session handle, captured from the
    /// first `session_start` event or a runner's started report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_resumed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Listing filter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionFilter {
    pub created_by: Option<String>,
    pub status: Option<SessionStatus>,
    pub agent_name: Option<String>,
}

/// Extracted result payload of a terminal session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResult {
    pub session_id: String,
    pub result_type: ResultType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_data: Option<Value>,
}

/// Coarse three-way status probe used by orchestrating agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusProbe {
    Running,
    Finished,
    NotExistent,
}

impl StatusProbe {
    /// Collapse a full status into the probe's three answers.
    pub fn from_status(status: SessionStatus) -> Self {
        if status.is_terminal() {
            Self::Finished
        } else {
            Self::Running
        }
    }
}
