//! Run records.
//!
//! A run is one execution attempt of a session. Runs move from `pending`
//! through an atomic claim to exactly one runner, then to a terminal state.
//! Transitions out of `claimed`/`started` are one-way.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::AgentBlueprint;

/// What a run asks the runner to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Launch a fresh executor for a new session.
    StartSession,
    /// Re-enter an existing session with a new prompt.
    ResumeSession,
    /// Request termination of an in-flight run.
    StopCommand,
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StartSession => write!(f, "start_session"),
            Self::ResumeSession => write!(f, "resume_session"),
            Self::StopCommand => write!(f, "stop_command"),
        }
    }
}

impl std::str::FromStr for RunKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start_session" => Ok(Self::StartSession),
            "resume_session" => Ok(Self::ResumeSession),
            "stop_command" => Ok(Self::StopCommand),
            other => Err(format!("unknown run kind: {other}")),
        }
    }
}

impl TryFrom<String> for RunKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Run lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Queued, not yet assigned to any runner.
    #[default]
    Pending,
    /// Atomically claimed by exactly one runner.
    Claimed,
    /// Runner reported the executor is up.
    Started,
    Finished,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Stopped)
    }

    /// Whether a runner currently holds this run.
    pub fn is_held(self) -> bool {
        matches!(self, Self::Claimed | Self::Started)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Started => "started",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "claimed" => Ok(Self::Claimed),
            "started" => Ok(Self::Started),
            "finished" => Ok(Self::Finished),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

impl TryFrom<String> for RunStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A run record, as stored by the coordinator and as handed to runners.
///
/// By the time a runner sees one of these, `parameters` and
/// `agent_blueprint` have been through stage-1 placeholder resolution; only
/// `${runner.*}` tokens remain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,

    #[serde(rename = "type")]
    pub kind: RunKind,

    pub session_id: String,
    pub session_name: String,
    pub agent_name: String,

    /// Validated, stage-1-resolved run parameters.
    #[serde(default)]
    pub parameters: Value,

    /// Stage-1-resolved blueprint snapshot taken at run creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_blueprint: Option<AgentBlueprint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_name: Option<String>,

    /// The executor framework's native session handle, injected for resumes
    /// when the coordinator is configured to deliver it via the run payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_session_id: Option<String>,

    pub status: RunStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by_runner_id: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_transitions() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Claimed.is_terminal());
        assert!(RunStatus::Claimed.is_held());
        assert!(RunStatus::Started.is_held());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Failed.is_held());
    }

    #[test]
    fn test_run_serialization_uses_type_field() {
        let run = Run {
            run_id: "run_1234".to_string(),
            kind: RunKind::StartSession,
            session_id: "ses_abcd".to_string(),
            session_name: "demo".to_string(),
            agent_name: "researcher".to_string(),
            parameters: serde_json::json!({"prompt": "Hello"}),
            agent_blueprint: None,
            project_dir: None,
            parent_session_id: None,
            parent_session_name: None,
            executor_session_id: None,
            status: RunStatus::Pending,
            claimed_by_runner_id: None,
            created_at: Utc::now(),
            claimed_at: None,
            finished_at: None,
            error: None,
        };
        let json = serde_json::to_string(&run).unwrap();
        assert!(json.contains("\"type\":\"start_session\""));
        assert!(json.contains("\"status\":\"pending\""));

        let parsed: Run = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind, RunKind::StartSession);
        assert_eq!(parsed.session_id, "ses_abcd");
    }
}
