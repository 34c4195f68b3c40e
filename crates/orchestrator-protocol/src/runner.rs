//! Runner registration, heartbeat, and dispatch messages.
//!
//! Runners register once at startup, heartbeat periodically, and long-poll
//! for work. A poll response carries at most one freshly claimed run plus
//! the ids of held runs the coordinator wants stopped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::AgentBlueprint;
use crate::runs::Run;

// ============================================================================
// Registry state
// ============================================================================

/// Runner liveness as tracked by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    /// Heartbeating within the staleness threshold.
    Online,
    /// Missed heartbeats; still eligible to recover.
    Stale,
    /// Removed after the removal threshold; owned runs were failed.
    Removed,
}

impl std::fmt::Display for RunnerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Online => "online",
            Self::Stale => "stale",
            Self::Removed => "removed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunnerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Self::Online),
            "stale" => Ok(Self::Stale),
            "removed" => Ok(Self::Removed),
            other => Err(format!("unknown runner status: {other}")),
        }
    }
}

impl TryFrom<String> for RunnerStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Registry dump entry for one runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerInfo {
    pub runner_id: String,
    pub hostname: String,
    pub executor_type: String,
    pub executor_profile: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: RunnerStatus,
    pub last_heartbeat: DateTime<Utc>,
    /// Blueprints this runner owns (procedural profiles only).
    #[serde(default)]
    pub agents: Vec<AgentBlueprint>,
}

// ============================================================================
// Registration and heartbeat
// ============================================================================

/// Sent by a runner once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRunnerRequest {
    pub hostname: String,
    pub executor_type: String,
    pub executor_profile: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Runner-owned blueprints. Name conflicts reject the whole registration.
    #[serde(default)]
    pub agents: Vec<AgentBlueprint>,
}

/// Coordinator acknowledgment carrying the server-issued id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRunnerResponse {
    pub runner_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub runner_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub status: RunnerStatus,
}

// ============================================================================
// Dispatch
// ============================================================================

/// Long-poll response.
///
/// An empty response (no run, no stop_runs) marks an expired wait and is
/// not an error; the runner simply polls again.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<Run>,
    /// Ids of held runs this runner must stop.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_runs: Vec<String>,
}

impl PollResponse {
    pub fn is_empty(&self) -> bool {
        self.run.is_none() && self.stop_runs.is_empty()
    }
}

// ============================================================================
// Status reports
// ============================================================================

/// `claimed → started`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportStartedRequest {
    pub runner_id: String,
    /// Native session handle of the executor framework, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_session_id: Option<String>,
}

/// `started → finished`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportCompletedRequest {
    pub runner_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// `claimed | started → failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportFailedRequest {
    pub runner_id: String,
    pub error: String,
}

/// `claimed | started → stopped`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportStoppedRequest {
    pub runner_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
