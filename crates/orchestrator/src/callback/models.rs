//! Callback registration models.

use chrono::{DateTime, Utc};
use orchestrator_protocol::SessionStatus;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// When a parent is re-entered relative to its children's completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStrategy {
    /// Fire on the first child terminal state.
    Immediate,
    /// Aggregate completions for `batch_delay_seconds` after the first.
    Batch,
    /// Fire once every registration of the parent has terminated.
    All,
}

impl std::fmt::Display for CallbackStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Immediate => "immediate",
            Self::Batch => "batch",
            Self::All => "all",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for CallbackStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(Self::Immediate),
            "batch" => Ok(Self::Batch),
            "all" => Ok(Self::All),
            other => Err(format!("unknown callback strategy: {other}")),
        }
    }
}

impl TryFrom<String> for CallbackStrategy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Callback lifecycle; transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    /// Registered; the child session does not exist yet.
    Pending,
    /// Child session created and attached.
    ChildRunning,
    /// Child reached terminal state; dispatch pending (window or parent
    /// idleness).
    ChildCompleted,
    /// Parent re-entry run enqueued. Terminal.
    CallbackSent,
    /// Dispatch failed; no retry. Terminal.
    CallbackFailed,
    /// Terminal.
    Cancelled,
}

impl CallbackStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::CallbackSent | Self::CallbackFailed | Self::Cancelled
        )
    }
}

impl std::fmt::Display for CallbackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::ChildRunning => "child_running",
            Self::ChildCompleted => "child_completed",
            Self::CallbackSent => "callback_sent",
            Self::CallbackFailed => "callback_failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for CallbackStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "child_running" => Ok(Self::ChildRunning),
            "child_completed" => Ok(Self::ChildCompleted),
            "callback_sent" => Ok(Self::CallbackSent),
            "callback_failed" => Ok(Self::CallbackFailed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown callback status: {other}")),
        }
    }
}

impl TryFrom<String> for CallbackStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One parent/child registration.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CallbackRegistration {
    pub callback_id: String,
    pub parent_session_id: String,
    pub parent_session_name: String,
    pub child_session_name: String,
    /// Null until the child session is actually created.
    pub child_session_id: Option<String>,
    #[sqlx(try_from = "String")]
    pub strategy: CallbackStrategy,
    pub batch_delay_seconds: i64,
    #[sqlx(try_from = "String")]
    pub status: CallbackStatus,
    /// The child's terminal status, once reached.
    pub child_status: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CallbackRegistration {
    pub fn child_terminal_status(&self) -> Option<SessionStatus> {
        self.child_status.as_deref().and_then(|s| s.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_round_trip() {
        for strategy in [
            CallbackStrategy::Immediate,
            CallbackStrategy::Batch,
            CallbackStrategy::All,
        ] {
            let parsed: CallbackStrategy = strategy.to_string().parse().unwrap();
            assert_eq!(parsed, strategy);
        }
    }

    #[test]
    fn test_status_terminality() {
        assert!(!CallbackStatus::Pending.is_terminal());
        assert!(!CallbackStatus::ChildCompleted.is_terminal());
        assert!(CallbackStatus::CallbackSent.is_terminal());
        assert!(CallbackStatus::Cancelled.is_terminal());
    }
}
