//! Session event types.
//!
//! Events form an append-only per-session log. Executors post them while a
//! run is in flight; the coordinator assigns each one a monotonically
//! increasing `sequence` and derives the session status from terminal
//! events. Timestamps are writer-provided and may skew — `sequence` is the
//! authoritative order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Session status
// ============================================================================

/// Session lifecycle status, derived from the event log.
///
/// Transitions are one-way: a terminal session never returns to `running`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, no events yet.
    #[default]
    Pending,
    /// At least one event appended.
    Running,
    /// Terminal: `session_stop` with exit code 0, or a `result` event.
    Finished,
    /// Terminal: `session_stop` with nonzero exit code, or `run_failed`.
    Failed,
    /// Terminal: explicitly stopped.
    Stopped,
}

impl SessionStatus {
    /// Whether no further events are accepted.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Stopped)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "finished" => Ok(Self::Finished),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

// Row mapping for stores keeping status as TEXT.
impl TryFrom<String> for SessionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ============================================================================
// Event payloads
// ============================================================================

/// Role of a message event author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// A block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text { text: String },
    /// Structured data attached to the message.
    Data { data: Value },
}

/// How a session's result was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    /// Emitted by an AI harness.
    Autonomous,
    /// Emitted by a deterministic CLI executor.
    Procedural,
}

/// Type-specific event payload, tagged by `event_type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Executor came up for this session.
    SessionStart {
        /// The executor framework's native session handle, when it has one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        executor_session_id: Option<String>,
    },

    /// Executor exited. Terminal.
    SessionStop {
        exit_code: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// A tool is about to be invoked.
    PreTool {
        tool_name: String,
        #[serde(default)]
        tool_input: Value,
    },

    /// A tool invocation returned.
    PostTool {
        tool_name: String,
        #[serde(default)]
        tool_output: Value,
    },

    /// A conversation message.
    Message {
        role: MessageRole,
        content: Vec<ContentBlock>,
    },

    /// Final result of the session. Terminal.
    Result {
        result_type: ResultType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_data: Option<Value>,
    },

    /// The run backing this session failed outside the executor's control.
    RunFailed { error: String },
}

impl EventPayload {
    /// Whether this event closes the session log.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SessionStop { .. } | Self::Result { .. })
    }

    /// The `event_type` tag as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionStart { .. } => "session_start",
            Self::SessionStop { .. } => "session_stop",
            Self::PreTool { .. } => "pre_tool",
            Self::PostTool { .. } => "post_tool",
            Self::Message { .. } => "message",
            Self::Result { .. } => "result",
            Self::RunFailed { .. } => "run_failed",
        }
    }

    /// The session status this event forces, if any.
    ///
    /// `None` means the event only moves a pending session to running.
    pub fn derived_status(&self) -> Option<SessionStatus> {
        match self {
            Self::SessionStop { exit_code: 0, .. } => Some(SessionStatus::Finished),
            Self::SessionStop { .. } => Some(SessionStatus::Failed),
            Self::Result { .. } => Some(SessionStatus::Finished),
            Self::RunFailed { .. } => Some(SessionStatus::Failed),
            _ => None,
        }
    }
}

/// A stored event: payload plus the coordinates the log writer assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: String,
    /// Monotonically increasing within the session; assigned by the log.
    pub sequence: i64,
    /// Writer-provided; may be non-monotonic under clock skew.
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl SessionEvent {
    /// Concatenated text of all `Text` blocks for a message event.
    ///
    /// Returns `None` for non-message events and text-free messages.
    pub fn message_text(&self) -> Option<String> {
        let EventPayload::Message { content, .. } = &self.payload else {
            return None;
        };
        let text: Vec<&str> = content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Data { .. } => None,
            })
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text.join("\n"))
        }
    }
}
