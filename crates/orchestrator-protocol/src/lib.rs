//! Canonical protocol types for the agent orchestrator.
//!
//! Everything that crosses a process boundary lives here: session events
//! streamed by executors, run records handed to runners, agent blueprints,
//! and the runner registration/poll/report messages. The placeholder
//! resolver is also shared because substitution happens in two stages on
//! two different hosts (coordinator, then runner).

pub mod agents;
pub mod events;
pub mod placeholder;
pub mod runner;
pub mod runs;

pub use agents::{AgentBlueprint, AgentKind};
pub use events::{ContentBlock, EventPayload, MessageRole, ResultType, SessionEvent, SessionStatus};
pub use placeholder::{PlaceholderError, StageOneVars, resolve_stage_one, resolve_stage_two};
pub use runner::{
    HeartbeatRequest, HeartbeatResponse, PollResponse, RegisterRunnerRequest,
    RegisterRunnerResponse, ReportCompletedRequest, ReportFailedRequest, ReportStartedRequest,
    ReportStoppedRequest, RunnerInfo, RunnerStatus,
};
pub use runs::{Run, RunKind, RunStatus};
