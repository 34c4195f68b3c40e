//! Parent/child callback graph: registration and parent re-entry.

mod coordinator;
mod models;
mod repository;

pub use coordinator::{CallbackCoordinator, CallbackError};
pub use models::{CallbackRegistration, CallbackStatus, CallbackStrategy};
pub use repository::CallbackRepository;

use orchestrator_protocol::SessionStatus;

/// Notices consumed by the callback watcher task.
#[derive(Debug, Clone)]
pub enum CallbackNotice {
    /// A session reached a terminal status (child completion trigger).
    SessionTerminal {
        session_id: String,
        status: SessionStatus,
    },
    /// A run holding this session ended; deferred callbacks against it may
    /// now dispatch.
    RunReleased { session_id: String },
}
