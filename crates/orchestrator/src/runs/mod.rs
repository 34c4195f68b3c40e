//! Run queue: enqueue, long-poll claim, status transitions, stop signals.

mod models;
mod queue;
mod repository;

pub use models::{CreateRunRequest, CreateRunResponse, RunCreateError, RunMode, StoredRun};
pub use queue::{QueueError, RunQueue};
pub use repository::RunRepository;
