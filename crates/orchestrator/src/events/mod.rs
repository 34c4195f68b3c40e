//! Append-only per-session event log and status derivation.

mod log;
mod repository;

pub use log::EventLog;
pub use repository::{AppendError, AppendOutcome, EventRepository};
