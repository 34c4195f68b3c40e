//! Agent coordinator library.
//!
//! A control plane for AI-agent and CLI task execution: callers create
//! runs, runners long-poll and claim them, executors stream events back
//! into per-session logs, and parent sessions are re-entered when their
//! children finish.

pub mod agent;
pub mod api;
pub mod auth;
pub mod broadcast;
pub mod callback;
pub mod db;
pub mod events;
pub mod ids;
pub mod observability;
pub mod params;
pub mod runner;
pub mod runs;
pub mod session;
pub mod settings;

#[cfg(test)]
pub(crate) mod testutil;
