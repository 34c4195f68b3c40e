//! Runner-side supervisor library.
//!
//! The runner registers with the coordinator, heartbeats, long-polls for
//! runs, resolves the `${runner.*}` placeholders, spawns executor
//! processes, and reports their fate. It also hosts a small MCP facade
//! executors use to spawn child agents.

pub mod client;
pub mod executor;
pub mod mcp;
pub mod settings;
pub mod supervisor;
