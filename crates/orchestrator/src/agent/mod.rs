//! Agent blueprints: coordinator-owned files and runner-owned registrations.

mod repository;
mod service;
mod store;

pub use repository::AgentRepository;
pub use service::{AgentService, RegisterError, ResolvedBlueprint};
pub use store::AgentFileStore;
