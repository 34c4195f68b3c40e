//! Runner registry: registration, heartbeats, staleness, removal cascade.

mod models;
mod registry;
mod repository;

pub use models::RunnerRecord;
pub use registry::{RegistryError, RunnerRegistry};
pub use repository::RunnerRepository;
