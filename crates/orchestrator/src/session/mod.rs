//! Session registry: CRUD over sessions and result extraction.

mod models;
mod repository;
mod service;

pub use models::{Session, SessionFilter, SessionResult, StatusProbe};
pub use repository::SessionRepository;
pub use service::{NewSession, SessionError, SessionService};
