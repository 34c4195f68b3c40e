//! Request handlers, one module per resource.

pub mod agents;
pub mod callbacks;
pub mod runner;
pub mod runs;
pub mod sessions;
pub mod stream;
