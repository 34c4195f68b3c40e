//! HTTP API: routes, handlers, error mapping, shared state.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorBody};
pub use routes::create_router;
pub use state::AppState;
