//! API route definitions.

use axum::{
    Json, Router, middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers::{agents, callbacks, runner, runs, sessions, stream};
use super::state::AppState;
use crate::auth::auth_middleware;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let auth_state = state.auth.clone();

    let protected = Router::new()
        // Session management
        .route(
            "/sessions",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        .route(
            "/sessions/{session_id}",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route("/sessions/{session_id}/status", get(sessions::session_status))
        .route("/sessions/{session_id}/result", get(sessions::session_result))
        .route(
            "/sessions/{session_id}/events",
            get(sessions::list_events).post(sessions::append_event),
        )
        // Run queue
        .route("/runs", post(runs::create_run))
        .route("/runs/{run_id}", get(runs::get_run))
        .route("/runs/{run_id}/stop", post(runs::stop_run))
        // Runner protocol
        .route("/runner/register", post(runner::register_runner))
        .route("/runner/heartbeat", post(runner::heartbeat))
        .route("/runner/runs", get(runner::poll_runs))
        .route("/runner/runs/{run_id}/started", post(runner::run_started))
        .route("/runner/runs/{run_id}/completed", post(runner::run_completed))
        .route("/runner/runs/{run_id}/failed", post(runner::run_failed))
        .route("/runner/runs/{run_id}/stopped", post(runner::run_stopped))
        // Blueprints and registry dumps
        .route("/agents", get(agents::list_agents))
        .route("/agents/{name}", get(agents::get_agent))
        .route("/runners", get(runner::list_runners))
        // Callbacks
        .route("/callbacks", get(callbacks::list_callbacks))
        .route(
            "/callbacks/{callback_id}/cancel",
            post(callbacks::cancel_callback),
        )
        // Event stream
        .route("/sse/sessions", get(stream::session_stream))
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
        .with_state(state);

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(trace_layer)
        .layer(CorsLayer::permissive())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}
