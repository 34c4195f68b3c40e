//! Run queue endpoints (caller side).

use axum::{
    Json,
    extract::{Path, State},
};
use orchestrator_protocol::Run;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::auth::CurrentUser;
use crate::runs::{CreateRunRequest, CreateRunResponse};

pub async fn create_run(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<CreateRunRequest>,
) -> ApiResult<Json<CreateRunResponse>> {
    let response = state.queue.create(&user.0.user, request).await?;
    Ok(Json(response))
}

/// Fetch a run, scoped through its session's creator.
async fn accessible_run(state: &AppState, user: &CurrentUser, run_id: &str) -> ApiResult<Run> {
    let stored = state.queue.get(run_id).await?;
    let session = state.sessions.get(&stored.run.session_id).await?;
    if !user.0.can_access(&session.created_by) {
        return Err(ApiError::forbidden("not your run"));
    }
    Ok(stored.run)
}

pub async fn get_run(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(run_id): Path<String>,
) -> ApiResult<Json<Run>> {
    let run = accessible_run(&state, &user, &run_id).await?;
    Ok(Json(run))
}

pub async fn stop_run(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(run_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    accessible_run(&state, &user, &run_id).await?;
    state.queue.stop(&run_id).await?;
    Ok(Json(serde_json::json!({"stop_requested": run_id})))
}
