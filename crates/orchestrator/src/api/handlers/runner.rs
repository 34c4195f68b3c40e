//! Runner protocol endpoints.
//!
//! Runners authenticate with the shared key and therefore arrive as
//! admins; user tokens cannot impersonate the runner fleet.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use orchestrator_protocol::{
    HeartbeatRequest, HeartbeatResponse, PollResponse, RegisterRunnerRequest,
    RegisterRunnerResponse, ReportCompletedRequest, ReportFailedRequest, ReportStartedRequest,
    ReportStoppedRequest, RunnerInfo,
};
use serde::Deserialize;
use std::time::Duration;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::auth::CurrentUser;

fn require_admin(user: &CurrentUser) -> ApiResult<()> {
    if user.0.is_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden("runner endpoints require the shared key"))
    }
}

pub async fn register_runner(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<RegisterRunnerRequest>,
) -> ApiResult<Json<RegisterRunnerResponse>> {
    require_admin(&user)?;
    let response = state.registry.register(request).await?;
    Ok(Json(response))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<HeartbeatRequest>,
) -> ApiResult<Json<HeartbeatResponse>> {
    require_admin(&user)?;
    let response = state.registry.heartbeat(&request.runner_id).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    pub runner_id: String,
    /// Long-poll wait in seconds, bounded by the server maximum.
    #[serde(default = "default_wait")]
    pub wait: u64,
}

fn default_wait() -> u64 {
    25
}

pub async fn poll_runs(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PollQuery>,
) -> ApiResult<Json<PollResponse>> {
    require_admin(&user)?;
    let response = state
        .queue
        .poll(&query.runner_id, Duration::from_secs(query.wait))
        .await?;
    Ok(Json(response))
}

pub async fn run_started(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(run_id): Path<String>,
    Json(request): Json<ReportStartedRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    require_admin(&user)?;
    state
        .queue
        .report_started(
            &run_id,
            &request.runner_id,
            request.executor_session_id.as_deref(),
        )
        .await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

pub async fn run_completed(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(run_id): Path<String>,
    Json(request): Json<ReportCompletedRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    require_admin(&user)?;
    state
        .queue
        .report_completed(&run_id, &request.runner_id)
        .await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

pub async fn run_failed(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(run_id): Path<String>,
    Json(request): Json<ReportFailedRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    require_admin(&user)?;
    state
        .queue
        .report_failed(&run_id, &request.runner_id, &request.error)
        .await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

pub async fn run_stopped(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(run_id): Path<String>,
    Json(request): Json<ReportStoppedRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    require_admin(&user)?;
    state
        .queue
        .report_stopped(&run_id, &request.runner_id, request.reason.as_deref())
        .await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

pub async fn list_runners(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<RunnerInfo>>> {
    require_admin(&user)?;
    let runners = state.registry.list().await?;
    Ok(Json(runners))
}
