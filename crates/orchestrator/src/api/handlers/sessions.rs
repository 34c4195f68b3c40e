//! Session endpoints.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use orchestrator_protocol::{EventPayload, SessionEvent, SessionStatus};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::auth::CurrentUser;
use crate::session::{NewSession, Session, SessionFilter, SessionResult, StatusProbe};

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub name: String,
    #[serde(default)]
    pub project_dir: Option<String>,
    pub agent_name: String,
    #[serde(default)]
    pub parent_session_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub status: Option<SessionStatus>,
    #[serde(default)]
    pub agent_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Return events with sequence strictly greater than this.
    #[serde(default)]
    pub from: i64,
    #[serde(default = "default_event_limit")]
    pub limit: i64,
}

fn default_event_limit() -> i64 {
    500
}

#[derive(Debug, Deserialize)]
pub struct AppendEventRequest {
    #[serde(flatten)]
    pub payload: EventPayload,
    /// Writer-provided; defaults to the coordinator's clock.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct AppendEventResponse {
    pub sequence: i64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: StatusProbe,
}

/// Fetch a session the caller may see, or the right error.
async fn accessible_session(
    state: &AppState,
    user: &CurrentUser,
    session_id: &str,
) -> ApiResult<Session> {
    let session = state.sessions.get(session_id).await?;
    if !user.0.can_access(&session.created_by) {
        return Err(ApiError::forbidden("not your session"));
    }
    Ok(session)
}

pub async fn create_session(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<Json<Session>> {
    let session = state
        .sessions
        .create(NewSession {
            session_name: request.name,
            project_dir: request.project_dir,
            agent_name: request.agent_name,
            created_by: user.0.user.clone(),
            parent_session_name: request.parent_session_name,
        })
        .await?;
    Ok(Json(session))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<ListSessionsQuery>,
) -> ApiResult<Json<Vec<Session>>> {
    // Users are pinned to their own sessions regardless of the filter.
    let created_by = if user.0.is_admin() {
        query.created_by
    } else {
        Some(user.0.user.clone())
    };
    let sessions = state
        .sessions
        .list(&SessionFilter {
            created_by,
            status: query.status,
            agent_name: query.agent_name,
        })
        .await?;
    Ok(Json(sessions))
}

pub async fn get_session(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Session>> {
    let session = accessible_session(&state, &user, &session_id).await?;
    Ok(Json(session))
}

pub async fn session_status(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    // An existence probe must not leak foreign sessions.
    if let Ok(session) = state.sessions.get(&session_id).await {
        if !user.0.can_access(&session.created_by) {
            return Err(ApiError::forbidden("not your session"));
        }
    }
    let status = state.sessions.status_probe(&session_id).await?;
    Ok(Json(StatusResponse { status }))
}

pub async fn session_result(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionResult>> {
    accessible_session(&state, &user, &session_id).await?;
    let result = state.sessions.result(&session_id).await?;
    Ok(Json(result))
}

pub async fn list_events(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Vec<SessionEvent>>> {
    accessible_session(&state, &user, &session_id).await?;
    let events = state
        .events
        .read(&session_id, query.from, query.limit.clamp(1, 5000))
        .await?;
    Ok(Json(events))
}

pub async fn append_event(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<String>,
    Json(request): Json<AppendEventRequest>,
) -> ApiResult<Json<AppendEventResponse>> {
    accessible_session(&state, &user, &session_id).await?;
    let sequence = state
        .events
        .append(
            &session_id,
            request.timestamp.unwrap_or_else(Utc::now),
            request.payload,
        )
        .await?;
    Ok(Json(AppendEventResponse { sequence }))
}

pub async fn delete_session(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    accessible_session(&state, &user, &session_id).await?;
    state.sessions.delete(&session_id).await?;
    Ok(Json(serde_json::json!({"deleted": session_id})))
}
