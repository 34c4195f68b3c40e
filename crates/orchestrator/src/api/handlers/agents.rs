//! Blueprint catalog endpoints.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use orchestrator_protocol::AgentBlueprint;
use serde::Deserialize;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListAgentsQuery {
    /// Comma-separated tag filter; every tag must be present.
    #[serde(default)]
    pub tags: Option<String>,
}

pub async fn list_agents(
    State(state): State<AppState>,
    Query(query): Query<ListAgentsQuery>,
) -> ApiResult<Json<Vec<AgentBlueprint>>> {
    let tags: Vec<String> = query
        .tags
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .filter(|t| !t.is_empty())
        .map(|t| t.trim().to_string())
        .collect();
    let agents = state.agents.list(&tags).await?;
    Ok(Json(agents))
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<AgentBlueprint>> {
    let resolved = state
        .agents
        .resolve(&name)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("agent {name}")))?;
    Ok(Json(resolved.blueprint))
}
