//! Embedded MCP facade.
//!
//! Executors spawn child agents through this endpoint instead of talking
//! to the coordinator directly. The facade receives MCP tool calls,
//! enriches them with the calling session's context from the
//! `x-session-id` header, and forwards to the coordinator's run-creation
//! API. Its URL backs the `${runner.orchestrator_mcp_url}` placeholder.

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::client::CoordinatorClient;

#[derive(Clone)]
struct McpState {
    client: Arc<CoordinatorClient>,
}

/// An MCP `tools/call` request, reduced to what the facade consumes.
#[derive(Debug, Deserialize)]
struct ToolCallRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: ToolCallParams,
}

#[derive(Debug, Default, Deserialize)]
struct ToolCallParams {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Start the facade on `127.0.0.1:{port}` (0 picks a free port).
///
/// Returns the base URL and the serving task.
pub async fn start(
    client: Arc<CoordinatorClient>,
    port: u16,
) -> Result<(String, tokio::task::JoinHandle<()>)> {
    let state = McpState { client };
    let router = Router::new()
        .route("/mcp", post(handle_tool_call))
        .with_state(state);

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .context("binding MCP facade")?;
    let addr = listener.local_addr().context("reading MCP facade address")?;
    let url = format!("http://{addr}");
    info!(%url, "embedded MCP facade listening");

    let task = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            warn!(error = %err, "MCP facade stopped");
        }
    });
    Ok((url, task))
}

async fn handle_tool_call(
    State(state): State<McpState>,
    headers: HeaderMap,
    Json(request): Json<ToolCallRequest>,
) -> Response {
    let id = request.id.clone().unwrap_or(Value::Null);
    if request.method != "tools/call" {
        return rpc_error(id, -32601, format!("unsupported method: {}", request.method));
    }

    let calling_session = headers
        .get("x-session-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let result = dispatch_tool(
        &state,
        &request.params.name,
        request.params.arguments.clone(),
        calling_session,
    )
    .await;

    match result {
        Ok(value) => {
            let text = value.to_string();
            Json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {"content": [{"type": "text", "text": text}]}
            }))
            .into_response()
        }
        Err(err) => rpc_error(id, -32000, format!("{err:#}")),
    }
}

async fn dispatch_tool(
    state: &McpState,
    tool: &str,
    mut arguments: Value,
    calling_session: Option<String>,
) -> Result<Value> {
    match tool {
        // Child spawn: the caller becomes the parent, so its completion
        // callback re-enters the right session.
        "start_session" => {
            if !arguments.is_object() {
                arguments = json!({});
            }
            arguments["type"] = json!("start_session");
            if let Some(parent) = calling_session {
                arguments["parent_session_id"] = json!(parent);
            }
            state.client.create_run(&arguments).await
        }
        "session_status" => {
            let session_id = required_str(&arguments, "session_id")?;
            state.client.session_status(&session_id).await
        }
        "session_result" => {
            let session_id = required_str(&arguments, "session_id")?;
            state.client.session_result(&session_id).await
        }
        other => anyhow::bail!("unknown tool: {other}"),
    }
}

fn required_str(arguments: &Value, key: &str) -> Result<String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .with_context(|| format!("missing argument: {key}"))
}

fn rpc_error(id: Value, code: i64, message: String) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": code, "message": message}
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_call_request_parses() {
        let raw = json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": {
                "name": "start_session",
                "arguments": {"agent_name": "web-crawler", "parameters": {"url": "https://x"}}
            }
        });
        let request: ToolCallRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(request.method, "tools/call");
        assert_eq!(request.params.name, "start_session");
        assert_eq!(request.params.arguments["agent_name"], "web-crawler");
    }

    #[test]
    fn test_required_str() {
        let args = json!({"session_id": "ses_1"});
        assert_eq!(required_str(&args, "session_id").unwrap(), "ses_1");
        assert!(required_str(&args, "missing").is_err());
    }
}
