//! Executor command construction.
//!
//! Stage-2 placeholder resolution happens here, immediately before spawn:
//! `${runner.orchestrator_mcp_url}` becomes the embedded facade's URL and
//! nothing else may remain unresolved.

use anyhow::{Context, Result, bail};
use orchestrator_protocol::{AgentBlueprint, AgentKind, Run, resolve_stage_two};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

/// Everything needed to spawn one executor process.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

/// Runner-local context injected into executors.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub api_url: String,
    pub api_key: Option<String>,
    pub orchestrator_mcp_url: String,
    pub executor_binary: String,
    pub default_project_dir: Option<String>,
}

/// Resolve stage-2 placeholders and build the spawn spec.
pub fn prepare(run: &Run, ctx: &ExecContext) -> Result<PreparedCommand> {
    let mut blueprint = run
        .agent_blueprint
        .clone()
        .context("run carries no blueprint")?;
    resolve_blueprint_stage_two(&mut blueprint, &ctx.orchestrator_mcp_url)?;

    let mut env = HashMap::from([
        ("AGENT_ORCHESTRATOR_API_URL".to_string(), ctx.api_url.clone()),
        ("AGENT_SESSION_ID".to_string(), run.session_id.clone()),
        ("AGENT_SESSION_NAME".to_string(), run.session_name.clone()),
        ("AGENT_RUN_ID".to_string(), run.run_id.clone()),
        (
            "AGENT_PARAMS".to_string(),
            serde_json::to_string(&run.parameters).context("serializing run parameters")?,
        ),
        (
            "ORCHESTRATOR_MCP_URL".to_string(),
            ctx.orchestrator_mcp_url.clone(),
        ),
    ]);
    if let Some(key) = &ctx.api_key {
        env.insert("AGENT_ORCHESTRATOR_API_KEY".to_string(), key.clone());
    }
    if !blueprint.mcp_servers.is_empty() {
        env.insert(
            "AGENT_MCP_SERVERS".to_string(),
            serde_json::to_string(&blueprint.mcp_servers).context("serializing mcp servers")?,
        );
    }

    let cwd = run
        .project_dir
        .clone()
        .or_else(|| ctx.default_project_dir.clone())
        .map(PathBuf::from);

    match blueprint.kind {
        AgentKind::Procedural => {
            let command = blueprint
                .command
                .clone()
                .with_context(|| format!("procedural blueprint {} has no command", blueprint.name))?;
            Ok(PreparedCommand {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), command],
                env,
                cwd,
            })
        }
        AgentKind::Autonomous => {
            let prompt = run
                .parameters
                .get("prompt")
                .and_then(Value::as_str)
                .context("autonomous run has no prompt parameter")?;

            let mut args = vec![
                "--session-id".to_string(),
                run.session_id.clone(),
                "--prompt".to_string(),
                prompt.to_string(),
            ];
            if let Some(handle) = &run.executor_session_id {
                args.push("--resume".to_string());
                args.push(handle.clone());
            }
            if let Some(system_prompt) = &blueprint.system_prompt {
                env.insert("AGENT_SYSTEM_PROMPT".to_string(), system_prompt.clone());
            }
            Ok(PreparedCommand {
                program: ctx.executor_binary.clone(),
                args,
                env,
                cwd,
            })
        }
    }
}

fn resolve_blueprint_stage_two(blueprint: &mut AgentBlueprint, mcp_url: &str) -> Result<()> {
    if let Some(command) = blueprint.command.take() {
        let mut value = Value::String(command);
        resolve_stage_two(&mut value, mcp_url)
            .with_context(|| format!("resolving command of {}", blueprint.name))?;
        let Value::String(resolved) = value else {
            bail!("command resolution changed the value type");
        };
        blueprint.command = Some(resolved);
    }
    if let Some(system_prompt) = blueprint.system_prompt.take() {
        let mut value = Value::String(system_prompt);
        resolve_stage_two(&mut value, mcp_url)
            .with_context(|| format!("resolving system prompt of {}", blueprint.name))?;
        let Value::String(resolved) = value else {
            bail!("system prompt resolution changed the value type");
        };
        blueprint.system_prompt = Some(resolved);
    }
    for (name, config) in blueprint.mcp_servers.iter_mut() {
        resolve_stage_two(config, mcp_url)
            .with_context(|| format!("resolving mcp server {name} of {}", blueprint.name))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use orchestrator_protocol::{RunKind, RunStatus};
    use serde_json::json;

    fn context() -> ExecContext {
        ExecContext {
            api_url: "http://coordinator:8420".to_string(),
            api_key: Some("secret".to_string()),
            orchestrator_mcp_url: "http://127.0.0.1:39211".to_string(),
            executor_binary: "claude-agent-executor".to_string(),
            default_project_dir: Some("/srv/work".to_string()),
        }
    }

    fn run_with(blueprint: AgentBlueprint, parameters: Value) -> Run {
        Run {
            run_id: "run_1".to_string(),
            kind: RunKind::StartSession,
            session_id: "ses_1".to_string(),
            session_name: "demo".to_string(),
            agent_name: blueprint.name.clone(),
            parameters,
            agent_blueprint: Some(blueprint),
            project_dir: None,
            parent_session_id: None,
            parent_session_name: None,
            executor_session_id: None,
            status: RunStatus::Claimed,
            claimed_by_runner_id: Some("rnr_1".to_string()),
            created_at: Utc::now(),
            claimed_at: Some(Utc::now()),
            finished_at: None,
            error: None,
        }
    }

    fn procedural() -> AgentBlueprint {
        AgentBlueprint {
            name: "web-crawler".to_string(),
            kind: AgentKind::Procedural,
            description: String::new(),
            system_prompt: None,
            command: Some("crawl --mcp ${runner.orchestrator_mcp_url}/mcp".to_string()),
            parameters_schema: None,
            mcp_servers: HashMap::new(),
            tags: vec![],
        }
    }

    fn autonomous() -> AgentBlueprint {
        AgentBlueprint {
            name: "researcher".to_string(),
            kind: AgentKind::Autonomous,
            description: String::new(),
            system_prompt: Some("You research things.".to_string()),
            command: None,
            parameters_schema: None,
            mcp_servers: HashMap::from([(
                "orchestrator".to_string(),
                json!({"url": "${runner.orchestrator_mcp_url}/mcp"}),
            )]),
            tags: vec![],
        }
    }

    #[test]
    fn test_procedural_command_through_shell() {
        let run = run_with(procedural(), json!({"url": "https://example.com"}));
        let prepared = prepare(&run, &context()).unwrap();

        assert_eq!(prepared.program, "sh");
        assert_eq!(prepared.args[0], "-c");
        assert_eq!(
            prepared.args[1],
            "crawl --mcp http://127.0.0.1:39211/mcp"
        );
        assert_eq!(
            prepared.env["AGENT_PARAMS"],
            r#"{"url":"https://example.com"}"#
        );
        assert_eq!(prepared.cwd.as_deref().unwrap().to_str().unwrap(), "/srv/work");
    }

    #[test]
    fn test_autonomous_args_and_mcp_resolution() {
        let run = run_with(autonomous(), json!({"prompt": "Hello"}));
        let prepared = prepare(&run, &context()).unwrap();

        assert_eq!(prepared.program, "claude-agent-executor");
        assert_eq!(
            prepared.args,
            vec!["--session-id", "ses_1", "--prompt", "Hello"]
        );
        let servers: Value =
            serde_json::from_str(&prepared.env["AGENT_MCP_SERVERS"]).unwrap();
        assert_eq!(
            servers["orchestrator"]["url"],
            "http://127.0.0.1:39211/mcp"
        );
        assert_eq!(prepared.env["AGENT_SYSTEM_PROMPT"], "You research things.");
    }

    #[test]
    fn test_resume_adds_native_handle() {
        let mut run = run_with(autonomous(), json!({"prompt": "again"}));
        run.kind = RunKind::ResumeSession;
        run.executor_session_id = Some("native-7".to_string());

        let prepared = prepare(&run, &context()).unwrap();
        let resume_at = prepared.args.iter().position(|a| a == "--resume").unwrap();
        assert_eq!(prepared.args[resume_at + 1], "native-7");
    }

    #[test]
    fn test_leftover_placeholder_is_an_error() {
        let mut blueprint = procedural();
        blueprint.command = Some("crawl ${params.url}".to_string());
        let run = run_with(blueprint, json!({}));
        assert!(prepare(&run, &context()).is_err());
    }

    #[test]
    fn test_run_project_dir_wins_over_default() {
        let mut run = run_with(procedural(), json!({}));
        run.agent_blueprint.as_mut().unwrap().command = Some("true".to_string());
        run.project_dir = Some("/srv/special".to_string());
        let prepared = prepare(&run, &context()).unwrap();
        assert_eq!(
            prepared.cwd.as_deref().unwrap().to_str().unwrap(),
            "/srv/special"
        );
    }
}
