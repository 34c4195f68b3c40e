//! Runner configuration: CLI flags with environment fallbacks.

use anyhow::{Context, Result};
use clap::Parser;
use orchestrator_protocol::AgentBlueprint;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(
    author,
    version,
    about = "Agent runner: polls the coordinator and supervises executors.",
    propagate_version = true
)]
pub struct RunnerSettings {
    /// Coordinator base URL.
    #[arg(long, env = "AGENT_ORCHESTRATOR_API_URL", default_value = "http://127.0.0.1:8420")]
    pub api_url: String,

    /// Shared bearer token.
    #[arg(long, env = "AGENT_ORCHESTRATOR_API_KEY")]
    pub api_key: Option<String>,

    /// Executor type this runner serves (e.g. claude-sdk, cli).
    #[arg(long, default_value = "claude-sdk")]
    pub executor_type: String,

    #[arg(long, default_value = "default")]
    pub executor_profile: String,

    /// Default working directory for spawned executors.
    #[arg(long)]
    pub project_dir: Option<String>,

    /// Capability tags advertised to the coordinator.
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,

    /// TOML file with runner-owned blueprints (procedural profiles).
    #[arg(long)]
    pub agents_file: Option<PathBuf>,

    #[arg(long, default_value_t = 60)]
    pub heartbeat_interval_secs: u64,

    /// Long-poll wait per request.
    #[arg(long, default_value_t = 25)]
    pub poll_wait_secs: u64,

    /// SIGTERM-to-SIGKILL grace interval on stop commands.
    #[arg(long, default_value_t = 10)]
    pub stop_grace_secs: u64,

    /// Harness binary spawned for autonomous runs.
    #[arg(long, env = "AGENT_EXECUTOR_BINARY", default_value = "claude-agent-executor")]
    pub executor_binary: String,

    /// Port for the embedded MCP facade; 0 picks a free one.
    #[arg(long, default_value_t = 0)]
    pub mcp_port: u16,
}

#[derive(Debug, Deserialize)]
struct AgentsFile {
    #[serde(default)]
    agents: Vec<AgentBlueprint>,
}

impl RunnerSettings {
    /// Load the runner-owned blueprints from the agents file, if any.
    pub fn load_agents(&self) -> Result<Vec<AgentBlueprint>> {
        let Some(path) = &self.agents_file else {
            return Ok(Vec::new());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading agents file: {}", path.display()))?;
        let parsed: AgentsFile = toml::from_str(&raw)
            .with_context(|| format!("parsing agents file: {}", path.display()))?;
        Ok(parsed.agents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn base_args() -> Vec<&'static str> {
        vec!["orchestrator-runner"]
    }

    #[test]
    fn test_defaults() {
        let settings = RunnerSettings::parse_from(base_args());
        assert_eq!(settings.poll_wait_secs, 25);
        assert_eq!(settings.heartbeat_interval_secs, 60);
        assert_eq!(settings.stop_grace_secs, 10);
        assert_eq!(settings.mcp_port, 0);
    }

    #[test]
    fn test_tag_splitting() {
        let settings =
            RunnerSettings::parse_from(["orchestrator-runner", "--tags", "gpu,docker"]);
        assert_eq!(settings.tags, vec!["gpu".to_string(), "docker".to_string()]);
    }

    #[test]
    fn test_agents_file_round_trip() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            [[agents]]
            name = "web-crawler"
            type = "procedural"
            description = "Crawl a site"
            command = "crawl ${{params.url}}"

            [agents.parameters_schema]
            type = "object"
            required = ["url"]
            "#
        )
        .unwrap();

        let mut settings = RunnerSettings::parse_from(base_args());
        settings.agents_file = Some(file.path().to_path_buf());
        let agents = settings.load_agents().unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].name, "web-crawler");
        assert_eq!(
            agents[0].parameters_schema.as_ref().unwrap()["required"][0],
            "url"
        );
    }

    #[test]
    fn test_no_agents_file_is_empty() {
        let settings = RunnerSettings::parse_from(base_args());
        assert!(settings.load_agents().unwrap().is_empty());
    }
}
