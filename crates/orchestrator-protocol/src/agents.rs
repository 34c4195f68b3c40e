//! Agent blueprint types.
//!
//! A blueprint is a named, reusable agent configuration. Coordinator-owned
//! blueprints are JSON files in the agents directory; runner-owned
//! blueprints are registered by a runner and scoped to its lifetime. Names
//! are globally unique across both sources, first writer wins.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;

/// Whether an agent is driven by an AI harness or a deterministic command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// AI harness; takes a free-form `prompt` parameter.
    Autonomous,
    /// Deterministic CLI command with a declared parameter schema.
    Procedural,
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Autonomous => write!(f, "autonomous"),
            Self::Procedural => write!(f, "procedural"),
        }
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "autonomous" => Ok(Self::Autonomous),
            "procedural" => Ok(Self::Procedural),
            other => Err(format!("unknown agent kind: {other}")),
        }
    }
}

impl TryFrom<String> for AgentKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A named agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentBlueprint {
    /// Globally unique across coordinator-owned and runner-owned sources.
    pub name: String,

    #[serde(rename = "type")]
    pub kind: AgentKind,

    #[serde(default)]
    pub description: String,

    /// System prompt for autonomous agents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Command line for procedural agents, run through the shell.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// JSON-Schema (Draft-07) constraining the run parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters_schema: Option<Value>,

    /// MCP server configurations, possibly containing `${...}` placeholders.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub mcp_servers: HashMap<String, Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl AgentBlueprint {
    /// The schema run parameters are validated against.
    ///
    /// Autonomous agents without a declared schema use the implicit one: a
    /// single required non-empty `prompt` string.
    pub fn effective_parameters_schema(&self) -> Value {
        if let Some(schema) = &self.parameters_schema {
            return schema.clone();
        }
        match self.kind {
            AgentKind::Autonomous => implicit_prompt_schema(),
            // A procedural agent without a schema accepts any object.
            AgentKind::Procedural => json!({"type": "object"}),
        }
    }
}

/// The implicit parameter schema for autonomous agents.
pub fn implicit_prompt_schema() -> Value {
    json!({
        "type": "object",
        "required": ["prompt"],
        "properties": {
            "prompt": {"type": "string", "minLength": 1}
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn autonomous_blueprint() -> AgentBlueprint {
        AgentBlueprint {
            name: "researcher".to_string(),
            kind: AgentKind::Autonomous,
            description: "Research assistant".to_string(),
            system_prompt: Some("You research things.".to_string()),
            command: None,
            parameters_schema: None,
            mcp_servers: HashMap::new(),
            tags: vec![],
        }
    }

    #[test]
    fn test_blueprint_serialization() {
        let blueprint = autonomous_blueprint();
        let json = serde_json::to_string(&blueprint).unwrap();
        assert!(json.contains("\"type\":\"autonomous\""));
        assert!(json.contains("\"name\":\"researcher\""));

        let parsed: AgentBlueprint = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, blueprint);
    }

    #[test]
    fn test_implicit_schema_for_autonomous() {
        let schema = autonomous_blueprint().effective_parameters_schema();
        assert_eq!(schema["required"][0], "prompt");
        assert_eq!(schema["properties"]["prompt"]["minLength"], 1);
    }

    #[test]
    fn test_declared_schema_wins() {
        let mut blueprint = autonomous_blueprint();
        blueprint.parameters_schema = Some(json!({"type": "object", "required": ["url"]}));
        let schema = blueprint.effective_parameters_schema();
        assert_eq!(schema["required"][0], "url");
    }

    #[test]
    fn test_kind_round_trip() {
        assert_eq!(
            "autonomous".parse::<AgentKind>().unwrap(),
            AgentKind::Autonomous
        );
        assert_eq!(
            "procedural".parse::<AgentKind>().unwrap(),
            AgentKind::Procedural
        );
        assert!("other".parse::<AgentKind>().is_err());
    }
}
