//! Coordinator-owned blueprint files.
//!
//! One JSON document per blueprint in the agents directory
//! (`AGENT_ORCHESTRATOR_AGENTS_DIR`). These are the autonomous agents; the
//! directory is rescanned on each lookup so edits land without a restart.

use anyhow::{Context, Result};
use orchestrator_protocol::AgentBlueprint;
use std::path::{Path, PathBuf};
use tracing::warn;

/// File-backed blueprint source.
#[derive(Debug, Clone)]
pub struct AgentFileStore {
    dir: Option<PathBuf>,
}

impl AgentFileStore {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// All parseable blueprints in the directory.
    pub fn list(&self) -> Result<Vec<AgentBlueprint>> {
        let Some(dir) = &self.dir else {
            return Ok(Vec::new());
        };
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut blueprints = Vec::new();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("reading agents directory: {}", dir.display()))?;
        for entry in entries {
            let path = entry.context("reading agents directory entry")?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::load_file(&path) {
                Ok(blueprint) => blueprints.push(blueprint),
                // A broken file must not take down the rest of the catalog.
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unparseable blueprint"),
            }
        }
        blueprints.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(blueprints)
    }

    /// Look up one blueprint by name.
    pub fn get(&self, name: &str) -> Result<Option<AgentBlueprint>> {
        Ok(self.list()?.into_iter().find(|b| b.name == name))
    }

    fn load_file(path: &Path) -> Result<AgentBlueprint> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading blueprint file: {}", path.display()))?;
        let blueprint: AgentBlueprint = serde_json::from_str(&raw)
            .with_context(|| format!("parsing blueprint file: {}", path.display()))?;
        Ok(blueprint)
    }
}
