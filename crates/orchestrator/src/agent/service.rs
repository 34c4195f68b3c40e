//! Merged blueprint catalog over both sources.

use anyhow::Result;
use orchestrator_protocol::AgentBlueprint;
use thiserror::Error;

use super::repository::AgentRepository;
use super::store::AgentFileStore;

/// A blueprint with its ownership.
#[derive(Debug, Clone)]
pub struct ResolvedBlueprint {
    pub blueprint: AgentBlueprint,
    /// Set for runner-owned blueprints: runs naming this agent match only
    /// against the owning runner.
    pub owner_runner_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("agent name already registered: {0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Catalog resolving names across coordinator files and runner
/// registrations. Files win lookups; registration of a taken name is
/// rejected (first writer wins).
#[derive(Debug, Clone)]
pub struct AgentService {
    files: AgentFileStore,
    owned: AgentRepository,
}

impl AgentService {
    pub fn new(files: AgentFileStore, owned: AgentRepository) -> Self {
        Self { files, owned }
    }

    /// Resolve a blueprint by name from either source.
    pub async fn resolve(&self, name: &str) -> Result<Option<ResolvedBlueprint>> {
        if let Some(blueprint) = self.files.get(name)? {
            return Ok(Some(ResolvedBlueprint {
                blueprint,
                owner_runner_id: None,
            }));
        }
        Ok(self.owned.get(name).await?.map(|(blueprint, owner)| {
            ResolvedBlueprint {
                blueprint,
                owner_runner_id: Some(owner),
            }
        }))
    }

    /// Register a runner's blueprints, all or nothing.
    pub async fn register_owned(
        &self,
        owner_runner_id: &str,
        blueprints: &[AgentBlueprint],
    ) -> Result<(), RegisterError> {
        let mut seen = std::collections::HashSet::new();
        for blueprint in blueprints {
            if !seen.insert(blueprint.name.as_str()) {
                return Err(RegisterError::Conflict(blueprint.name.clone()));
            }
            if self.files.get(&blueprint.name)?.is_some() {
                return Err(RegisterError::Conflict(blueprint.name.clone()));
            }
        }

        let names: Vec<String> = blueprints.iter().map(|b| b.name.clone()).collect();
        let taken = self.owned.existing_names(&names).await?;
        if let Some(name) = taken.into_iter().next() {
            return Err(RegisterError::Conflict(name));
        }

        self.owned.insert_owned(owner_runner_id, blueprints).await?;
        Ok(())
    }

    /// Full catalog, optionally narrowed to blueprints carrying every
    /// requested tag.
    pub async fn list(&self, tags: &[String]) -> Result<Vec<AgentBlueprint>> {
        let mut all = self.files.list()?;
        all.extend(self.owned.list().await?.into_iter().map(|(b, _)| b));
        if !tags.is_empty() {
            all.retain(|b| tags.iter().all(|t| b.tags.contains(t)));
        }
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    /// Blueprints owned by one runner (registry dumps).
    pub async fn owned_by(&self, runner_id: &str) -> Result<Vec<AgentBlueprint>> {
        self.owned.list_by_owner(runner_id).await
    }

    /// Delete a removed runner's blueprints; returns the deleted names.
    pub async fn remove_owner(&self, runner_id: &str) -> Result<Vec<String>> {
        self.owned.delete_by_owner(runner_id).await
    }
}
