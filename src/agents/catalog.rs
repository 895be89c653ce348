//! Agent catalog: agent profiles and activation rules loaded from a JSON file.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::model::{AgentProfile, ActivationRule, MAX_RULE_PRIORITY, MIN_RULE_PRIORITY};
use crate::error::ConfigError;

/// On-disk agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentCatalog {
    #[serde(default)]
    pub agents: Vec<AgentProfile>,
    #[serde(default)]
    pub rules: Vec<ActivationRule>,
}

impl AgentCatalog {
    /// Parse and validate a catalog document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let catalog: Self = serde_json::from_str(raw)
            .map_err(|e| ConfigError::ParseError(format!("agent catalog: {e}")))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Read a catalog from `path`.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let catalog = Self::from_json(&raw)?;
        info!(
            path = %path.display(),
            agents = catalog.agents.len(),
            rules = catalog.rules.len(),
            "Agent catalog loaded"
        );
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut agent_ids = HashSet::new();
        for agent in &self.agents {
            if !agent_ids.insert(agent.id.as_str()) {
                return Err(ConfigError::InvalidValue {
                    key: format!("agents.{}", agent.id),
                    message: "duplicate agent id".into(),
                });
            }
            if !(0.0..=1.0).contains(&agent.capabilities.availability) {
                return Err(ConfigError::InvalidValue {
                    key: format!("agents.{}.capabilities.availability", agent.id),
                    message: "must be within [0, 1]".into(),
                });
            }
        }

        for rule in &self.rules {
            if !(MIN_RULE_PRIORITY..=MAX_RULE_PRIORITY).contains(&rule.priority) {
                return Err(ConfigError::InvalidValue {
                    key: format!("rules.{}.priority", rule.id),
                    message: format!("must be {MIN_RULE_PRIORITY}-{MAX_RULE_PRIORITY}"),
                });
            }
            if !agent_ids.contains(rule.agent_id.as_str()) {
                // Not fatal: the rule simply never matches.
                warn!(
                    rule_id = %rule.id,
                    agent_id = %rule.agent_id,
                    "Activation rule references an unknown agent"
                );
            }
        }
        Ok(())
    }
}
