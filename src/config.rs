//! Coordinator configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CompoundError;

const DEFAULT_PLANNER_PROMPT: &str = "You decompose objectives into a task tree. \
Reply with one JSON object with a `root` node ({id, description, kind: \"planner\"}) and \
contiguous `level_1`..`level_N` arrays of {id, description, supervisor, kind}. \
Nodes at the deepest level are executors and may carry a `command`.";

const DEFAULT_EXECUTOR_PROMPT: &str =
    "You carry out exactly one atomic task and report its outcome.";

const DEFAULT_SUPERVISOR_PROMPT: &str =
    "You supervise a group of sub-tasks and merge their outcomes into one report.";

/// Settings for one orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Upper bound on worker nodes running at once
    pub max_parallel_agents: usize,
    /// System message for the decomposition query
    pub planner_prompt: String,
    /// System message for leaf executors
    pub executor_prompt: String,
    /// System message for supervisor synthesis
    pub supervisor_prompt: String,
    /// Order each closed barrier's results by child id before synthesis
    pub sort_child_results: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_parallel_agents: 8,
            planner_prompt: DEFAULT_PLANNER_PROMPT.to_string(),
            executor_prompt: DEFAULT_EXECUTOR_PROMPT.to_string(),
            supervisor_prompt: DEFAULT_SUPERVISOR_PROMPT.to_string(),
            sort_child_results: true,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, CompoundError> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| CompoundError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CompoundError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CompoundError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), CompoundError> {
        if self.max_parallel_agents == 0 {
            return Err(CompoundError::Config(
                "max_parallel_agents must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
