//! Shared identifiers, statuses and messages passed between components

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CompoundError;

/// Unique identifier of an instantiated agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of a node in the task tree as declared by the descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Planner,
    Supervisor,
    Executor,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Supervisor => "supervisor",
            Self::Executor => "executor",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of agent the factory knows how to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Supervisor,
    Executor,
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Supervisor => f.write_str("supervisor"),
            Self::Executor => f.write_str("executor"),
        }
    }
}

impl FromStr for AgentKind {
    type Err = CompoundError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "supervisor" => Ok(Self::Supervisor),
            "executor" => Ok(Self::Executor),
            _ => Err(CompoundError::UnknownAgentKind(s.to_string())),
        }
    }
}

/// Lifecycle of an agent handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AgentStatus {
    Inactive,
    Active,
    Completed { result: String },
    Failed { error: String },
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// Outcome class reported by a worker node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Submitted,
    Failed,
}

impl CompletionStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted => f.write_str("submitted"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a conversation sent to the worker capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

/// The single report a worker node sends upward when it finishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    /// Agent that did the work
    pub agent_id: AgentId,
    /// Tree node the agent worked on
    pub node_id: String,
    pub status: CompletionStatus,
    pub result: String,
}

impl Completion {
    pub fn into_child_result(self) -> ChildResult {
        ChildResult {
            child_id: self.node_id,
            status: self.status,
            content: self.result,
        }
    }
}

/// A child's outcome as collected by its parent's join barrier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildResult {
    pub child_id: String,
    pub status: CompletionStatus,
    pub content: String,
}

impl ChildResult {
    pub fn submitted(child_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            child_id: child_id.into(),
            status: CompletionStatus::Submitted,
            content: content.into(),
        }
    }

    pub fn failed(child_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            child_id: child_id.into(),
            status: CompletionStatus::Failed,
            content: content.into(),
        }
    }
}

/// Progress notifications for observers of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    AgentSpawned {
        agent_id: AgentId,
        kind: AgentKind,
        node_id: String,
        parent_id: Option<String>,
    },
    AgentStatusChanged {
        agent_id: AgentId,
        status: AgentStatus,
    },
    ChildRecorded {
        parent_id: String,
        child_id: String,
        received: usize,
        expected: usize,
    },
    JoinClosed {
        parent_id: String,
        results: usize,
    },
    RunCompleted {
        root_id: String,
        status: CompletionStatus,
    },
}
