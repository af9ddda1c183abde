//! Compound error types

use thiserror::Error;

use crate::channel::ChannelError;
use crate::protocol::AgentId;

/// Errors that can occur while coordinating a run
#[derive(Debug, Error)]
pub enum CompoundError {
    /// Malformed task tree or unexpected parent reference
    #[error("Structural error: {0}")]
    Structural(#[from] StructuralError),

    /// Result recorded against a barrier that already fired
    #[error("Join error: result for '{parent_id}' arrived after all {expected} children reported")]
    Join { parent_id: String, expected: usize },

    /// The same child reported twice into a still-open barrier
    #[error("Join error: child '{child_id}' already reported to '{parent_id}'")]
    DuplicateChild { parent_id: String, child_id: String },

    /// Agent factory asked for a kind it cannot build
    #[error("Unknown agent kind: {0}")]
    UnknownAgentKind(String),

    /// A handle tried to report completion twice
    #[error("Agent {0} already completed")]
    AlreadyCompleted(AgentId),

    /// Worker capability failed where no branch can absorb it
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// Completion bus error
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// A node task could not deliver its report (panic, abort, guard violation)
    #[error("Node fault: {0}")]
    NodeFault(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Ways a task tree can be malformed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("descriptor has no root")]
    MissingRoot,

    #[error("malformed root: {0}")]
    MalformedRoot(String),

    #[error("node at level {level} has an empty id")]
    EmptyId { level: usize },

    #[error("duplicate node id '{0}'")]
    DuplicateId(String),

    #[error("node '{id}' names no supervisor")]
    MissingSupervisor { id: String },

    #[error("node '{id}' references '{parent}', which is not at a shallower level")]
    UnknownParent { id: String, parent: String },

    #[error("level_{0} is missing from the level sequence")]
    MissingLevel(usize),

    #[error("level_{0} has no nodes")]
    EmptyLevel(usize),

    #[error("unexpected descriptor key '{0}'")]
    UnexpectedKey(String),

    #[error("invalid node in {key}: {reason}")]
    InvalidNode { key: String, reason: String },

    #[error("node '{id}' cannot be of kind '{kind}' here")]
    UnexpectedKind { id: String, kind: String },

    #[error("node '{id}' is above the deepest level but has no children")]
    Childless { id: String },

    #[error("no join is expected for parent '{0}'")]
    UntrackedParent(String),

    #[error("tree has no leaf tasks")]
    NoLeaves,

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),
}

/// Failure reported by the worker capability
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct WorkerError {
    pub message: String,
}

impl WorkerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl From<anyhow::Error> for WorkerError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}
