//! Agent handles and the factory that creates them

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::CompoundError;
use crate::protocol::{AgentId, AgentKind, AgentStatus, Completion, CompletionStatus, RunEvent};

/// A single unit of work bound to one tree node
pub struct Agent {
    /// Unique identifier
    pub id: AgentId,
    pub kind: AgentKind,
    /// Tree node this agent works on
    pub node_id: String,
    /// Tree parent of `node_id` (None for the root)
    pub parent_id: Option<String>,
    status: RwLock<AgentStatus>,
    event_tx: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl Agent {
    fn new(
        kind: AgentKind,
        node_id: String,
        parent_id: Option<String>,
        event_tx: Option<mpsc::UnboundedSender<RunEvent>>,
    ) -> Self {
        Self {
            id: AgentId::new(),
            kind,
            node_id,
            parent_id,
            status: RwLock::new(AgentStatus::Inactive),
            event_tx,
        }
    }

    /// Get current status
    pub fn status(&self) -> AgentStatus {
        self.status.read().clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.read().is_terminal()
    }

    /// Mark the unit of work as started
    pub fn activate(&self) -> Result<(), CompoundError> {
        let mut guard = self.status.write();
        if guard.is_terminal() {
            return Err(CompoundError::AlreadyCompleted(self.id));
        }
        *guard = AgentStatus::Active;
        drop(guard);

        debug!(agent_id = %self.id, node_id = %self.node_id, "Agent active");
        self.emit_status(AgentStatus::Active);
        Ok(())
    }

    /// Move to a terminal state and produce the completion report.
    ///
    /// Succeeds at most once per agent; later calls fail with
    /// [`CompoundError::AlreadyCompleted`] and leave the first outcome intact.
    pub fn complete(
        &self,
        status: CompletionStatus,
        result: String,
    ) -> Result<Completion, CompoundError> {
        let terminal = match status {
            CompletionStatus::Submitted => AgentStatus::Completed { result: result.clone() },
            CompletionStatus::Failed => AgentStatus::Failed { error: result.clone() },
        };

        let mut guard = self.status.write();
        if guard.is_terminal() {
            return Err(CompoundError::AlreadyCompleted(self.id));
        }
        *guard = terminal.clone();
        drop(guard);

        self.emit_status(terminal);
        Ok(Completion {
            agent_id: self.id,
            node_id: self.node_id.clone(),
            status,
            result,
        })
    }

    fn emit_status(&self, status: AgentStatus) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(RunEvent::AgentStatusChanged { agent_id: self.id, status });
        }
    }
}

/// Handle to an agent for external interaction
#[derive(Clone)]
pub struct AgentHandle {
    inner: Arc<Agent>,
}

impl AgentHandle {
    pub fn new(agent: Agent) -> Self {
        Self {
            inner: Arc::new(agent),
        }
    }

    pub fn id(&self) -> AgentId {
        self.inner.id
    }

    pub fn kind(&self) -> AgentKind {
        self.inner.kind
    }

    pub fn inner(&self) -> &Agent {
        &self.inner
    }
}

impl std::ops::Deref for AgentHandle {
    type Target = Agent;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("node_id", &self.inner.node_id)
            .field("status", &self.inner.status())
            .finish()
    }
}

/// Builds agent handles on demand. Holds no per-agent state.
#[derive(Clone, Default)]
pub struct AgentFactory {
    event_tx: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl AgentFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles built by this factory report status changes on `event_tx`
    pub fn with_events(event_tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        Self { event_tx: Some(event_tx) }
    }

    /// Create an inactive agent for `node_id`
    pub fn create(
        &self,
        kind: AgentKind,
        node_id: impl Into<String>,
        parent_id: Option<String>,
    ) -> AgentHandle {
        let agent = Agent::new(kind, node_id.into(), parent_id, self.event_tx.clone());

        info!(
            agent_id = %agent.id,
            kind = %kind,
            node_id = %agent.node_id,
            parent = ?agent.parent_id,
            "Creating new agent"
        );

        AgentHandle::new(agent)
    }

    /// Like [`create`](Self::create), with the kind given by name
    pub fn create_named(
        &self,
        kind: &str,
        node_id: impl Into<String>,
        parent_id: Option<String>,
    ) -> Result<AgentHandle, CompoundError> {
        let kind = kind.parse::<AgentKind>()?;
        Ok(self.create(kind, node_id, parent_id))
    }
}
