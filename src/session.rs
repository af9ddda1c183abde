//! Per-run context: everything that lives exactly as long as one run

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::agent::{AgentFactory, AgentHandle};
use crate::config::CoordinatorConfig;
use crate::error::{CompoundError, StructuralError};
use crate::join::JoinCoordinator;
use crate::node::{Executor, Supervisor, WorkerNode};
use crate::protocol::{AgentId, AgentKind, ChildResult, RunEvent};
use crate::tree::{TaskNode, TaskTree};
use crate::worker::Worker;

/// A compound run in progress
pub struct Session {
    /// Tree being executed
    tree: TaskTree,
    /// Fan-in barriers for every parent in the tree
    joins: JoinCoordinator,
    factory: AgentFactory,
    /// Every agent id handed out during this run
    issued: Mutex<HashSet<AgentId>>,
    worker: Arc<dyn Worker>,
    config: CoordinatorConfig,
    event_tx: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl Session {
    pub fn new(
        tree: TaskTree,
        worker: Arc<dyn Worker>,
        config: CoordinatorConfig,
        event_tx: Option<mpsc::UnboundedSender<RunEvent>>,
    ) -> Self {
        let joins = JoinCoordinator::for_tree(&tree).with_sorting(config.sort_child_results);
        let factory = match &event_tx {
            Some(tx) => AgentFactory::with_events(tx.clone()),
            None => AgentFactory::new(),
        };

        info!(root = %tree.root.id, nodes = tree.len(), depth = tree.depth(), "Creating new session");

        Self {
            tree,
            joins,
            factory,
            issued: Mutex::new(HashSet::new()),
            worker,
            config,
            event_tx,
        }
    }

    pub fn tree(&self) -> &TaskTree {
        &self.tree
    }

    pub fn joins(&self) -> &JoinCoordinator {
        &self.joins
    }

    /// Number of agents created so far
    pub fn agent_count(&self) -> usize {
        self.issued.lock().len()
    }

    /// Create an agent whose id is unique within this run
    pub fn spawn_agent(&self, kind: AgentKind, node_id: &str, parent_id: Option<&str>) -> AgentHandle {
        let handle = {
            let mut issued = self.issued.lock();
            loop {
                let handle = self.factory.create(kind, node_id, parent_id.map(str::to_string));
                if issued.insert(handle.id()) {
                    break handle;
                }
                warn!(agent_id = %handle.id(), "Agent id already issued in this run, drawing another");
            }
        };

        self.emit(RunEvent::AgentSpawned {
            agent_id: handle.id(),
            kind,
            node_id: node_id.to_string(),
            parent_id: parent_id.map(str::to_string),
        });
        handle
    }

    /// Executor for a leaf of the tree
    pub fn executor_for(&self, leaf: &TaskNode) -> WorkerNode {
        let handle = self.spawn_agent(AgentKind::Executor, &leaf.id, leaf.parent_id.as_deref());
        WorkerNode::Executor {
            executor: Executor::new(handle, Arc::clone(&self.worker), self.config.executor_prompt.clone()),
            task: leaf.task_payload().to_string(),
        }
    }

    /// Supervisor for a parent whose barrier just closed
    pub fn supervisor_for(
        &self,
        parent_id: &str,
        results: Vec<ChildResult>,
    ) -> Result<WorkerNode, CompoundError> {
        let node = self
            .tree
            .node(parent_id)
            .ok_or_else(|| StructuralError::UntrackedParent(parent_id.to_string()))?;
        let objective = if node.description.is_empty() { &node.id } else { &node.description };

        let handle = self.spawn_agent(AgentKind::Supervisor, &node.id, node.parent_id.as_deref());
        Ok(WorkerNode::Supervisor {
            supervisor: Supervisor::new(
                handle,
                Arc::clone(&self.worker),
                self.config.supervisor_prompt.clone(),
                objective.clone(),
            ),
            results,
        })
    }

    /// Send an observer event; a departed observer is not an error
    pub fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}
