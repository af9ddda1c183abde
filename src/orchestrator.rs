//! Main orchestrator - plans a task, fans out leaves, escalates joins to the root

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::channel::{completion_bus, BusEvent, CompletionSender};
use crate::config::CoordinatorConfig;
use crate::error::CompoundError;
use crate::join::Escalation;
use crate::node::WorkerNode;
use crate::protocol::{CompletionStatus, RunEvent};
use crate::session::Session;
use crate::tree::TaskTree;
use crate::worker::{planner_conversation, Worker};

/// Terminal result of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub root_id: String,
    pub status: CompletionStatus,
    pub result: String,
    /// Barriers that closed, root included
    pub joins_fired: usize,
    /// Child results recorded across all barriers
    pub records: usize,
    /// Executors plus supervisors created
    pub agents: usize,
}

/// The compound orchestrator
///
/// Holds only configuration and the worker capability; all coordination
/// state is created per run and dropped when the run returns.
pub struct Orchestrator {
    worker: Arc<dyn Worker>,
    config: CoordinatorConfig,
    event_tx: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl Orchestrator {
    pub fn new(worker: Arc<dyn Worker>, config: CoordinatorConfig) -> Result<Self, CompoundError> {
        config.validate()?;
        Ok(Self {
            worker,
            config,
            event_tx: None,
        })
    }

    /// Create an orchestrator and return a receiver for its run events
    pub fn with_channel(
        worker: Arc<dyn Worker>,
        config: CoordinatorConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RunEvent>), CompoundError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut orchestrator = Self::new(worker, config)?;
        orchestrator.event_tx = Some(tx);
        Ok((orchestrator, rx))
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Ask the worker to decompose `task` into a validated tree
    #[instrument(skip(self))]
    pub async fn plan(&self, task: &str) -> Result<TaskTree, CompoundError> {
        let conversation = planner_conversation(&self.config.planner_prompt, task);
        let reply = self.worker.query(&conversation).await?;
        let tree = TaskTree::from_json_str(&reply.content)?;

        info!(root = %tree.root.id, nodes = tree.len(), leaves = tree.leaves().len(), "Task planned");
        Ok(tree)
    }

    /// Plan and execute a top-level task
    pub async fn run(&self, task: &str) -> Result<RunOutcome, CompoundError> {
        let tree = self.plan(task).await?;
        self.run_tree(tree).await
    }

    /// Execute a prebuilt tree until the root's synthesis completes
    #[instrument(skip(self, tree), fields(root = %tree.root.id))]
    pub async fn run_tree(&self, tree: TaskTree) -> Result<RunOutcome, CompoundError> {
        tree.ensure_runnable()?;

        let session = Session::new(
            tree,
            Arc::clone(&self.worker),
            self.config.clone(),
            self.event_tx.clone(),
        );
        let permits = Arc::new(Semaphore::new(self.config.max_parallel_agents));
        let (bus, mut inbox) = completion_bus();
        // Aborts whatever is still running if we return early
        let mut tasks = JoinSet::new();

        for leaf in session.tree().leaves() {
            let node = session.executor_for(leaf);
            spawn_node(&mut tasks, &permits, node, bus.clone());
        }
        info!(executors = session.agent_count(), "Leaf executors started");

        loop {
            tokio::select! {
                event = inbox.recv() => {
                    let event = event?;
                    if let Some(outcome) = self.handle_event(&session, &mut tasks, &permits, &bus, event)? {
                        return Ok(outcome);
                    }
                }
                Some(joined) = tasks.join_next() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Node task did not finish");
                        return Err(CompoundError::NodeFault(e.to_string()));
                    }
                }
            }
        }
    }

    /// Process one bus event; returns the outcome once the root has reported
    fn handle_event(
        &self,
        session: &Session,
        tasks: &mut JoinSet<()>,
        permits: &Arc<Semaphore>,
        bus: &CompletionSender,
        event: BusEvent,
    ) -> Result<Option<RunOutcome>, CompoundError> {
        let completion = match event {
            BusEvent::Completed(completion) => completion,
            BusEvent::Faulted { node_id, error } => {
                error!(node_id = %node_id, error = %error, "Node faulted");
                return Err(CompoundError::NodeFault(format!("{node_id}: {error}")));
            }
        };

        if completion.status.is_failed() {
            warn!(node_id = %completion.node_id, "Branch failed, escalating as data");
        }
        let child_id = completion.node_id.clone();

        match session.joins().report(completion)? {
            Escalation::Terminal(root) => {
                let joins = session.joins();
                session.emit(RunEvent::RunCompleted {
                    root_id: root.node_id.clone(),
                    status: root.status,
                });
                info!(
                    status = %root.status,
                    joins = joins.joins_fired(),
                    records = joins.records(),
                    "Run completed"
                );
                Ok(Some(RunOutcome {
                    root_id: root.node_id,
                    status: root.status,
                    result: root.result,
                    joins_fired: joins.joins_fired(),
                    records: joins.records(),
                    agents: session.agent_count(),
                }))
            }
            Escalation::Pending { parent_id, received, expected } => {
                debug!(parent_id = %parent_id, child_id = %child_id, received, expected, "Waiting for siblings");
                session.emit(RunEvent::ChildRecorded { parent_id, child_id, received, expected });
                Ok(None)
            }
            Escalation::Ready { parent_id, results } => {
                let count = results.len();
                session.emit(RunEvent::ChildRecorded {
                    parent_id: parent_id.clone(),
                    child_id,
                    received: count,
                    expected: count,
                });
                session.emit(RunEvent::JoinClosed { parent_id: parent_id.clone(), results: count });

                let node = session.supervisor_for(&parent_id, results)?;
                spawn_node(tasks, permits, node, bus.clone());
                Ok(None)
            }
        }
    }
}

fn spawn_node(
    tasks: &mut JoinSet<()>,
    permits: &Arc<Semaphore>,
    node: WorkerNode,
    bus: CompletionSender,
) {
    let permits = Arc::clone(permits);
    tasks.spawn(async move {
        // The semaphore is never closed, so a permit always arrives
        let _permit = permits.acquire_owned().await.ok();
        node.run_and_report(bus).await;
    });
}
