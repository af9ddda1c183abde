//! Worker nodes: executors run leaf tasks, supervisors merge children

use std::sync::Arc;

use tracing::{debug, warn};

use crate::agent::AgentHandle;
use crate::channel::{BusEvent, CompletionSender};
use crate::error::CompoundError;
use crate::protocol::{ChildResult, Completion, CompletionStatus, Message};
use crate::worker::{executor_conversation, supervisor_conversation, Worker};

/// Ask the worker, then close the handle with whatever came back.
///
/// A worker failure is not an error here: it becomes a `Failed` completion.
async fn query_and_complete(
    handle: &AgentHandle,
    worker: &dyn Worker,
    conversation: &[Message],
) -> Result<Completion, CompoundError> {
    handle.activate()?;

    let (status, result) = match worker.query(conversation).await {
        Ok(reply) => (CompletionStatus::Submitted, reply.content),
        Err(e) => {
            warn!(agent_id = %handle.id(), node_id = %handle.node_id, error = %e, "Worker query failed");
            (CompletionStatus::Failed, e.message)
        }
    };

    handle.complete(status, result)
}

/// Leaf node: performs one atomic task
pub struct Executor {
    handle: AgentHandle,
    worker: Arc<dyn Worker>,
    system_prompt: String,
}

impl Executor {
    pub fn new(handle: AgentHandle, worker: Arc<dyn Worker>, system_prompt: impl Into<String>) -> Self {
        Self {
            handle,
            worker,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn handle(&self) -> &AgentHandle {
        &self.handle
    }

    /// Hand the literal task to the worker
    pub async fn run(&self, task: &str) -> Result<Completion, CompoundError> {
        debug!(agent_id = %self.handle.id(), task = %task, "Executor running");
        let conversation = executor_conversation(&self.system_prompt, task);
        query_and_complete(&self.handle, self.worker.as_ref(), &conversation).await
    }
}

/// Inner node: synthesizes its children's results into one outcome
pub struct Supervisor {
    handle: AgentHandle,
    worker: Arc<dyn Worker>,
    system_prompt: String,
    objective: String,
}

impl Supervisor {
    pub fn new(
        handle: AgentHandle,
        worker: Arc<dyn Worker>,
        system_prompt: impl Into<String>,
        objective: impl Into<String>,
    ) -> Self {
        Self {
            handle,
            worker,
            system_prompt: system_prompt.into(),
            objective: objective.into(),
        }
    }

    pub fn handle(&self) -> &AgentHandle {
        &self.handle
    }

    /// Merge child results. The supervisor's own status reflects its synthesis
    /// query; failed children are passed to the model flagged, not filtered.
    pub async fn analyze(&self, results: &[ChildResult]) -> Result<Completion, CompoundError> {
        let failed = results.iter().filter(|r| r.status.is_failed()).count();
        debug!(
            agent_id = %self.handle.id(),
            node_id = %self.handle.node_id,
            children = results.len(),
            failed,
            "Supervisor analyzing"
        );

        let conversation = supervisor_conversation(&self.system_prompt, &self.objective, results);
        query_and_complete(&self.handle, self.worker.as_ref(), &conversation).await
    }
}

/// A unit of work ready to be scheduled, together with its input
pub enum WorkerNode {
    Executor { executor: Executor, task: String },
    Supervisor { supervisor: Supervisor, results: Vec<ChildResult> },
}

impl WorkerNode {
    pub fn handle(&self) -> &AgentHandle {
        match self {
            Self::Executor { executor, .. } => executor.handle(),
            Self::Supervisor { supervisor, .. } => supervisor.handle(),
        }
    }

    pub async fn run(self) -> Result<Completion, CompoundError> {
        match self {
            Self::Executor { executor, task } => executor.run(&task).await,
            Self::Supervisor { supervisor, results } => supervisor.analyze(&results).await,
        }
    }

    /// Run and post the single resulting report on the bus
    pub async fn run_and_report(self, bus: CompletionSender) {
        let node_id = self.handle().node_id.clone();
        let event = match self.run().await {
            Ok(completion) => BusEvent::Completed(completion),
            Err(e) => BusEvent::Faulted { node_id, error: e.to_string() },
        };
        if bus.send(event).is_err() {
            debug!("Completion bus closed before report could be delivered");
        }
    }
}
