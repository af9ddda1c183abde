//! Fan-in barriers: one per parent id, each closing exactly once
//!
//! ```text
//!   exec1 ──┐
//!   exec2 ──┼──► [sub1: 2/3 open] ──(3/3)──► closed ──► Supervisor(sub1) ──► [main: ...]
//!   exec3 ──┘
//! ```
//!
//! Every barrier has its own lock, so records for different parents never
//! contend. The set of barriers is fixed when the coordinator is built.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{CompoundError, StructuralError};
use crate::protocol::{ChildResult, Completion};
use crate::tree::{ChildCountMap, ParentMap, TaskTree};

#[derive(Debug)]
enum BarrierState {
    Open(Vec<ChildResult>),
    Closed(Vec<ChildResult>),
}

#[derive(Debug)]
struct Barrier {
    expected: usize,
    state: Mutex<BarrierState>,
}

/// Result of recording one child against its parent's barrier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Still waiting for siblings
    Pending { received: usize, expected: usize },
    /// This record was the last one; the caller owns escalation
    Closed(Vec<ChildResult>),
}

/// What to do with a completion once it has been routed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Escalation {
    /// The completion came from the root: the run is over
    Terminal(Completion),
    Pending { parent_id: String, received: usize, expected: usize },
    /// `parent_id` must now be synthesized from `results`
    Ready { parent_id: String, results: Vec<ChildResult> },
}

/// Read-only view of one barrier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSnapshot {
    pub expected: usize,
    pub received: usize,
    pub closed: bool,
}

/// Tracks how many children of each parent have reported
#[derive(Debug)]
pub struct JoinCoordinator {
    parents: ParentMap,
    barriers: HashMap<String, Barrier>,
    sort_results: bool,
    records: AtomicUsize,
    joins_fired: AtomicUsize,
}

impl JoinCoordinator {
    pub fn new(parents: ParentMap, child_counts: &ChildCountMap) -> Self {
        let barriers = child_counts
            .iter()
            .map(|(parent, expected)| {
                let barrier = Barrier {
                    expected,
                    state: Mutex::new(BarrierState::Open(Vec::with_capacity(expected))),
                };
                (parent.to_string(), barrier)
            })
            .collect();

        Self {
            parents,
            barriers,
            sort_results: true,
            records: AtomicUsize::new(0),
            joins_fired: AtomicUsize::new(0),
        }
    }

    pub fn for_tree(tree: &TaskTree) -> Self {
        Self::new(tree.parent_map(), &tree.child_count_map())
    }

    /// Keep arrival order instead of sorting closed results by child id
    pub fn with_sorting(mut self, sort_results: bool) -> Self {
        self.sort_results = sort_results;
        self
    }

    pub fn parent_of(&self, child_id: &str) -> Option<&str> {
        self.parents.get(child_id)
    }

    /// Record one child result against `parent_id`.
    ///
    /// Returns [`JoinOutcome::Closed`] to exactly one caller per parent. Records
    /// arriving after that fail with [`CompoundError::Join`] and leave the
    /// closed barrier untouched.
    pub fn record(&self, parent_id: &str, result: ChildResult) -> Result<JoinOutcome, CompoundError> {
        let barrier = self
            .barriers
            .get(parent_id)
            .ok_or_else(|| StructuralError::UntrackedParent(parent_id.to_string()))?;

        let mut state = barrier.state.lock();
        let results = match &mut *state {
            BarrierState::Closed(_) => {
                return Err(CompoundError::Join {
                    parent_id: parent_id.to_string(),
                    expected: barrier.expected,
                });
            }
            BarrierState::Open(results) => results,
        };
        if results.iter().any(|r| r.child_id == result.child_id) {
            return Err(CompoundError::DuplicateChild {
                parent_id: parent_id.to_string(),
                child_id: result.child_id,
            });
        }

        results.push(result);
        self.records.fetch_add(1, Ordering::Relaxed);
        let received = results.len();

        if received < barrier.expected {
            debug!(parent_id = %parent_id, received, expected = barrier.expected, "Child recorded");
            return Ok(JoinOutcome::Pending { received, expected: barrier.expected });
        }

        let mut closed = std::mem::take(results);
        if self.sort_results {
            closed.sort_by(|a, b| a.child_id.cmp(&b.child_id));
        }
        *state = BarrierState::Closed(closed.clone());
        drop(state);

        self.joins_fired.fetch_add(1, Ordering::Relaxed);
        info!(parent_id = %parent_id, children = received, "Join closed");
        Ok(JoinOutcome::Closed(closed))
    }

    /// Route a finished node's completion to its parent's barrier
    pub fn report(&self, completion: Completion) -> Result<Escalation, CompoundError> {
        let Some(parent_id) = self.parents.get(&completion.node_id).map(str::to_string) else {
            return Ok(Escalation::Terminal(completion));
        };

        match self.record(&parent_id, completion.into_child_result())? {
            JoinOutcome::Pending { received, expected } => {
                Ok(Escalation::Pending { parent_id, received, expected })
            }
            JoinOutcome::Closed(results) => Ok(Escalation::Ready { parent_id, results }),
        }
    }

    pub fn snapshot(&self, parent_id: &str) -> Option<JoinSnapshot> {
        let barrier = self.barriers.get(parent_id)?;
        let state = barrier.state.lock();
        let (received, closed) = match &*state {
            BarrierState::Open(r) => (r.len(), false),
            BarrierState::Closed(r) => (r.len(), true),
        };
        Some(JoinSnapshot { expected: barrier.expected, received, closed })
    }

    /// Results collected by a closed barrier
    pub fn closed_results(&self, parent_id: &str) -> Option<Vec<ChildResult>> {
        match &*self.barriers.get(parent_id)?.state.lock() {
            BarrierState::Closed(results) => Some(results.clone()),
            BarrierState::Open(_) => None,
        }
    }

    /// Child results accepted so far, across all barriers
    pub fn records(&self) -> usize {
        self.records.load(Ordering::Relaxed)
    }

    pub fn joins_fired(&self) -> usize {
        self.joins_fired.load(Ordering::Relaxed)
    }
}
