//! # Compound
//!
//! Hierarchical task decomposition with bottom-up completion aggregation.
//!
//! A planner splits an objective into a tree. Leaf executors run concurrently;
//! each parent waits at a fan-in barrier until every child has reported, then a
//! supervisor is created on demand to merge those results. The merged result
//! feeds the next barrier up, until the root produces the run's single outcome.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        ORCHESTRATOR (per run)                       │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────────┐   │
//! │  │ Tree Builder │  │ Agent Factory│  │ Join Coordinator         │   │
//! │  └──────────────┘  └──────────────┘  │ (one barrier per parent) │   │
//! │                                      └────────────▲─────────────┘   │
//! └───────────────────────────────────────────────────┼─────────────────┘
//!                                   completion bus    │
//!          ┌───────────────────┬───────────────────┬──┘
//!          │                   │                   │
//!   ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//!   │ Supervisor  │     │ Supervisor  │     │ Supervisor  │   created when
//!   │  (level 1)  │     │  (level 1)  │     │  (level 1)  │   the barrier closes
//!   └──────▲──────┘     └──────▲──────┘     └──────▲──────┘
//!     ┌────┴────┐         ┌────┴────┐         ┌────┴────┐
//!   ┌───┐┌───┐┌───┐     ┌───┐┌───┐┌───┐     ┌───┐┌───┐┌───┐
//!   │E1 ││E2 ││E3 │     │E4 ││E5 ││E6 │     │E7 ││E8 ││E9 │   run concurrently
//!   └───┘└───┘└───┘     └───┘└───┘└───┘     └───┘└───┘└───┘
//! ```
//!
//! ## Key Concepts
//!
//! - **Worker**: the injected capability that answers a conversation
//! - **Executor**: leaf node performing one atomic task
//! - **Supervisor**: node merging its children's results
//! - **Join**: per-parent barrier that fires exactly once
//! - **Escalation**: feeding a closed join's synthesis into the next join up
//!
//! Worker failures are data: a failed executor still reports, and its parent
//! decides what a mix of successes and failures amounts to.

pub mod agent;
pub mod channel;
pub mod config;
pub mod error;
pub mod join;
pub mod node;
pub mod orchestrator;
pub mod protocol;
pub mod session;
pub mod tree;
pub mod worker;

pub use agent::{Agent, AgentFactory, AgentHandle};
pub use channel::{completion_bus, BusEvent, CompletionReceiver, CompletionSender};
pub use config::CoordinatorConfig;
pub use error::{CompoundError, StructuralError, WorkerError};
pub use join::{Escalation, JoinCoordinator, JoinOutcome};
pub use node::{Executor, Supervisor, WorkerNode};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use protocol::{
    AgentId, AgentKind, AgentStatus, ChildResult, Completion, CompletionStatus, Message, NodeKind,
    Role, RunEvent,
};
pub use session::Session;
pub use tree::{ChildCountMap, ParentMap, TaskDescriptor, TaskNode, TaskTree};
pub use worker::{Reply, Worker};
