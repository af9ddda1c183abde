//! End-to-end runs against a scripted worker

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use compound::{
    AgentKind, CompletionStatus, CompoundError, CoordinatorConfig, Message, Orchestrator, Reply,
    RunEvent, TaskTree, Worker, WorkerError,
};

const RECON_TREE: &str = r#"{
    "root": {"id": "vuln_assessment", "description": "Vulnerability Assessment", "kind": "planner"},
    "level_1": [
        {"id": "recon", "description": "Reconnaissance", "supervisor": "vuln_assessment", "kind": "supervisor"},
        {"id": "web_testing", "description": "Web Testing", "supervisor": "vuln_assessment", "kind": "supervisor"},
        {"id": "network_testing", "description": "Network Testing", "supervisor": "vuln_assessment", "kind": "supervisor"}
    ],
    "level_2": [
        {"id": "domain_enum", "supervisor": "recon", "kind": "executor", "command": "subfinder -d target.com"},
        {"id": "port_scan", "supervisor": "recon", "kind": "executor", "command": "nmap -sS target.com"},
        {"id": "service_detect", "supervisor": "recon", "kind": "executor", "command": "nmap -sV target.com"},
        {"id": "sql_injection", "supervisor": "web_testing", "kind": "executor", "command": "sqlmap -u http://target.com/login"},
        {"id": "xss_test", "supervisor": "web_testing", "kind": "executor", "command": "xsshunter scan http://target.com"},
        {"id": "dir_enum", "supervisor": "network_testing", "kind": "executor", "command": "gobuster dir -u http://target.com"}
    ]
}"#;

/// Plans with a fixed descriptor, echoes executor tasks, and merges by listing
/// child ids (failed ones suffixed with `!`).
struct ScriptedWorker {
    plan: String,
    fail_tasks: Vec<String>,
    /// Objectives whose synthesis query fails
    fail_merges: Vec<String>,
    /// Reverse the natural finishing order of executors
    reverse_delays: bool,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedWorker {
    fn new(plan: &str) -> Self {
        Self {
            plan: plan.to_string(),
            fail_tasks: Vec::new(),
            fail_merges: Vec::new(),
            reverse_delays: false,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn failing(mut self, task: &str) -> Self {
        self.fail_tasks.push(task.to_string());
        self
    }

    fn failing_merge(mut self, objective: &str) -> Self {
        self.fail_merges.push(objective.to_string());
        self
    }

    fn reversed(mut self) -> Self {
        self.reverse_delays = true;
        self
    }

    fn delay_for(&self, task: &str) -> Duration {
        let weight = task.len() as u64 % 7;
        let weight = if self.reverse_delays { 7 - weight } else { weight };
        Duration::from_millis(weight * 3)
    }

    async fn answer(&self, conversation: &[Message]) -> Result<Reply, WorkerError> {
        let system = conversation[0].content.as_str();
        let body = conversation[1].content.as_str();
        match system {
            "plan" => Ok(Reply::new(format!("```json\n{}\n```", self.plan))),
            "exec" => {
                tokio::time::sleep(self.delay_for(body)).await;
                if self.fail_tasks.iter().any(|t| t == body) {
                    return Err(WorkerError::new(format!("{body}: tool crashed")));
                }
                Ok(Reply::new(format!("ran {body}")))
            }
            "merge" => {
                if let Some(objective) = self.fail_merges.iter().find(|o| body.contains(&format!("\"{o}\""))) {
                    return Err(WorkerError::new(format!("{objective}: synthesis timed out")));
                }
                let children: Vec<String> = body
                    .lines()
                    .filter_map(|l| l.strip_prefix("## "))
                    .map(|l| l.replace(" [FAILED]", "!"))
                    .collect();
                Ok(Reply::new(format!("merge[{}]", children.join(","))))
            }
            other => Err(WorkerError::new(format!("unexpected prompt {other}"))),
        }
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn query(&self, conversation: &[Message]) -> Result<Reply, WorkerError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let reply = self.answer(conversation).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        reply
    }
}

fn config() -> CoordinatorConfig {
    CoordinatorConfig {
        planner_prompt: "plan".into(),
        executor_prompt: "exec".into(),
        supervisor_prompt: "merge".into(),
        ..Default::default()
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<RunEvent>) -> Vec<RunEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn joins_closed(events: &[RunEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            RunEvent::JoinClosed { parent_id, .. } => Some(parent_id.clone()),
            _ => None,
        })
        .collect()
}

fn spawned(events: &[RunEvent], kind: AgentKind) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, RunEvent::AgentSpawned { kind: k, .. } if *k == kind))
        .count()
}

#[tokio::test]
async fn single_supervisor_chain_closes_root_once() {
    let tree = TaskTree::from_json_str(
        r#"{"root": {"id": "main", "kind": "planner"},
            "level_1": [{"id": "sub1", "supervisor": "main", "kind": "supervisor"}],
            "level_2": [{"id": "exec1", "supervisor": "sub1", "kind": "executor"},
                        {"id": "exec2", "supervisor": "sub1", "kind": "executor"}]}"#,
    )
    .unwrap();
    let (orchestrator, mut rx) =
        Orchestrator::with_channel(Arc::new(ScriptedWorker::new("")), config()).unwrap();

    let outcome = orchestrator.run_tree(tree).await.unwrap();
    let events = drain(&mut rx);

    assert_eq!(outcome.root_id, "main");
    assert_eq!(outcome.result, "merge[sub1]");
    assert_eq!(outcome.records, 3);
    assert_eq!(outcome.joins_fired, 2);
    assert_eq!(joins_closed(&events), vec!["sub1", "main"]);
    assert_eq!(spawned(&events, AgentKind::Supervisor), 2);
    assert_eq!(
        events.iter().filter(|e| matches!(e, RunEvent::RunCompleted { .. })).count(),
        1
    );
}

#[tokio::test]
async fn independent_branches_each_close_before_root() {
    let tree = TaskTree::from_json_str(
        r#"{"root": {"id": "main"},
            "level_1": [{"id": "branch1", "supervisor": "main"},
                        {"id": "branch2", "supervisor": "main"}],
            "level_2": [{"id": "exec1", "supervisor": "branch1"},
                        {"id": "exec2", "supervisor": "branch2"}]}"#,
    )
    .unwrap();
    let (orchestrator, mut rx) =
        Orchestrator::with_channel(Arc::new(ScriptedWorker::new("")), config()).unwrap();

    let outcome = orchestrator.run_tree(tree).await.unwrap();
    let closed = joins_closed(&drain(&mut rx));

    assert_eq!(closed.len(), 3);
    assert_eq!(closed.last().map(String::as_str), Some("main"));
    assert_eq!(closed.iter().filter(|p| *p == "branch1").count(), 1);
    assert_eq!(closed.iter().filter(|p| *p == "branch2").count(), 1);
    assert_eq!(outcome.result, "merge[branch1,branch2]");
}

#[tokio::test]
async fn recon_tree_fires_three_supervisor_joins_then_root() {
    let tree = TaskTree::from_json_str(RECON_TREE).unwrap();
    assert_eq!(tree.parent_map().len(), 9);

    let (orchestrator, mut rx) =
        Orchestrator::with_channel(Arc::new(ScriptedWorker::new("")), config()).unwrap();
    let outcome = orchestrator.run_tree(tree).await.unwrap();
    let events = drain(&mut rx);
    let closed = joins_closed(&events);

    assert_eq!(closed.len(), 4);
    assert_eq!(closed.last().map(String::as_str), Some("vuln_assessment"));
    assert_eq!(outcome.records, 9);
    assert_eq!(outcome.joins_fired, 4);
    assert_eq!(outcome.agents, 10);
    assert_eq!(spawned(&events, AgentKind::Executor), 6);
    assert_eq!(spawned(&events, AgentKind::Supervisor), 4);
    assert_eq!(outcome.result, "merge[network_testing,recon,web_testing]");
}

#[tokio::test]
async fn failed_executor_is_escalated_as_data() {
    let worker = ScriptedWorker::new("").failing("nmap -sS target.com");
    let orchestrator = Orchestrator::new(Arc::new(worker), config()).unwrap();

    let tree = TaskTree::from_json_str(RECON_TREE).unwrap();
    let outcome = orchestrator.run_tree(tree).await.unwrap();

    // The root still closes; the failure only colors its own branch
    assert_eq!(outcome.status, CompletionStatus::Submitted);
    assert_eq!(outcome.records, 9);
    assert_eq!(outcome.joins_fired, 4);
}

#[tokio::test]
async fn failed_supervisor_synthesis_still_reaches_root() {
    let tree = TaskTree::from_json_str(
        r#"{"root": {"id": "main", "kind": "planner"},
            "level_1": [{"id": "sub1", "supervisor": "main", "kind": "supervisor"}],
            "level_2": [{"id": "exec1", "supervisor": "sub1", "kind": "executor"},
                        {"id": "exec2", "supervisor": "sub1", "kind": "executor"}]}"#,
    )
    .unwrap();
    let worker = ScriptedWorker::new("").failing_merge("sub1");
    let (orchestrator, mut rx) = Orchestrator::with_channel(Arc::new(worker), config()).unwrap();

    let outcome = orchestrator.run_tree(tree).await.unwrap();
    let events = drain(&mut rx);

    // sub1's own query failed; the root still synthesizes over it
    assert_eq!(outcome.status, CompletionStatus::Submitted);
    assert_eq!(outcome.result, "merge[sub1!]");
    assert_eq!(outcome.records, 3);
    assert_eq!(outcome.joins_fired, 2);
    assert_eq!(joins_closed(&events), vec!["sub1", "main"]);
}

#[tokio::test]
async fn failed_root_synthesis_is_the_outcome() {
    let tree = TaskTree::from_json_str(
        r#"{"root": {"id": "main"},
            "level_1": [{"id": "a", "supervisor": "main"},
                        {"id": "b", "supervisor": "main"}]}"#,
    )
    .unwrap();
    let worker = ScriptedWorker::new("").failing_merge("main");
    let orchestrator = Orchestrator::new(Arc::new(worker), config()).unwrap();

    let outcome = orchestrator.run_tree(tree).await.unwrap();
    assert_eq!(outcome.status, CompletionStatus::Failed);
    assert_eq!(outcome.result, "main: synthesis timed out");
    assert_eq!(outcome.joins_fired, 1);
}

#[tokio::test]
async fn failed_child_reaches_supervisor_flagged() {
    let tree = TaskTree::from_json_str(
        r#"{"root": {"id": "main"},
            "level_1": [{"id": "a", "supervisor": "main", "command": "ok-task"},
                        {"id": "b", "supervisor": "main", "command": "bad-task"}]}"#,
    )
    .unwrap();
    let worker = ScriptedWorker::new("").failing("bad-task");
    let orchestrator = Orchestrator::new(Arc::new(worker), config()).unwrap();

    let outcome = orchestrator.run_tree(tree).await.unwrap();
    assert_eq!(outcome.result, "merge[a,b!]");
}

#[tokio::test]
async fn result_is_independent_of_arrival_order() {
    let forward = Orchestrator::new(Arc::new(ScriptedWorker::new("")), config()).unwrap();
    let backward = Orchestrator::new(Arc::new(ScriptedWorker::new("").reversed()), config()).unwrap();

    let a = forward.run_tree(TaskTree::from_json_str(RECON_TREE).unwrap()).await.unwrap();
    let b = backward.run_tree(TaskTree::from_json_str(RECON_TREE).unwrap()).await.unwrap();

    assert_eq!(a.result, b.result);
    assert_eq!(a.status, b.status);
}

#[tokio::test]
async fn run_plans_through_the_worker() {
    let orchestrator = Orchestrator::new(Arc::new(ScriptedWorker::new(RECON_TREE)), config()).unwrap();

    let outcome = orchestrator.run("assess target.com").await.unwrap();
    assert_eq!(outcome.root_id, "vuln_assessment");
    assert_eq!(outcome.joins_fired, 4);
}

#[tokio::test]
async fn planner_failure_aborts_before_any_agent() {
    struct Down;

    #[async_trait]
    impl Worker for Down {
        async fn query(&self, _conversation: &[Message]) -> Result<Reply, WorkerError> {
            Err(WorkerError::new("service unavailable"))
        }
    }

    let (orchestrator, mut rx) = Orchestrator::with_channel(Arc::new(Down), config()).unwrap();
    let err = orchestrator.run("anything").await.unwrap_err();

    assert!(matches!(err, CompoundError::Worker(ref e) if e.message == "service unavailable"));
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn parallelism_is_bounded() {
    let worker = Arc::new(ScriptedWorker::new(""));
    let config = CoordinatorConfig { max_parallel_agents: 2, ..config() };
    let orchestrator = Orchestrator::new(worker.clone(), config).unwrap();

    orchestrator.run_tree(TaskTree::from_json_str(RECON_TREE).unwrap()).await.unwrap();
    assert!(worker.peak.load(Ordering::SeqCst) <= 2);
}
