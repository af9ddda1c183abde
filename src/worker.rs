//! The worker capability: the one seam through which language-model calls happen

use std::fmt::Write as _;

use async_trait::async_trait;

use crate::error::WorkerError;
use crate::protocol::{ChildResult, Message};

/// Reply from the worker capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub content: String,
}

impl Reply {
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: content.into() }
    }
}

/// Answers a conversation. Injected into every node that needs a model.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn query(&self, conversation: &[Message]) -> Result<Reply, WorkerError>;
}

/// Conversation asking for a task tree
pub fn planner_conversation(system_prompt: &str, task: &str) -> Vec<Message> {
    vec![
        Message::system(system_prompt),
        Message::user(format!("Decompose this objective into a task tree:\n\n{task}")),
    ]
}

/// Conversation asking an executor to do one atomic task
pub fn executor_conversation(system_prompt: &str, task: &str) -> Vec<Message> {
    vec![Message::system(system_prompt), Message::user(task)]
}

/// Conversation asking a supervisor to merge its children's results
pub fn supervisor_conversation(
    system_prompt: &str,
    objective: &str,
    results: &[ChildResult],
) -> Vec<Message> {
    let mut body = String::new();
    let _ = writeln!(
        body,
        "Here are {} sub-results for \"{objective}\". Produce one aggregate outcome.",
        results.len()
    );
    for result in results {
        let flag = if result.status.is_failed() { " [FAILED]" } else { "" };
        let _ = write!(body, "\n## {}{flag}\n{}\n", result.child_id, result.content);
    }

    vec![Message::system(system_prompt), Message::user(body)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Role;

    #[test]
    fn test_executor_conversation_carries_literal_task() {
        let conversation = executor_conversation("sys", "nmap -sS target.com");
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation[0].role, Role::System);
        assert_eq!(conversation[1].content, "nmap -sS target.com");
    }

    #[test]
    fn test_supervisor_conversation_lists_results() {
        let results = vec![
            ChildResult::submitted("port_scan", "22, 80 open"),
            ChildResult::failed("domain_enum", "subfinder missing"),
        ];
        let conversation = supervisor_conversation("sys", "Reconnaissance", &results);
        let body = &conversation[1].content;

        assert!(body.starts_with("Here are 2 sub-results for \"Reconnaissance\""));
        assert!(body.contains("## port_scan\n22, 80 open"));
        assert!(body.contains("## domain_enum [FAILED]\nsubfinder missing"));
    }
}
