//! Task tree construction and validation
//!
//! A planner describes work as a flat, level-indexed descriptor:
//!
//! ```json
//! {
//!   "root":    {"id": "audit", "description": "Audit", "kind": "planner"},
//!   "level_1": [{"id": "recon", "supervisor": "audit", "kind": "supervisor"}],
//!   "level_2": [{"id": "port_scan", "supervisor": "recon", "kind": "executor",
//!                "command": "nmap -sS target"}]
//! }
//! ```
//!
//! [`TaskTree::build`] turns that into a validated tree. Every parent reference
//! must point at a strictly shallower level, which rules out cycles and forward
//! references by construction.

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::StructuralError;
use crate::protocol::NodeKind;

const LEVEL_PREFIX: &str = "level_";

/// One node as written in the descriptor, before validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawNode {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub supervisor: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
}

/// Parsed but unvalidated task descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDescriptor {
    pub root: Option<RawNode>,
    /// Nodes keyed by their 1-based level index
    pub levels: BTreeMap<usize, Vec<RawNode>>,
}

impl TaskDescriptor {
    /// Parse a descriptor from text.
    ///
    /// Accepts a bare JSON object, or a reply that wraps one in a fenced code
    /// block.
    pub fn from_json_str(raw: &str) -> Result<Self, StructuralError> {
        let value = match serde_json::from_str::<Value>(raw.trim()) {
            Ok(value) => value,
            Err(direct) => {
                let fenced = extract_fenced_block(raw).ok_or_else(|| {
                    StructuralError::InvalidDescriptor(direct.to_string())
                })?;
                serde_json::from_str::<Value>(fenced)
                    .map_err(|e| StructuralError::InvalidDescriptor(e.to_string()))?
            }
        };
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, StructuralError> {
        let Value::Object(map) = value else {
            return Err(StructuralError::InvalidDescriptor(
                "expected a JSON object".into(),
            ));
        };

        let mut descriptor = Self::default();
        for (key, value) in map {
            if key == "root" {
                let root = serde_json::from_value::<RawNode>(value).map_err(|e| {
                    StructuralError::InvalidNode { key: key.clone(), reason: e.to_string() }
                })?;
                descriptor.root = Some(root);
                continue;
            }

            let Some(suffix) = key.strip_prefix(LEVEL_PREFIX) else {
                debug!(key = %key, "Ignoring non-level descriptor key");
                continue;
            };
            let index = suffix
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| StructuralError::UnexpectedKey(key.clone()))?;

            let nodes = serde_json::from_value::<Vec<RawNode>>(value).map_err(|e| {
                StructuralError::InvalidNode { key: key.clone(), reason: e.to_string() }
            })?;
            if descriptor.levels.insert(index, nodes).is_some() {
                // "level_01" and "level_1" name the same level
                return Err(StructuralError::UnexpectedKey(key));
            }
        }

        Ok(descriptor)
    }
}

fn extract_fenced_block(raw: &str) -> Option<&str> {
    let start = raw.find("```")?;
    let after = &raw[start + 3..];
    // Skip the info string ("json") up to the end of the fence line
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn parse_kind(id: &str, key: &str, raw: &str) -> Result<NodeKind, StructuralError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "planner" => Ok(NodeKind::Planner),
        "supervisor" => Ok(NodeKind::Supervisor),
        "executor" => Ok(NodeKind::Executor),
        other => Err(StructuralError::InvalidNode {
            key: key.to_string(),
            reason: format!("node '{id}' has unknown kind '{other}'"),
        }),
    }
}

/// A validated node of the task tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNode {
    pub id: String,
    pub description: String,
    pub kind: NodeKind,
    /// None only for the root
    pub parent_id: Option<String>,
    /// Opaque payload for leaf executors
    pub command: Option<String>,
}

impl TaskNode {
    /// The literal atomic task handed to an executor
    pub fn task_payload(&self) -> &str {
        match &self.command {
            Some(command) => command,
            None if self.description.is_empty() => &self.id,
            None => &self.description,
        }
    }
}

/// All nodes at one depth of the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLevel {
    pub index: usize,
    pub nodes: Vec<TaskNode>,
}

/// Validated task hierarchy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTree {
    pub root: TaskNode,
    /// Contiguous levels, `levels[i].index == i + 1`
    pub levels: Vec<TaskLevel>,
}

impl TaskTree {
    /// Parse and validate a descriptor in one step
    pub fn from_json_str(raw: &str) -> Result<Self, StructuralError> {
        Self::build(&TaskDescriptor::from_json_str(raw)?)
    }

    /// Validate a descriptor into a tree
    pub fn build(descriptor: &TaskDescriptor) -> Result<Self, StructuralError> {
        let raw_root = descriptor.root.as_ref().ok_or(StructuralError::MissingRoot)?;
        let root = build_root(raw_root)?;

        let mut all_ids: HashSet<&str> = HashSet::new();
        all_ids.insert(&raw_root.id);
        let mut shallower: HashSet<&str> = all_ids.clone();
        let mut referenced: HashSet<&str> = HashSet::new();

        for (expected, (&index, nodes)) in (1..).zip(descriptor.levels.iter()) {
            if index != expected {
                return Err(StructuralError::MissingLevel(expected));
            }
            if nodes.is_empty() {
                return Err(StructuralError::EmptyLevel(index));
            }

            let key = format!("{LEVEL_PREFIX}{index}");
            let mut this_level = Vec::with_capacity(nodes.len());
            for node in nodes {
                if node.id.trim().is_empty() {
                    return Err(StructuralError::EmptyId { level: index });
                }
                if !all_ids.insert(&node.id) {
                    return Err(StructuralError::DuplicateId(node.id.clone()));
                }
                let parent = node
                    .supervisor
                    .as_deref()
                    .filter(|p| !p.trim().is_empty())
                    .ok_or_else(|| StructuralError::MissingSupervisor { id: node.id.clone() })?;
                if !shallower.contains(parent) {
                    return Err(StructuralError::UnknownParent {
                        id: node.id.clone(),
                        parent: parent.to_string(),
                    });
                }
                if let Some(kind) = &node.kind {
                    if parse_kind(&node.id, &key, kind)? == NodeKind::Planner {
                        return Err(StructuralError::UnexpectedKind {
                            id: node.id.clone(),
                            kind: NodeKind::Planner.to_string(),
                        });
                    }
                }
                referenced.insert(parent);
                this_level.push(node.id.as_str());
            }
            shallower.extend(this_level);
        }

        let deepest = descriptor.levels.len();
        let mut levels = Vec::with_capacity(deepest);
        for (&index, nodes) in &descriptor.levels {
            let key = format!("{LEVEL_PREFIX}{index}");
            let mut built = Vec::with_capacity(nodes.len());
            for node in nodes {
                let has_children = referenced.contains(node.id.as_str());
                let declared = match &node.kind {
                    Some(kind) => Some(parse_kind(&node.id, &key, kind)?),
                    None => None,
                };
                // Only a node with children is forced to be a supervisor; a
                // childless one keeps whatever it declared
                let kind = match (has_children, declared) {
                    (true, Some(NodeKind::Executor)) => {
                        return Err(StructuralError::UnexpectedKind {
                            id: node.id.clone(),
                            kind: NodeKind::Executor.to_string(),
                        });
                    }
                    (true, _) => NodeKind::Supervisor,
                    (false, Some(kind)) => kind,
                    (false, None) if index < deepest => NodeKind::Supervisor,
                    (false, None) => NodeKind::Executor,
                };
                built.push(TaskNode {
                    id: node.id.clone(),
                    description: node.description.clone(),
                    kind,
                    parent_id: node.supervisor.clone(),
                    command: node.command.clone(),
                });
            }
            levels.push(TaskLevel { index, nodes: built });
        }

        Ok(Self { root, levels })
    }

    /// Number of levels below the root
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn deepest_level(&self) -> Option<&TaskLevel> {
        self.levels.last()
    }

    /// Leaf tasks (the deepest level)
    pub fn leaves(&self) -> &[TaskNode] {
        self.deepest_level().map(|l| l.nodes.as_slice()).unwrap_or(&[])
    }

    /// Iterate over every node, root first, level by level
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        std::iter::once(&self.root).chain(self.levels.iter().flat_map(|l| l.nodes.iter()))
    }

    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.nodes().find(|n| n.id == id)
    }

    pub fn children_of(&self, id: &str) -> Vec<&TaskNode> {
        self.nodes()
            .filter(|n| n.parent_id.as_deref() == Some(id))
            .collect()
    }

    /// Total node count, root included
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        1 + self.levels.iter().map(|l| l.nodes.len()).sum::<usize>()
    }

    /// Check that every barrier in the tree can eventually fire.
    ///
    /// Only the deepest level is executed, so a node above it with no
    /// children would never report and would stall its ancestors.
    pub fn ensure_runnable(&self) -> Result<(), StructuralError> {
        if self.leaves().is_empty() {
            return Err(StructuralError::NoLeaves);
        }
        let parents = self.child_count_map();
        let inner = self.levels.iter().take(self.levels.len() - 1);
        for node in inner.flat_map(|l| l.nodes.iter()) {
            if parents.get(&node.id).is_none() {
                return Err(StructuralError::Childless { id: node.id.clone() });
            }
        }
        Ok(())
    }

    pub fn parent_map(&self) -> ParentMap {
        parent_map(self)
    }

    pub fn child_count_map(&self) -> ChildCountMap {
        child_count_map(self)
    }
}

fn build_root(raw: &RawNode) -> Result<TaskNode, StructuralError> {
    if raw.id.trim().is_empty() {
        return Err(StructuralError::MalformedRoot("root id is empty".into()));
    }
    if raw.supervisor.is_some() {
        return Err(StructuralError::MalformedRoot(format!(
            "root '{}' cannot have a supervisor",
            raw.id
        )));
    }
    if let Some(kind) = &raw.kind {
        let kind = parse_kind(&raw.id, "root", kind)
            .map_err(|e| StructuralError::MalformedRoot(e.to_string()))?;
        if kind != NodeKind::Planner {
            return Err(StructuralError::MalformedRoot(format!(
                "root '{}' must be a planner, not a {kind}",
                raw.id
            )));
        }
    }

    Ok(TaskNode {
        id: raw.id.clone(),
        description: raw.description.clone(),
        kind: NodeKind::Planner,
        parent_id: None,
        command: None,
    })
}

/// Child id -> parent id, for every node except the root
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParentMap(BTreeMap<String, String>);

impl ParentMap {
    pub fn get(&self, child_id: &str) -> Option<&str> {
        self.0.get(child_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(c, p)| (c.as_str(), p.as_str()))
    }
}

/// Parent id -> number of direct children
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildCountMap(BTreeMap<String, usize>);

impl ChildCountMap {
    pub fn get(&self, parent_id: &str) -> Option<usize> {
        self.0.get(parent_id).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of all expected children
    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().map(|(p, n)| (p.as_str(), *n))
    }
}

pub fn parent_map(tree: &TaskTree) -> ParentMap {
    ParentMap(
        tree.nodes()
            .filter_map(|n| n.parent_id.as_ref().map(|p| (n.id.clone(), p.clone())))
            .collect(),
    )
}

pub fn child_count_map(tree: &TaskTree) -> ChildCountMap {
    let mut counts = BTreeMap::new();
    for parent in tree.nodes().filter_map(|n| n.parent_id.as_ref()) {
        *counts.entry(parent.clone()).or_insert(0) += 1;
    }
    ChildCountMap(counts)
}
