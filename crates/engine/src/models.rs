//! The flow document as the editor stores it.
//!
//! These types are the source of truth for what a chatbot flow looks like in
//! memory. They deserialize straight from the editor's JSON and are treated
//! as an immutable snapshot for the duration of one resume step.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nodes::traits::Successors;
use nodes::NodeKind;

// ---------------------------------------------------------------------------
// FlowNode
// ---------------------------------------------------------------------------

/// A single step in the flow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    /// Unique identifier within this flow (referenced by edges).
    pub id: String,
    /// `type` tag plus the matching `data` record.
    #[serde(flatten)]
    pub kind: NodeKind,
    /// Canvas position; editor-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// FlowEdge
// ---------------------------------------------------------------------------

/// Directed edge from one node to another.
///
/// Edges leaving a `condition` node carry `sourceHandle: "true" | "false"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEdge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(rename = "sourceHandle", default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(rename = "targetHandle", default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl FlowEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
            label: None,
        }
    }

    /// An edge leaving a condition node through its `true` or `false` handle.
    pub fn branch(source: impl Into<String>, target: impl Into<String>, outcome: bool) -> Self {
        Self {
            source_handle: Some(outcome.to_string()),
            ..Self::new(source, target)
        }
    }

    /// `Some(true)`/`Some(false)` for edges tagged with a branch handle.
    pub fn branch_outcome(&self) -> Option<bool> {
        match self.source_handle.as_deref() {
            Some("true") => Some(true),
            Some("false") => Some(false),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ChatbotFlow
// ---------------------------------------------------------------------------

/// A complete flow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatbotFlow {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub niche: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ChatbotFlow {
    /// Convenience constructor for testing.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        nodes: Vec<FlowNode>,
        edges: Vec<FlowEdge>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            niche: None,
            id_device: None,
            user_id: None,
            nodes,
            edges,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The first `start` node. Validated flows have exactly one.
    pub fn start_node(&self) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.kind.is_start())
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a FlowEdge> + 'a {
        self.edges.iter().filter(move |e| e.source == id)
    }

    /// Resolve where `id` may go next. Condition nodes only route through
    /// their branch handles; every other kind follows its first edge.
    pub fn successors(&self, id: &str) -> Successors {
        let mut successors = Successors::default();
        let is_condition = self.node(id).is_some_and(|n| n.kind.is_condition());

        for edge in self.outgoing(id) {
            let slot = match (is_condition, edge.branch_outcome()) {
                (true, Some(true)) => &mut successors.on_true,
                (true, Some(false)) => &mut successors.on_false,
                (true, None) => continue,
                (false, _) => &mut successors.next,
            };
            if slot.is_none() {
                *slot = Some(edge.target.clone());
            }
        }
        successors
    }

    /// Ids of every node reachable from the start node, start included.
    pub fn reachable_from_start(&self) -> HashSet<&str> {
        let mut seen = HashSet::new();
        let Some(start) = self.start_node() else {
            return seen;
        };

        let mut stack = vec![start.id.as_str()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            stack.extend(self.outgoing(id).map(|e| e.target.as_str()));
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_editor_document() {
        let flow: ChatbotFlow = serde_json::from_value(json!({
            "id": "flow-1",
            "name": "Lead qualifier",
            "niche": "Property",
            "nodes": [
                { "id": "s", "type": "start", "position": { "x": 0, "y": 0 }, "data": { "label": "Start" } },
                { "id": "q", "type": "condition", "position": { "x": 0, "y": 90 },
                  "data": { "label": "Interested?", "condition": "user_input contains \"yes\"" } },
                { "id": "y", "type": "message", "data": { "message": "Great!" } },
                { "id": "n", "type": "message", "data": { "message": "Ok, bye" } }
            ],
            "edges": [
                { "id": "e1", "source": "s", "target": "q" },
                { "id": "e2", "source": "q", "target": "y", "sourceHandle": "true" },
                { "id": "e3", "source": "q", "target": "n", "sourceHandle": "false" }
            ]
        }))
        .expect("editor JSON should parse");

        assert_eq!(flow.nodes.len(), 4);
        assert_eq!(flow.start_node().map(|n| n.id.as_str()), Some("s"));
        assert_eq!(flow.niche.as_deref(), Some("Property"));

        let branches = flow.successors("q");
        assert_eq!(branches.on_true.as_deref(), Some("y"));
        assert_eq!(branches.on_false.as_deref(), Some("n"));
        assert_eq!(branches.next, None);
        assert_eq!(flow.successors("s").next.as_deref(), Some("q"));
        assert_eq!(flow.successors("y"), Successors::default());
    }

    #[test]
    fn reachability_ignores_scratch_nodes() {
        let node = |id: &str, kind: NodeKind| FlowNode { id: id.into(), kind, position: None };
        let flow = ChatbotFlow::new(
            "f",
            "f",
            vec![
                node("s", NodeKind::Start(Default::default())),
                node("a", NodeKind::Stage(Default::default())),
                node("scratch", NodeKind::Stage(Default::default())),
            ],
            vec![FlowEdge::new("s", "a")],
        );
        let reachable = flow.reachable_from_start();
        assert!(reachable.contains("a"));
        assert!(!reachable.contains("scratch"));
    }
}
