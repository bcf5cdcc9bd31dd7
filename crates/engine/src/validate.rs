//! Flow validation. Run this before a flow is executed.
//!
//! Errors (fatal, the flow never runs):
//! 1. Node IDs must be unique within the flow.
//! 2. There must be exactly one `start` node, and nothing may point at it.
//! 3. Every edge must reference existing node IDs (both `source` and `target`).
//! 4. A `condition` node needs exactly one `true` and one `false` edge and no
//!    untagged ones; every other node has at most one outgoing edge.
//! 5. Node data must be usable: non-empty message/media/prompt, supported AI model.
//!
//! Warnings (the flow still runs):
//! - nodes unreachable from `start` (editors leave scratch nodes around);
//! - condition expressions that do not parse and will always take `false`.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use nodes::condition::{self, EvalError};
use nodes::{AiModel, NodeKind};

use crate::models::ChatbotFlow;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    #[error("flow has no start node")]
    MissingStart,

    #[error("flow has more than one start node: {0:?}")]
    MultipleStart(Vec<String>),

    #[error("start node '{start}' has an inbound edge from '{source_node}'")]
    StartHasInbound { start: String, source_node: String },

    #[error("edge references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference { node_id: String, side: &'static str },

    #[error("condition node '{node_id}' has no '{branch}' edge")]
    MissingBranch { node_id: String, branch: bool },

    #[error("condition node '{node_id}' has more than one '{branch}' edge")]
    DuplicateBranch { node_id: String, branch: bool },

    #[error("condition node '{node_id}' has an edge to '{target}' without a true/false handle")]
    UntaggedBranch { node_id: String, target: String },

    #[error("node '{node_id}' has {count} outgoing edges (at most one allowed)")]
    MultipleOutgoing { node_id: String, count: usize },

    #[error("node '{node_id}' uses unsupported AI model '{model}'")]
    UnsupportedModel { node_id: String, model: String },

    #[error("{node_type} node '{node_id}' has nothing to send")]
    EmptyPayload { node_id: String, node_type: &'static str },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    #[error("node '{0}' is not reachable from the start node")]
    Unreachable(String),

    #[error("condition on node '{node_id}' will always take the false branch: {error}")]
    ConditionWillFail { node_id: String, error: EvalError },
}

/// Result of a successful validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub warnings: Vec<ValidationWarning>,
}

/// Validate `flow`, collecting every problem rather than stopping at the first.
///
/// # Errors
/// Returns every [`ValidationError`] found; warnings are dropped in that case.
pub fn validate(flow: &ChatbotFlow) -> Result<ValidationReport, Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    // -----------------------------------------------------------------------
    // 1. Ensure node IDs are unique
    // -----------------------------------------------------------------------
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for node in &flow.nodes {
        if !seen_ids.insert(node.id.as_str()) {
            errors.push(ValidationError::DuplicateNodeId(node.id.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 2. Exactly one start node
    // -----------------------------------------------------------------------
    let starts: Vec<String> = flow
        .nodes
        .iter()
        .filter(|n| n.kind.is_start())
        .map(|n| n.id.clone())
        .collect();
    match starts.len() {
        0 => errors.push(ValidationError::MissingStart),
        1 => {
            for edge in flow.edges.iter().filter(|e| e.target == starts[0]) {
                errors.push(ValidationError::StartHasInbound {
                    start: starts[0].clone(),
                    source_node: edge.source.clone(),
                });
            }
        }
        _ => errors.push(ValidationError::MultipleStart(starts.clone())),
    }

    // -----------------------------------------------------------------------
    // 3. Validate edge endpoints
    // -----------------------------------------------------------------------
    for edge in &flow.edges {
        if !seen_ids.contains(edge.source.as_str()) {
            errors.push(ValidationError::UnknownNodeReference {
                node_id: edge.source.clone(),
                side: "source",
            });
        }
        if !seen_ids.contains(edge.target.as_str()) {
            errors.push(ValidationError::UnknownNodeReference {
                node_id: edge.target.clone(),
                side: "target",
            });
        }
    }

    // -----------------------------------------------------------------------
    // 4. Outgoing edge shape per node kind
    // -----------------------------------------------------------------------
    let mut outgoing: HashMap<&str, Vec<&crate::models::FlowEdge>> = HashMap::new();
    for edge in &flow.edges {
        outgoing.entry(edge.source.as_str()).or_default().push(edge);
    }

    for node in &flow.nodes {
        let edges = outgoing.get(node.id.as_str()).map(Vec::as_slice).unwrap_or_default();

        if node.kind.is_condition() {
            for branch in [true, false] {
                match edges.iter().filter(|e| e.branch_outcome() == Some(branch)).count() {
                    0 => errors.push(ValidationError::MissingBranch {
                        node_id: node.id.clone(),
                        branch,
                    }),
                    1 => {}
                    _ => errors.push(ValidationError::DuplicateBranch {
                        node_id: node.id.clone(),
                        branch,
                    }),
                }
            }
            for edge in edges.iter().filter(|e| e.branch_outcome().is_none()) {
                errors.push(ValidationError::UntaggedBranch {
                    node_id: node.id.clone(),
                    target: edge.target.clone(),
                });
            }
        } else if edges.len() > 1 {
            errors.push(ValidationError::MultipleOutgoing {
                node_id: node.id.clone(),
                count: edges.len(),
            });
        }
    }

    // -----------------------------------------------------------------------
    // 5. Node data
    // -----------------------------------------------------------------------
    for node in &flow.nodes {
        let empty = |text: &str| text.trim().is_empty();
        let nothing_to_send = match &node.kind {
            NodeKind::Message(data) => empty(&data.message),
            NodeKind::Image(data) | NodeKind::Audio(data) | NodeKind::Video(data) => {
                empty(&data.media_url)
            }
            NodeKind::AiPrompt(data) => {
                if data.model.parse::<AiModel>().is_err() {
                    errors.push(ValidationError::UnsupportedModel {
                        node_id: node.id.clone(),
                        model: data.model.clone(),
                    });
                }
                empty(&data.prompt)
            }
            NodeKind::Condition(data) => {
                if let Err(error) = condition::parse(&data.condition) {
                    warnings.push(ValidationWarning::ConditionWillFail {
                        node_id: node.id.clone(),
                        error,
                    });
                }
                false
            }
            NodeKind::Start(_)
            | NodeKind::Delay(_)
            | NodeKind::Stage(_)
            | NodeKind::UserReply(_) => false,
        };
        if nothing_to_send {
            errors.push(ValidationError::EmptyPayload {
                node_id: node.id.clone(),
                node_type: node.kind.type_name(),
            });
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    // -----------------------------------------------------------------------
    // Orphans (warning only)
    // -----------------------------------------------------------------------
    let reachable = flow.reachable_from_start();
    for node in &flow.nodes {
        if !reachable.contains(node.id.as_str()) {
            warnings.push(ValidationWarning::Unreachable(node.id.clone()));
        }
    }

    Ok(ValidationReport { warnings })
}
