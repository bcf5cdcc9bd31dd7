//! The `ExecutableNode` trait: the contract every node kind must fulfil.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::providers::{AiProvider, MessagingProvider, OutboundContent};
use crate::NodeError;

/// Where a node may go next, resolved by the engine from the flow's edges.
///
/// Defined here (in the nodes crate) so executors can pick a target without
/// depending on the engine's graph types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Successors {
    /// The single untagged outgoing edge, for every kind except `condition`.
    pub next: Option<String>,
    /// Targets of the `true`/`false` handles of a `condition` node.
    pub on_true: Option<String>,
    pub on_false: Option<String>,
}

impl Successors {
    /// Advance along the untagged edge, or finish the run at a leaf.
    pub fn advance_or_complete(&self) -> ExecutionResult {
        match &self.next {
            Some(id) => ExecutionResult::Advance(id.clone()),
            None => ExecutionResult::Terminate(TerminalStatus::Completed),
        }
    }
}

/// Why a resume step stopped without finishing the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuspendReason {
    /// Waiting for the prospect to answer. `expires_at` is `None` when the
    /// node waits indefinitely.
    AwaitingReply {
        timeout_ms: u64,
        expires_at: Option<DateTime<Utc>>,
    },
    /// A delay node scheduled a wake-up; an external timer re-delivers the
    /// resume event at or after `resume_at`.
    DelayScheduled { resume_at: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    Completed,
    Failed,
}

/// Outcome of executing one node. A node-level failure is the `Err` side of
/// [`ExecutableNode::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    Advance(String),
    Suspend(SuspendReason),
    Terminate(TerminalStatus),
}

/// External services available to executors, plus the per-call timeout the
/// engine wants applied to them.
#[derive(Clone)]
pub struct Collaborators {
    pub messaging: Arc<dyn MessagingProvider>,
    pub ai: Arc<dyn AiProvider>,
    pub call_timeout: Duration,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

/// Per-node view of the conversation, built by the engine for every node it
/// runs. `stage` and `sent` are the only fields an executor writes; the
/// engine folds them back into the conversation state afterwards.
#[derive(Debug)]
pub struct ExecutionContext<'a> {
    pub node_id: &'a str,
    pub execution_id: Uuid,
    pub device_id: &'a str,
    pub prospect_num: &'a str,
    pub niche: Option<&'a str>,
    /// The prospect's most recent message.
    pub user_input: &'a str,
    /// Transcript of the current run, oldest first.
    pub previous_messages: &'a [String],
    pub stage: Option<String>,
    pub successors: Successors,
    /// Time of the event driving this resume step.
    pub now: DateTime<Utc>,
    pub collaborators: &'a Collaborators,
    /// Content successfully delivered by this node.
    pub sent: Vec<OutboundContent>,
}

/// The core node trait.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    /// Run the node against the conversation and report where to go next.
    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult, NodeError>;
}
