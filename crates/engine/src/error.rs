//! Engine-level error types.

use thiserror::Error;

use crate::state::ConversationKey;
use crate::store::StoreError;
use crate::validate::ValidationError;

/// Errors produced by the conversation engine.
///
/// Failures that belong to one conversation (a node error, the step guard)
/// are persisted on that conversation; only the step-level variants below
/// are returned to callers of [`crate::ConversationEngine::handle`].
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Step-level errors (nothing was written) ------

    /// The flow failed validation and was not started.
    #[error("flow '{flow_id}' is invalid: {}", summarize(.errors))]
    InvalidFlow {
        flow_id: String,
        errors: Vec<ValidationError>,
    },

    /// An inbound message arrived for a device with no flow assigned.
    #[error("no flow is assigned to device '{0}'")]
    NoFlowForDevice(String),

    /// The lease stayed busy through every retry.
    #[error("conversation {0} is busy")]
    LeaseConflict(ConversationKey),

    /// Persistence error from the store.
    #[error(transparent)]
    Store(#[from] StoreError),

    // ------ Conversation failures (recorded as `error_message`) ------

    /// More nodes were advanced in one resume step than the configured budget.
    #[error("cycle detected: more than {limit} nodes advanced in one step")]
    CycleDetected { limit: usize },

    /// The conversation points at a node that is not in the flow.
    #[error("node '{0}' not found in flow")]
    NodeNotFound(String),

    /// A node failed with a fatal error.
    #[error("node '{node_id}' failed fatally: {message}")]
    NodeFatal {
        node_id: String,
        message: String,
    },

    /// A node's retryable error was exhausted.
    #[error("node '{node_id}' exceeded retry limit: {message}")]
    NodeRetryExhausted {
        node_id: String,
        message: String,
    },
}

fn summarize(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}
