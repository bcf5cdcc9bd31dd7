//! Node-level error types.

use thiserror::Error;

/// Errors returned by a node's `execute` method.
///
/// The engine uses the variant to decide retry behaviour:
/// - `Retryable`: the node is re-run with exponential back-off.
/// - `Fatal`: the conversation is immediately marked as failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Transient failure; the engine should re-try the node.
    #[error("retryable node error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal node error: {0}")]
    Fatal(String),
}

impl NodeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Failure reported by a messaging provider.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("provider transport error: {0}")]
    Transport(String),

    #[error("provider call timed out")]
    Timeout,
}

/// Failure reported by an AI completion provider.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AiError {
    #[error("AI request failed: {0}")]
    Request(String),

    #[error("AI provider returned an error: {0}")]
    Api(String),

    #[error("AI provider returned no choices")]
    EmptyResponse,

    #[error("AI call timed out")]
    Timeout,

    #[error("unsupported AI model '{0}'")]
    UnsupportedModel(String),
}

impl From<ProviderError> for NodeError {
    fn from(err: ProviderError) -> Self {
        Self::Retryable(err.to_string())
    }
}

impl From<AiError> for NodeError {
    fn from(err: AiError) -> Self {
        match err {
            AiError::UnsupportedModel(_) => Self::Fatal(err.to_string()),
            other => Self::Retryable(other.to_string()),
        }
    }
}
