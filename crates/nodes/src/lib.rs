//! `nodes` crate: node kinds, the `ExecutableNode` trait and the built-in
//! executors for every node type a chatbot flow can contain.
//!
//! The engine crate walks the flow graph and dispatches each node through
//! [`ExecutableNode`]. Everything a node needs from the outside world (the
//! messaging provider, the AI provider) arrives through
//! [`traits::Collaborators`], so executors never touch persistence.

pub mod adapters;
pub mod builtin;
pub mod condition;
pub mod error;
pub mod kinds;
pub mod mock;
pub mod providers;
pub mod traits;

pub use error::{AiError, NodeError, ProviderError};
pub use kinds::NodeKind;
pub use providers::{AiModel, AiProvider, ContentKind, MessagingProvider, OutboundContent};
pub use traits::{ExecutableNode, ExecutionResult, SuspendReason, TerminalStatus};
