//! `engine` crate: flow document model, validation, conversation state and
//! the resume-step execution engine.

pub mod models;
pub mod error;
pub mod validate;
pub mod state;
pub mod store;
pub mod executor;

pub use models::{ChatbotFlow, FlowEdge, FlowNode};
pub use error::EngineError;
pub use validate::{validate, ValidationError, ValidationReport, ValidationWarning};
pub use state::{ConversationKey, ConversationState, EngineEvent, ExecutionStatus, InboundEvent, Phase};
pub use store::{ConversationStore, FlowSource, LeaseToken, MemoryFlows, MemoryStore, PgStore, StoreError};
pub use executor::{ConversationEngine, Disposition, EngineConfig, StepOutcome};

#[cfg(test)]
mod engine_tests;
