//! Persistence seams of the engine.
//!
//! [`ConversationStore`] owns conversation rows and the per-conversation
//! lease; [`FlowSource`] hands out flow snapshots. Both have an in-memory
//! implementation (tests, single-process use) and a Postgres one.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::ChatbotFlow;
use crate::state::{ConversationKey, ConversationState};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryFlows, MemoryStore};
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another resume step holds the lease on this conversation.
    #[error("conversation {0} is leased by another step")]
    LeaseConflict(ConversationKey),

    /// The lease expired and was taken over before the save.
    #[error("lease on conversation {0} was lost")]
    LeaseLost(ConversationKey),

    #[error("flow '{0}' not found")]
    FlowNotFound(String),

    /// A persisted record could not be mapped back to a domain value.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}

/// Proof of holding the lease on one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseToken(pub Uuid);

impl LeaseToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LeaseToken {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Claim exclusive access to `key` for at most `ttl`.
    ///
    /// # Errors
    /// `StoreError::LeaseConflict` while another live lease exists.
    async fn acquire_lease(
        &self,
        key: &ConversationKey,
        ttl: Duration,
    ) -> Result<LeaseToken, StoreError>;

    /// Push the expiry of a held lease out to `ttl` from now.
    ///
    /// # Errors
    /// `StoreError::LeaseLost` once another step has taken the lease over.
    async fn renew_lease(
        &self,
        key: &ConversationKey,
        lease: LeaseToken,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    async fn release_lease(&self, key: &ConversationKey, lease: LeaseToken) -> Result<(), StoreError>;

    async fn load(&self, key: &ConversationKey) -> Result<Option<ConversationState>, StoreError>;

    /// Persist `state` under the lease.
    ///
    /// # Errors
    /// `StoreError::LeaseLost` if `lease` no longer owns the conversation.
    async fn save(&self, state: &ConversationState, lease: LeaseToken) -> Result<(), StoreError>;

    /// Conversations with a timer due at `now` (see [`ConversationState::wake_due`]).
    async fn due_wakeups(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ConversationKey>, StoreError>;
}

#[async_trait]
pub trait FlowSource: Send + Sync {
    /// # Errors
    /// `StoreError::FlowNotFound` for an unknown id.
    async fn load_flow(&self, flow_id: &str) -> Result<ChatbotFlow, StoreError>;

    /// The flow a device runs for conversations without an explicit assignment.
    async fn flow_for_device(&self, device_id: &str) -> Result<Option<String>, StoreError>;
}
