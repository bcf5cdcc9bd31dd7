//! In-memory store and flow source.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ConversationStore, FlowSource, LeaseToken, StoreError};
use crate::models::ChatbotFlow;
use crate::state::{ConversationKey, ConversationState};

#[derive(Debug, Default)]
struct Slot {
    state: Option<ConversationState>,
    lease: Option<(LeaseToken, DateTime<Utc>)>,
}

/// Conversation store backed by a `HashMap`; leases expire on wall-clock time.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<ConversationKey, Slot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite a conversation directly, bypassing the lease.
    pub fn put(&self, state: ConversationState) {
        let key = state.key.clone();
        self.lock().entry(key).or_default().state = Some(state);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConversationKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn acquire_lease(
        &self,
        key: &ConversationKey,
        ttl: Duration,
    ) -> Result<LeaseToken, StoreError> {
        let now = Utc::now();
        let mut slots = self.lock();
        let slot = slots.entry(key.clone()).or_default();

        if let Some((_, expires_at)) = slot.lease {
            if expires_at > now {
                return Err(StoreError::LeaseConflict(key.clone()));
            }
        }

        let token = LeaseToken::new();
        slot.lease = Some((token, expiry(now, ttl)));
        Ok(token)
    }

    async fn renew_lease(
        &self,
        key: &ConversationKey,
        lease: LeaseToken,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        match self.lock().get_mut(key) {
            Some(slot) if slot.lease.is_some_and(|(holder, _)| holder == lease) => {
                slot.lease = Some((lease, expiry(Utc::now(), ttl)));
                Ok(())
            }
            _ => Err(StoreError::LeaseLost(key.clone())),
        }
    }

    async fn release_lease(&self, key: &ConversationKey, lease: LeaseToken) -> Result<(), StoreError> {
        if let Some(slot) = self.lock().get_mut(key) {
            if slot.lease.is_some_and(|(holder, _)| holder == lease) {
                slot.lease = None;
            }
        }
        Ok(())
    }

    async fn load(&self, key: &ConversationKey) -> Result<Option<ConversationState>, StoreError> {
        Ok(self.lock().get(key).and_then(|slot| slot.state.clone()))
    }

    async fn save(&self, state: &ConversationState, lease: LeaseToken) -> Result<(), StoreError> {
        let mut slots = self.lock();
        match slots.get_mut(&state.key) {
            Some(slot) if slot.lease.is_some_and(|(holder, _)| holder == lease) => {
                slot.state = Some(state.clone());
                Ok(())
            }
            _ => Err(StoreError::LeaseLost(state.key.clone())),
        }
    }

    async fn due_wakeups(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ConversationKey>, StoreError> {
        let mut due: Vec<_> = self
            .lock()
            .values()
            .filter_map(|slot| slot.state.as_ref())
            .filter(|state| state.human == 0 && state.wake_due(now))
            .map(|state| (state.resume_at.or(state.reply_expires_at), state.key.clone()))
            .collect();
        due.sort();
        Ok(due.into_iter().take(limit).map(|(_, key)| key).collect())
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Flow source backed by a `HashMap`, with per-device assignments.
#[derive(Debug, Default)]
pub struct MemoryFlows {
    flows: Mutex<HashMap<String, ChatbotFlow>>,
    devices: Mutex<HashMap<String, String>>,
}

impl MemoryFlows {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a flow; if it names a device, assign it to that device too.
    pub fn insert(&self, flow: ChatbotFlow) {
        if let Some(device) = &flow.id_device {
            self.assign(device.clone(), flow.id.clone());
        }
        self.flows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(flow.id.clone(), flow);
    }

    pub fn assign(&self, device_id: impl Into<String>, flow_id: impl Into<String>) {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device_id.into(), flow_id.into());
    }
}

#[async_trait]
impl FlowSource for MemoryFlows {
    async fn load_flow(&self, flow_id: &str) -> Result<ChatbotFlow, StoreError> {
        self.flows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(flow_id)
            .cloned()
            .ok_or_else(|| StoreError::FlowNotFound(flow_id.to_owned()))
    }

    async fn flow_for_device(&self, device_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .cloned())
    }
}
