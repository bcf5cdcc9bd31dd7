//! Conversation state (the durable record of one prospect's traversal of a
//! flow on one device) and the events that drive it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// Identifies one conversation. A device belongs to exactly one user, so the
/// pair is as selective as `(user_id, device, prospect)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub device_id: String,
    pub prospect_num: String,
}

impl ConversationKey {
    pub fn new(device_id: impl Into<String>, prospect_num: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            prospect_num: prospect_num.into(),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.prospect_num)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Persisted `execution_status`. A conversation with no status is idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Active,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// Engine-level view of where a conversation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Active,
    Completed,
    Failed,
}

// ---------------------------------------------------------------------------
// ConversationState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(flatten)]
    pub key: ConversationKey,
    pub user_id: Option<String>,
    pub flow_id: Option<String>,
    pub flow_reference: Option<String>,
    /// New on every restart of the flow from `start`.
    pub execution_id: Option<Uuid>,
    pub execution_status: Option<ExecutionStatus>,
    pub current_node_id: Option<String>,
    pub last_node_id: Option<String>,
    pub waiting_for_reply: bool,
    pub reply_expires_at: Option<DateTime<Utc>>,
    /// Wake time of a pending delay.
    pub resume_at: Option<DateTime<Utc>>,
    pub stage: Option<String>,
    /// Most recent message from the prospect.
    pub conv_last: Option<String>,
    /// `user: …` / `bot: …` lines of the current run, oldest first.
    #[serde(rename = "conv_current")]
    pub transcript: Vec<String>,
    pub prospect_name: Option<String>,
    pub niche: Option<String>,
    /// Human takeover override; non-zero disables automatic handling.
    pub human: i32,
    pub last_event_id: Option<String>,
    pub error_message: Option<String>,
    pub version: i64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ConversationState {
    /// A conversation that has never run.
    pub fn idle(key: ConversationKey) -> Self {
        Self {
            key,
            user_id: None,
            flow_id: None,
            flow_reference: None,
            execution_id: None,
            execution_status: None,
            current_node_id: None,
            last_node_id: None,
            waiting_for_reply: false,
            reply_expires_at: None,
            resume_at: None,
            stage: None,
            conv_last: None,
            transcript: Vec::new(),
            prospect_name: None,
            niche: None,
            human: 0,
            last_event_id: None,
            error_message: None,
            version: 0,
            updated_at: None,
        }
    }

    pub fn phase(&self) -> Phase {
        match self.execution_status {
            None => Phase::Idle,
            Some(ExecutionStatus::Active) => Phase::Active,
            Some(ExecutionStatus::Completed) => Phase::Completed,
            Some(ExecutionStatus::Failed) => Phase::Failed,
        }
    }

    /// Discard the current run and return to idle. The flow assignment,
    /// prospect details and takeover flag survive.
    pub fn reset(&mut self) {
        self.execution_id = None;
        self.execution_status = None;
        self.current_node_id = None;
        self.last_node_id = None;
        self.clear_suspension();
        self.stage = None;
        self.conv_last = None;
        self.transcript.clear();
        self.error_message = None;
    }

    pub(crate) fn clear_suspension(&mut self) {
        self.waiting_for_reply = false;
        self.reply_expires_at = None;
        self.resume_at = None;
    }

    /// Whether a wake-up at `now` has anything to do: a delay has elapsed or
    /// a reply wait has timed out.
    pub fn wake_due(&self, now: DateTime<Utc>) -> bool {
        if self.phase() != Phase::Active {
            return false;
        }
        let delay_due = self.resume_at.is_some_and(|at| at <= now);
        let reply_expired =
            self.waiting_for_reply && self.reply_expires_at.is_some_and(|at| at <= now);
        delay_due || reply_expired
    }

    /// Append a transcript line, keeping at most `limit` of the newest.
    pub fn push_transcript(&mut self, line: String, limit: usize) {
        self.transcript.push(line);
        if self.transcript.len() > limit {
            let excess = self.transcript.len() - limit;
            self.transcript.drain(..excess);
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A message from the prospect, as delivered by the provider webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub device_id: String,
    pub prospect_num: String,
    pub message_text: String,
    pub received_at: DateTime<Utc>,
    /// Provider message id, used to drop redeliveries.
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub prospect_name: Option<String>,
}

impl InboundEvent {
    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(&self.device_id, &self.prospect_num)
    }
}

/// Everything that can trigger a resume step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Inbound(InboundEvent),
    /// Delivered by the timer collaborator for delays and reply timeouts.
    Wake {
        key: ConversationKey,
        fired_at: DateTime<Utc>,
    },
    /// Explicit flow assignment; restarts the run from `start`.
    Start {
        key: ConversationKey,
        flow_id: String,
        requested_at: DateTime<Utc>,
    },
}

impl EngineEvent {
    pub fn key(&self) -> ConversationKey {
        match self {
            Self::Inbound(inbound) => inbound.key(),
            Self::Wake { key, .. } | Self::Start { key, .. } => key.clone(),
        }
    }

    /// When the event happened; the engine's notion of "now" for the step.
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Inbound(inbound) => inbound.received_at,
            Self::Wake { fired_at, .. } => *fired_at,
            Self::Start { requested_at, .. } => *requested_at,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Inbound(_) => "inbound",
            Self::Wake { .. } => "wake",
            Self::Start { .. } => "start",
        }
    }
}
