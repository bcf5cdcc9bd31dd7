//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models; they carry no domain behaviour.
//! Domain types live in the `engine` crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// chatbot_flows
// ---------------------------------------------------------------------------

/// A persisted flow document row. `nodes` and `edges` hold the editor's JSON.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FlowRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub niche: Option<String>,
    pub id_device: Option<String>,
    pub user_id: Option<String>,
    pub nodes: serde_json::Value,
    pub edges: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// conversations
// ---------------------------------------------------------------------------

/// One conversation row. Lease columns are managed by the repository
/// functions and are not part of the row written back on save.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ConversationRow {
    pub id_device: String,
    pub prospect_num: String,
    pub user_id: Option<String>,
    pub flow_id: Option<String>,
    pub flow_reference: Option<String>,
    pub execution_id: Option<Uuid>,
    /// `active`, `completed`, `failed`, or NULL for an idle conversation.
    pub execution_status: Option<String>,
    pub current_node_id: Option<String>,
    pub last_node_id: Option<String>,
    pub waiting_for_reply: bool,
    pub reply_expires_at: Option<DateTime<Utc>>,
    pub resume_at: Option<DateTime<Utc>>,
    pub stage: Option<String>,
    pub conv_last: Option<String>,
    pub conv_current: Option<String>,
    pub prospect_name: Option<String>,
    pub niche: Option<String>,
    pub human: i32,
    pub last_event_id: Option<String>,
    pub error_message: Option<String>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// Key of a conversation whose timer has fired.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct DueWakeupRow {
    pub id_device: String,
    pub prospect_num: String,
}
